use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Success envelope: every 2xx response carries `{statusCode, data, message}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_camel_case() {
        let env = ApiResponse::ok(serde_json::json!({"id": 1}), "fetched");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"statusCode\":200"));
        assert!(json.contains("\"data\":{\"id\":1}"));
        assert!(json.contains("\"message\":\"fetched\""));
    }

    #[test]
    fn created_envelope_carries_201() {
        let env = ApiResponse::created(serde_json::json!({}), "User registered successfully");
        assert_eq!(env.status_code, 201);
    }
}
