use serde::{Deserialize, Serialize};

use crate::users::repo_types::PublicUser;

/// Request body for login. Either identifier is accepted.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
}

/// Request body for token refresh; the cookie takes precedence over this.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(alias = "oldPassword")]
    pub old_password: String,
    #[serde(alias = "newPassword")]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
}

/// Login payload: stripped user plus both tokens in the body, mirroring the
/// cookies.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshData {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_accepts_username_only() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"username":"chaiaurcode","password":"secret"}"#).unwrap();
        assert_eq!(req.username.as_deref(), Some("chaiaurcode"));
        assert!(req.email.is_none());
    }

    #[test]
    fn refresh_request_accepts_both_field_spellings() {
        let camel: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(camel.refresh_token.as_deref(), Some("abc"));

        let snake: RefreshRequest =
            serde_json::from_str(r#"{"refresh_token":"abc"}"#).unwrap();
        assert_eq!(snake.refresh_token.as_deref(), Some("abc"));

        let empty: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.refresh_token.is_none());
    }

    #[test]
    fn change_password_accepts_camel_case() {
        let req: ChangePasswordRequest =
            serde_json::from_str(r#"{"oldPassword":"old","newPassword":"new"}"#).unwrap();
        assert_eq!(req.old_password, "old");
        assert_eq!(req.new_password, "new");
    }

    #[test]
    fn login_data_serializes_tokens_camel_case() {
        let data = RefreshData {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"accessToken\":\"a\""));
        assert!(json.contains("\"refreshToken\":\"r\""));
    }
}
