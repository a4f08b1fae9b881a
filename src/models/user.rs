use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

pub const USERNAME_MAX: usize = 150;

/// An account that can log in and vote.
/// The password hash lives in [`UserCredentials`] and is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// A user row together with its stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Input for `createuser`.
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.username)
    }
}

impl CreateUserRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        CreateUserRequest {
            username: username.into(),
            password: password.into(),
            email: None,
            first_name: String::new(),
            last_name: String::new(),
            is_staff: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_username(&self.username)?;

        if self.password.is_empty() {
            return Err("Password cannot be empty".to_string());
        }

        if let Some(ref email) = self.email {
            if email.trim().is_empty() {
                return Err("Email cannot be empty".to_string());
            }

            if !is_valid_email(email.trim()) {
                return Err("Invalid email format".to_string());
            }

            if email.len() > 254 {
                return Err("Email cannot exceed 254 characters".to_string());
            }
        }

        Ok(())
    }

    pub fn get_normalized_username(&self) -> String {
        self.username.trim().to_string()
    }

    pub fn get_normalized_email(&self) -> Option<String> {
        self.email.as_ref().map(|e| e.trim().to_lowercase())
    }
}

/// Usernames are 1..=150 characters of letters, digits and `@.+-_`.
pub fn validate_username(username: &str) -> Result<(), String> {
    let username = username.trim();

    if username.is_empty() {
        return Err("Username cannot be empty".to_string());
    }

    if username.chars().count() > USERNAME_MAX {
        return Err(format!("Username cannot exceed {} characters", USERNAME_MAX));
    }

    if !username.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c)) {
        return Err("Username may only contain letters, digits and @/./+/-/_".to_string());
    }

    Ok(())
}

/// Simple email format check without regular expressions.
fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();

    if parts.len() != 2 {
        return false;
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || local.len() > 64 {
        return false;
    }

    if domain.is_empty() || domain.len() > 253 || !domain.contains('.') {
        return false;
    }

    let valid_chars = |c: char| c.is_alphanumeric() || ".-_+".contains(c);

    local.chars().all(valid_chars) && domain.chars().all(|c| c.is_alphanumeric() || ".-".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_request_validation() {
        let valid = CreateUserRequest::new("demo1", "Hackme11");
        assert!(valid.validate().is_ok());

        let with_email = CreateUserRequest {
            email: Some("tester@nowhere.com".to_string()),
            ..valid.clone()
        };
        assert!(with_email.validate().is_ok());

        let empty_password = CreateUserRequest::new("demo1", "");
        assert!(empty_password.validate().is_err());

        let bad_email = CreateUserRequest {
            email: Some("not-an-email".to_string()),
            ..valid.clone()
        };
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("harry.potter+test@ku").is_ok());
        assert!(validate_username("user_1-2").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("semi;colon").is_err());
        assert!(validate_username(&"u".repeat(USERNAME_MAX)).is_ok());
        assert!(validate_username(&"u".repeat(USERNAME_MAX + 1)).is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("user+tag@example.org"));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@domain"));
    }

    #[test]
    fn test_normalization() {
        let request = CreateUserRequest {
            username: "  tester ".to_string(),
            email: Some(" Tester@Nowhere.COM ".to_string()),
            ..CreateUserRequest::new("", "pw")
        };
        assert_eq!(request.get_normalized_username(), "tester");
        assert_eq!(request.get_normalized_email().as_deref(), Some("tester@nowhere.com"));
    }

    #[test]
    fn test_user_serialization_has_no_password() {
        let user = User {
            id: 1,
            username: "demo1".to_string(),
            email: None,
            first_name: String::new(),
            last_name: String::new(),
            is_staff: false,
            is_active: true,
            date_joined: DateTime::parse_from_rfc3339("2024-09-01T00:00:00Z").unwrap().with_timezone(&Utc),
            last_login: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains(r#""username":"demo1""#));
    }
}
