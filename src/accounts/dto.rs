use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Account, AccountFields};

/// Request body for self-service registration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub student_id: String,
    pub grade: Option<i32>,
    #[serde(default)]
    pub bio: String,
}

impl RegisterRequest {
    /// Profile attributes only; privilege flags are never taken from clients.
    pub fn fields(&self) -> AccountFields {
        AccountFields {
            name: self.name.clone(),
            university: self.university.clone(),
            department: self.department.clone(),
            student_id: self.student_id.clone(),
            grade: self.grade,
            bio: self.bio.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Response returned after register, login or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub account: PublicAccount,
}

/// Account as shown to clients.
#[derive(Debug, Serialize)]
pub struct PublicAccount {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub university: String,
    pub department: String,
    pub student_id: String,
    pub grade: Option<i32>,
    pub bio: String,
    pub has_avatar: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Account> for PublicAccount {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            email: a.email,
            name: a.name,
            university: a.university,
            department: a.department,
            student_id: a.student_id,
            grade: a.grade,
            bio: a.bio,
            has_avatar: a.avatar.is_some(),
            is_active: a.is_active,
            is_staff: a.is_staff,
            is_superuser: a.is_superuser,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}
