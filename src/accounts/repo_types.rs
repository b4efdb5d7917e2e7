use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::AccountError;

pub const NAME_MAX_LEN: usize = 50;
pub const UNIVERSITY_MAX_LEN: usize = 100;
pub const DEPARTMENT_MAX_LEN: usize = 100;
pub const STUDENT_ID_MAX_LEN: usize = 20;

/// Account record in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String, // normalized, unique
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 PHC string, never exposed
    pub name: String,
    pub university: String,
    pub department: String,
    pub student_id: String,
    pub grade: Option<i32>,
    pub bio: String,
    pub avatar: Option<String>, // object storage key
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Builds an unsaved account from an already-normalized email.
    /// No password is set; flags not overridden by `fields` keep their defaults.
    pub fn new(email: String, fields: AccountFields, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: None,
            name: fields.name.trim().to_string(),
            university: fields.university,
            department: fields.department,
            student_id: fields.student_id,
            grade: fields.grade,
            bio: fields.bio,
            avatar: fields.avatar,
            is_active: fields.is_active.unwrap_or(true),
            is_staff: fields.is_staff.unwrap_or(false),
            is_superuser: fields.is_superuser.unwrap_or(false),
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the record as modified. Every mutating method goes through here.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now;
    }

    pub fn has_usable_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn set_password_hash(&mut self, hash: Option<String>, now: OffsetDateTime) {
        self.password_hash = hash;
        self.touch(now);
    }

    pub fn apply_update(&mut self, update: ProfileUpdate, now: OffsetDateTime) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(university) = update.university {
            self.university = university;
        }
        if let Some(department) = update.department {
            self.department = department;
        }
        if let Some(student_id) = update.student_id {
            self.student_id = student_id;
        }
        if let Some(grade) = update.grade {
            self.grade = grade;
        }
        if let Some(bio) = update.bio {
            self.bio = bio;
        }
        self.touch(now);
    }

    /// Replaces the avatar reference and hands back the old one.
    pub fn replace_avatar(&mut self, key: Option<String>, now: OffsetDateTime) -> Option<String> {
        let previous = std::mem::replace(&mut self.avatar, key);
        self.touch(now);
        previous
    }

    pub fn set_active(&mut self, active: bool, now: OffsetDateTime) {
        self.is_active = active;
        self.touch(now);
    }

    pub fn record_login(&mut self, now: OffsetDateTime) {
        self.last_login = Some(now);
        self.touch(now);
    }

    /// Checks the profile constraints the store relies on.
    pub fn validate(&self) -> Result<(), AccountError> {
        if self.name.is_empty() {
            return Err(AccountError::validation("name is required"));
        }
        check_len("name", &self.name, NAME_MAX_LEN)?;
        check_len("university", &self.university, UNIVERSITY_MAX_LEN)?;
        check_len("department", &self.department, DEPARTMENT_MAX_LEN)?;
        check_len("student_id", &self.student_id, STUDENT_ID_MAX_LEN)?;
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), AccountError> {
    if value.chars().count() > max {
        return Err(AccountError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.email)
    }
}

/// Extra attributes supplied when an account is created.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountFields {
    #[serde(default)]
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
    pub avatar: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

impl AccountFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial profile edit. `None` leaves a field unchanged; text fields are
/// cleared with `""` and the grade with an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub university: Option<String>,
    pub department: Option<String>,
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub grade: Option<Option<i32>>,
    pub bio: Option<String>,
}

/// Maps a present key to `Some`, so `null` survives as `Some(None)`.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Filters for the administrative account listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountQuery {
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub university: Option<String>,
    pub grade: Option<i32>,
    /// Case-insensitive match on email, name or student id.
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub const MAX_PAGE_SIZE: i64 = 100;

fn default_limit() -> i64 {
    20
}

impl AccountQuery {
    pub fn clamped(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.offset = self.offset.max(0);
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    /// In-process equivalent of the SQL filter.
    pub fn matches(&self, account: &Account) -> bool {
        if self.is_active.is_some_and(|v| v != account.is_active) {
            return false;
        }
        if self.is_staff.is_some_and(|v| v != account.is_staff) {
            return false;
        }
        if let Some(university) = &self.university {
            if &account.university != university {
                return false;
            }
        }
        if self.grade.is_some() && self.grade != account.grade {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = [&account.email, &account.name, &account.student_id]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn sample() -> Account {
        Account::new(
            "kim@example.com".into(),
            AccountFields {
                university: "Seoul Univ".into(),
                grade: Some(2),
                ..AccountFields::named("Kim")
            },
            datetime!(2025-03-02 09:00 UTC),
        )
    }

    #[test]
    fn new_applies_defaults() {
        let acc = sample();
        assert!(acc.is_active);
        assert!(!acc.is_staff);
        assert!(!acc.is_superuser);
        assert!(!acc.has_usable_password());
        assert_eq!(acc.created_at, acc.updated_at);
        assert!(acc.last_login.is_none());
    }

    #[test]
    fn mutations_touch_updated_at_only() {
        let mut acc = sample();
        let created = acc.created_at;
        let later = created + Duration::hours(1);

        acc.apply_update(
            ProfileUpdate {
                bio: Some("hello".into()),
                ..Default::default()
            },
            later,
        );
        assert_eq!(acc.bio, "hello");
        assert_eq!(acc.updated_at, later);
        assert_eq!(acc.created_at, created);

        let later = later + Duration::hours(1);
        acc.set_active(false, later);
        assert_eq!(acc.updated_at, later);

        let later = later + Duration::hours(1);
        let prev = acc.replace_avatar(Some("avatars/x.png".into()), later);
        assert!(prev.is_none());
        assert_eq!(acc.updated_at, later);
        assert_eq!(acc.created_at, created);
    }

    #[test]
    fn validate_enforces_lengths() {
        let mut acc = sample();
        assert!(acc.validate().is_ok());

        acc.name = "x".repeat(NAME_MAX_LEN);
        assert!(acc.validate().is_ok());
        acc.name = "x".repeat(NAME_MAX_LEN + 1);
        assert!(matches!(acc.validate(), Err(AccountError::Validation(_))));

        acc.name = String::new();
        match acc.validate() {
            Err(AccountError::Validation(msg)) => assert_eq!(msg, "name is required"),
            other => panic!("unexpected: {other:?}"),
        }

        let mut acc = sample();
        acc.student_id = "1".repeat(STUDENT_ID_MAX_LEN + 1);
        assert!(acc.validate().is_err());
    }

    #[test]
    fn display_matches_name_and_email() {
        assert_eq!(sample().to_string(), "Kim (kim@example.com)");
    }

    #[test]
    fn serialization_hides_password_hash() {
        let mut acc = sample();
        acc.password_hash = Some("$argon2id$v=19$secret".into());
        let json = serde_json::to_string(&acc).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password_hash"));
        assert!(json.contains("2025-03-02T09:00:00Z"));
    }

    #[test]
    fn fields_reject_unknown_keys() {
        let err = serde_json::from_str::<AccountFields>(r#"{"name":"Kim","nickname":"k"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn grade_distinguishes_missing_from_null() {
        let missing: ProfileUpdate = serde_json::from_str(r#"{"bio":"hi"}"#).unwrap();
        assert_eq!(missing.grade, None);
        let cleared: ProfileUpdate = serde_json::from_str(r#"{"grade":null}"#).unwrap();
        assert_eq!(cleared.grade, Some(None));
        let set: ProfileUpdate = serde_json::from_str(r#"{"grade":3}"#).unwrap();
        assert_eq!(set.grade, Some(Some(3)));

        let mut acc = sample();
        let now = acc.created_at;
        acc.apply_update(missing, now);
        assert_eq!(acc.grade, Some(2));
        acc.apply_update(cleared, now);
        assert_eq!(acc.grade, None);
    }

    #[test]
    fn query_matching() {
        let acc = sample();
        let q = AccountQuery {
            search: Some("KIM".into()),
            ..Default::default()
        };
        assert!(q.matches(&acc));

        let q = AccountQuery {
            grade: Some(3),
            ..Default::default()
        };
        assert!(!q.matches(&acc));

        let q = AccountQuery {
            university: Some("Seoul Univ".into()),
            is_active: Some(true),
            ..Default::default()
        };
        assert!(q.matches(&acc));
    }

    #[test]
    fn query_clamps_paging() {
        let q = AccountQuery {
            limit: 10_000,
            offset: -5,
            search: Some("   ".into()),
            ..Default::default()
        }
        .clamped();
        assert_eq!(q.limit, MAX_PAGE_SIZE);
        assert_eq!(q.offset, 0);
        assert!(q.search.is_none());
    }
}
