use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    error::AccountError,
    repo_types::{Account, AccountQuery},
};

/// Persistence of accounts. Implementations must enforce a unique index on
/// the normalized email and report a violation as `AccountError::Uniqueness`.
///
/// Writes touch only the columns they own plus `updated_at`, so a flag or
/// credential change is never overwritten by a stale copy of the record.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: Account) -> Result<Account, AccountError>;
    async fn find_by_normalized_email(&self, email: &str) -> Result<Option<Account>, AccountError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountError>;
    /// Writes the editable profile columns (name, university, department,
    /// student_id, grade, bio).
    async fn update(&self, account: &Account) -> Result<Account, AccountError>;
    /// Sets `last_login` if the account is still active; `None` otherwise.
    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Account>, AccountError>;
    async fn set_password_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
        now: OffsetDateTime,
    ) -> Result<Account, AccountError>;
    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> Result<Account, AccountError>;
    /// Swaps the avatar key and returns the account with the key it replaced.
    async fn replace_avatar(
        &self,
        id: Uuid,
        key: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(Account, Option<String>), AccountError>;
    async fn list(&self, query: &AccountQuery) -> Result<Vec<Account>, AccountError>;
}

const COLUMNS: &str = "id, email, password_hash, name, university, department, student_id, \
     grade, bio, avatar, is_active, is_staff, is_superuser, last_login, created_at, updated_at";

#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_err(e: sqlx::Error, email: &str, what: &'static str) -> AccountError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return AccountError::Uniqueness(email.to_string());
        }
    }
    AccountError::Storage(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert(&self, a: Account) -> Result<Account, AccountError> {
        let sql = format!(
            r#"
            INSERT INTO users ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(a.id)
            .bind(&a.email)
            .bind(&a.password_hash)
            .bind(&a.name)
            .bind(&a.university)
            .bind(&a.department)
            .bind(&a.student_id)
            .bind(a.grade)
            .bind(&a.bio)
            .bind(&a.avatar)
            .bind(a.is_active)
            .bind(a.is_staff)
            .bind(a.is_superuser)
            .bind(a.last_login)
            .bind(a.created_at)
            .bind(a.updated_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_err(e, &a.email, "insert account"))
    }

    async fn find_by_normalized_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let sql = format!("SELECT {COLUMNS} FROM users WHERE email = $1");
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find account by email")?;
        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountError> {
        let sql = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find account by id")?;
        Ok(account)
    }

    async fn update(&self, a: &Account) -> Result<Account, AccountError> {
        let sql = format!(
            r#"
            UPDATE users
               SET name = $2, university = $3, department = $4, student_id = $5,
                   grade = $6, bio = $7, updated_at = $8
             WHERE id = $1
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(a.id)
            .bind(&a.name)
            .bind(&a.university)
            .bind(&a.department)
            .bind(&a.student_id)
            .bind(a.grade)
            .bind(&a.bio)
            .bind(a.updated_at)
            .fetch_optional(&self.db)
            .await
            .context("update account profile")?
            .ok_or(AccountError::NotFound)
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Account>, AccountError> {
        let sql = format!(
            "UPDATE users SET last_login = $2, updated_at = $2 \
             WHERE id = $1 AND is_active RETURNING {COLUMNS}"
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.db)
            .await
            .context("record login")?;
        Ok(account)
    }

    async fn set_password_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
        now: OffsetDateTime,
    ) -> Result<Account, AccountError> {
        let sql = format!(
            "UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("set password hash")?
            .ok_or(AccountError::NotFound)
    }

    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> Result<Account, AccountError> {
        let sql = format!(
            "UPDATE users SET is_active = $2, updated_at = $3 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(active)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("set account activation")?
            .ok_or(AccountError::NotFound)
    }

    async fn replace_avatar(
        &self,
        id: Uuid,
        key: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(Account, Option<String>), AccountError> {
        // the row lock makes the returned previous key the one actually replaced
        let sql = format!(
            r#"
            WITH old AS (
                SELECT id AS old_id, avatar AS previous_avatar
                  FROM users WHERE id = $1 FOR UPDATE
            )
            UPDATE users
               SET avatar = $2, updated_at = $3
              FROM old
             WHERE users.id = old.old_id
            RETURNING {COLUMNS}, previous_avatar
            "#
        );
        let row = sqlx::query_as::<_, AvatarSwap>(&sql)
            .bind(id)
            .bind(key)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("replace avatar")?
            .ok_or(AccountError::NotFound)?;
        Ok((row.account, row.previous_avatar))
    }

    async fn list(&self, q: &AccountQuery) -> Result<Vec<Account>, AccountError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM users WHERE TRUE"));
        if let Some(v) = q.is_active {
            qb.push(" AND is_active = ").push_bind(v);
        }
        if let Some(v) = q.is_staff {
            qb.push(" AND is_staff = ").push_bind(v);
        }
        if let Some(v) = &q.university {
            qb.push(" AND university = ").push_bind(v.clone());
        }
        if let Some(v) = q.grade {
            qb.push(" AND grade = ").push_bind(v);
        }
        if let Some(search) = &q.search {
            let pattern = format!("%{}%", escape_like(search));
            qb.push(" AND (email ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR student_id ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(q.limit)
            .push(" OFFSET ")
            .push_bind(q.offset);

        let rows = qb
            .build_query_as::<Account>()
            .fetch_all(&self.db)
            .await
            .context("list accounts")?;
        Ok(rows)
    }
}

#[derive(FromRow)]
struct AvatarSwap {
    #[sqlx(flatten)]
    account: Account,
    previous_avatar: Option<String>,
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("kim"), "kim");
    }

    #[test]
    fn non_database_errors_become_storage_errors() {
        let err = map_write_err(sqlx::Error::RowNotFound, "a@b.cd", "insert account");
        assert!(matches!(err, AccountError::Storage(_)));
    }
}
