use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    error::AccountError,
    repo::AccountStore,
    repo_types::{Account, AccountQuery},
};

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, Account>,
    by_email: HashMap<String, Uuid>,
}

/// Process-local account store. The email index is checked and written under
/// one lock, so concurrent inserts of the same email cannot both succeed.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Inner>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn modify(
        &self,
        id: Uuid,
        change: impl FnOnce(&mut Account),
    ) -> Result<Account, AccountError> {
        let mut inner = self.lock();
        let stored = inner.by_id.get_mut(&id).ok_or(AccountError::NotFound)?;
        change(stored);
        Ok(stored.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn insert(&self, account: Account) -> Result<Account, AccountError> {
        let mut inner = self.lock();
        if inner.by_email.contains_key(&account.email) {
            return Err(AccountError::Uniqueness(account.email));
        }
        inner.by_email.insert(account.email.clone(), account.id);
        inner.by_id.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_normalized_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let inner = self.lock();
        Ok(inner
            .by_email
            .get(email)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountError> {
        Ok(self.lock().by_id.get(&id).cloned())
    }

    async fn update(&self, account: &Account) -> Result<Account, AccountError> {
        self.modify(account.id, |stored| {
            stored.name = account.name.clone();
            stored.university = account.university.clone();
            stored.department = account.department.clone();
            stored.student_id = account.student_id.clone();
            stored.grade = account.grade;
            stored.bio = account.bio.clone();
            stored.touch(account.updated_at);
        })
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Account>, AccountError> {
        let mut inner = self.lock();
        Ok(inner
            .by_id
            .get_mut(&id)
            .filter(|stored| stored.is_active)
            .map(|stored| {
                stored.record_login(at);
                stored.clone()
            }))
    }

    async fn set_password_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
        now: OffsetDateTime,
    ) -> Result<Account, AccountError> {
        self.modify(id, |stored| stored.set_password_hash(hash, now))
    }

    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> Result<Account, AccountError> {
        self.modify(id, |stored| stored.set_active(active, now))
    }

    async fn replace_avatar(
        &self,
        id: Uuid,
        key: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(Account, Option<String>), AccountError> {
        let mut inner = self.lock();
        let stored = inner.by_id.get_mut(&id).ok_or(AccountError::NotFound)?;
        let previous = stored.replace_avatar(key, now);
        Ok((stored.clone(), previous))
    }

    async fn list(&self, query: &AccountQuery) -> Result<Vec<Account>, AccountError> {
        let inner = self.lock();
        let mut rows: Vec<Account> = inner
            .by_id
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::repo_types::AccountFields;
    use time::{macros::datetime, Duration};

    fn account(email: &str, name: &str, minutes: i64) -> Account {
        Account::new(
            email.into(),
            AccountFields::named(name),
            datetime!(2025-03-02 09:00 UTC) + Duration::minutes(minutes),
        )
    }

    #[tokio::test]
    async fn insert_enforces_unique_email() {
        let store = MemoryAccountStore::new();
        store.insert(account("kim@example.com", "Kim", 0)).await.unwrap();
        let err = store
            .insert(account("kim@example.com", "Other", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Uniqueness(ref e) if e == "kim@example.com"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_writes_profile_columns_only() {
        let store = MemoryAccountStore::new();
        let saved = store.insert(account("kim@example.com", "Kim", 0)).await.unwrap();
        let later = saved.created_at + Duration::hours(1);
        store.set_active(saved.id, false, later).await.unwrap();

        let mut edited = saved.clone();
        edited.email = "hijack@example.com".into();
        edited.created_at += Duration::days(1);
        edited.is_staff = true;
        edited.name = "Kim Minji".into();
        edited.grade = Some(4);
        edited.touch(later + Duration::hours(1));
        let updated = store.update(&edited).await.unwrap();

        assert_eq!(updated.email, "kim@example.com");
        assert_eq!(updated.created_at, saved.created_at);
        assert!(!updated.is_active, "stale copy must not reactivate");
        assert!(!updated.is_staff);
        assert_eq!(updated.name, "Kim Minji");
        assert_eq!(updated.grade, Some(4));
        assert_eq!(updated.updated_at, later + Duration::hours(1));
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let store = MemoryAccountStore::new();
        let err = store.update(&account("a@example.com", "A", 0)).await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
        let err = store
            .set_active(Uuid::new_v4(), true, datetime!(2025-03-02 09:00 UTC))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
    }

    #[tokio::test]
    async fn login_is_not_recorded_on_inactive_accounts() {
        let store = MemoryAccountStore::new();
        let saved = store.insert(account("kim@example.com", "Kim", 0)).await.unwrap();
        let at = saved.created_at + Duration::minutes(5);

        let logged = store.record_login(saved.id, at).await.unwrap().unwrap();
        assert_eq!(logged.last_login, Some(at));
        assert_eq!(logged.updated_at, at);

        store.set_active(saved.id, false, at).await.unwrap();
        assert!(store
            .record_login(saved.id, at + Duration::minutes(1))
            .await
            .unwrap()
            .is_none());
        let stored = store.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(stored.last_login, Some(at));
    }

    #[tokio::test]
    async fn replace_avatar_hands_back_previous_key() {
        let store = MemoryAccountStore::new();
        let saved = store.insert(account("kim@example.com", "Kim", 0)).await.unwrap();
        let now = saved.created_at + Duration::minutes(1);

        let (_, prev) = store.replace_avatar(saved.id, Some("avatars/a.png".into()), now).await.unwrap();
        assert!(prev.is_none());
        let (acc, prev) = store.replace_avatar(saved.id, None, now).await.unwrap();
        assert_eq!(prev.as_deref(), Some("avatars/a.png"));
        assert!(acc.avatar.is_none());
    }

    #[tokio::test]
    async fn list_orders_newest_first_and_pages() {
        let store = MemoryAccountStore::new();
        for i in 0..5 {
            store
                .insert(account(&format!("u{i}@example.com"), &format!("U{i}"), i))
                .await
                .unwrap();
        }
        let page = store
            .list(&AccountQuery {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let emails: Vec<_> = page.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, ["u3@example.com", "u2@example.com"]);
    }
}
