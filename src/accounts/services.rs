use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    clock::Clock,
    email::normalize_email,
    error::AccountError,
    password::PasswordHasher,
    repo::AccountStore,
    repo_types::{Account, AccountFields, AccountQuery, ProfileUpdate},
};

/// Creates, authenticates and edits accounts.
///
/// All collaborators are injected. Creation performs exactly one store write
/// and relies on the store's unique index rather than looking the email up
/// first.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
        }
    }

    #[instrument(skip(self, raw_password, fields))]
    pub async fn create_account(
        &self,
        email: &str,
        raw_password: Option<&str>,
        fields: AccountFields,
    ) -> Result<Account, AccountError> {
        let email = normalize_email(email)?;
        let now = self.clock.now();

        let mut account = Account::new(email, fields, now);
        account.validate()?;
        if let Some(raw) = raw_password {
            let hash = self.hasher.hash(raw)?;
            account.set_password_hash(Some(hash), now);
        }

        let account = self.store.insert(account).await.map_err(|e| {
            if let AccountError::Uniqueness(email) = &e {
                warn!(%email, "email already registered");
            }
            e
        })?;
        info!(
            account_id = %account.id,
            email = %account.email,
            is_staff = account.is_staff,
            is_superuser = account.is_superuser,
            "account created"
        );
        Ok(account)
    }

    /// Like [`create_account`](Self::create_account) but always grants staff
    /// and superuser flags, whatever `fields` says.
    #[instrument(skip(self, raw_password, fields))]
    pub async fn create_superuser(
        &self,
        email: &str,
        raw_password: Option<&str>,
        mut fields: AccountFields,
    ) -> Result<Account, AccountError> {
        fields.is_staff = Some(true);
        fields.is_superuser = Some(true);
        self.create_account(email, raw_password, fields).await
    }

    /// Checks credentials and records the login. Unknown emails, wrong
    /// passwords, unusable passwords and inactive accounts all fail the same way.
    #[instrument(skip(self, raw_password))]
    pub async fn authenticate(&self, email: &str, raw_password: &str) -> Result<Account, AccountError> {
        let email = normalize_email(email).map_err(|_| AccountError::InvalidCredentials)?;

        let Some(account) = self.store.find_by_normalized_email(&email).await? else {
            warn!(%email, "login unknown email");
            return Err(AccountError::InvalidCredentials);
        };
        let Some(hash) = account.password_hash.as_deref() else {
            warn!(account_id = %account.id, "login on account without usable password");
            return Err(AccountError::InvalidCredentials);
        };
        if !self.hasher.verify(raw_password, hash)? {
            warn!(account_id = %account.id, "login invalid password");
            return Err(AccountError::InvalidCredentials);
        }
        if !account.is_active {
            warn!(account_id = %account.id, "login on inactive account");
            return Err(AccountError::InvalidCredentials);
        }

        // deactivation may land after the read above
        let Some(account) = self.store.record_login(account.id, self.clock.now()).await? else {
            warn!(account_id = %account.id, "account deactivated during login");
            return Err(AccountError::InvalidCredentials);
        };
        info!(account_id = %account.id, "account logged in");
        Ok(account)
    }

    /// Verifies a password against an account without recording a login.
    pub fn check_password(&self, account: &Account, raw_password: &str) -> Result<bool, AccountError> {
        match account.password_hash.as_deref() {
            Some(hash) => self.hasher.verify(raw_password, hash),
            None => Ok(false),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Account, AccountError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Account, AccountError> {
        let email = normalize_email(email)?;
        self.store
            .find_by_normalized_email(&email)
            .await?
            .ok_or(AccountError::NotFound)
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<Account, AccountError> {
        let mut account = self.get(id).await?;
        account.apply_update(update, self.clock.now());
        account.validate()?;
        let account = self.store.update(&account).await?;
        debug!(account_id = %account.id, "profile updated");
        Ok(account)
    }

    /// Replaces the password, or clears it when `raw_password` is `None`.
    #[instrument(skip(self, raw_password))]
    pub async fn set_password(&self, id: Uuid, raw_password: Option<&str>) -> Result<Account, AccountError> {
        let hash = raw_password.map(|raw| self.hasher.hash(raw)).transpose()?;
        let account = self.store.set_password_hash(id, hash, self.clock.now()).await?;
        info!(account_id = %account.id, usable = account.has_usable_password(), "password changed");
        Ok(account)
    }

    /// Points the account at a new avatar object; returns the account and the
    /// key it replaced.
    #[instrument(skip(self))]
    pub async fn set_avatar(
        &self,
        id: Uuid,
        key: Option<String>,
    ) -> Result<(Account, Option<String>), AccountError> {
        self.store.replace_avatar(id, key, self.clock.now()).await
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<Account, AccountError> {
        let account = self.store.set_active(id, active, self.clock.now()).await?;
        info!(account_id = %account.id, active, "account activation changed");
        Ok(account)
    }

    pub async fn list(&self, query: AccountQuery) -> Result<Vec<Account>, AccountError> {
        self.store.list(&query.clamped()).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::AccountService;
    use crate::accounts::{
        clock::ManualClock, memory::MemoryAccountStore, password::test_hasher,
    };

    pub struct Harness {
        pub service: AccountService,
        pub store: Arc<MemoryAccountStore>,
        pub clock: Arc<ManualClock>,
    }

    pub fn harness() -> Harness {
        let store = Arc::new(MemoryAccountStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-02 09:00 UTC)));
        let service = AccountService::new(store.clone(), Arc::new(test_hasher()), clock.clone());
        Harness {
            service,
            store,
            clock,
        }
    }
}
