use tracing::{info, instrument};

use super::{error::AccountError, repo_types::AccountFields, services::AccountService};
use crate::config::SuperuserConfig;

/// Creates the configured superuser. An existing account with that email is
/// left untouched.
#[instrument(skip(service, cfg), fields(email = %cfg.email))]
pub async fn ensure_superuser(
    service: &AccountService,
    cfg: &SuperuserConfig,
) -> Result<(), AccountError> {
    match service
        .create_superuser(&cfg.email, Some(&cfg.password), AccountFields::named(&cfg.name))
        .await
    {
        Ok(account) => {
            info!(account_id = %account.id, "superuser created");
            Ok(())
        }
        Err(AccountError::Uniqueness(_)) => {
            info!("superuser already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
