use crate::state::AppState;
use axum::Router;

pub mod bootstrap;
pub mod clock;
pub mod dto;
pub mod email;
pub mod error;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod password;
pub mod permissions;
pub mod policy;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use error::AccountError;
pub use repo_types::{Account, AccountFields, AccountQuery, ProfileUpdate};
pub use services::AccountService;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
        .merge(handlers::admin_routes())
}
