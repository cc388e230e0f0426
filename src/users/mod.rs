use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;

pub use memory::MemoryUserStore;
pub use repo::{PgUserStore, StoreError, UserStore};
pub use repo_types::{PublicUser, User};

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::upload_routes(max_upload_bytes))
}
