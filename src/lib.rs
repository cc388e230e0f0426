pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod response;
pub mod state;
pub mod storage;
pub mod users;

pub use app::build_app;
pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;
