pub mod claims;
pub mod cookies;
pub mod extractors;
pub mod jwt;
pub mod password;
pub mod services;

pub use extractors::CurrentUser;
pub use password::{Argon2Hasher, CredentialHasher};
