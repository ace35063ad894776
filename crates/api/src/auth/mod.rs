//! Authentication module for Huddle

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, Identity, JwtError, JwtManager};
pub use middleware::{require_auth, AuthUser};
