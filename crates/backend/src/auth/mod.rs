//! Authentication module for JWT-based auth with Google OAuth login.
//!
//! This module provides:
//! - JWT token creation and validation
//! - Google OAuth login, which also links the user's mailbox credential
//! - `require_auth` middleware for protecting routes
//! - Email allowlist validation

pub mod google;
mod handlers;
mod jwt;
mod middleware;
pub mod types;

pub use google::GoogleOAuthClient;
pub use handlers::{auth_callback, auth_login, auth_logout, auth_me};
pub use middleware::{build_auth_cookie, extract_auth_user, require_auth};
pub use types::{AuthConfig, AuthUser};
