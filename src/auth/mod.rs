//! Credential handling for SSH logins
//!
//! This module resolves the login user and password from the command line,
//! the environment and `.env` files, or an interactive prompt.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dump_fetcher::auth::{resolve_password, resolve_user};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let user = resolve_user(None, Some("deploy"))?;
//! let password = resolve_password(None, true, &format!("{}@app-host", user))?;
//! # Ok(())
//! # }
//! ```

pub mod credentials;

// Re-export main public API
pub use credentials::{resolve_password, resolve_user};
