//! HTTP request handlers.
//!
//! - [`costs`]: cost trees for the caller or, for admins, any user
//! - [`estimations`]: flow and import estimations
//! - [`health`]: liveness

pub mod costs;
pub mod estimations;
pub mod health;
