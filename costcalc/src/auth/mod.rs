//! Caller identity.
//!
//! Requests reach the service through the API gateway, which has already verified the bearer
//! token. [`current_user::CurrentUser`] only decodes its claims: `sub` is the user id and the
//! `admin` realm role grants access to other users' trees and to all export instances.
//!
//! For local development `dev_overwrite_user_id` replaces the token entirely.

pub mod current_user;
