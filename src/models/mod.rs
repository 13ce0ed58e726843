/// Request and response shapes exchanged with the upstream API and returned
/// to tool callers.

pub mod auth;
pub mod search;
pub mod user;
pub mod whistle;
