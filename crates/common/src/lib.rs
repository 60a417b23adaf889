//! Shared runtime helpers for the kvstore binaries and front-ends.

pub mod admin_http;
pub mod env;
pub mod types;
pub mod utils;
