pub mod auth;
pub mod client;
pub mod errors;
pub mod routes;
pub mod startup;
pub mod tcp;
pub mod tls;

pub use startup::{run, Protocol};
