//! HTTP surface: routing, validation, and error mapping.

pub mod error;
pub mod middleware;
pub mod popularity;
pub mod routes;
pub mod status;

pub use routes::*;
