pub mod client;
pub mod error;
pub mod models;

pub use client::{DEFAULT_TIMEOUT, Endpoints, MojangApi, Pending};
pub use error::MojangError;
pub use models::*;
