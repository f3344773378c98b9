//! Domain types for the dispatch service: configuration, error edge
//! conversion, and the HTTP-facing request/response DTOs.

pub mod config;
pub mod error;
pub mod types;

pub use config::DispatchConfig;
pub use error::{AdmissionRejection, ServiceError};
pub use types::*;
