//! REST request module.
//!
//! This module provides the `RequestExecutor` for single HTTP attempts, the
//! `ResilientPipeline` that adds retry and token refresh on top of it, and
//! `AuthApi` for the sign-in endpoints.
//!
//! The backend uses JWT bearer token authentication with a refresh token
//! exchanged at `/auth/refresh-token`.

pub mod auth;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod request;

pub use auth::AuthApi;
pub use error::{ApiError, ErrorKind};
pub use executor::{HttpTransport, RequestExecutor, Transport};
pub use pipeline::{PostCommitHandler, ResilientPipeline, REFRESH_PATH};
pub use request::{ApiRequest, MultipartPart, RequestBody};
