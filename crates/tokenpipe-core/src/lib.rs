//! tokenpipe core library.
//!
//! Authenticated request pipeline for mobile and desktop clients: keeps the
//! session in secure storage, attaches bearer tokens, retries transient
//! failures, refreshes expired access tokens, and logs out when recovery
//! is impossible.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;

pub use api::{ApiError, ApiRequest, AuthApi, ErrorKind, ResilientPipeline};
pub use auth::{SessionData, TokenStore, UserSummary};
pub use client::{SessionClient, SessionClientBuilder};
pub use config::{Config, RetryPolicy};
