//! REST client module for the hotel backend.
//!
//! This module provides the `ApiClient` for the authentication endpoints
//! (login, refresh, logout, profile) and for sending arbitrary
//! `RequestDescriptor`s on behalf of the executor.
//!
//! The backend uses bearer token authentication with rotating refresh tokens.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, AuthGrant, LoginRequest};
pub use error::ApiError;
pub use request::{ApiResponse, RequestDescriptor};
