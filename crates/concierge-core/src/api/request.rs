use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use super::ApiError;

/// A caller-supplied description of one logical request.
///
/// The executor turns a descriptor into at most two physical requests
/// (the original and one retry after a credential refresh), so it is
/// never mutated once built.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the configured base URL, or an absolute URL
    pub target: String,
    pub body: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub requires_auth: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            requires_auth: true,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn post<B: Serialize>(target: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::POST, target).with_json(body)
    }

    pub fn put<B: Serialize>(target: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PUT, target).with_json(body)
    }

    pub fn patch<B: Serialize>(target: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PATCH, target).with_json(body)
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send without a credential (health checks, public endpoints)
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Resolve the target against a base URL.
    pub fn url(&self, base_url: &str) -> String {
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            return self.target.clone();
        }
        let base = base_url.trim_end_matches('/');
        let path = self.target.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// A successful response, fully buffered so it can outlive the connection.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
