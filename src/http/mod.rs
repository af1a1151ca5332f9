//! HTTP boundary.
//!
//! The executor speaks to the quote endpoint through [`Transport`], which
//! owns the HTTP session (cookies and connection state). [`ReqwestTransport`]
//! is the real client; tests script their own.

pub mod client;

pub use client::ReqwestTransport;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::proxy::ProxyRef;

/// One form POST, fully resolved for a single attempt.
#[derive(Debug, Clone)]
pub struct FormRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub user_agent: String,
    pub proxy: Option<ProxyRef>,
    pub timeout: Duration,
}

/// Status and body of a completed round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send {
    /// Send the form. `Err` means no response was received.
    async fn post_form(&mut self, request: &FormRequest) -> Result<HttpReply>;

    /// Drop the session state (cookies, pooled connections) and start a new
    /// one. Warm-up failures are not errors.
    async fn refresh_session(&mut self, user_agent: &str);
}
