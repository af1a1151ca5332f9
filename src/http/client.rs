//! reqwest-backed session.
//!
//! reqwest fixes proxies per client, so the session keeps one client per
//! egress (direct plus each proxy seen so far), all sharing one cookie jar.
//! A refresh swaps the jar and drops every client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use super::{FormRequest, HttpReply, Transport};
use crate::error::{Error, Result};

pub struct ReqwestTransport {
    jar: Arc<Jar>,
    clients: HashMap<Option<String>, reqwest::Client>,
    warmup_url: String,
    warmup_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(warmup_url: impl Into<String>, warmup_timeout: Duration) -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            clients: HashMap::new(),
            warmup_url: warmup_url.into(),
            warmup_timeout,
        }
    }

    fn client_for(&mut self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let key = proxy.map(str::to_string);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().cookie_provider(Arc::clone(&self.jar));
        if let Some(url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_form(&mut self, request: &FormRequest) -> Result<HttpReply> {
        let client = self.client_for(request.proxy.as_ref().map(|p| p.as_str()))?;

        let response = client
            .post(&request.url)
            .timeout(request.timeout)
            .headers(request_headers(request)?)
            .form(&request.form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }

    async fn refresh_session(&mut self, user_agent: &str) {
        info!("refreshing session");
        self.jar = Arc::new(Jar::default());
        self.clients.clear();

        let client = match self.client_for(None) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build session client");
                return;
            }
        };
        match client
            .get(&self.warmup_url)
            .header(USER_AGENT, user_agent)
            .timeout(self.warmup_timeout)
            .send()
            .await
        {
            Ok(response) => info!(status = response.status().as_u16(), "session refreshed"),
            Err(e) => warn!(error = %e, "failed to warm up refreshed session"),
        }
    }
}

/// Configured headers plus the per-attempt user agent. The user agent and
/// the form content type are owned by the request, so configured values for
/// them are dropped.
fn request_headers(request: &FormRequest) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(request.headers.len() + 1);
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {name:?}: {e}")))?;
        if name == USER_AGENT || name == CONTENT_TYPE {
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    let user_agent = HeaderValue::from_str(&request.user_agent)
        .map_err(|e| Error::Config(format!("invalid user agent: {e}")))?;
    headers.insert(USER_AGENT, user_agent);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> FormRequest {
        FormRequest {
            url: "https://example.com/quote".to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            form: vec![("data[zip1]".to_string(), "78240".to_string())],
            user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
            proxy: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn attempt_user_agent_wins_over_configured_one() {
        let headers = request_headers(&request(&[
            ("User-Agent", "curl/8.0"),
            ("Content-Type", "text/plain"),
            ("accept", "application/json"),
        ]))
        .unwrap();

        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(headers[USER_AGENT], "Mozilla/5.0 (X11; Linux x86_64)");
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(headers["accept"], "application/json");
    }

    #[test]
    fn invalid_header_name_is_a_config_error() {
        let err = request_headers(&request(&[("bad header", "x")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
