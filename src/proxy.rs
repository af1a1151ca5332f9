//! Egress proxy rotation.
//!
//! The rotator hands out one proxy per HTTP attempt in round-robin order.
//! Loading the list is best effort: any failure leaves the list empty and
//! requests go out directly.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ProxySettings;
use crate::error::Result;

/// One egress endpoint, as a proxy URL (`http://host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRef(pub String);

impl ProxyRef {
    /// Normalize a list entry. Bare `host:port` entries get an `http://`
    /// scheme; schemes other than http(s) are skipped.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() || entry.starts_with('#') {
            return None;
        }
        match entry.split_once("://") {
            None => Some(Self(format!("http://{entry}"))),
            Some((scheme, _))
                if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
            {
                Some(Self(entry.to_string()))
            }
            Some((scheme, _)) => {
                warn!(scheme, "skipping proxy with unsupported scheme");
                None
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProxyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the proxy list comes from.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ProxyRef>>;
}

/// A fixed list from configuration.
pub struct StaticProxySource {
    proxies: Vec<ProxyRef>,
}

impl StaticProxySource {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        Self {
            proxies: entries
                .iter()
                .filter_map(|e| ProxyRef::parse(e.as_ref()))
                .collect(),
        }
    }
}

#[async_trait]
impl ProxySource for StaticProxySource {
    async fn fetch(&self) -> Result<Vec<ProxyRef>> {
        Ok(self.proxies.clone())
    }
}

/// A newline-separated list served over HTTP.
pub struct HttpProxySource {
    url: String,
    timeout: Duration,
}

impl HttpProxySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxySource for HttpProxySource {
    async fn fetch(&self) -> Result<Vec<ProxyRef>> {
        let body = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()?
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.lines().filter_map(ProxyRef::parse).collect())
    }
}

/// Build the source described by settings, or `None` when rotation is off.
pub fn source_from_settings(settings: &ProxySettings) -> Option<Box<dyn ProxySource>> {
    if !settings.enabled {
        return None;
    }
    match &settings.source_url {
        Some(url) => Some(Box::new(HttpProxySource::new(
            url.clone(),
            Duration::from_secs(settings.fetch_timeout_secs),
        ))),
        None => Some(Box::new(StaticProxySource::new(&settings.list))),
    }
}

/// Round-robin over the loaded proxy list.
#[derive(Debug, Default)]
pub struct ProxyRotator {
    proxies: Vec<ProxyRef>,
    index: usize,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<ProxyRef>) -> Self {
        Self { proxies, index: 0 }
    }

    /// Replace the list from `source`. Never fails: on error the list is
    /// emptied and rotation is disabled.
    pub async fn load(&mut self, source: &dyn ProxySource) {
        self.index = 0;
        match source.fetch().await {
            Ok(proxies) => {
                info!(count = proxies.len(), "loaded proxies");
                self.proxies = proxies;
            }
            Err(e) => {
                warn!(error = %e, "failed to load proxies, using direct connections");
                self.proxies.clear();
            }
        }
    }

    /// The next proxy in rotation, or `None` when the list is empty.
    pub fn next(&mut self) -> Option<ProxyRef> {
        if self.proxies.is_empty() {
            return None;
        }
        let proxy = self.proxies[self.index % self.proxies.len()].clone();
        self.index = (self.index + 1) % self.proxies.len();
        Some(proxy)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct BrokenSource;

    #[async_trait]
    impl ProxySource for BrokenSource {
        async fn fetch(&self) -> Result<Vec<ProxyRef>> {
            Err(Error::Other("proxy list unreachable".to_string()))
        }
    }

    #[test]
    fn rotates_round_robin() {
        let mut rotator = ProxyRotator::new(vec![
            ProxyRef::parse("10.0.0.1:8080").unwrap(),
            ProxyRef::parse("https://10.0.0.2:3129").unwrap(),
        ]);
        let seen: Vec<String> = (0..5).map(|_| rotator.next().unwrap().0).collect();
        assert_eq!(
            seen,
            [
                "http://10.0.0.1:8080",
                "https://10.0.0.2:3129",
                "http://10.0.0.1:8080",
                "https://10.0.0.2:3129",
                "http://10.0.0.1:8080",
            ]
        );
    }

    #[test]
    fn empty_list_yields_none() {
        let mut rotator = ProxyRotator::default();
        assert!(rotator.next().is_none());
        assert!(rotator.is_empty());
    }

    #[test]
    fn parse_skips_blanks_and_comments() {
        assert!(ProxyRef::parse("   ").is_none());
        assert!(ProxyRef::parse("# upstream list").is_none());
    }

    #[test]
    fn parse_skips_unsupported_schemes() {
        assert!(ProxyRef::parse("socks5://10.0.0.2:1080").is_none());
        assert!(ProxyRef::parse("ftp://10.0.0.3:21").is_none());
        assert_eq!(
            ProxyRef::parse("HTTP://10.0.0.4:8080").unwrap().as_str(),
            "HTTP://10.0.0.4:8080"
        );
    }

    #[tokio::test]
    async fn static_source_drops_socks_entries() {
        let mut rotator = ProxyRotator::default();
        rotator
            .load(&StaticProxySource::new(&["socks5://1.2.3.4:1080", "5.6.7.8:3128"]))
            .await;
        assert_eq!(rotator.len(), 1);
        assert_eq!(rotator.next().unwrap().as_str(), "http://5.6.7.8:3128");
    }

    #[tokio::test]
    async fn failed_load_disables_rotation() {
        let mut rotator = ProxyRotator::new(vec![ProxyRef::parse("10.0.0.1:8080").unwrap()]);
        rotator.load(&BrokenSource).await;
        assert!(rotator.next().is_none());
    }

    #[tokio::test]
    async fn static_source_loads_entries() {
        let mut rotator = ProxyRotator::default();
        rotator
            .load(&StaticProxySource::new(&["1.2.3.4:3128", "", "5.6.7.8:3128"]))
            .await;
        assert_eq!(rotator.len(), 2);
    }

    #[test]
    fn disabled_settings_build_no_source() {
        let settings = ProxySettings {
            enabled: false,
            ..ProxySettings::default()
        };
        assert!(source_from_settings(&settings).is_none());
    }
}
