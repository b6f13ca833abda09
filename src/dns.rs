//! NS delegation checks.
//!
//! A zone is correctly delegated when every name server the provider assigned
//! to it shows up in the publicly resolvable NS set of the domain. Names are
//! compared lowercased without the trailing dot.

use crate::errors::ProvisionError;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google/resolve";

const NS_RECORD_TYPE: u16 = 2;

pub fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}

/// True when `zone` is non-empty and a subset of `public`.
pub fn delegation_matches(zone: &[String], public: &[String]) -> bool {
    let zone: BTreeSet<String> = zone.iter().map(|s| normalize(s)).collect();
    let public: BTreeSet<String> = public.iter().map(|s| normalize(s)).collect();
    !zone.is_empty() && zone.is_subset(&public)
}

/// Looks up the publicly visible NS records of a domain.
#[async_trait]
pub trait NameServerResolver: Send + Sync {
    async fn name_servers(&self, domain: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// DNS-over-HTTPS JSON API resolver (Google / Cloudflare style).
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl DohResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for DohResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DOH_ENDPOINT)
    }
}

#[async_trait]
impl NameServerResolver for DohResolver {
    async fn name_servers(&self, domain: &str) -> Result<Vec<String>> {
        let response: DohResponse = self
            .client
            .get(&self.endpoint)
            .query(&[("name", domain), ("type", "NS")])
            .header("accept", "application/dns-json")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .with_context(|| format!("NS lookup for {} failed", domain))?
            .error_for_status()
            .context("DoH endpoint returned an error")?
            .json()
            .await
            .context("Malformed DoH response")?;

        if response.status != 0 {
            bail!("NS lookup for {} returned DNS status {}", domain, response.status);
        }
        Ok(response
            .answer
            .into_iter()
            .filter(|a| a.record_type == NS_RECORD_TYPE)
            .map(|a| a.data)
            .collect())
    }
}

/// Fixed answers. `fallback` answers any domain not listed explicitly.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    by_domain: HashMap<String, Vec<String>>,
    fallback: Option<Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every domain with `servers`.
    pub fn always<S: AsRef<str>>(servers: &[S]) -> Self {
        Self {
            by_domain: HashMap::new(),
            fallback: Some(servers.iter().map(|s| s.as_ref().to_string()).collect()),
        }
    }

    pub fn with_domain<S: AsRef<str>>(mut self, domain: &str, servers: &[S]) -> Self {
        self.by_domain.insert(
            normalize(domain),
            servers.iter().map(|s| s.as_ref().to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl NameServerResolver for StaticResolver {
    async fn name_servers(&self, domain: &str) -> Result<Vec<String>> {
        match self
            .by_domain
            .get(&normalize(domain))
            .or(self.fallback.as_ref())
        {
            Some(servers) => Ok(servers.clone()),
            None => bail!("NXDOMAIN: {}", domain),
        }
    }
}

/// Repeats the public lookup until the delegation matches or attempts run out.
#[derive(Clone)]
pub struct DelegationVerifier {
    resolver: Arc<dyn NameServerResolver>,
    attempts: u32,
    delay: Duration,
}

impl DelegationVerifier {
    pub fn new(resolver: Arc<dyn NameServerResolver>, attempts: u32, delay: Duration) -> Self {
        Self {
            resolver,
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Returns the attempt on which the delegation matched.
    pub async fn verify(&self, domain: &str, zone_servers: &[String]) -> Result<u32, ProvisionError> {
        let mut last_seen: Vec<String> = Vec::new();
        for attempt in 1..=self.attempts {
            match self.resolver.name_servers(domain).await {
                Ok(public) => {
                    if delegation_matches(zone_servers, &public) {
                        info!(domain, attempt, "NS delegation is correctly configured");
                        return Ok(attempt);
                    }
                    warn!(domain, attempt, public = ?public, "NS delegation mismatch");
                    last_seen = public;
                }
                Err(e) => warn!(domain, attempt, error = %e, "Public NS lookup failed"),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        let expected: Vec<String> = zone_servers.iter().map(|s| normalize(s)).collect();
        let seen: Vec<String> = last_seen.iter().map(|s| normalize(s)).collect();
        Err(ProvisionError::Delegation {
            zone: domain.to_string(),
            message: format!(
                "set the registrar NS records to [{}] (publicly visible: [{}])",
                expected.join(", "),
                seen.join(", ")
            ),
        })
    }
}
