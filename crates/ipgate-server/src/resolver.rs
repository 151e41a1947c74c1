use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Default DNS lookup timeout.
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns true when `value` is an IPv4 or IPv6 literal.
pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Textual form used for every stored and compared address: lowercase,
/// zero-compressed, and IPv4-mapped IPv6 unmapped to a dotted quad.
pub fn canonical_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Parses an IP literal into its [`canonical_ip`] form.
pub fn parse_canonical_ip(value: &str) -> Option<String> {
    value.parse::<IpAddr>().ok().map(canonical_ip)
}

#[derive(Debug, Error)]
#[error("unable to resolve domain {domain}: {cause}")]
pub struct ResolveError {
    pub domain: String,
    #[source]
    pub cause: ResolveFailure,
}

#[derive(Debug, Error)]
pub enum ResolveFailure {
    #[error("lookup failed: {0}")]
    Lookup(#[from] std::io::Error),
    #[error("no IPv4 record")]
    NoIpv4Record,
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    pub fn new(domain: &str, cause: ResolveFailure) -> Self {
        Self {
            domain: domain.to_owned(),
            cause,
        }
    }
}

/// Forward resolution of a domain name to a single IPv4 address.
///
/// Callers try [`parse_canonical_ip`] first; a literal is never handed to a resolver.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Ipv4Addr, ResolveError>;
}

/// System resolver backed by `tokio::net::lookup_host`. Results are not cached.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    timeout: Duration,
}

impl DnsResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DNS_TIMEOUT)
    }
}

#[async_trait]
impl DomainResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Result<Ipv4Addr, ResolveError> {
        let lookup = tokio::net::lookup_host((domain, 0));
        let addrs = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => return Err(ResolveError::new(domain, e.into())),
            Err(_) => return Err(ResolveError::new(domain, ResolveFailure::Timeout(self.timeout))),
        };

        let ip = first_ipv4(addrs)
            .ok_or_else(|| ResolveError::new(domain, ResolveFailure::NoIpv4Record))?;
        debug!(domain, %ip, "domain resolved");
        Ok(ip)
    }
}

fn first_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|addr| match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    })
}
