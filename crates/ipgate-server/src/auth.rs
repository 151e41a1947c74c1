use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::{error::ApiError, resolver::canonical_ip, store::FixedIps, AppState};

/// Admin capability: the caller is one of the fixed IPs.
///
/// Backed by the same set the store merges into the allowlist, but checked
/// independently of the dynamic list.
#[derive(Debug, Clone)]
pub struct AdminGate {
    fixed: FixedIps,
}

impl AdminGate {
    pub fn new(fixed: FixedIps) -> Self {
        Self { fixed }
    }

    pub fn is_trusted_admin(&self, caller_ip: &str) -> bool {
        self.fixed.contains(caller_ip)
    }
}

/// Peer address as compared against allowlist entries. IPv4-mapped IPv6
/// peers become dotted quads.
pub fn caller_ip(addr: SocketAddr) -> String {
    canonical_ip(addr.ip())
}

/// Axum middleware that admits only callers present in the merged allowlist.
pub async fn require_allowed_ip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = caller_ip(addr);
    let allowed = state.service.store().load().await;

    if allowed.iter().any(|entry| entry.ip == ip) {
        debug!(%ip, "access granted");
        next.run(request).await
    } else {
        warn!(%ip, method = %request.method(), path = %request.uri().path(), "unauthorized access attempt");
        ApiError::Forbidden("You are not allowed to access this resource".into()).into_response()
    }
}

/// Axum middleware for mutating allowlist routes: fixed IPs only.
pub async fn require_admin(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = caller_ip(addr);
    if state.admin.is_trusted_admin(&ip) {
        next.run(request).await
    } else {
        warn!(%ip, method = %request.method(), "admin access denied");
        ApiError::Forbidden("Only administrators can modify the allowlist".into()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_gate_checks_fixed_set_only() {
        let gate = AdminGate::new(FixedIps::parse("10.0.0.1,::1").unwrap());
        assert!(gate.is_trusted_admin("10.0.0.1"));
        assert!(gate.is_trusted_admin("::1"));
        assert!(!gate.is_trusted_admin("10.0.0.2"));
        assert!(!gate.is_trusted_admin(""));
    }

    #[test]
    fn admin_gate_with_no_fixed_ips_trusts_nobody() {
        let gate = AdminGate::new(FixedIps::default());
        assert!(!gate.is_trusted_admin("127.0.0.1"));
    }

    #[test]
    fn caller_ip_unmaps_ipv4_mapped_ipv6() {
        let addr: SocketAddr = "[::ffff:203.0.113.5]:4000".parse().unwrap();
        assert_eq!(caller_ip(addr), "203.0.113.5");
    }

    #[test]
    fn caller_ip_keeps_plain_addresses() {
        assert_eq!(caller_ip("198.51.100.9:80".parse().unwrap()), "198.51.100.9");
        assert_eq!(caller_ip("[2001:db8::1]:80".parse().unwrap()), "2001:db8::1");
    }
}
