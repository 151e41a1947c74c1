use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resolver::parse_canonical_ip;

/// One allowlisted address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowEntry {
    pub id: u64,
    pub ip: String,
    /// Set on entries injected from the fixed IP set. Never serialized.
    #[serde(skip)]
    pub synthetic: bool,
}

impl AllowEntry {
    pub fn new(id: u64, ip: impl Into<String>) -> Self {
        Self {
            id,
            ip: ip.into(),
            synthetic: false,
        }
    }
}

/// On-disk form of the allowlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowlistDocument {
    #[serde(default)]
    pub allowed_ips: Vec<AllowEntry>,
}

/// Immutable set of IP literals configured at startup.
///
/// Members are always allowed through the general gate and are the only
/// addresses accepted by the admin gate. Configuration order is preserved.
#[derive(Debug, Clone)]
pub struct FixedIps(Arc<[String]>);

impl Default for FixedIps {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl FixedIps {
    /// Parses a comma-separated list. Blank items are skipped; members are
    /// canonicalised and de-duplicated.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut ips: Vec<String> = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let canonical = parse_canonical_ip(item)
                .ok_or_else(|| format!("{item:?} is not an IP address"))?;
            if !ips.contains(&canonical) {
                ips.push(canonical);
            }
        }
        Ok(Self(ips.into()))
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.0.iter().any(|fixed| fixed == ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Appends every fixed IP not already present, flagged as synthetic.
///
/// Synthetic ids continue from the highest id seen so far, so they never
/// collide with persisted ids.
pub fn merge_fixed(mut entries: Vec<AllowEntry>, fixed: &FixedIps) -> Vec<AllowEntry> {
    for ip in fixed.iter() {
        if entries.iter().any(|e| e.ip == ip) {
            continue;
        }
        let id = next_id(&entries);
        entries.push(AllowEntry {
            id,
            ip: ip.to_owned(),
            synthetic: true,
        });
    }
    entries
}

/// `max(ids) + 1`, or 1 for an empty list.
pub fn next_id<'a>(entries: impl IntoIterator<Item = &'a AllowEntry>) -> u64 {
    entries.into_iter().map(|e| e.id).max().unwrap_or(0) + 1
}
