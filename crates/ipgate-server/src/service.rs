use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::resolver::{parse_canonical_ip, DomainResolver};
use crate::store::model::next_id;
use crate::store::{AllowEntry, Store, StoreError};

#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    DuplicateEntry(String),
    #[error("{0}")]
    NotFound(String),
    #[error("persist allowlist: {0}")]
    Persistence(#[from] StoreError),
}

/// Create/list/edit/delete over the allowlist.
///
/// Domain inputs are resolved to IPv4 before any comparison. Every mutation
/// holds the store write lock from its snapshot until the write completes.
#[derive(Clone)]
pub struct AllowlistService {
    store: Store,
    resolver: Arc<dyn DomainResolver>,
}

impl AllowlistService {
    pub fn new(store: Store, resolver: Arc<dyn DomainResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn create(&self, raw_ip: &str) -> Result<AllowEntry, AllowlistError> {
        let ip = self.normalize(raw_ip).await?;

        let _guard = self.store.lock_writes().await;
        let mut entries = self.store.load().await;

        if entries.iter().any(|e| e.ip == ip) {
            warn!(ip = %ip, "IP already exists in the allowlist");
            return Err(AllowlistError::DuplicateEntry("IP already exists".into()));
        }

        let entry = AllowEntry::new(next_id(entries.iter().filter(|e| !e.synthetic)), ip);
        entries.push(entry.clone());
        self.store.replace(entries).await?;

        info!(id = entry.id, ip = %entry.ip, input = raw_ip, "audit: allowlist.create");
        Ok(entry)
    }

    pub async fn list(&self) -> Vec<AllowEntry> {
        self.store.load_visible().await
    }

    /// Replaces the IP of the entry matching `raw_old`, keeping its id.
    /// Returns the visible list after the change.
    pub async fn edit(
        &self,
        raw_old: &str,
        raw_new: &str,
    ) -> Result<Vec<AllowEntry>, AllowlistError> {
        let old_ip = self.normalize(raw_old).await?;
        let new_ip = self.normalize(raw_new).await?;

        let _guard = self.store.lock_writes().await;
        let mut entries = self.store.load().await;

        let Some(index) = self.position_visible(&entries, &old_ip) else {
            warn!(old_ip = %old_ip, "IP to edit not found");
            return Err(AllowlistError::NotFound("Old IP not found".into()));
        };
        if old_ip == new_ip {
            warn!(old_ip = %old_ip, "edit with identical old and new IP rejected");
            return Err(AllowlistError::InvalidInput(
                "New IP must differ from the old IP".into(),
            ));
        }
        if entries.iter().any(|e| e.ip == new_ip) {
            warn!(new_ip = %new_ip, "replacement IP already exists in the allowlist");
            return Err(AllowlistError::DuplicateEntry("New IP already exists".into()));
        }

        let id = entries[index].id;
        entries[index] = AllowEntry::new(id, new_ip.clone());
        self.store.replace(entries).await?;

        info!(id, old_ip = %old_ip, new_ip = %new_ip, "audit: allowlist.edit");
        Ok(self.store.load_visible().await)
    }

    pub async fn delete(&self, raw_ip: &str) -> Result<(), AllowlistError> {
        let ip = self.normalize(raw_ip).await?;

        let _guard = self.store.lock_writes().await;
        let mut entries = self.store.load().await;

        let Some(index) = self.position_visible(&entries, &ip) else {
            warn!(ip = %ip, "IP to delete not found");
            return Err(AllowlistError::NotFound("IP not found".into()));
        };
        let removed = entries.remove(index);
        self.store.replace(entries).await?;

        info!(id = removed.id, ip = %removed.ip, "audit: allowlist.delete");
        Ok(())
    }

    /// IP literals are put in canonical form; anything else is resolved.
    async fn normalize(&self, raw: &str) -> Result<String, AllowlistError> {
        if let Some(ip) = parse_canonical_ip(raw) {
            return Ok(ip);
        }

        info!(domain = raw, "input is not an IP literal, resolving");
        match self.resolver.resolve(raw).await {
            Ok(ip) => {
                info!(domain = raw, %ip, "domain resolved");
                Ok(ip.to_string())
            }
            Err(e) => {
                warn!(domain = raw, error = %e, "domain resolution failed");
                Err(AllowlistError::InvalidInput(format!(
                    "Invalid domain: {raw}. Error: {e}"
                )))
            }
        }
    }

    fn position_visible(&self, entries: &[AllowEntry], ip: &str) -> Option<usize> {
        let fixed = self.store.fixed();
        entries
            .iter()
            .position(|e| e.ip == ip && !e.synthetic && !fixed.contains(&e.ip))
    }
}
