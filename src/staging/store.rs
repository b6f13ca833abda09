use crate::errors::CloudError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Where a staged object lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectLocation {
    pub account: String,
    pub container: String,
    pub name: String,
}

impl ObjectLocation {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.name)
    }
}

/// Read-only URL valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Blob storage used to hand setup scripts to compute instances.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body`, replacing any existing object at `location`.
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<(), CloudError>;

    async fn signed_url(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> Result<SignedUrl, CloudError>;

    /// Deleting a missing object is `CloudError::NotFound`.
    async fn delete(&self, location: &ObjectLocation) -> Result<(), CloudError>;
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<ObjectLocation, Vec<u8>>,
    signed: Vec<(ObjectLocation, SignedUrl)>,
    fail_puts: Option<CloudError>,
}

/// In-memory blob store paired with [`crate::lifecycle::MemoryCloud`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every subsequent upload fails with `error`.
    pub fn fail_uploads(&self, error: CloudError) {
        self.state().fail_puts = Some(error);
    }

    pub fn get(&self, location: &ObjectLocation) -> Option<String> {
        self.state()
            .objects
            .get(location)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    pub fn signed_urls(&self) -> Vec<(ObjectLocation, SignedUrl)> {
        self.state().signed.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<(), CloudError> {
        let mut state = self.state();
        if let Some(e) = state.fail_puts.clone() {
            return Err(e);
        }
        state.objects.insert(location.clone(), body);
        Ok(())
    }

    async fn signed_url(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> Result<SignedUrl, CloudError> {
        let mut state = self.state();
        if !state.objects.contains_key(location) {
            return Err(CloudError::NotFound {
                kind: "blob".into(),
                name: location.to_string(),
            });
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CloudError::Rejected(format!("Invalid URL lifetime: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        let signed = SignedUrl {
            url: format!(
                "https://{}.blob.core.windows.net/{}/{}?sp=r&se={}&sig={}",
                location.account,
                location.container,
                location.name,
                expires_at.format("%Y-%m-%dT%H:%M:%SZ"),
                uuid::Uuid::new_v4().simple()
            ),
            expires_at,
        };
        state.signed.push((location.clone(), signed.clone()));
        Ok(signed)
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<(), CloudError> {
        match self.state().objects.remove(location) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound {
                kind: "blob".into(),
                name: location.to_string(),
            }),
        }
    }
}
