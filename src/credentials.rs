//! Cloud credential acquisition.

use crate::config::CredentialsSection;
use crate::errors::ProvisionError;
use async_trait::async_trait;

/// Service-principal credentials for the cloud control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Missing or empty values are a `ProvisionError::Configuration`.
    async fn credentials(&self) -> Result<CloudCredentials, ProvisionError>;
}

/// Reads credentials from the environment variables named in `[credentials]`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    names: CredentialsSection,
}

impl EnvCredentials {
    pub fn new(names: CredentialsSection) -> Self {
        Self { names }
    }

    fn read(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<CloudCredentials, ProvisionError> {
        let fields = [
            &self.names.client_id_env,
            &self.names.client_secret_env,
            &self.names.tenant_id_env,
            &self.names.subscription_id_env,
        ];
        let mut values = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();
        for name in fields {
            match lookup(name).filter(|v| !v.trim().is_empty()) {
                Some(v) => values.push(v),
                None => missing.push(name.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(ProvisionError::Configuration(format!(
                "Missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or_default();
        Ok(CloudCredentials {
            client_id: next(),
            client_secret: next(),
            tenant_id: next(),
            subscription_id: next(),
        })
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credentials(&self) -> Result<CloudCredentials, ProvisionError> {
        self.read(|name| std::env::var(name).ok())
    }
}

/// Fixed credentials, or a fixed configuration failure.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Option<CloudCredentials>);

impl StaticCredentials {
    pub fn new(credentials: CloudCredentials) -> Self {
        Self(Some(credentials))
    }

    pub fn missing() -> Self {
        Self(None)
    }

    /// Placeholder service principal used with the simulated backend.
    pub fn simulated() -> Self {
        Self::new(CloudCredentials {
            client_id: "00000000-0000-0000-0000-000000000001".into(),
            client_secret: "simulated".into(),
            tenant_id: "00000000-0000-0000-0000-000000000002".into(),
            subscription_id: "00000000-0000-0000-0000-000000000003".into(),
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<CloudCredentials, ProvisionError> {
        self.0.clone().ok_or_else(|| {
            ProvisionError::Configuration("Cloud credentials are not configured".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reads_all_four_variables() {
        let vars = env(&[
            ("AZURE_APP_CLIENT_ID", "cid"),
            ("AZURE_APP_CLIENT_SECRET", "secret"),
            ("AZURE_APP_TENANT_ID", "tid"),
            ("AZURE_SUBSCRIPTION_ID", "sub"),
        ]);
        let creds = EnvCredentials::default()
            .read(|name| vars.get(name).cloned())
            .unwrap();
        assert_eq!(creds.client_id, "cid");
        assert_eq!(creds.subscription_id, "sub");
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn missing_and_blank_variables_are_listed() {
        let vars = env(&[
            ("AZURE_APP_CLIENT_ID", "cid"),
            ("AZURE_APP_CLIENT_SECRET", "  "),
            ("AZURE_APP_TENANT_ID", "tid"),
        ]);
        let err = EnvCredentials::default()
            .read(|name| vars.get(name).cloned())
            .unwrap_err();
        match err {
            ProvisionError::Configuration(msg) => {
                assert!(msg.contains("AZURE_APP_CLIENT_SECRET"));
                assert!(msg.contains("AZURE_SUBSCRIPTION_ID"));
                assert!(!msg.contains("AZURE_APP_TENANT_ID"));
            }
            other => panic!("expected Configuration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn static_missing_is_configuration_error() {
        let err = StaticCredentials::missing().credentials().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(StaticCredentials::simulated().credentials().await.is_ok());
    }
}
