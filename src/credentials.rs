//! Exchange credential resolution

use crate::config::BinanceConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;

pub const BINANCE_SERVICE: &str = "binance";

/// Decrypted API key pair for an exchange account
#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Credential collaborator. Resolution failures carry a typed credential
/// error so entry/close flows can distinguish them from exchange failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, service: &str) -> Result<ExchangeCredentials>;
}

/// Credentials sourced from the config file / environment layering.
pub struct ConfigCredentialStore {
    binance: BinanceConfig,
}

impl ConfigCredentialStore {
    pub fn new(binance: BinanceConfig) -> Self {
        Self { binance }
    }
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn get(&self, user_id: &str, service: &str) -> Result<ExchangeCredentials> {
        if service != BINANCE_SERVICE {
            return Err(EngineError::Credential(format!(
                "no credentials configured for service '{service}'"
            )));
        }
        match (&self.binance.api_key, &self.binance.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok(ExchangeCredentials {
                    api_key: key.clone(),
                    api_secret: secret.clone(),
                })
            }
            _ => Err(EngineError::Credential(format!(
                "Binance API credentials missing for user '{user_id}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: Option<&str>, secret: Option<&str>) -> BinanceConfig {
        BinanceConfig {
            api_key: key.map(String::from),
            api_secret: secret.map(String::from),
            ..BinanceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_configured_credentials() {
        let store = ConfigCredentialStore::new(config(Some("k"), Some("s")));
        let creds = store.get("user-1", BINANCE_SERVICE).await.unwrap();
        assert_eq!(creds.api_key, "k");
        assert_eq!(creds.api_secret, "s");
    }

    #[tokio::test]
    async fn test_missing_secret_is_credential_error() {
        let store = ConfigCredentialStore::new(config(Some("k"), None));
        let err = store.get("user-1", BINANCE_SERVICE).await.unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL");
    }

    #[tokio::test]
    async fn test_unknown_service_is_credential_error() {
        let store = ConfigCredentialStore::new(config(Some("k"), Some("s")));
        let err = store.get("user-1", "kraken").await.unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL");
    }
}
