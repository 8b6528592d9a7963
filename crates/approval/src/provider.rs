//! Certificate authority (CA) signing providers
//!
//! A provider signs the consent document hash on the donor's behalf after
//! an out-of-band challenge (OTP) is answered.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// What is sent to the provider to start signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningRequest {
    pub donor_id: String,
    pub signer_name: String,
    /// SHA-256 of the consent text, hex encoded
    pub document_hash: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Challenge issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderChallenge {
    pub transaction_id: String,
    /// Where the code went, masked, e.g. `sms:*******789`
    pub delivered_to: String,
}

/// Answer to a submitted code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signed; `artifact_ref` locates the signed document at the provider
    Verified { artifact_ref: String },
    WrongCode,
}

/// Provider failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth retrying
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Permanent refusal for this transaction
    #[error("provider rejected: {0}")]
    Rejected(String),
}

/// A signing provider
#[async_trait]
pub trait CaProvider: Send + Sync {
    /// Stable identifier used in requests
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Send a challenge for `request`
    async fn initiate_signing(
        &self,
        request: &SigningRequest,
    ) -> Result<ProviderChallenge, ProviderError>;

    /// Check a code against a pending transaction
    async fn verify_challenge(
        &self,
        transaction_id: &str,
        code: &str,
    ) -> Result<VerifyOutcome, ProviderError>;

    /// Invalidate a pending transaction; later codes for it are refused
    async fn cancel(&self, transaction_id: &str) -> Result<(), ProviderError>;
}

/// Provider summary for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
}

/// Configured providers by id
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn CaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any with the same id
    pub fn register(&mut self, provider: Arc<dyn CaProvider>) {
        tracing::debug!(provider = provider.id(), "Signing provider registered");
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn CaProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CaProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .values()
            .map(|p| ProviderInfo {
                id: p.id().to_string(),
                display_name: p.display_name().to_string(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
