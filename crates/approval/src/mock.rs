//! Mock CA provider for tests and local runs
//!
//! Codes are derived from the transaction id, so a test can compute the
//! right answer with [`MockCaProvider::code_for`]. Transient failures can be
//! injected for the next N calls.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::provider::{
    CaProvider, ProviderChallenge, ProviderError, SigningRequest, VerifyOutcome,
};

#[derive(Debug)]
struct PendingTransaction {
    document_hash: String,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    transactions: HashMap<String, PendingTransaction>,
    fail_next: u32,
    verify_calls: u32,
    cancelled: Vec<String>,
}

/// Deterministic in-process provider
#[derive(Debug)]
pub struct MockCaProvider {
    id: String,
    display_name: String,
    state: Mutex<MockState>,
}

impl MockCaProvider {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Six-digit code the provider expects for `transaction_id`
    pub fn code_for(&self, transaction_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(transaction_id.as_bytes());
        let digest = hasher.finalize();
        let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 1_000_000;
        format!("{:06}", n)
    }

    /// Make the next `count` calls fail transiently
    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// How many verify calls reached the provider
    pub fn verify_calls(&self) -> u32 {
        self.state().verify_calls
    }

    /// Transactions cancelled so far, in order
    pub fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected_failure(state: &mut MockState) -> Result<(), ProviderError> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ProviderError::Transient("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MockCaProvider {
    fn default() -> Self {
        Self::new("mock-ca", "Mock CA")
    }
}

fn mask(contact: &str) -> String {
    let visible: String = contact
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}{}", "*".repeat(contact.chars().count().saturating_sub(3)), visible)
}

#[async_trait]
impl CaProvider for MockCaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn initiate_signing(
        &self,
        request: &SigningRequest,
    ) -> Result<ProviderChallenge, ProviderError> {
        let mut state = self.state();
        Self::injected_failure(&mut state)?;

        let delivered_to = match (&request.phone, &request.email) {
            (Some(phone), _) => format!("sms:{}", mask(phone)),
            (None, Some(email)) => format!("email:{}", mask(email)),
            (None, None) => {
                return Err(ProviderError::Rejected(
                    "signer has no phone or email".to_string(),
                ))
            }
        };

        let transaction_id = format!(
            "{}-{}",
            self.id.to_uppercase(),
            uuid::Uuid::new_v4().simple()
        );
        state.transactions.insert(
            transaction_id.clone(),
            PendingTransaction {
                document_hash: request.document_hash.clone(),
                cancelled: false,
            },
        );
        tracing::debug!(provider = %self.id, transaction_id = %transaction_id, "Mock challenge issued");

        Ok(ProviderChallenge {
            transaction_id,
            delivered_to,
        })
    }

    async fn verify_challenge(
        &self,
        transaction_id: &str,
        code: &str,
    ) -> Result<VerifyOutcome, ProviderError> {
        let expected = self.code_for(transaction_id);
        let mut state = self.state();
        state.verify_calls += 1;
        Self::injected_failure(&mut state)?;

        let pending = match state.transactions.get(transaction_id) {
            Some(p) if !p.cancelled => p,
            _ => {
                return Err(ProviderError::Rejected(format!(
                    "unknown or cancelled transaction {}",
                    transaction_id
                )))
            }
        };

        if code.trim() != expected {
            return Ok(VerifyOutcome::WrongCode);
        }
        let artifact_ref = format!(
            "{}:{}:{}",
            self.id,
            transaction_id,
            &pending.document_hash[..pending.document_hash.len().min(16)]
        );
        Ok(VerifyOutcome::Verified { artifact_ref })
    }

    async fn cancel(&self, transaction_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        if let Some(pending) = state.transactions.get_mut(transaction_id) {
            pending.cancelled = true;
        }
        state.cancelled.push(transaction_id.to_string());
        Ok(())
    }
}
