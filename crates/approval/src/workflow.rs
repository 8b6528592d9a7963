//! Approval workflow
//!
//! Preview the consent document, pick a CA provider, have it issue a
//! challenge, then verify the donor's code and approve. The wait for the
//! code holds no lock and no transaction; eligibility is checked again once
//! the provider has verified.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use milkbank_business::{write_transition, BusinessError, ServiceContext};
use milkbank_core::{
    Action, Actor, CoreError, DonorEvent, DonorRecord, DonorStatus, Resource, TransitionOutcome,
};
use milkbank_persistence::{DonorRepo, PersistenceError};

use crate::config::ApprovalConfig;
use crate::consent::{self, ConsentDocument};
use crate::error::{ApprovalError, ApprovalResult};
use crate::provider::{
    CaProvider, ProviderError, ProviderInfo, ProviderRegistry, SigningRequest, VerifyOutcome,
};
use crate::session::{ApprovalSession, ApprovalState};
use crate::store::SessionStore;

/// Finalizing retries when the donor row moves under us
const FINALIZE_ATTEMPTS: usize = 3;

/// A session as loaded, with the version it was read at
struct Loaded {
    session: ApprovalSession,
    stored_version: Option<i64>,
}

/// Signed approval workflow over one service context
pub struct ApprovalWorkflow<'a> {
    ctx: &'a ServiceContext,
    providers: &'a ProviderRegistry,
    config: &'a ApprovalConfig,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(
        ctx: &'a ServiceContext,
        providers: &'a ProviderRegistry,
        config: &'a ApprovalConfig,
    ) -> Self {
        Self {
            ctx,
            providers,
            config,
        }
    }

    /// Current session, with any closed challenge window applied
    pub async fn status(&self, actor: &Actor, donor_id: &str) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Read)?;
        self.load_donor(donor_id).await?;
        Ok(self.current(donor_id, Utc::now()).await?.session)
    }

    /// Signing providers the caller may choose from
    pub fn providers(&self, actor: &Actor) -> ApprovalResult<Vec<ProviderInfo>> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Read)?;
        Ok(self.providers.list())
    }

    /// Render the consent text and remember its hash on the session
    pub async fn preview_consent_document(
        &self,
        actor: &Actor,
        donor_id: &str,
    ) -> ApprovalResult<ConsentDocument> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Approve)?;
        let donor = self.eligible_donor(donor_id).await?;
        let now = Utc::now();

        let document = consent::render(&donor);
        let mut loaded = self.current(donor_id, now).await?;
        if loaded.session.document_hash.as_deref() != Some(document.document_hash.as_str())
            || loaded.session.state == ApprovalState::Failed
        {
            loaded
                .session
                .record_preview(document.document_hash.clone(), now)?;
            self.save(&mut loaded).await?;
        }

        tracing::debug!(donor_id, hash = %document.document_hash, "Consent document previewed");
        Ok(document)
    }

    pub async fn select_provider(
        &self,
        actor: &Actor,
        donor_id: &str,
        provider_id: &str,
    ) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Approve)?;
        self.provider(provider_id)?;
        self.eligible_donor(donor_id).await?;
        let now = Utc::now();

        let mut loaded = self.current(donor_id, now).await?;
        loaded.session.select_provider(provider_id, now)?;
        self.save(&mut loaded).await?;

        tracing::info!(donor_id, provider = provider_id, "Signing provider selected");
        Ok(loaded.session)
    }

    /// Ask the selected provider for a challenge
    pub async fn initiate_signing(
        &self,
        actor: &Actor,
        donor_id: &str,
    ) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Approve)?;
        let donor = self.eligible_donor(donor_id).await?;
        if !donor.has_clear_test() {
            return Err(CoreError::TestsOutstanding.into());
        }
        let now = Utc::now();

        let mut loaded = self.current(donor_id, now).await?;
        if loaded.session.state != ApprovalState::NotStarted {
            return Err(CoreError::invalid_transition(
                "approval",
                loaded.session.state,
                "initiate_signing",
            )
            .into());
        }
        let (provider_id, document_hash) = match (
            loaded.session.provider_id.clone(),
            loaded.session.document_hash.clone(),
        ) {
            (Some(p), Some(h)) => (p, h),
            (None, _) => return Err(BusinessError::validation("select a signing provider first").into()),
            (_, None) => {
                return Err(
                    BusinessError::validation("preview the consent document first").into(),
                )
            }
        };
        if consent::render(&donor).document_hash != document_hash {
            return Err(BusinessError::validation(
                "donor details changed since the consent preview; preview again",
            )
            .into());
        }

        let provider = self.provider(&provider_id)?;
        let request = signing_request(&donor, document_hash);
        let challenge = self
            .with_retry("initiate_signing", || provider.initiate_signing(&request))
            .await?;

        let expires_at = now + self.config.challenge_window();
        loaded
            .session
            .begin_challenge(challenge.transaction_id.clone(), expires_at, now)?;
        if let Err(e) = self.save(&mut loaded).await {
            self.release(provider.as_ref(), &challenge.transaction_id).await;
            return Err(e);
        }

        tracing::info!(
            donor_id,
            provider = %provider_id,
            transaction_id = %challenge.transaction_id,
            delivered_to = %challenge.delivered_to,
            %expires_at,
            "Signing challenge issued"
        );
        Ok(loaded.session)
    }

    /// Preview when needed, select the provider and initiate, in one call
    pub async fn start_signing(
        &self,
        actor: &Actor,
        donor_id: &str,
        provider_id: &str,
    ) -> ApprovalResult<ApprovalSession> {
        let current = self.status(actor, donor_id).await?;
        if current.state == ApprovalState::AwaitingChallenge
            && current.provider_id.as_deref() == Some(provider_id)
        {
            return Ok(current);
        }
        self.preview_consent_document(actor, donor_id).await?;
        self.select_provider(actor, donor_id, provider_id).await?;
        self.initiate_signing(actor, donor_id).await
    }

    /// Issue a fresh challenge; the previous transaction stops being valid
    pub async fn resend_challenge(
        &self,
        actor: &Actor,
        donor_id: &str,
    ) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Approve)?;
        let donor = self.eligible_donor(donor_id).await?;
        let now = Utc::now();

        let mut loaded = self.current(donor_id, now).await?;
        if loaded.session.state != ApprovalState::AwaitingChallenge {
            return Err(CoreError::invalid_transition(
                "approval",
                loaded.session.state,
                "resend_challenge",
            )
            .into());
        }
        let (provider_id, document_hash) = match (
            loaded.session.provider_id.clone(),
            loaded.session.document_hash.clone(),
        ) {
            (Some(p), Some(h)) => (p, h),
            _ => {
                return Err(BusinessError::invariant(format!(
                    "awaiting session for {} lacks provider or document hash",
                    donor_id
                ))
                .into())
            }
        };

        let provider = self.provider(&provider_id)?;
        let request = signing_request(&donor, document_hash);
        let challenge = self
            .with_retry("resend_challenge", || provider.initiate_signing(&request))
            .await?;

        let previous = loaded.session.resend(
            challenge.transaction_id.clone(),
            now + self.config.challenge_window(),
            now,
        )?;
        if let Err(e) = self.save(&mut loaded).await {
            self.release(provider.as_ref(), &challenge.transaction_id).await;
            return Err(e);
        }
        if let Some(previous) = previous {
            self.release(provider.as_ref(), &previous).await;
        }

        tracing::info!(
            donor_id,
            transaction_id = %challenge.transaction_id,
            "Signing challenge resent"
        );
        Ok(loaded.session)
    }

    pub async fn submit_challenge(
        &self,
        actor: &Actor,
        donor_id: &str,
        transaction_id: &str,
        code: &str,
    ) -> ApprovalResult<ApprovalSession> {
        self.submit_challenge_at(actor, donor_id, transaction_id, code, Utc::now())
            .await
    }

    /// Verify `code` against the pending challenge as of `now`
    pub async fn submit_challenge_at(
        &self,
        actor: &Actor,
        donor_id: &str,
        transaction_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Approve)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(BusinessError::validation("code is required").into());
        }

        let mut loaded = match self.load(donor_id).await? {
            Some(loaded) => loaded,
            None => return Err(ApprovalError::stale("no challenge is pending")),
        };
        if loaded.session.is_expired(now) {
            self.expire(&mut loaded, now).await?;
            return Err(ApprovalError::stale("challenge window has closed"));
        }

        let provider = self.provider(loaded.session.provider_id.as_deref().unwrap_or_default())?;

        // Committed before the provider call so a second submission sees it.
        // The lease bounds how long a lost verification can hold the session.
        loaded
            .session
            .start_verifying(transaction_id, now + self.config.verify_lease(), now)?;
        self.save(&mut loaded).await?;

        let verified = self
            .with_retry("verify_challenge", || {
                provider.verify_challenge(transaction_id, code)
            })
            .await;

        match verified {
            Ok(VerifyOutcome::Verified { artifact_ref }) => {
                self.finalize(actor, loaded, artifact_ref).await
            }
            Ok(VerifyOutcome::WrongCode) => {
                let remaining = loaded
                    .session
                    .wrong_code(self.config.max_attempts, Utc::now());
                self.save(&mut loaded).await?;
                tracing::warn!(donor_id, remaining, "Wrong signing code");
                Err(ApprovalError::WrongCode { remaining })
            }
            Err(ProviderError::Transient(message)) => {
                loaded.session.verification_unavailable(Utc::now());
                self.save(&mut loaded).await?;
                tracing::warn!(donor_id, error = %message, "Provider unavailable during verification");
                Err(ApprovalError::TransientProvider(message))
            }
            Err(ProviderError::Rejected(message)) => {
                loaded
                    .session
                    .fail(format!("provider rejected: {}", message), Utc::now());
                self.save(&mut loaded).await?;
                tracing::warn!(donor_id, error = %message, "Provider rejected verification");
                Err(ApprovalError::ProviderRejected(message))
            }
        }
    }

    /// Drop the pending challenge and invalidate it at the provider
    pub async fn cancel(&self, actor: &Actor, donor_id: &str) -> ApprovalResult<ApprovalSession> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Cancel)?;
        let now = Utc::now();

        let mut loaded = self.current(donor_id, now).await?;
        let dropped = loaded.session.cancel(now)?;
        if let Some(transaction_id) = dropped {
            self.save(&mut loaded).await?;
            if let Some(provider) = loaded
                .session
                .provider_id
                .as_deref()
                .and_then(|id| self.providers.get(id))
            {
                self.release(provider.as_ref(), &transaction_id).await;
            }
            tracing::info!(donor_id, actor = %actor, "Signing challenge cancelled");
        }
        Ok(loaded.session)
    }

    pub async fn expire_stale_sessions(&self, actor: &Actor) -> ApprovalResult<Vec<String>> {
        self.expire_stale_sessions_at(actor, Utc::now()).await
    }

    /// Revert every challenge whose window closed by `now`, and every
    /// verification whose lease lapsed; returns donor ids
    pub async fn expire_stale_sessions_at(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<String>> {
        self.ctx
            .authorize(actor, Resource::Approval, Action::Cancel)?;

        let stale = SessionStore::find_expired(self.ctx.pool(), now).await?;
        let mut expired = Vec::new();
        for session in stale {
            let mut loaded = Loaded {
                stored_version: Some(session.version),
                session,
            };
            match self.expire(&mut loaded, now).await {
                Ok(()) => expired.push(loaded.session.donor_id),
                Err(ApprovalError::Business(BusinessError::ConcurrentUpdate { .. })) => {
                    tracing::debug!(donor_id = %loaded.session.donor_id, "Skipped expiry, session changed");
                }
                Err(e) => return Err(e),
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired signing challenges");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------------

    /// Approve the donor and complete the session, or fail the session so
    /// signing can start over
    async fn finalize(
        &self,
        actor: &Actor,
        mut loaded: Loaded,
        artifact_ref: String,
    ) -> ApprovalResult<ApprovalSession> {
        let verifying_version = loaded.stored_version;
        match self.record_approval(actor, &mut loaded, &artifact_ref).await {
            Ok(()) => {
                tracing::info!(
                    donor_id = %loaded.session.donor_id,
                    actor = %actor,
                    artifact_ref = %artifact_ref,
                    "Donor approved with signed consent"
                );
                Ok(loaded.session)
            }
            Err(e) => {
                // Session row unchanged since the Verifying commit
                if loaded.stored_version == verifying_version {
                    self.abandon(&mut loaded, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Write the approval and the completed session in one transaction.
    /// A donor that moved on fails the session with `DonorIneligible`.
    async fn record_approval(
        &self,
        actor: &Actor,
        loaded: &mut Loaded,
        artifact_ref: &str,
    ) -> ApprovalResult<()> {
        let donor_id = loaded.session.donor_id.clone();
        let event = DonorEvent::Approve {
            signature: artifact_ref.to_string(),
        };

        for _ in 0..FINALIZE_ATTEMPTS {
            let mut donor = self.load_donor(&donor_id).await?;
            let expected_version = donor.version;
            let now = Utc::now();

            let outcome = match donor.apply(&event, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let status = donor.status;
                    loaded.session.fail("donor no longer eligible", now);
                    self.save(loaded).await?;
                    tracing::warn!(donor_id = %donor_id, %status, error = %e, "Approval abandoned, donor no longer eligible");
                    return Err(ApprovalError::DonorIneligible { donor_id, status });
                }
            };

            let mut completed = loaded.session.clone();
            completed.complete(artifact_ref.to_string(), now);
            let session_version = loaded.stored_version.unwrap_or_default();

            let mut tx = self.ctx.pool().begin().await?;
            if let TransitionOutcome::Applied { from, .. } = outcome {
                match write_transition(&mut tx, actor, &donor, expected_version, from, &event).await
                {
                    Ok(()) => {}
                    Err(BusinessError::ConcurrentUpdate { .. }) => {
                        drop(tx);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !SessionStore::update_versioned(&mut *tx, &completed, session_version).await? {
                return Err(BusinessError::concurrent("ApprovalSession", &donor_id).into());
            }
            tx.commit().await?;

            completed.version = session_version + 1;
            loaded.stored_version = Some(completed.version);
            loaded.session = completed;
            return Ok(());
        }

        Err(BusinessError::concurrent("Donor", &donor_id).into())
    }

    /// Fail a session whose verified approval could not be recorded. Best
    /// effort: if this write is lost too, the verify lease releases it.
    async fn abandon(&self, loaded: &mut Loaded, cause: &ApprovalError) {
        if loaded.session.state != ApprovalState::Failed {
            loaded
                .session
                .fail("approval could not be recorded", Utc::now());
        }
        match self.save(loaded).await {
            Ok(()) => {
                tracing::warn!(donor_id = %loaded.session.donor_id, error = %cause, "Verified approval not recorded, session failed");
            }
            Err(e) => {
                tracing::warn!(donor_id = %loaded.session.donor_id, error = %e, cause = %cause, "Could not fail session, left to the verify lease");
            }
        }
    }

    async fn expire(&self, loaded: &mut Loaded, now: DateTime<Utc>) -> ApprovalResult<()> {
        if let Some(transaction_id) = loaded.session.expire(now) {
            self.save(loaded).await?;
            if let Some(provider) = loaded
                .session
                .provider_id
                .as_deref()
                .and_then(|id| self.providers.get(id))
            {
                self.release(provider.as_ref(), &transaction_id).await;
            }
            tracing::info!(donor_id = %loaded.session.donor_id, "Signing challenge expired");
        }
        Ok(())
    }

    async fn load(&self, donor_id: &str) -> ApprovalResult<Option<Loaded>> {
        Ok(SessionStore::get(self.ctx.pool(), donor_id)
            .await?
            .map(|session| Loaded {
                stored_version: Some(session.version),
                session,
            }))
    }

    /// Stored session (or a fresh one) with expiry applied
    async fn current(&self, donor_id: &str, now: DateTime<Utc>) -> ApprovalResult<Loaded> {
        match self.load(donor_id).await? {
            Some(mut loaded) => {
                if loaded.session.is_expired(now) {
                    self.expire(&mut loaded, now).await?;
                }
                Ok(loaded)
            }
            None => Ok(Loaded {
                session: ApprovalSession::new(donor_id, now),
                stored_version: None,
            }),
        }
    }

    async fn save(&self, loaded: &mut Loaded) -> ApprovalResult<()> {
        match loaded.stored_version {
            None => {
                SessionStore::insert(self.ctx.pool(), &loaded.session)
                    .await
                    .map_err(|e| match e {
                        PersistenceError::AlreadyExists { .. } => ApprovalError::from(
                            BusinessError::concurrent("ApprovalSession", &loaded.session.donor_id),
                        ),
                        other => ApprovalError::from(other),
                    })?;
            }
            Some(expected) => {
                if !SessionStore::update_versioned(self.ctx.pool(), &loaded.session, expected)
                    .await?
                {
                    return Err(BusinessError::concurrent(
                        "ApprovalSession",
                        &loaded.session.donor_id,
                    )
                    .into());
                }
                loaded.session.version = expected + 1;
            }
        }
        loaded.stored_version = Some(loaded.session.version);
        Ok(())
    }

    async fn load_donor(&self, donor_id: &str) -> ApprovalResult<DonorRecord> {
        DonorRepo::get(self.ctx.pool(), donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id).into())
    }

    /// Donor that may still be approved
    async fn eligible_donor(&self, donor_id: &str) -> ApprovalResult<DonorRecord> {
        let donor = self.load_donor(donor_id).await?;
        if donor.status != DonorStatus::NeedsTests {
            return Err(CoreError::invalid_transition("donor", donor.status, "approve").into());
        }
        Ok(donor)
    }

    fn provider(&self, provider_id: &str) -> ApprovalResult<Arc<dyn CaProvider>> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| ApprovalError::UnknownProvider(provider_id.to_string()))
    }

    /// Call the provider, retrying transient failures a bounded number of times
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retries = 0;
        loop {
            match call().await {
                Err(ProviderError::Transient(message)) if retries < self.config.provider_retries => {
                    retries += 1;
                    tracing::warn!(operation, retries, error = %message, "Transient provider failure, retrying");
                }
                other => return other,
            }
        }
    }

    /// Invalidate a transaction at the provider. Failure only leaves a
    /// transaction nobody can complete, so it is logged, not returned.
    async fn release(&self, provider: &dyn CaProvider, transaction_id: &str) {
        if let Err(e) = provider.cancel(transaction_id).await {
            tracing::warn!(provider = provider.id(), transaction_id, error = %e, "Provider cancel failed");
        }
    }
}

fn signing_request(donor: &DonorRecord, document_hash: String) -> SigningRequest {
    SigningRequest {
        donor_id: donor.id.clone(),
        signer_name: donor.full_name.clone(),
        document_hash,
        phone: donor.phone.clone(),
        email: donor.email.clone(),
    }
}
