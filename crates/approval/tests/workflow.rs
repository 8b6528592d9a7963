//! Approval workflow integration tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use milkbank_approval::{
    ApprovalConfig, ApprovalError, ApprovalSession, ApprovalState, ApprovalWorkflow, CaProvider,
    MockCaProvider, ProviderChallenge, ProviderError, ProviderRegistry, SessionStore,
    SigningRequest, VerifyOutcome,
};
use sqlx::SqlitePool;
use milkbank_business::{DonorService, ServiceConfig, ServiceContext};
use milkbank_core::{Actor, DonorEvent, DonorStatus, NewDonor, Role, ScreeningOutcome, TestResult};
use milkbank_permissions::{default_policy, PermissionRegistry};
use milkbank_persistence::{Database, DonorRepo};

const PROVIDER: &str = "mock-ca";

fn nurse() -> Actor {
    Actor::new("nurse-1", Role::MedicalStaff)
}

struct Harness {
    _db: Database,
    ctx: ServiceContext,
    mock: Arc<MockCaProvider>,
    providers: ProviderRegistry,
    config: ApprovalConfig,
}

impl Harness {
    async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        let registry = PermissionRegistry::from_policy(&default_policy()).unwrap();
        let ctx = ServiceContext::new(&db, Arc::new(registry), ServiceConfig::default());
        let mock = Arc::new(MockCaProvider::default());
        let providers = ProviderRegistry::new().with(mock.clone());
        Self {
            _db: db,
            ctx,
            mock,
            providers,
            config: ApprovalConfig::default(),
        }
    }

    fn workflow(&self) -> ApprovalWorkflow<'_> {
        ApprovalWorkflow::new(&self.ctx, &self.providers, &self.config)
    }

    /// A NeedsTests donor with one clear result
    async fn tested_donor(&self, name: &str) -> String {
        let service = DonorService::new(&self.ctx);
        let donor = service
            .register(
                &nurse(),
                NewDonor {
                    full_name: name.to_string(),
                    phone: Some("0901234789".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let events = [
            DonorEvent::CompleteScreening {
                outcome: ScreeningOutcome::Pass,
                reasons: vec![],
            },
            DonorEvent::OrderTests,
            DonorEvent::ReceiveTestResult {
                result: TestResult::Clear,
                reference: "LAB-7".to_string(),
            },
        ];
        for event in events {
            service.apply_event(&nurse(), &donor.id, event).await.unwrap();
        }
        donor.id
    }

    async fn started(&self, name: &str) -> (String, ApprovalSession) {
        let donor_id = self.tested_donor(name).await;
        let session = self
            .workflow()
            .start_signing(&nurse(), &donor_id, PROVIDER)
            .await
            .unwrap();
        (donor_id, session)
    }

    async fn donor_status(&self, donor_id: &str) -> DonorStatus {
        DonorRepo::get(self.ctx.pool(), donor_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

fn tx_of(session: &ApprovalSession) -> String {
    session.transaction_id.clone().unwrap()
}

/// Leave the session committed as Verifying, the way a process that died
/// mid-verification would
async fn stall_in_verifying(h: &Harness, donor_id: &str, tx: &str, lease_until: DateTime<Utc>) {
    let pool = h.ctx.pool();
    let mut session = SessionStore::get(pool, donor_id).await.unwrap().unwrap();
    let version = session.version;
    session.start_verifying(tx, lease_until, Utc::now()).unwrap();
    assert!(SessionStore::update_versioned(pool, &session, version)
        .await
        .unwrap());
}

/// Wraps the mock and bumps the stored session version once while a code
/// is being verified, as a concurrent writer would
struct InterferingProvider {
    inner: Arc<MockCaProvider>,
    pool: SqlitePool,
    armed: AtomicBool,
}

#[async_trait]
impl CaProvider for InterferingProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    async fn initiate_signing(
        &self,
        request: &SigningRequest,
    ) -> Result<ProviderChallenge, ProviderError> {
        self.inner.initiate_signing(request).await
    }

    async fn verify_challenge(
        &self,
        transaction_id: &str,
        code: &str,
    ) -> Result<VerifyOutcome, ProviderError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            sqlx::query("UPDATE approval_sessions SET version = version + 1 WHERE transaction_id = ?")
                .bind(transaction_id)
                .execute(&self.pool)
                .await
                .unwrap();
        }
        self.inner.verify_challenge(transaction_id, code).await
    }

    async fn cancel(&self, transaction_id: &str) -> Result<(), ProviderError> {
        self.inner.cancel(transaction_id).await
    }
}

#[tokio::test]
async fn test_signed_approval_end_to_end() {
    let h = Harness::new().await;
    let donor_id = h.tested_donor("Nguyen Thi Lan").await;
    let workflow = h.workflow();

    let document = workflow
        .preview_consent_document(&nurse(), &donor_id)
        .await
        .unwrap();
    assert!(document.text.contains("Nguyen Thi Lan"));

    workflow
        .select_provider(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    let session = workflow.initiate_signing(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::AwaitingChallenge);
    assert_eq!(session.document_hash.as_deref(), Some(document.document_hash.as_str()));
    // Waiting for the code leaves the donor untouched
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);

    let tx = tx_of(&session);
    let code = h.mock.code_for(&tx);
    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &code)
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);

    let donor = DonorRepo::get(h.ctx.pool(), &donor_id).await.unwrap().unwrap();
    assert_eq!(donor.status, DonorStatus::Approved);
    assert_eq!(donor.approval_signature, done.artifact_ref);
    assert!(done
        .artifact_ref
        .as_deref()
        .unwrap()
        .ends_with(&document.document_hash[..16]));

    let history = DonorService::new(&h.ctx)
        .history(&nurse(), &donor_id)
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().event, "approve");
    assert_eq!(history.last().unwrap().actor_id, "nurse-1");

    // Replaying the same code is stale now
    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));
}

#[tokio::test]
async fn test_wrong_codes_until_failed() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Tran Thi Mai").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    for expected in (0..h.config.max_attempts).rev() {
        let err = workflow
            .submit_challenge(&nurse(), &donor_id, &tx, "000000x")
            .await
            .unwrap_err();
        match err {
            ApprovalError::WrongCode { remaining } => assert_eq!(remaining, expected),
            other => panic!("expected wrong code, got {other:?}"),
        }
    }

    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some("too many wrong codes"));
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);

    // Even the right code is refused once failed
    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));

    // A failed session can start over
    let restarted = workflow
        .start_signing(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    assert_eq!(restarted.state, ApprovalState::AwaitingChallenge);
    assert_eq!(restarted.attempts, 0);
}

#[tokio::test]
async fn test_expired_challenge_is_stale() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Le Thi Hoa").await;
    let tx = tx_of(&session);
    let code = h.mock.code_for(&tx);
    let workflow = h.workflow();

    let late = Utc::now() + Duration::seconds(h.config.challenge_window_secs + 1);
    let err = workflow
        .submit_challenge_at(&nurse(), &donor_id, &tx, &code, late)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));
    assert_eq!(err.code(), "STALE_CHALLENGE");

    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::NotStarted);
    assert!(session.transaction_id.is_none());
    assert_eq!(h.mock.cancelled(), vec![tx.clone()]);

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);
}

#[tokio::test]
async fn test_resend_supersedes_previous_code() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Pham Thi Thu").await;
    let old_tx = tx_of(&session);
    let workflow = h.workflow();

    let resent = workflow.resend_challenge(&nurse(), &donor_id).await.unwrap();
    let new_tx = tx_of(&resent);
    assert_ne!(old_tx, new_tx);
    assert_eq!(h.mock.cancelled(), vec![old_tx.clone()]);

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &old_tx, &h.mock.code_for(&old_tx))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));

    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &new_tx, &h.mock.code_for(&new_tx))
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);
}

#[tokio::test]
async fn test_transient_provider_failure() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Vo Thi Ngoc").await;
    let tx = tx_of(&session);
    let code = h.mock.code_for(&tx);
    let workflow = h.workflow();

    // Retried once, then gives up without spending an attempt
    h.mock.fail_next(2);
    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::TransientProvider(_)));
    assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");
    assert_eq!(h.mock.verify_calls(), 2);

    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::AwaitingChallenge);
    assert_eq!(session.attempts, 0);

    // A single blip is absorbed by the retry
    h.mock.fail_next(1);
    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &code)
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);
    assert_eq!(h.mock.verify_calls(), 4);
}

#[tokio::test]
async fn test_donor_rejected_while_waiting() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Do Thi Kim").await;
    let tx = tx_of(&session);

    DonorService::new(&h.ctx)
        .apply_event(
            &nurse(),
            &donor_id,
            DonorEvent::Reject {
                reasons: vec!["late lab finding".to_string()],
            },
        )
        .await
        .unwrap();

    let workflow = h.workflow();
    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    match &err {
        ApprovalError::DonorIneligible { status, .. } => assert_eq!(*status, DonorStatus::Rejected),
        other => panic!("expected donor ineligible, got {other:?}"),
    }

    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::Failed);
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::Rejected);
}

#[tokio::test]
async fn test_cancel_invalidates_transaction() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Bui Thi Yen").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    let cancelled = workflow.cancel(&nurse(), &donor_id).await.unwrap();
    assert_eq!(cancelled.state, ApprovalState::NotStarted);
    assert_eq!(h.mock.cancelled(), vec![tx.clone()]);

    // Cancelling again is a no-op
    workflow.cancel(&nurse(), &donor_id).await.unwrap();
    assert_eq!(h.mock.cancelled().len(), 1);

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::StaleChallenge(_)));
}

#[tokio::test]
async fn test_expire_sweep() {
    let h = Harness::new().await;
    let (first, _) = h.started("Ho Thi An").await;
    let (second, _) = h.started("Ngo Thi Binh").await;
    let fresh = h.tested_donor("Dang Thi Cuc").await;
    let workflow = h.workflow();

    let now = Utc::now();
    assert!(workflow
        .expire_stale_sessions_at(&nurse(), now)
        .await
        .unwrap()
        .is_empty());

    let later = now + Duration::minutes(10);
    let mut expired = workflow
        .expire_stale_sessions_at(&nurse(), later)
        .await
        .unwrap();
    expired.sort();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(expired, expected);
    assert!(!expired.contains(&fresh));
    assert_eq!(h.mock.cancelled().len(), 2);

    assert!(workflow
        .expire_stale_sessions_at(&nurse(), later)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_guards() {
    let h = Harness::new().await;
    let workflow = h.workflow();
    let donor_id = h.tested_donor("Ly Thi Dao").await;

    let desk = Actor::new("desk-1", Role::Staff);
    let err = workflow
        .start_signing(&desk, &donor_id, PROVIDER)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_DENIED");

    let err = workflow
        .select_provider(&nurse(), &donor_id, "nowhere-ca")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnknownProvider(_)));

    // Initiating before preview and selection
    let err = workflow.initiate_signing(&nurse(), &donor_id).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    // Pending donors cannot be approved yet
    let pending = DonorService::new(&h.ctx)
        .register(
            &nurse(),
            NewDonor {
                full_name: "Mac Thi Hanh".to_string(),
                phone: Some("0907000000".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = workflow
        .preview_consent_document(&nurse(), &pending.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, "MOCK-CA-x", "  ")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_interrupted_verification_released_by_lease() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Trinh Thi Nga").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    let now = Utc::now();
    stall_in_verifying(&h, &donor_id, &tx, now + h.config.verify_lease()).await;

    // While the lease runs the session is left alone
    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::Verifying);
    let err = workflow.cancel(&nurse(), &donor_id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    assert!(workflow
        .expire_stale_sessions_at(&nurse(), now)
        .await
        .unwrap()
        .is_empty());

    // Past the lease the sweep hands the donor back
    let later = now + h.config.verify_lease() + Duration::seconds(1);
    let expired = workflow
        .expire_stale_sessions_at(&nurse(), later)
        .await
        .unwrap();
    assert_eq!(expired, vec![donor_id.clone()]);
    assert_eq!(h.mock.cancelled(), vec![tx.clone()]);

    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::NotStarted);
    assert!(session.verify_lease_until.is_none());
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);

    let restarted = workflow
        .start_signing(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    let new_tx = tx_of(&restarted);
    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &new_tx, &h.mock.code_for(&new_tx))
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::Approved);
}

#[tokio::test]
async fn test_lapsed_verification_can_be_cancelled() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Chu Thi Oanh").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    stall_in_verifying(&h, &donor_id, &tx, Utc::now() - Duration::seconds(1)).await;

    let cancelled = workflow.cancel(&nurse(), &donor_id).await.unwrap();
    assert_eq!(cancelled.state, ApprovalState::NotStarted);
    assert!(cancelled.transaction_id.is_none());
    assert_eq!(h.mock.cancelled(), vec![tx.clone()]);

    let selected = workflow
        .select_provider(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    assert_eq!(selected.state, ApprovalState::NotStarted);
    let initiated = workflow.initiate_signing(&nurse(), &donor_id).await.unwrap();
    assert_eq!(initiated.state, ApprovalState::AwaitingChallenge);
}

#[tokio::test]
async fn test_session_moved_during_finalize() {
    let mut h = Harness::new().await;
    h.providers.register(Arc::new(InterferingProvider {
        inner: h.mock.clone(),
        pool: h.ctx.pool().clone(),
        armed: AtomicBool::new(true),
    }));
    let (donor_id, session) = h.started("Quach Thi Phuong").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONCURRENT_UPDATE");

    // Nothing half-written: the donor was not approved
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);
    let stored = SessionStore::get(h.ctx.pool(), &donor_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, ApprovalState::Verifying);
    assert!(stored.verify_lease_until.is_some());

    let later = Utc::now() + h.config.verify_lease() + Duration::seconds(1);
    let expired = workflow
        .expire_stale_sessions_at(&nurse(), later)
        .await
        .unwrap();
    assert_eq!(expired, vec![donor_id.clone()]);

    let restarted = workflow
        .start_signing(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    let new_tx = tx_of(&restarted);
    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &new_tx, &h.mock.code_for(&new_tx))
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::Approved);
}

#[tokio::test]
async fn test_storage_failure_during_finalize() {
    let h = Harness::new().await;
    let (donor_id, session) = h.started("Kieu Thi Quyen").await;
    let tx = tx_of(&session);
    let workflow = h.workflow();

    sqlx::query(
        r#"CREATE TRIGGER block_approval BEFORE INSERT ON donor_events
        WHEN NEW.event = 'approve'
        BEGIN SELECT RAISE(ABORT, 'approval log unavailable'); END"#,
    )
    .execute(h.ctx.pool())
    .await
    .unwrap();

    let err = workflow
        .submit_challenge(&nurse(), &donor_id, &tx, &h.mock.code_for(&tx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");

    // The session is failed, not stuck, and the donor is untouched
    let session = workflow.status(&nurse(), &donor_id).await.unwrap();
    assert_eq!(session.state, ApprovalState::Failed);
    assert_eq!(
        session.failure_reason.as_deref(),
        Some("approval could not be recorded")
    );
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::NeedsTests);

    sqlx::query("DROP TRIGGER block_approval")
        .execute(h.ctx.pool())
        .await
        .unwrap();

    let restarted = workflow
        .start_signing(&nurse(), &donor_id, PROVIDER)
        .await
        .unwrap();
    assert_eq!(restarted.state, ApprovalState::AwaitingChallenge);
    let new_tx = tx_of(&restarted);
    let done = workflow
        .submit_challenge(&nurse(), &donor_id, &new_tx, &h.mock.code_for(&new_tx))
        .await
        .unwrap();
    assert_eq!(done.state, ApprovalState::Completed);
    assert_eq!(h.donor_status(&donor_id).await, DonorStatus::Approved);
}
