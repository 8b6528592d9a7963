//! Donor operations - registration, listing and lifecycle events
//!
//! Lifecycle writes are optimistic: the record is read, the pure transition
//! runs in memory, and the write transaction starts with a version-guarded
//! UPDATE. A lost race surfaces as `ConcurrentUpdate`.

use chrono::{DateTime, Duration, Utc};
use milkbank_core::{
    Action, Actor, DonorEvent, DonorRecord, DonorStatus, NewDonor, Resource, ScreeningOutcome,
    TransitionOutcome,
};
use milkbank_persistence::{
    DonorEventRepo, DonorFilter, DonorHistoryEntry, DonorRepo, DonorSort, NewDonorHistoryEntry,
    SortOrder,
};
use serde::Deserialize;
use sqlx::SqliteConnection;

use crate::error::{BusinessError, BusinessResult};
use crate::services::{Page, PageWindow, ServiceContext};

/// Listing parameters as they arrive from callers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonorQuery {
    pub status: Option<DonorStatus>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

/// Write an applied transition: the version-guarded donor update followed by
/// the event log row. The caller owns the transaction.
pub async fn write_transition(
    conn: &mut SqliteConnection,
    actor: &Actor,
    donor: &DonorRecord,
    expected_version: i64,
    from: DonorStatus,
    event: &DonorEvent,
) -> BusinessResult<()> {
    if !DonorRepo::update_versioned(&mut *conn, donor, expected_version).await? {
        return Err(BusinessError::concurrent("Donor", &donor.id));
    }

    let payload = serde_json::to_value(event)
        .map_err(|e| BusinessError::invariant(format!("unserializable donor event: {}", e)))?;
    DonorEventRepo::append(
        &mut *conn,
        &NewDonorHistoryEntry {
            donor_id: donor.id.clone(),
            from_status: from,
            to_status: donor.status,
            event: event.name().to_string(),
            payload,
            actor_id: actor.id.clone(),
            created_at: donor.updated_at,
        },
    )
    .await?;
    Ok(())
}

/// Donor Service - registration and lifecycle transitions
pub struct DonorService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> DonorService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Register a new Pending donor
    pub async fn register(&self, actor: &Actor, new: NewDonor) -> BusinessResult<DonorRecord> {
        self.ctx.authorize(actor, Resource::Donor, Action::Create)?;

        let donor = DonorRecord::register(new, Utc::now())?;
        DonorRepo::insert(self.ctx.pool(), &donor).await?;

        tracing::info!(donor_id = %donor.id, actor = %actor, "Donor registered");
        Ok(donor)
    }

    pub async fn get(&self, actor: &Actor, donor_id: &str) -> BusinessResult<DonorRecord> {
        self.ctx.ensure_own_record(actor, donor_id)?;
        self.ctx.authorize(actor, Resource::Donor, Action::Read)?;
        self.load(donor_id).await
    }

    pub async fn list(&self, actor: &Actor, query: DonorQuery) -> BusinessResult<Page<DonorRecord>> {
        self.ctx.authorize(actor, Resource::Donor, Action::Read)?;

        let sort_by = match query.sort_by.as_deref() {
            Some(s) => s
                .parse::<DonorSort>()
                .map_err(|_| BusinessError::validation(format!("cannot sort by '{}'", s)))?,
            None => DonorSort::default(),
        };
        let order = match query.order.as_deref() {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|_| BusinessError::validation(format!("invalid order '{}'", s)))?,
            None => SortOrder::default(),
        };
        let window = PageWindow::new(query.page, query.per_page);

        let filter = DonorFilter {
            status: query.status,
            q: query.q,
            sort_by,
            order,
            limit: window.limit(),
            offset: window.offset(),
        };
        let total = DonorRepo::count(self.ctx.pool(), &filter).await?;
        let donors = DonorRepo::list(self.ctx.pool(), &filter).await?;
        Ok(Page::new(donors, total, window))
    }

    /// Apply a lifecycle event. Approval goes through the signing workflow,
    /// not through here.
    pub async fn apply_event(
        &self,
        actor: &Actor,
        donor_id: &str,
        event: DonorEvent,
    ) -> BusinessResult<DonorRecord> {
        self.ctx
            .authorize(actor, Resource::Donor, required_action(&event))?;
        if matches!(event, DonorEvent::Approve { .. }) {
            // Surface guard failures first; a legal approve still needs a signature
            let mut donor = self.load(donor_id).await?;
            if donor.apply(&event, Utc::now())?.is_noop() {
                return Ok(donor);
            }
            return Err(BusinessError::validation(
                "approval requires the signed approval workflow",
            ));
        }
        self.transition(actor, donor_id, &event, Utc::now()).await
    }

    pub async fn history(
        &self,
        actor: &Actor,
        donor_id: &str,
    ) -> BusinessResult<Vec<DonorHistoryEntry>> {
        self.ctx.authorize(actor, Resource::Donor, Action::Read)?;
        self.load(donor_id).await?;
        Ok(DonorEventRepo::list(self.ctx.pool(), donor_id).await?)
    }

    /// Abandon pre-approval donors not updated since `cutoff` (default: the
    /// configured inactivity window). Returns the abandoned ids.
    pub async fn abandon_inactive(
        &self,
        actor: &Actor,
        cutoff: Option<DateTime<Utc>>,
    ) -> BusinessResult<Vec<String>> {
        self.ctx.authorize(actor, Resource::Donor, Action::Update)?;

        let now = Utc::now();
        let cutoff = cutoff.unwrap_or_else(|| {
            now - Duration::days(self.ctx.config().lifecycle.inactivity_days)
        });

        let candidates = DonorRepo::find_inactive(self.ctx.pool(), cutoff).await?;
        let mut abandoned = Vec::new();
        for donor in candidates {
            match self.transition(actor, &donor.id, &DonorEvent::Abandon, now).await {
                Ok(_) => abandoned.push(donor.id),
                // Touched since we listed it; no longer inactive
                Err(BusinessError::ConcurrentUpdate { .. }) => {
                    tracing::debug!(donor_id = %donor.id, "Skipped abandon, donor changed");
                }
                Err(e) => return Err(e),
            }
        }

        if !abandoned.is_empty() {
            tracing::info!(count = abandoned.len(), %cutoff, "Abandoned inactive donors");
        }
        Ok(abandoned)
    }

    async fn load(&self, donor_id: &str) -> BusinessResult<DonorRecord> {
        DonorRepo::get(self.ctx.pool(), donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id))
    }

    async fn transition(
        &self,
        actor: &Actor,
        donor_id: &str,
        event: &DonorEvent,
        now: DateTime<Utc>,
    ) -> BusinessResult<DonorRecord> {
        let mut donor = self.load(donor_id).await?;
        let expected_version = donor.version;

        let (from, to) = match donor.apply(event, now)? {
            TransitionOutcome::NoOp => {
                tracing::debug!(donor_id, event = event.name(), "Donor event already applied");
                return Ok(donor);
            }
            TransitionOutcome::Applied { from, to } => (from, to),
        };

        let mut tx = self.ctx.pool().begin().await?;
        write_transition(&mut tx, actor, &donor, expected_version, from, event).await?;
        tx.commit().await?;

        donor.version = expected_version + 1;
        tracing::info!(
            donor_id,
            actor = %actor,
            event = event.name(),
            from = %from,
            to = %to,
            "Donor transition applied"
        );
        Ok(donor)
    }
}

/// Permission an event needs
pub fn required_action(event: &DonorEvent) -> Action {
    match event {
        DonorEvent::Approve { .. } => Action::Approve,
        DonorEvent::Reject { .. }
        | DonorEvent::CompleteScreening {
            outcome: ScreeningOutcome::Fail,
            ..
        } => Action::Reject,
        _ => Action::Update,
    }
}
