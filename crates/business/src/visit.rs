//! Donation visit recording
//!
//! One transaction: the Arrived → Completed update first, then the visit row,
//! then the ledger entry and cached balance. Any failure rolls all of it back.

use chrono::Utc;
use milkbank_core::id::{new_id, VISIT_PREFIX};
use milkbank_core::{
    points_for_volume, Action, Actor, AppointmentCommand, AppointmentStatus, AppointmentType,
    CoreError, DonationReport, DonationVisit, HealthStatus, LedgerReason, Resource,
};
use milkbank_persistence::{AppointmentRepo, PersistenceError, VisitRepo};

use crate::error::{BusinessError, BusinessResult};
use crate::ledger::append_entry;
use crate::services::ServiceContext;

/// Donation Visit Processor - closes donation appointments
pub struct DonationVisitProcessor<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> DonationVisitProcessor<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Record the outcome of an Arrived donation appointment
    pub async fn record_donation(
        &self,
        actor: &Actor,
        appointment_id: &str,
        report: DonationReport,
    ) -> BusinessResult<DonationVisit> {
        self.ctx
            .authorize(actor, Resource::DonationVisit, Action::Record)?;
        report.validate()?;

        let appointment = AppointmentRepo::get(self.ctx.pool(), appointment_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Appointment", appointment_id))?;
        if appointment.appointment_type != AppointmentType::Donation {
            return Err(BusinessError::validation(format!(
                "appointment {} is not a donation appointment",
                appointment_id
            )));
        }
        if appointment.status != AppointmentStatus::Arrived {
            return Err(CoreError::invalid_transition(
                "appointment",
                appointment.status,
                "record_donation",
            )
            .into());
        }

        let points = match report.health_status {
            HealthStatus::Good => points_for_volume(report.volume_ml),
            HealthStatus::Bad => 0,
        };
        let now = Utc::now();
        let visit = DonationVisit {
            id: new_id(VISIT_PREFIX),
            appointment_id: appointment.id.clone(),
            donor_id: appointment.donor_id.clone(),
            health_status: report.health_status,
            volume_ml: report.volume_ml,
            container_count: report.container_count,
            points_awarded: points,
            notes: report
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            recorded_by: actor.id.clone(),
            recorded_at: now,
        };

        let mut tx = self.ctx.pool().begin().await?;

        let completed = AppointmentRepo::apply_command(
            &mut *tx,
            appointment_id,
            &AppointmentCommand::Complete,
            &actor.id,
            now,
        )
        .await?;
        if !completed {
            // Someone else moved it after our read
            drop(tx);
            return Err(self.lost_race(appointment_id).await);
        }

        VisitRepo::insert(&mut *tx, &visit)
            .await
            .map_err(|e| match e {
                PersistenceError::AlreadyExists { .. } => {
                    BusinessError::invariant(format!(
                        "visit already recorded for open appointment {}",
                        appointment_id
                    ))
                }
                other => other.into(),
            })?;
        let (_, balance) = append_entry(
            &mut tx,
            &visit.donor_id,
            points,
            LedgerReason::Donation,
            &visit.id,
            now,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            visit_id = %visit.id,
            appointment_id,
            donor_id = %visit.donor_id,
            health_status = %visit.health_status,
            volume_ml = visit.volume_ml,
            points,
            balance,
            actor = %actor,
            "Donation recorded"
        );
        Ok(visit)
    }

    pub async fn get_visit(&self, actor: &Actor, appointment_id: &str) -> BusinessResult<DonationVisit> {
        self.ctx.authorize(actor, Resource::DonationVisit, Action::Read)?;
        let visit = VisitRepo::get_by_appointment(self.ctx.pool(), appointment_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("DonationVisit", appointment_id))?;
        self.ctx.ensure_own_record(actor, &visit.donor_id)?;
        Ok(visit)
    }

    pub async fn list_for_donor(
        &self,
        actor: &Actor,
        donor_id: &str,
    ) -> BusinessResult<Vec<DonationVisit>> {
        self.ctx.authorize(actor, Resource::DonationVisit, Action::Read)?;
        self.ctx.ensure_own_record(actor, donor_id)?;
        Ok(VisitRepo::list_for_donor(self.ctx.pool(), donor_id).await?)
    }

    async fn lost_race(&self, appointment_id: &str) -> BusinessError {
        match AppointmentRepo::get(self.ctx.pool(), appointment_id).await {
            Ok(Some(current)) => {
                CoreError::invalid_transition("appointment", current.status, "record_donation")
                    .into()
            }
            Ok(None) => BusinessError::not_found("Appointment", appointment_id),
            Err(e) => e.into(),
        }
    }
}
