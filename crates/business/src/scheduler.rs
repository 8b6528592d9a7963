//! Appointment scheduling - slot listing, booking and status changes
//!
//! Booking is one INSERT; the partial unique indexes over open appointments
//! are the compare-and-swap on the (resource, date, time) key and on the
//! donor's open appointment of that type. Status changes are conditional
//! UPDATEs guarded by the statuses the command may start from.

use std::collections::HashSet;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use milkbank_core::id::{new_id, APPOINTMENT_PREFIX};
use milkbank_core::{
    Action, Actor, Appointment, AppointmentCommand, AppointmentStatus, AppointmentType,
    FailureReason, Resource, Role, Slot,
};
use milkbank_persistence::{
    AppointmentFilter, AppointmentRepo, DonorRepo, PersistenceError, ResourceRecord,
    ResourceRepo,
};
use serde::Deserialize;

use crate::error::{BusinessError, BusinessResult};
use crate::services::{Page, PageWindow, ServiceContext};

/// Free slots over a date range for one resource pool.
///
/// Generated lazily from the grid on every `iter()` call, so the sequence is
/// finite and can be walked again from the start. Held slots are the ones
/// open when the listing was taken.
#[derive(Debug, Clone)]
pub struct AvailableSlots {
    dates: Vec<NaiveDate>,
    times: Vec<NaiveTime>,
    resources: Vec<String>,
    held: HashSet<Slot>,
    not_before: NaiveDateTime,
}

impl AvailableSlots {
    fn empty() -> Self {
        Self {
            dates: Vec::new(),
            times: Vec::new(),
            resources: Vec::new(),
            held: HashSet::new(),
            not_before: NaiveDateTime::MIN,
        }
    }

    /// Walk the free slots, ordered by date, time, then resource id
    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.dates
            .iter()
            .flat_map(move |date| {
                self.times.iter().flat_map(move |time| {
                    self.resources
                        .iter()
                        .map(move |resource| Slot::new(resource.clone(), *date, *time))
                })
            })
            .filter(move |slot| slot.starts_at() > self.not_before && !self.held.contains(slot))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a AvailableSlots {
    type Item = Slot;
    type IntoIter = Box<dyn Iterator<Item = Slot> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Appointment listing parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentQuery {
    pub date: Option<NaiveDate>,
    pub staff_id: Option<String>,
    pub donor_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    #[serde(rename = "type")]
    pub appointment_type: Option<AppointmentType>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Resource registration input
#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub id: String,
    pub name: String,
    pub appointment_type: AppointmentType,
}

/// Appointment Scheduler - slots, booking, status machine, resource pools
pub struct AppointmentScheduler<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> AppointmentScheduler<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Free slots in `[from, to]` for the active pool of `appointment_type`,
    /// clipped to today and the booking horizon
    pub async fn list_available_slots(
        &self,
        actor: &Actor,
        from: NaiveDate,
        to: NaiveDate,
        appointment_type: AppointmentType,
    ) -> BusinessResult<AvailableSlots> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Read)?;
        if from > to {
            return Err(BusinessError::validation("'from' must not be after 'to'"));
        }

        let now = Utc::now().naive_utc();
        let config = &self.ctx.config().scheduler;
        let from = from.max(now.date());
        let to = to.min(horizon_end(now.date(), config.booking_horizon_days));
        if from > to {
            return Ok(AvailableSlots::empty());
        }

        let resources: Vec<String> =
            ResourceRepo::list(self.ctx.pool(), Some(appointment_type), true)
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect();
        let held: HashSet<Slot> = AppointmentRepo::held_slots(self.ctx.pool(), from, to)
            .await?
            .into_iter()
            .collect();

        Ok(AvailableSlots {
            dates: from.iter_days().take_while(|d| *d <= to).collect(),
            times: config.grid_times(),
            resources,
            held,
            not_before: now,
        })
    }

    /// Book `slot` for a donor
    pub async fn book(
        &self,
        actor: &Actor,
        donor_id: &str,
        slot: Slot,
        appointment_type: AppointmentType,
    ) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Create)?;
        self.ctx.ensure_own_record(actor, donor_id)?;

        let now = Utc::now();
        self.validate_slot(&slot, now.naive_utc())?;

        let resource = ResourceRepo::get(self.ctx.pool(), &slot.resource_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Resource", &slot.resource_id))?;
        if !resource.active || resource.appointment_type != appointment_type {
            return Err(BusinessError::validation(format!(
                "resource {} does not serve {} appointments",
                resource.id, appointment_type
            )));
        }

        let donor = DonorRepo::get(self.ctx.pool(), donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id))?;
        if !appointment_type.accepts(donor.status) {
            return Err(BusinessError::DonorNotEligible {
                donor_id: donor.id,
                status: donor.status,
                appointment_type,
            });
        }

        let appointment = Appointment {
            id: new_id(APPOINTMENT_PREFIX),
            donor_id: donor.id.clone(),
            appointment_type,
            resource_id: slot.resource_id.clone(),
            slot_date: slot.date,
            slot_time: slot.time,
            status: AppointmentStatus::Scheduled,
            failure_reason: None,
            failure_notes: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };

        match AppointmentRepo::insert(self.ctx.pool(), &appointment).await {
            Ok(()) => {}
            Err(PersistenceError::SlotTaken) => {
                return Err(BusinessError::SlotConflict {
                    resource_id: slot.resource_id,
                    date: slot.date.to_string(),
                    time: slot.time.format("%H:%M").to_string(),
                });
            }
            Err(PersistenceError::DonorHasOpenAppointment) => {
                return Err(BusinessError::DonorConflict {
                    donor_id: donor.id,
                    appointment_type,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            appointment_id = %appointment.id,
            donor_id = %appointment.donor_id,
            resource_id = %appointment.resource_id,
            date = %appointment.slot_date,
            time = %appointment.slot_time,
            "Appointment booked"
        );
        Ok(appointment)
    }

    /// Scheduled → Arrived
    pub async fn check_in(&self, actor: &Actor, appointment_id: &str) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Update)?;
        self.apply(actor, appointment_id, AppointmentCommand::CheckIn).await
    }

    /// Arrived → Completed, screening appointments only
    pub async fn mark_completed(
        &self,
        actor: &Actor,
        appointment_id: &str,
    ) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Update)?;
        let appointment = self.load(appointment_id).await?;
        if appointment.appointment_type == AppointmentType::Donation {
            return Err(BusinessError::validation(
                "donation appointments are completed by recording the donation",
            ));
        }
        self.apply(actor, appointment_id, AppointmentCommand::Complete).await
    }

    /// Scheduled | Arrived → Failed
    pub async fn mark_failed(
        &self,
        actor: &Actor,
        appointment_id: &str,
        reason: FailureReason,
        notes: Option<String>,
    ) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Update)?;
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self.apply(actor, appointment_id, AppointmentCommand::Fail { reason, notes })
            .await
    }

    /// Scheduled → Cancelled
    pub async fn cancel(&self, actor: &Actor, appointment_id: &str) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Cancel)?;
        self.apply(actor, appointment_id, AppointmentCommand::Cancel).await
    }

    pub async fn get(&self, actor: &Actor, appointment_id: &str) -> BusinessResult<Appointment> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Read)?;
        let appointment = self.load(appointment_id).await?;
        self.ctx.ensure_own_record(actor, &appointment.donor_id)?;
        Ok(appointment)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        query: AppointmentQuery,
    ) -> BusinessResult<Page<Appointment>> {
        self.ctx.authorize(actor, Resource::Appointment, Action::Read)?;

        let donor_id = if actor.role == Role::Donor {
            Some(actor.id.clone())
        } else {
            query.donor_id
        };
        let window = PageWindow::new(query.page, query.per_page);
        let filter = AppointmentFilter {
            date: query.date,
            resource_id: query.staff_id,
            donor_id,
            status: query.status,
            appointment_type: query.appointment_type,
            limit: window.limit(),
            offset: window.offset(),
        };
        let total = AppointmentRepo::count(self.ctx.pool(), &filter).await?;
        let appointments = AppointmentRepo::list(self.ctx.pool(), &filter).await?;
        Ok(Page::new(appointments, total, window))
    }

    pub async fn register_resource(
        &self,
        actor: &Actor,
        new: NewResource,
    ) -> BusinessResult<ResourceRecord> {
        self.ctx.authorize(actor, Resource::Resource, Action::Manage)?;
        let id = new.id.trim();
        if id.is_empty() || new.name.trim().is_empty() {
            return Err(BusinessError::validation("resource id and name are required"));
        }

        let resource = ResourceRecord {
            id: id.to_string(),
            name: new.name.trim().to_string(),
            appointment_type: new.appointment_type,
            active: true,
            created_at: Utc::now(),
        };
        ResourceRepo::insert(self.ctx.pool(), &resource).await?;
        tracing::info!(resource_id = %resource.id, appointment_type = %resource.appointment_type, "Resource registered");
        Ok(resource)
    }

    pub async fn list_resources(
        &self,
        actor: &Actor,
        appointment_type: Option<AppointmentType>,
    ) -> BusinessResult<Vec<ResourceRecord>> {
        self.ctx.authorize(actor, Resource::Resource, Action::Read)?;
        Ok(ResourceRepo::list(self.ctx.pool(), appointment_type, false).await?)
    }

    /// Remove a resource from its pool; existing appointments stay
    pub async fn deactivate_resource(&self, actor: &Actor, resource_id: &str) -> BusinessResult<()> {
        self.ctx.authorize(actor, Resource::Resource, Action::Manage)?;
        ResourceRepo::deactivate(self.ctx.pool(), resource_id).await?;
        tracing::info!(resource_id, "Resource deactivated");
        Ok(())
    }

    fn validate_slot(&self, slot: &Slot, now: NaiveDateTime) -> BusinessResult<()> {
        let config = &self.ctx.config().scheduler;
        if !config.is_on_grid(slot.time) {
            return Err(BusinessError::validation(format!(
                "{} is not a slot start within opening hours",
                slot.time.format("%H:%M")
            )));
        }
        if slot.starts_at() <= now {
            return Err(BusinessError::validation("slot is in the past"));
        }
        if slot.date > horizon_end(now.date(), config.booking_horizon_days) {
            return Err(BusinessError::validation(format!(
                "slot is beyond the {}-day booking horizon",
                config.booking_horizon_days
            )));
        }
        Ok(())
    }

    async fn load(&self, appointment_id: &str) -> BusinessResult<Appointment> {
        AppointmentRepo::get(self.ctx.pool(), appointment_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Appointment", appointment_id))
    }

    async fn apply(
        &self,
        actor: &Actor,
        appointment_id: &str,
        command: AppointmentCommand,
    ) -> BusinessResult<Appointment> {
        command.validate()?;
        let now: DateTime<Utc> = Utc::now();

        let moved =
            AppointmentRepo::apply_command(self.ctx.pool(), appointment_id, &command, &actor.id, now)
                .await?;
        let appointment = self.load(appointment_id).await?;

        if moved {
            tracing::info!(
                appointment_id,
                actor = %actor,
                command = command.name(),
                status = %appointment.status,
                "Appointment status changed"
            );
            return Ok(appointment);
        }

        // Guard refused: either already realized, or not allowed from here
        match appointment.plan(&command)? {
            None => Ok(appointment),
            Some(_) => Err(BusinessError::concurrent("Appointment", appointment_id)),
        }
    }
}

fn horizon_end(today: NaiveDate, horizon_days: i64) -> NaiveDate {
    let days = u64::try_from(horizon_days).unwrap_or(0);
    today.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}
