//! Reward points ledger and gift catalog
//!
//! Entries are append-only. The donor row caches `points_balance`; every
//! append adjusts the cache inside the same transaction, and a CHECK keeps it
//! from going negative.

use chrono::{DateTime, Utc};
use milkbank_core::id::{new_id, GIFT_PREFIX};
use milkbank_core::{
    points_for_volume, Action, Actor, Gift, LedgerEntry, LedgerReason, NewGift, Resource,
};
use milkbank_persistence::{DonorRepo, GiftRepo, LedgerRepo, PersistenceError};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::error::{BusinessError, BusinessResult};
use crate::services::ServiceContext;

/// Cached balance compared with the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub cached: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

/// Result of a redemption
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub entry: LedgerEntry,
    pub gift: Gift,
    pub balance: i64,
}

/// Append an entry and move the cached balance with it. The caller owns the
/// transaction.
pub(crate) async fn append_entry(
    conn: &mut SqliteConnection,
    donor_id: &str,
    delta: i64,
    reason: LedgerReason,
    reference: &str,
    now: DateTime<Utc>,
) -> BusinessResult<(LedgerEntry, i64)> {
    let entry = LedgerRepo::append(&mut *conn, donor_id, delta, reason, Some(reference), now)
        .await
        .map_err(|e| match e {
            PersistenceError::ForeignKeyViolation(_) => BusinessError::not_found("Donor", donor_id),
            other => other.into(),
        })?;
    let balance = LedgerRepo::adjust_balance(&mut *conn, donor_id, delta)
        .await?
        .ok_or_else(|| BusinessError::not_found("Donor", donor_id))?;
    Ok((entry, balance))
}

/// Reward Points Ledger - accrual, redemption and the gift catalog
pub struct RewardPointsLedger<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> RewardPointsLedger<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Award the tier points for `volume_ml` in a transaction of its own.
    /// Donation visits award inside their own transaction instead.
    pub async fn award(
        &self,
        actor: &Actor,
        donor_id: &str,
        volume_ml: i64,
        reference: &str,
    ) -> BusinessResult<LedgerEntry> {
        self.ctx.authorize(actor, Resource::RewardPoints, Action::Manage)?;
        if volume_ml < 0 {
            return Err(BusinessError::validation("volume cannot be negative"));
        }

        let points = points_for_volume(volume_ml);
        let mut tx = self.ctx.pool().begin().await?;
        let (entry, balance) = append_entry(
            &mut tx,
            donor_id,
            points,
            LedgerReason::Donation,
            reference,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(donor_id, points, balance, reference, "Points awarded");
        Ok(entry)
    }

    /// Spend the gift's cost and take one unit of stock, atomically
    pub async fn redeem(
        &self,
        actor: &Actor,
        donor_id: &str,
        gift_id: &str,
    ) -> BusinessResult<Redemption> {
        self.ctx.authorize(actor, Resource::RewardPoints, Action::Redeem)?;
        self.ctx.ensure_own_record(actor, donor_id)?;

        let mut tx = self.ctx.pool().begin().await?;

        // Stock first: the decrement takes the write lock
        if !GiftRepo::take_one(&mut *tx, gift_id).await? {
            drop(tx);
            return match GiftRepo::get(self.ctx.pool(), gift_id).await? {
                Some(gift) => Err(BusinessError::OutOfStock(gift.name)),
                None => Err(BusinessError::not_found("Gift", gift_id)),
            };
        }
        let gift = GiftRepo::get(&mut *tx, gift_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Gift", gift_id))?;

        let available = LedgerRepo::cached_balance(&mut *tx, donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id))?;
        if available < gift.point_cost {
            return Err(BusinessError::InsufficientPoints {
                required: gift.point_cost,
                available,
            });
        }

        let (entry, balance) = append_entry(
            &mut tx,
            donor_id,
            -gift.point_cost,
            LedgerReason::Redemption,
            &gift.id,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            donor_id,
            gift_id = %gift.id,
            cost = gift.point_cost,
            balance,
            actor = %actor,
            "Gift redeemed"
        );
        Ok(Redemption {
            entry,
            gift,
            balance,
        })
    }

    pub async fn balance(&self, actor: &Actor, donor_id: &str) -> BusinessResult<i64> {
        self.ctx.authorize(actor, Resource::RewardPoints, Action::Read)?;
        self.ctx.ensure_own_record(actor, donor_id)?;
        LedgerRepo::cached_balance(self.ctx.pool(), donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id))
    }

    /// Entries in sequence order
    pub async fn entries(&self, actor: &Actor, donor_id: &str) -> BusinessResult<Vec<LedgerEntry>> {
        self.ctx.authorize(actor, Resource::RewardPoints, Action::Read)?;
        self.ctx.ensure_own_record(actor, donor_id)?;
        if DonorRepo::get(self.ctx.pool(), donor_id).await?.is_none() {
            return Err(BusinessError::not_found("Donor", donor_id));
        }
        Ok(LedgerRepo::entries(self.ctx.pool(), donor_id).await?)
    }

    /// Compare the cached balance with the sum of entries
    pub async fn verify_balance(&self, actor: &Actor, donor_id: &str) -> BusinessResult<BalanceCheck> {
        self.ctx.authorize(actor, Resource::RewardPoints, Action::Read)?;

        let mut conn = self.ctx.pool().acquire().await?;
        let cached = LedgerRepo::cached_balance(&mut *conn, donor_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("Donor", donor_id))?;
        let ledger_sum = LedgerRepo::sum(&mut *conn, donor_id).await?;

        let check = BalanceCheck {
            cached,
            ledger_sum,
            consistent: cached == ledger_sum,
        };
        if !check.consistent {
            tracing::error!(donor_id, cached, ledger_sum, "Points balance diverged from ledger");
        }
        Ok(check)
    }

    pub async fn add_gift(&self, actor: &Actor, new: NewGift) -> BusinessResult<Gift> {
        self.ctx.authorize(actor, Resource::Gift, Action::Manage)?;
        new.validate()?;

        let gift = Gift {
            id: new_id(GIFT_PREFIX),
            name: new.name.trim().to_string(),
            point_cost: new.point_cost,
            stock: new.stock,
            created_at: Utc::now(),
        };
        GiftRepo::insert(self.ctx.pool(), &gift).await?;
        tracing::info!(gift_id = %gift.id, name = %gift.name, cost = gift.point_cost, "Gift added");
        Ok(gift)
    }

    /// Add stock; returns the new level
    pub async fn restock(&self, actor: &Actor, gift_id: &str, quantity: i64) -> BusinessResult<i64> {
        self.ctx.authorize(actor, Resource::Gift, Action::Manage)?;
        if quantity <= 0 {
            return Err(BusinessError::validation("restock quantity must be positive"));
        }
        let stock = GiftRepo::restock(self.ctx.pool(), gift_id, quantity)
            .await?
            .ok_or_else(|| BusinessError::not_found("Gift", gift_id))?;
        tracing::info!(gift_id, quantity, stock, "Gift restocked");
        Ok(stock)
    }

    pub async fn list_gifts(&self, actor: &Actor) -> BusinessResult<Vec<Gift>> {
        self.ctx.authorize(actor, Resource::Gift, Action::Read)?;
        Ok(GiftRepo::list(self.ctx.pool()).await?)
    }
}
