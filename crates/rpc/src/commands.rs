//! CLI commands
//!
//! Commands run as the system actor; the HTTP layer is where real callers
//! are identified.

use milkbank_business::{BusinessError, NewResource};
use milkbank_core::{Actor, AppointmentType, NewDonor, NewGift};
use milkbank_persistence::PersistenceError;

use crate::context::AppContext;

/// Resources and gifts a fresh installation starts with
const DEFAULT_RESOURCES: &[(&str, &str, AppointmentType)] = &[
    ("screening-room-1", "Screening room 1", AppointmentType::Screening),
    ("donation-station-1", "Donation station 1", AppointmentType::Donation),
    ("donation-station-2", "Donation station 2", AppointmentType::Donation),
];

const DEFAULT_GIFTS: &[(&str, i64, i64)] = &[
    ("Breast milk storage bags", 10, 50),
    ("Nursing pads", 15, 30),
    ("Insulated cooler bag", 40, 10),
];

/// Seed default resources and gifts. Safe to run again.
pub async fn init(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let actor = Actor::system();
    let scheduler = ctx.scheduler();

    let mut created = 0;
    for (id, name, appointment_type) in DEFAULT_RESOURCES {
        let new = NewResource {
            id: id.to_string(),
            name: name.to_string(),
            appointment_type: *appointment_type,
        };
        match scheduler.register_resource(&actor, new).await {
            Ok(_) => created += 1,
            Err(BusinessError::Persistence(PersistenceError::AlreadyExists { .. })) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let ledger = ctx.ledger();
    let mut gifts = 0;
    if ledger.list_gifts(&actor).await?.is_empty() {
        for (name, point_cost, stock) in DEFAULT_GIFTS {
            ledger
                .add_gift(
                    &actor,
                    NewGift {
                        name: name.to_string(),
                        point_cost: *point_cost,
                        stock: *stock,
                    },
                )
                .await?;
            gifts += 1;
        }
    }

    println!(
        "✅ Database ready ({} resources, {} gifts added)",
        created, gifts
    );
    Ok(())
}

pub async fn register_donor(
    ctx: &AppContext,
    full_name: &str,
    phone: Option<String>,
    email: Option<String>,
) -> Result<(), anyhow::Error> {
    let donor = ctx
        .donors()
        .register(
            &Actor::system(),
            NewDonor {
                full_name: full_name.to_string(),
                phone,
                email,
                date_of_birth: None,
            },
        )
        .await?;

    println!("✅ Registered donor {} ({})", donor.full_name, donor.id);
    Ok(())
}

pub async fn add_resource(
    ctx: &AppContext,
    id: &str,
    name: &str,
    appointment_type: AppointmentType,
) -> Result<(), anyhow::Error> {
    let resource = ctx
        .scheduler()
        .register_resource(
            &Actor::system(),
            NewResource {
                id: id.to_string(),
                name: name.to_string(),
                appointment_type,
            },
        )
        .await?;

    println!(
        "✅ Added {} resource {} ({})",
        resource.appointment_type, resource.id, resource.name
    );
    Ok(())
}

pub async fn add_gift(
    ctx: &AppContext,
    name: &str,
    point_cost: i64,
    stock: i64,
) -> Result<(), anyhow::Error> {
    let gift = ctx
        .ledger()
        .add_gift(
            &Actor::system(),
            NewGift {
                name: name.to_string(),
                point_cost,
                stock,
            },
        )
        .await?;

    println!(
        "✅ Added gift {} ({}, {} points, stock {})",
        gift.name, gift.id, gift.point_cost, gift.stock
    );
    Ok(())
}

/// Abandon inactive donors and expire overdue signing challenges
pub async fn sweep(ctx: &AppContext) -> Result<(Vec<String>, Vec<String>), anyhow::Error> {
    let actor = Actor::system();
    let abandoned = ctx.donors().abandon_inactive(&actor, None).await?;
    let expired = ctx.approval().expire_stale_sessions(&actor).await?;

    println!(
        "✅ Sweep done: {} donors abandoned, {} signing challenges expired",
        abandoned.len(),
        expired.len()
    );
    for id in &abandoned {
        println!("   abandoned {}", id);
    }
    for id in &expired {
        println!("   expired challenge for {}", id);
    }
    Ok((abandoned, expired))
}

/// Print the effective permission policy
pub fn policy(ctx: &AppContext) -> Result<(), anyhow::Error> {
    println!("{}", ctx.permissions().export().to_json_pretty()?);
    Ok(())
}
