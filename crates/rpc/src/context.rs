//! Application context - wires everything together

use std::path::PathBuf;
use std::sync::Arc;

use milkbank_approval::{ApprovalConfig, ApprovalWorkflow, MockCaProvider, ProviderRegistry};
use milkbank_business::{
    AppointmentScheduler, DonationVisitProcessor, DonorService, RewardPointsLedger, ServiceContext,
};
use milkbank_permissions::{default_policy, PermissionRegistry, Policy};
use milkbank_persistence::Database;

use crate::config::AppConfig;

/// Application context - database, permission registry, signing providers
pub struct AppContext {
    db: Database,
    services: ServiceContext,
    permissions: Arc<PermissionRegistry>,
    providers: ProviderRegistry,
    approval: ApprovalConfig,
    policy_file: Option<PathBuf>,
}

impl AppContext {
    /// Open (and if needed create) the database named by `config`
    pub async fn new(config: &AppConfig) -> Result<Self, anyhow::Error> {
        let db = Database::init(&config.database_url).await?;
        Self::with_database(db, config)
    }

    /// Wire a context around an already opened database
    pub fn with_database(db: Database, config: &AppConfig) -> Result<Self, anyhow::Error> {
        let policy = load_policy(config.policy_file.as_ref())?;
        let permissions = Arc::new(PermissionRegistry::from_policy(&policy)?);
        let services =
            ServiceContext::new(&db, permissions.clone(), config.services.clone());

        let mut providers = ProviderRegistry::new();
        if config.approval.mock_provider {
            tracing::warn!("Mock CA provider enabled; signing codes are predictable");
            providers.register(Arc::new(MockCaProvider::default()));
        }
        if providers.is_empty() {
            tracing::warn!("No signing providers configured; donor approval is unavailable");
        }

        tracing::info!(
            database = %config.database_url,
            providers = providers.list().len(),
            "Application context ready"
        );

        Ok(Self {
            db,
            services,
            permissions,
            providers,
            approval: config.approval.clone(),
            policy_file: config.policy_file.clone(),
        })
    }

    /// Replace the provider registry
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn services(&self) -> &ServiceContext {
        &self.services
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn donors(&self) -> DonorService<'_> {
        DonorService::new(&self.services)
    }

    pub fn scheduler(&self) -> AppointmentScheduler<'_> {
        AppointmentScheduler::new(&self.services)
    }

    pub fn visits(&self) -> DonationVisitProcessor<'_> {
        DonationVisitProcessor::new(&self.services)
    }

    pub fn ledger(&self) -> RewardPointsLedger<'_> {
        RewardPointsLedger::new(&self.services)
    }

    pub fn approval(&self) -> ApprovalWorkflow<'_> {
        ApprovalWorkflow::new(&self.services, &self.providers, &self.approval)
    }

    /// Re-read the policy file into the live registry
    pub fn reload_policy(&self) -> Result<(), anyhow::Error> {
        let policy = load_policy(self.policy_file.as_ref())?;
        self.permissions.reload(&policy)?;
        Ok(())
    }
}

fn load_policy(path: Option<&PathBuf>) -> Result<Policy, anyhow::Error> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading permission policy");
            Ok(Policy::from_file(path)?)
        }
        None => Ok(default_policy()),
    }
}
