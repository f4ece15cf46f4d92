use std::sync::Arc;

use offerflow_core::config::AppConfig;
use offerflow_core::repository::{CompanyRepository, OfferRepository, SequenceRepository};
use offerflow_core::{ActivitySink, FinancialSync, OfferNumbering, PipelineService};
use offerflow_db::{
    connect_with_config, migrations, DbPool, SqlActivityLog, SqlCompanyRepository,
    SqlOfferRepository, SqlSequenceRepository,
};

use super::CommandFailure;

/// Services wired against the configured database and warehouse.
pub struct Services {
    pool: DbPool,
    pub numbering: OfferNumbering,
    pub sync: Arc<FinancialSync>,
    pub pipeline: PipelineService,
}

impl Services {
    pub async fn open(config: &AppConfig) -> Result<Self, CommandFailure> {
        let pool = open_pool(config).await?;

        let offers: Arc<dyn OfferRepository> = Arc::new(SqlOfferRepository::new(pool.clone()));
        let companies: Arc<dyn CompanyRepository> =
            Arc::new(SqlCompanyRepository::new(pool.clone()));
        let sequences: Arc<dyn SequenceRepository> =
            Arc::new(SqlSequenceRepository::new(pool.clone()));
        let activity: Arc<dyn ActivitySink> = Arc::new(SqlActivityLog::new(pool.clone()));

        let source = offerflow_warehouse::financial_source(&config.warehouse)
            .map_err(|error| CommandFailure::new("config_validation", error.to_string(), 2))?;

        let sync = FinancialSync::new(offers.clone(), source, activity)
            .with_settings(config.sync_settings());

        Ok(Self {
            numbering: OfferNumbering::new(
                sequences,
                companies,
                config.numbering.default_prefix.clone(),
            ),
            sync: Arc::new(sync),
            pipeline: PipelineService::new(offers),
            pool,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Connects and brings the schema up to date.
pub async fn open_pool(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
    Ok(pool)
}
