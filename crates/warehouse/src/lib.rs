//! HTTP adapter for the data warehouse that holds project ledgers.

pub mod client;
pub mod retry;

use std::sync::Arc;

use offerflow_core::config::WarehouseConfig;
use offerflow_core::sync::{DisabledFinancialSource, FinancialSource};

pub use client::{HttpFinancialSource, WarehouseError, WarehouseSettings};
pub use retry::RetryPolicy;

/// Builds the configured source, falling back to the disabled one when sync is off.
pub fn financial_source(
    config: &WarehouseConfig,
) -> Result<Arc<dyn FinancialSource>, WarehouseError> {
    if !config.enabled {
        return Ok(Arc::new(DisabledFinancialSource));
    }
    let settings = WarehouseSettings::from_config(config)?;
    Ok(Arc::new(HttpFinancialSource::new(settings)?))
}
