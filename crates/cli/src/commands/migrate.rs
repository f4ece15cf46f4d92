use offerflow_core::config::AppConfig;

use super::context::open_pool;
use super::{block_on, CommandResult};

pub fn run(config: &AppConfig) -> CommandResult {
    let result = block_on(async {
        let pool = open_pool(config).await?;
        pool.close().await;
        Ok(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure.into_result("migrate"),
    }
}
