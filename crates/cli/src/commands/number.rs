use chrono::{Datelike, Utc};
use offerflow_core::config::AppConfig;
use offerflow_core::CompanyId;
use serde_json::json;

use super::context::Services;
use super::{block_on, CommandFailure, CommandResult};

pub fn preview(config: &AppConfig, company: &str, year: Option<i32>) -> CommandResult {
    let company_id = match company_id(company) {
        Ok(id) => id,
        Err(failure) => return failure.into_result("number.preview"),
    };
    let year = year.unwrap_or_else(|| Utc::now().year());

    let result = block_on(async {
        let services = Services::open(config).await?;
        let preview = services.numbering.preview(&company_id, year).await;
        services.close().await;
        preview.map_err(CommandFailure::from)
    });

    match result {
        Ok(number) => CommandResult::success_with(
            "number.preview",
            format!("next offer number for {company_id} is {number} (not reserved)"),
            Some(json!({ "company_id": company_id.0, "year": year, "offer_number": number })),
        ),
        Err(failure) => failure.into_result("number.preview"),
    }
}

pub fn init(config: &AppConfig, company: &str, year: i32, value: u64) -> CommandResult {
    let company_id = match company_id(company) {
        Ok(id) => id,
        Err(failure) => return failure.into_result("number.init"),
    };

    let result = block_on(async {
        let services = Services::open(config).await?;
        let initialized = services.numbering.initialize(&company_id, year, value).await;
        services.close().await;
        initialized.map_err(CommandFailure::from)
    });

    match result {
        Ok(current) => CommandResult::success_with(
            "number.init",
            format!("sequence for {company_id} {year} is at {current}"),
            Some(json!({
                "company_id": company_id.0,
                "year": year,
                "requested": value,
                "current": current,
            })),
        ),
        Err(failure) => failure.into_result("number.init"),
    }
}

fn company_id(raw: &str) -> Result<CompanyId, CommandFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CommandFailure::new("invalid_request", "company must not be blank", 6));
    }
    Ok(CompanyId(trimmed.to_string()))
}
