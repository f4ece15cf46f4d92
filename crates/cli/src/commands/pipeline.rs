use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use offerflow_core::config::AppConfig;
use offerflow_core::{CompanyId, PipelineQuery, TimeWindow};

use super::context::Services;
use super::{block_on, to_data, CommandFailure, CommandResult};
use crate::PipelineArgs;

pub fn run(config: &AppConfig, args: &PipelineArgs) -> CommandResult {
    let query = PipelineQuery {
        company_id: args.company.as_deref().map(|id| CompanyId(id.trim().to_string())),
        window: window(args),
    };

    let result = block_on(async {
        let services = Services::open(config).await?;
        let report = services.pipeline.report(&query, Utc::now()).await;
        services.close().await;
        let report = report.map_err(CommandFailure::from)?;
        to_data(&report).map(|data| (report.summary.offer_count, data))
    });

    match result {
        Ok((offer_count, data)) => CommandResult::success_with(
            "pipeline",
            format!("aggregated {offer_count} offers"),
            Some(data),
        ),
        Err(failure) => failure.into_result("pipeline"),
    }
}

fn window(args: &PipelineArgs) -> TimeWindow {
    if args.all_time {
        return TimeWindow::AllTime;
    }
    if let (Some(from), Some(to)) = (args.from, args.to) {
        return TimeWindow::Between { from: start_of_day(from), to: start_of_day(to) };
    }
    match args.months {
        Some(months) => TimeWindow::RollingMonths { months },
        None => TimeWindow::default(),
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
