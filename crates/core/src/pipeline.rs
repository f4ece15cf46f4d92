//! Dashboard and pipeline statistics.
//!
//! When a project carries several offers in the same phase only the highest-value one counts
//! toward that phase's totals; offers without a project always count in full.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::domain::offer::{Offer, OfferPhase};
use crate::domain::project::ProjectId;
use crate::errors::{ApplicationError, DomainError};
use crate::repository::OfferRepository;

/// Phases reported in the pipeline, in display order. Draft and expired are excluded.
pub const PIPELINE_PHASES: [OfferPhase; 5] = [
    OfferPhase::Sent,
    OfferPhase::InProgress,
    OfferPhase::Order,
    OfferPhase::Won,
    OfferPhase::Lost,
];

pub const DEFAULT_ROLLING_MONTHS: u32 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TimeWindow {
    AllTime,
    RollingMonths { months: u32 },
    Between { from: DateTime<Utc>, to: DateTime<Utc> },
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::RollingMonths { months: DEFAULT_ROLLING_MONTHS }
    }
}

impl TimeWindow {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateRange, DomainError> {
        match *self {
            Self::AllTime => Ok(DateRange::default()),
            Self::RollingMonths { months } => {
                let from = now.checked_sub_months(Months::new(months)).ok_or_else(|| {
                    DomainError::Validation(format!("rolling window of {months} months is too wide"))
                })?;
                Ok(DateRange { from: Some(from), to: None })
            }
            Self::Between { from, to } => {
                if to < from {
                    return Err(DomainError::InvalidDateRange(
                        "window end must not be before its start".to_string(),
                    ));
                }
                Ok(DateRange { from: Some(from), to: Some(to) })
            }
        }
    }
}

/// Half-open `[from, to)` on offer creation time; a missing bound is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPipelinePoint {
    pub phase: OfferPhase,
    pub offer_count: usize,
    pub project_count: usize,
    pub total_value: Decimal,
    pub weighted_value: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSummary {
    pub offer_count: usize,
    pub project_count: usize,
    pub offer_reserve: Decimal,
    pub weighted_reserve: Decimal,
    pub average_probability: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRateMetrics {
    pub won_count: usize,
    pub lost_count: usize,
    pub won_value: Decimal,
    pub lost_value: Decimal,
    /// `won / (won + lost)` on a 0..1 scale.
    pub win_rate: Decimal,
    /// Same ratio weighted by value.
    pub economic_win_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub range: DateRange,
    pub summary: OfferSummary,
    pub phases: Vec<AggregatedPipelinePoint>,
    pub win_rate: WinRateMetrics,
}

/// Pure aggregation over a snapshot of offers.
pub fn aggregate(offers: &[Offer], range: &DateRange) -> PipelineReport {
    let included: Vec<&Offer> = offers
        .iter()
        .filter(|offer| range.contains(offer.created_at))
        .filter(|offer| PIPELINE_PHASES.contains(&offer.phase))
        .collect();

    let phases: Vec<AggregatedPipelinePoint> =
        PIPELINE_PHASES.iter().map(|phase| phase_point(*phase, &included)).collect();

    let projects: BTreeSet<&ProjectId> =
        included.iter().filter_map(|offer| offer.project_id.as_ref()).collect();
    let probability_sum: u64 = included.iter().map(|offer| u64::from(offer.probability)).sum();
    let average_probability = if included.is_empty() {
        Decimal::ZERO
    } else {
        (Decimal::from(probability_sum) / Decimal::from(included.len() as u64)).round_dp(2)
    };

    let summary = OfferSummary {
        offer_count: included.len(),
        project_count: projects.len(),
        offer_reserve: phases.iter().map(|point| point.total_value).sum(),
        weighted_reserve: phases.iter().map(|point| point.weighted_value).sum(),
        average_probability,
    };

    PipelineReport { range: *range, summary, phases, win_rate: win_rate(&included) }
}

fn phase_point(phase: OfferPhase, offers: &[&Offer]) -> AggregatedPipelinePoint {
    let in_phase: Vec<&Offer> =
        offers.iter().copied().filter(|offer| offer.phase == phase).collect();

    let mut best_per_project: BTreeMap<&ProjectId, &Offer> = BTreeMap::new();
    let mut contributing: Vec<&Offer> = Vec::new();
    for offer in in_phase.iter().copied() {
        match &offer.project_id {
            Some(project_id) => {
                let best = best_per_project.entry(project_id).or_insert(offer);
                if outranks(offer, *best) {
                    *best = offer;
                }
            }
            None => contributing.push(offer),
        }
    }
    let project_count = best_per_project.len();
    contributing.extend(best_per_project.into_values());

    AggregatedPipelinePoint {
        phase,
        offer_count: in_phase.len(),
        project_count,
        total_value: contributing.iter().map(|offer| offer.value).sum(),
        weighted_value: contributing.iter().map(|offer| offer.weighted_value()).sum(),
    }
}

/// Highest value wins, then higher probability, then the lower id.
fn outranks(candidate: &Offer, current: &Offer) -> bool {
    let key =
        |offer: &Offer| (offer.value, offer.probability, std::cmp::Reverse(offer.id.clone()));
    key(candidate) > key(current)
}

fn win_rate(offers: &[&Offer]) -> WinRateMetrics {
    let won: Vec<&&Offer> =
        offers.iter().filter(|offer| offer.phase == OfferPhase::Won).collect();
    let lost: Vec<&&Offer> =
        offers.iter().filter(|offer| offer.phase == OfferPhase::Lost).collect();
    let won_value: Decimal = won.iter().map(|offer| offer.value).sum();
    let lost_value: Decimal = lost.iter().map(|offer| offer.value).sum();

    WinRateMetrics {
        won_count: won.len(),
        lost_count: lost.len(),
        won_value,
        lost_value,
        win_rate: ratio(
            Decimal::from(won.len() as u64),
            Decimal::from((won.len() + lost.len()) as u64),
        ),
        economic_win_rate: ratio(won_value, won_value + lost_value),
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    (numerator / denominator).round_dp(4)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineQuery {
    pub company_id: Option<CompanyId>,
    pub window: TimeWindow,
}

/// Reads a snapshot of offers and aggregates it. Snapshots may interleave with phase
/// transitions; each report is internally consistent for the rows it read.
pub struct PipelineService {
    offers: Arc<dyn OfferRepository>,
}

impl PipelineService {
    pub fn new(offers: Arc<dyn OfferRepository>) -> Self {
        Self { offers }
    }

    pub async fn report(
        &self,
        query: &PipelineQuery,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport, ApplicationError> {
        let range = query.window.resolve(now)?;
        let offers = self.offers.list_created_within(query.company_id.as_ref(), &range).await?;
        Ok(aggregate(&offers, &range))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::company::CompanyId;
    use crate::domain::offer::{Offer, OfferId, OfferPhase};
    use crate::domain::project::ProjectId;
    use crate::memory::InMemoryOfferRepository;
    use crate::repository::OfferRepository;

    use super::{aggregate, DateRange, PipelineQuery, PipelineService, TimeWindow};

    fn offer(
        id: &str,
        phase: OfferPhase,
        value: i64,
        probability: u8,
        project: Option<&str>,
    ) -> Offer {
        let mut offer = Offer::draft(
            OfferId(id.to_string()),
            CompanyId("stalbygg".to_string()),
            format!("Offer {id}"),
            "kari",
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("valid date"),
        );
        offer.phase = phase;
        if phase != OfferPhase::Draft {
            offer.offer_number = format!("ST-2025-{id}");
        }
        offer.value = Decimal::new(value, 0);
        offer.probability = probability;
        offer.project_id = project.map(|project| ProjectId(project.to_string()));
        offer
    }

    fn point(report: &super::PipelineReport, phase: OfferPhase) -> &super::AggregatedPipelinePoint {
        report
            .phases
            .iter()
            .find(|point| point.phase == phase)
            .expect("phase present in report")
    }

    #[test]
    fn project_offers_in_same_phase_count_once_at_highest_value() {
        let offers = vec![
            offer("001", OfferPhase::InProgress, 100, 50, Some("prj-1")),
            offer("002", OfferPhase::InProgress, 200, 50, Some("prj-1")),
            offer("003", OfferPhase::InProgress, 300, 50, Some("prj-1")),
            offer("004", OfferPhase::InProgress, 50, 50, None),
        ];

        let report = aggregate(&offers, &DateRange::default());
        let in_progress = point(&report, OfferPhase::InProgress);

        assert_eq!(in_progress.total_value, Decimal::new(350, 0));
        assert_eq!(in_progress.offer_count, 4);
        assert_eq!(in_progress.project_count, 1);
        assert_eq!(in_progress.weighted_value, Decimal::new(175, 0));
    }

    #[test]
    fn weighted_value_follows_the_chosen_offer_probability() {
        let offers = vec![
            offer("001", OfferPhase::Sent, 300, 10, Some("prj-1")),
            offer("002", OfferPhase::Sent, 300, 80, Some("prj-1")),
            offer("003", OfferPhase::Sent, 100, 90, Some("prj-1")),
        ];

        let report = aggregate(&offers, &DateRange::default());
        let sent = point(&report, OfferPhase::Sent);
        assert_eq!(sent.total_value, Decimal::new(300, 0));
        assert_eq!(sent.weighted_value, Decimal::new(240, 0));
    }

    #[test]
    fn one_project_contributes_separately_per_phase() {
        let offers = vec![
            offer("001", OfferPhase::Sent, 400, 20, Some("prj-1")),
            offer("002", OfferPhase::Order, 250, 90, Some("prj-1")),
            offer("003", OfferPhase::Order, 150, 90, Some("prj-1")),
        ];

        let report = aggregate(&offers, &DateRange::default());
        assert_eq!(point(&report, OfferPhase::Sent).total_value, Decimal::new(400, 0));
        assert_eq!(point(&report, OfferPhase::Order).total_value, Decimal::new(250, 0));
        assert_eq!(report.summary.offer_reserve, Decimal::new(650, 0));
        assert_eq!(report.summary.project_count, 1);
        assert_eq!(report.summary.offer_count, 3);
    }

    #[test]
    fn drafts_and_expired_offers_are_excluded() {
        let offers = vec![
            offer("001", OfferPhase::Draft, 1_000, 50, None),
            offer("002", OfferPhase::Expired, 1_000, 50, None),
            offer("003", OfferPhase::Sent, 200, 40, None),
            offer("004", OfferPhase::InProgress, 300, 60, Some("prj-9")),
        ];

        let report = aggregate(&offers, &DateRange::default());
        assert_eq!(report.summary.offer_count, 2);
        assert_eq!(report.summary.project_count, 1);
        assert_eq!(report.summary.offer_reserve, Decimal::new(500, 0));
        assert_eq!(report.summary.weighted_reserve, Decimal::new(260, 0));
        assert_eq!(report.summary.average_probability, Decimal::new(50, 0));
        assert_eq!(report.phases.len(), 5);
        assert!(report.phases.iter().all(|point| point.phase != OfferPhase::Draft));
    }

    #[test]
    fn win_rate_by_count_and_by_value() {
        let offers = vec![
            offer("001", OfferPhase::Won, 300, 100, None),
            offer("002", OfferPhase::Lost, 100, 0, None),
            offer("003", OfferPhase::Lost, 200, 0, None),
            offer("004", OfferPhase::Won, 200, 100, Some("prj-1")),
        ];

        let metrics = aggregate(&offers, &DateRange::default()).win_rate;
        assert_eq!(metrics.won_count, 2);
        assert_eq!(metrics.lost_count, 2);
        assert_eq!(metrics.won_value, Decimal::new(500, 0));
        assert_eq!(metrics.lost_value, Decimal::new(300, 0));
        assert_eq!(metrics.win_rate, Decimal::new(5, 1));
        assert_eq!(metrics.economic_win_rate, Decimal::new(625, 3));
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let report = aggregate(&[], &DateRange::default());
        assert_eq!(report.summary.offer_count, 0);
        assert_eq!(report.summary.average_probability, Decimal::ZERO);
        assert_eq!(report.win_rate.win_rate, Decimal::ZERO);
        assert_eq!(report.win_rate.economic_win_rate, Decimal::ZERO);
    }

    #[test]
    fn aggregation_is_repeatable_over_the_same_snapshot() {
        let offers = vec![
            offer("001", OfferPhase::InProgress, 100, 30, Some("prj-1")),
            offer("002", OfferPhase::InProgress, 100, 30, Some("prj-1")),
            offer("003", OfferPhase::Order, 900, 70, None),
            offer("004", OfferPhase::Lost, 80, 0, Some("prj-2")),
        ];
        let snapshot = offers.clone();

        let first = aggregate(&offers, &DateRange::default());
        let second = aggregate(&offers, &DateRange::default());
        assert_eq!(first, second);
        assert_eq!(offers, snapshot);
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date");
        let end = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).single().expect("valid date");
        let range = TimeWindow::Between { from: start, to: end }
            .resolve(Utc::now())
            .expect("valid window");

        assert!(range.contains(start));
        assert!(range.contains(end - Duration::seconds(1)));
        assert!(!range.contains(end));
        assert!(!range.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn rolling_window_starts_n_months_back() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).single().expect("valid date");
        let range = TimeWindow::RollingMonths { months: 12 }.resolve(now).expect("window");
        assert_eq!(range.from, Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).single());
        assert_eq!(range.to, None);
        assert_eq!(TimeWindow::AllTime.resolve(now).expect("window"), DateRange::default());
    }

    #[test]
    fn inverted_explicit_window_is_rejected() {
        let now = Utc::now();
        let error = TimeWindow::Between { from: now, to: now - Duration::days(1) }.resolve(now);
        assert!(error.is_err());
    }

    #[tokio::test]
    async fn service_filters_by_company_and_window() {
        let repo = Arc::new(InMemoryOfferRepository::default());
        let inside = offer("001", OfferPhase::Sent, 100, 50, None);

        let mut old = offer("002", OfferPhase::Sent, 700, 50, None);
        old.created_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().expect("valid date");

        let mut other_company = offer("003", OfferPhase::Sent, 900, 50, None);
        other_company.company_id = CompanyId("hybridbygg".to_string());

        for offer in [&inside, &old, &other_company] {
            repo.insert(offer).await.expect("insert");
        }

        let service = PipelineService::new(repo);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("valid date");
        let report = service
            .report(
                &PipelineQuery {
                    company_id: Some(CompanyId("stalbygg".to_string())),
                    window: TimeWindow::RollingMonths { months: 12 },
                },
                now,
            )
            .await
            .expect("report");

        assert_eq!(report.summary.offer_count, 1);
        assert_eq!(report.summary.offer_reserve, Decimal::new(100, 0));

        let all_time = service
            .report(&PipelineQuery { company_id: None, window: TimeWindow::AllTime }, now)
            .await
            .expect("report");
        assert_eq!(all_time.summary.offer_reserve, Decimal::new(1_700, 0));
    }
}
