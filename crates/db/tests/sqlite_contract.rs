use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use offerflow_core::activity::ActivityTarget;
use offerflow_core::domain::company::{Company, CompanyId};
use offerflow_core::domain::customer::CustomerId;
use offerflow_core::domain::financials::DwFinancials;
use offerflow_core::domain::offer::{Offer, OfferId, OfferPhase};
use offerflow_core::domain::project::{Project, ProjectId, ProjectPhase};
use offerflow_core::lifecycle::{Actor, NewOffer, OfferLifecycle};
use offerflow_core::linker::ProjectLinker;
use offerflow_core::numbering::OfferNumbering;
use offerflow_core::pipeline::{DateRange, PipelineQuery, PipelineService, TimeWindow};
use offerflow_core::repository::{
    CompanyRepository, OfferRepository, ProjectRepository, RepositoryError, SequenceRepository,
};
use offerflow_db::migrations::run_pending;
use offerflow_db::{
    connect_with_settings, DbPool, SqlActivityLog, SqlCompanyRepository, SqlOfferRepository,
    SqlProjectRepository, SqlSequenceRepository,
};

async fn memory_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    pool
}

async fn seed_company(pool: &DbPool, id: &str, prefix: Option<&str>) -> CompanyId {
    let company = Company {
        id: CompanyId(id.to_string()),
        name: format!("{id} AS"),
        number_prefix: prefix.map(str::to_string),
        default_responsible_user: Some("kari".to_string()),
    };
    SqlCompanyRepository::new(pool.clone()).save(company.clone()).await.expect("save company");
    company.id
}

fn offer(id: &str, company: &CompanyId, phase: OfferPhase, number: &str) -> Offer {
    let mut offer =
        Offer::draft(OfferId(id.to_string()), company.clone(), "Steel hall", "kari", Utc::now());
    offer.phase = phase;
    offer.offer_number = number.to_string();
    offer.value = Decimal::new(125_000, 0);
    offer.probability = 50;
    offer
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sequence_increments_never_repeat() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("sequences.db").display());
    let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");

    let sequences = Arc::new(SqlSequenceRepository::new(pool.clone()));
    let company = CompanyId("stalbygg".to_string());
    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let sequences = sequences.clone();
            let company = company.clone();
            tokio::spawn(async move { sequences.next(&company, 2025).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for result in futures::future::join_all(tasks).await {
        let value = result.expect("join").expect("next");
        assert!(seen.insert(value), "value {value} issued twice");
    }
    assert_eq!(seen, (1..=50).collect::<HashSet<u64>>());
    assert_eq!(sequences.current(&company, 2025).await.expect("current"), 50);
    assert_eq!(sequences.current(&company, 2026).await.expect("other year"), 0);
}

#[tokio::test]
async fn sequence_initialize_only_raises() {
    let pool = memory_pool().await;
    let sequences = SqlSequenceRepository::new(pool);
    let company = CompanyId("stalbygg".to_string());

    assert_eq!(sequences.initialize(&company, 2025, 40).await.expect("init"), 40);
    assert_eq!(sequences.initialize(&company, 2025, 10).await.expect("lower init"), 40);
    assert_eq!(sequences.next(&company, 2025).await.expect("next"), 41);
}

#[tokio::test]
async fn stale_version_update_is_rejected() {
    let pool = memory_pool().await;
    let company = seed_company(&pool, "stalbygg", Some("ST")).await;
    let offers = SqlOfferRepository::new(pool);

    let mut stored = offer("off-1", &company, OfferPhase::Draft, "");
    offers.insert(&stored).await.expect("insert");

    stored.title = "First writer".to_string();
    offers.update(&stored, 0).await.expect("first write");

    stored.title = "Second writer".to_string();
    let error = offers.update(&stored, 0).await.expect_err("stale");
    assert_eq!(error, RepositoryError::VersionConflict { id: "off-1".to_string() });

    let reloaded = offers.find_by_id(&stored.id).await.expect("find").expect("offer");
    assert_eq!(reloaded.title, "First writer");
    assert_eq!(reloaded.version, 1);
}

#[tokio::test]
async fn lifecycle_update_leaves_synced_fields_alone() {
    let pool = memory_pool().await;
    let company = seed_company(&pool, "stalbygg", Some("ST")).await;
    let offers = SqlOfferRepository::new(pool);

    let mut stored = offer("off-1", &company, OfferPhase::Order, "ST-2025-001");
    stored.external_reference = "P-100".to_string();
    offers.insert(&stored).await.expect("insert");

    let figures = DwFinancials {
        total_income: Decimal::new(80_000, 0),
        material_costs: Decimal::new(20_000, 0),
        employee_costs: Decimal::new(30_000, 0),
        other_costs: Decimal::new(5_000, 0),
        net_result: Decimal::new(25_000, 0),
    };
    let synced_at = Utc::now();
    let written = offers
        .update_financials(&stored.id, "P-100", &figures, Some(synced_at))
        .await
        .expect("financials");
    assert!(written);

    stored.notes = "site visit booked".to_string();
    stored.created_by = "someone-else".to_string();
    offers.update(&stored, 0).await.expect("update");

    let reloaded = offers.find_by_id(&stored.id).await.expect("find").expect("offer");
    assert_eq!(reloaded.financials, figures);
    assert_eq!(reloaded.spent, Decimal::new(55_000, 0));
    assert_eq!(reloaded.invoiced, Decimal::new(80_000, 0));
    assert_eq!(reloaded.created_by, "kari");
    assert_eq!(reloaded.notes, "site visit booked");
    let drift = reloaded.dw_last_synced_at.expect("synced") - synced_at;
    assert!(drift.num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn clearing_reference_zeroes_figures_and_drops_late_syncs() {
    let pool = memory_pool().await;
    let company = seed_company(&pool, "stalbygg", Some("ST")).await;
    let offers = SqlOfferRepository::new(pool);

    let mut stored = offer("off-1", &company, OfferPhase::Order, "ST-2025-001");
    stored.external_reference = "P-100".to_string();
    offers.insert(&stored).await.expect("insert");
    let figures = DwFinancials { total_income: Decimal::new(900, 0), ..DwFinancials::default() };
    let synced = offers
        .update_financials(&stored.id, "P-100", &figures, Some(Utc::now()))
        .await
        .expect("sync");
    assert!(synced);

    stored.external_reference.clear();
    offers.update(&stored, 0).await.expect("clear reference");

    let late = offers
        .update_financials(&stored.id, "P-100", &figures, Some(Utc::now()))
        .await
        .expect("late sync");
    assert!(!late);

    let reloaded = offers.find_by_id(&stored.id).await.expect("find").expect("offer");
    assert!(reloaded.external_reference.is_empty());
    assert_eq!(reloaded.financials, DwFinancials::default());
    assert_eq!(reloaded.invoiced, Decimal::ZERO);
    assert!(reloaded.dw_last_synced_at.is_none());

    let missing = offers
        .update_financials(&OfferId("off-9".to_string()), "P-100", &figures, None)
        .await
        .expect_err("unknown offer");
    assert!(matches!(missing, RepositoryError::Database(_)));
}

#[tokio::test]
async fn offer_numbers_are_unique_per_company() {
    let pool = memory_pool().await;
    let first = seed_company(&pool, "stalbygg", Some("ST")).await;
    let second = seed_company(&pool, "trebygg", Some("TR")).await;
    let offers = SqlOfferRepository::new(pool);

    offers.insert(&offer("off-1", &first, OfferPhase::Sent, "X-2025-001")).await.expect("first");
    offers
        .insert(&offer("off-2", &second, OfferPhase::Sent, "X-2025-001"))
        .await
        .expect("same number in another company");
    let error = offers
        .insert(&offer("off-3", &first, OfferPhase::Sent, "X-2025-001"))
        .await
        .expect_err("duplicate in company");
    assert!(matches!(error, RepositoryError::Database(_)));

    let taken = offers
        .offer_number_taken(&first, "X-2025-001", &OfferId("off-9".to_string()))
        .await
        .expect("taken");
    assert!(taken);
    let own = offers
        .offer_number_taken(&first, "X-2025-001", &OfferId("off-1".to_string()))
        .await
        .expect("own number");
    assert!(!own);
}

#[tokio::test]
async fn sync_candidates_and_creation_window_queries() {
    let pool = memory_pool().await;
    let company = seed_company(&pool, "stalbygg", Some("ST")).await;
    let offers = SqlOfferRepository::new(pool);
    let now = Utc::now();

    let mut pending = offer("off-1", &company, OfferPhase::Order, "ST-2025-001");
    pending.external_reference = "P-1".to_string();
    let mut fresh = offer("off-2", &company, OfferPhase::Order, "ST-2025-002");
    fresh.external_reference = "P-2".to_string();
    let mut old = offer("off-3", &company, OfferPhase::Sent, "ST-2025-003");
    old.created_at = now - Duration::days(400);

    for offer in [&pending, &fresh, &old] {
        offers.insert(offer).await.expect("insert");
    }
    offers
        .update_financials(&fresh.id, "P-2", &DwFinancials::default(), Some(now))
        .await
        .expect("sync");

    let candidates = offers.list_sync_candidates(now - Duration::minutes(55)).await.expect("list");
    let ids: Vec<_> = candidates.iter().map(|offer| offer.id.0.as_str()).collect();
    assert_eq!(ids, vec!["off-1"]);

    let range =
        DateRange { from: Some(now - Duration::days(30)), to: Some(now + Duration::days(1)) };
    let recent = offers.list_created_within(Some(&company), &range).await.expect("window");
    assert_eq!(recent.len(), 2);

    let everything =
        offers.list_created_within(None, &DateRange::default()).await.expect("unbounded");
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn lifecycle_linker_and_pipeline_run_on_sqlite() {
    let pool = memory_pool().await;
    let company = seed_company(&pool, "stalbygg", Some("ST")).await;

    let offers: Arc<dyn OfferRepository> = Arc::new(SqlOfferRepository::new(pool.clone()));
    let projects = Arc::new(SqlProjectRepository::new(pool.clone()));
    let companies = Arc::new(SqlCompanyRepository::new(pool.clone()));
    let activity = Arc::new(SqlActivityLog::new(pool.clone()));
    let numbering = Arc::new(OfferNumbering::new(
        Arc::new(SqlSequenceRepository::new(pool.clone())),
        companies.clone(),
        "GR",
    ));
    let lifecycle = OfferLifecycle::new(
        offers.clone(),
        projects.clone(),
        companies.clone(),
        numbering,
        activity.clone(),
    );
    let linker = ProjectLinker::new(offers.clone(), projects.clone(), activity.clone());

    projects
        .save(Project {
            id: ProjectId("prj-1".to_string()),
            company_id: company.clone(),
            name: "Logistics hub".to_string(),
            phase: ProjectPhase::Tilbud,
            customer_id: None,
            updated_at: Utc::now(),
        })
        .await
        .expect("project");

    let actor = Actor::member("ola");
    let mut ids = Vec::new();
    for (value, customer) in [(100_000, "cust-a"), (300_000, "cust-b")] {
        let created = lifecycle
            .create(
                NewOffer {
                    company_id: company.clone(),
                    customer_id: Some(CustomerId(customer.to_string())),
                    title: format!("Hall option {value}"),
                    description: String::new(),
                    value: Decimal::new(value, 0),
                    cost: Decimal::new(value / 2, 0),
                    probability: 50,
                    responsible_user: None,
                },
                &actor,
            )
            .await
            .expect("create");
        linker.link(&created.id, &ProjectId("prj-1".to_string()), &actor).await.expect("link");
        let sent = lifecycle.advance(&created.id, OfferPhase::Sent, &actor).await.expect("send");
        ids.push(sent);
    }

    let year = Utc::now().year();
    assert_eq!(ids[0].offer_number, format!("ST-{year}-001"));
    assert_eq!(ids[1].offer_number, format!("ST-{year}-002"));

    let in_progress =
        lifecycle.advance(&ids[0].id, OfferPhase::InProgress, &actor).await.expect("progress");
    assert_eq!(in_progress.responsible_user.as_deref(), Some("kari"));

    let project = projects
        .find_by_id(&ProjectId("prj-1".to_string()))
        .await
        .expect("find project")
        .expect("project");
    assert_eq!(project.customer_id, Some(CustomerId("cust-b".to_string())));

    let entries =
        activity.list_for_target(ActivityTarget::Offer, &ids[0].id.0).await.expect("activity");
    let titles: Vec<_> = entries.iter().map(|entry| entry.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Offer created",
            "Offer linked to project",
            "Offer phase changed",
            "Offer phase changed",
        ]
    );

    let report = PipelineService::new(offers)
        .report(
            &PipelineQuery { company_id: Some(company), window: TimeWindow::AllTime },
            Utc::now(),
        )
        .await
        .expect("report");
    let sent_point = report
        .phases
        .iter()
        .find(|point| point.phase == OfferPhase::Sent)
        .expect("sent point");
    assert_eq!(sent_point.offer_count, 1);
    assert_eq!(sent_point.total_value, Decimal::new(300_000, 0));
}
