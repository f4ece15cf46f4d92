use std::sync::Arc;

use crate::domain::company::CompanyId;
use crate::errors::ApplicationError;
use crate::repository::{CompanyRepository, SequenceRepository};

pub const DEFAULT_NUMBER_PREFIX: &str = "GR";

/// `{PREFIX}-{YEAR}-{SEQ:03}`, e.g. `ST-2025-001`.
pub fn format_offer_number(prefix: &str, year: i32, sequence: u64) -> String {
    format!("{prefix}-{year}-{sequence:03}")
}

/// Mints and previews per-company offer numbers.
pub struct OfferNumbering {
    sequences: Arc<dyn SequenceRepository>,
    companies: Arc<dyn CompanyRepository>,
    default_prefix: String,
}

impl OfferNumbering {
    pub fn new(
        sequences: Arc<dyn SequenceRepository>,
        companies: Arc<dyn CompanyRepository>,
        default_prefix: impl Into<String>,
    ) -> Self {
        Self { sequences, companies, default_prefix: default_prefix.into() }
    }

    /// Consumes the next sequence value. Values are never handed out twice; a caller that
    /// fails afterwards leaves a gap.
    pub async fn next(&self, company_id: &CompanyId, year: i32) -> Result<String, ApplicationError> {
        let prefix = self.prefix_for(company_id).await?;
        let sequence = self.sequences.next(company_id, year).await?;
        tracing::debug!(
            event_name = "numbering.sequence.issued",
            company_id = %company_id,
            year,
            sequence,
            "issued offer sequence"
        );
        Ok(format_offer_number(&prefix, year, sequence))
    }

    /// Number the next `next` call would produce. Not reserved: a concurrent caller may
    /// consume it first.
    pub async fn preview(
        &self,
        company_id: &CompanyId,
        year: i32,
    ) -> Result<String, ApplicationError> {
        let prefix = self.prefix_for(company_id).await?;
        let current = self.sequences.current(company_id, year).await?;
        Ok(format_offer_number(&prefix, year, current + 1))
    }

    /// Raises the counter to at least `value`, for importing existing numbering.
    pub async fn initialize(
        &self,
        company_id: &CompanyId,
        year: i32,
        value: u64,
    ) -> Result<u64, ApplicationError> {
        let resulting = self.sequences.initialize(company_id, year, value).await?;
        tracing::info!(
            event_name = "numbering.sequence.initialized",
            company_id = %company_id,
            year,
            requested = value,
            resulting,
            "initialized offer sequence"
        );
        Ok(resulting)
    }

    async fn prefix_for(&self, company_id: &CompanyId) -> Result<String, ApplicationError> {
        let company = self.companies.find_by_id(company_id).await?;
        Ok(company
            .as_ref()
            .map(|company| company.prefix_or(&self.default_prefix).to_string())
            .unwrap_or_else(|| self.default_prefix.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::domain::company::{Company, CompanyId};
    use crate::memory::{InMemoryCompanyRepository, InMemorySequenceRepository};
    use crate::repository::{CompanyRepository, SequenceRepository};

    use super::{format_offer_number, OfferNumbering, DEFAULT_NUMBER_PREFIX};

    async fn numbering() -> (OfferNumbering, Arc<InMemorySequenceRepository>) {
        let sequences = Arc::new(InMemorySequenceRepository::default());
        let companies = Arc::new(InMemoryCompanyRepository::default());
        companies
            .save(Company {
                id: CompanyId("stalbygg".to_string()),
                name: "Stålbygg".to_string(),
                number_prefix: Some("ST".to_string()),
                default_responsible_user: None,
            })
            .await
            .expect("save company");
        (OfferNumbering::new(sequences.clone(), companies, DEFAULT_NUMBER_PREFIX), sequences)
    }

    #[test]
    fn formats_with_zero_padded_sequence() {
        assert_eq!(format_offer_number("ST", 2025, 1), "ST-2025-001");
        assert_eq!(format_offer_number("HB", 2025, 42), "HB-2025-042");
        assert_eq!(format_offer_number("TK", 2026, 1234), "TK-2026-1234");
    }

    #[tokio::test]
    async fn next_increments_per_company_and_year() {
        let (numbering, _) = numbering().await;
        let stalbygg = CompanyId("stalbygg".to_string());

        assert_eq!(numbering.next(&stalbygg, 2025).await.expect("next"), "ST-2025-001");
        assert_eq!(numbering.next(&stalbygg, 2025).await.expect("next"), "ST-2025-002");
        assert_eq!(numbering.next(&stalbygg, 2026).await.expect("next"), "ST-2026-001");
        assert_eq!(
            numbering.next(&CompanyId("unknown".to_string()), 2025).await.expect("next"),
            "GR-2025-001"
        );
    }

    #[tokio::test]
    async fn preview_does_not_consume() {
        let (numbering, sequences) = numbering().await;
        let stalbygg = CompanyId("stalbygg".to_string());

        assert_eq!(numbering.preview(&stalbygg, 2025).await.expect("preview"), "ST-2025-001");
        assert_eq!(numbering.preview(&stalbygg, 2025).await.expect("preview"), "ST-2025-001");
        assert_eq!(sequences.current(&stalbygg, 2025).await.expect("current"), 0);

        numbering.next(&stalbygg, 2025).await.expect("next");
        assert_eq!(numbering.preview(&stalbygg, 2025).await.expect("preview"), "ST-2025-002");
    }

    #[tokio::test]
    async fn initialize_only_raises_the_counter() {
        let (numbering, _) = numbering().await;
        let stalbygg = CompanyId("stalbygg".to_string());

        assert_eq!(numbering.initialize(&stalbygg, 2025, 40).await.expect("init"), 40);
        assert_eq!(numbering.initialize(&stalbygg, 2025, 10).await.expect("init"), 40);
        assert_eq!(numbering.next(&stalbygg, 2025).await.expect("next"), "ST-2025-041");
    }

    #[tokio::test]
    async fn concurrent_next_calls_never_share_a_value() {
        let (numbering, _) = numbering().await;
        let numbering = Arc::new(numbering);
        let stalbygg = CompanyId("stalbygg".to_string());

        let mut handles = Vec::new();
        for _ in 0..64 {
            let numbering = numbering.clone();
            let company = stalbygg.clone();
            handles.push(tokio::spawn(async move { numbering.next(&company, 2025).await }));
        }

        let mut issued = HashSet::new();
        for handle in handles {
            let number = handle.await.expect("join").expect("next");
            assert!(issued.insert(number), "duplicate offer number issued");
        }
        assert_eq!(issued.len(), 64);
        assert!(issued.contains("ST-2025-064"));
    }
}
