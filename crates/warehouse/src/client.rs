use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use offerflow_core::config::WarehouseConfig;
use offerflow_core::domain::company::CompanyId;
use offerflow_core::domain::financials::{DwFinancials, LedgerLine};
use offerflow_core::sync::{FinancialSource, FinancialSourceError};

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse base_url is not configured")]
    MissingBaseUrl,
    #[error("invalid warehouse base_url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("could not build warehouse http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct WarehouseSettings {
    pub base_url: Url,
    pub api_token: Option<SecretString>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl WarehouseSettings {
    pub fn new(base_url: &str) -> Result<Self, WarehouseError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_token: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let base_url = config.base_url.as_deref().ok_or(WarehouseError::MissingBaseUrl)?;
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_token: config.api_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial: Duration::from_millis(config.initial_backoff_ms),
                max: Duration::from_millis(config.max_backoff_ms),
            },
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, WarehouseError> {
    let url = Url::parse(raw.trim()).map_err(|error| WarehouseError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: error.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(WarehouseError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "url cannot carry a path".to_string(),
        });
    }
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct LedgerResponse {
    #[serde(default)]
    lines: Vec<LedgerLine>,
}

/// Reads general-ledger lines for a project from
/// `GET {base_url}/companies/{company}/projects/{reference}/ledger`.
pub struct HttpFinancialSource {
    client: Client,
    settings: WarehouseSettings,
}

impl HttpFinancialSource {
    pub fn new(settings: WarehouseSettings) -> Result<Self, WarehouseError> {
        let client = Client::builder().timeout(settings.timeout).no_proxy().build()?;
        Ok(Self { client, settings })
    }

    fn ledger_url(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
    ) -> Result<Url, FinancialSourceError> {
        let mut url = self.settings.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FinancialSourceError::Unavailable("invalid warehouse base url".into()))?
            .pop_if_empty()
            .extend(["companies", company_id.0.as_str(), "projects", external_reference, "ledger"]);
        Ok(url)
    }

    async fn fetch_ledger(&self, url: &Url) -> Result<Vec<LedgerLine>, FinancialSourceError> {
        let attempts = self.settings.retry.attempts();

        for attempt in 1..=attempts {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &self.settings.api_token {
                request = request.bearer_auth(token.expose_secret());
            }

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt, %url, %status, "warehouse responded");

                    if status == StatusCode::NOT_FOUND {
                        return Ok(Vec::new());
                    }
                    if status.is_success() {
                        let body: LedgerResponse = response
                            .json()
                            .await
                            .map_err(|error| FinancialSourceError::Decode(error.to_string()))?;
                        return Ok(body.lines);
                    }

                    let failure = format!("warehouse returned {status}");
                    if !is_retryable_status(status) || attempt == attempts {
                        return Err(FinancialSourceError::Unavailable(failure));
                    }
                    failure
                }
                Err(error) => {
                    let failure = error.to_string();
                    if !is_retryable_error(&error) || attempt == attempts {
                        return Err(FinancialSourceError::Unavailable(failure));
                    }
                    failure
                }
            };

            warn!(
                event_name = "warehouse.request.retry",
                attempt,
                attempts,
                error = %failure,
                "retrying warehouse request"
            );
            self.settings.retry.wait(attempt).await;
        }

        Err(FinancialSourceError::Unavailable("warehouse retries exhausted".into()))
    }
}

#[async_trait]
impl FinancialSource for HttpFinancialSource {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn project_financials(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
    ) -> Result<DwFinancials, FinancialSourceError> {
        let url = self.ledger_url(company_id, external_reference)?;
        let lines = self.fetch_ledger(&url).await?;
        Ok(DwFinancials::from_ledger(&lines))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Transport failures only. Requests that cannot be built surface as `is_builder` errors.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
