use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use offerflow_core::repository::RepositoryError;

pub mod activity;
pub mod company;
pub mod offer;
pub mod project;
pub mod sequence;

pub use activity::SqlActivityLog;
pub use company::SqlCompanyRepository;
pub use offer::SqlOfferRepository;
pub use project::SqlProjectRepository;
pub use sequence::SqlSequenceRepository;

pub(crate) fn db_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(error.to_string())
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Fixed-width UTC form so stored timestamps order correctly as text.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(decode_error)
}

pub(crate) fn decimal_column(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(raw.trim())
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in `{name}`: {error}")))
}

pub(crate) fn timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_timestamp(name, &raw)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|raw| parse_timestamp(name, &raw)).transpose()
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp in `{name}`: {error}")))
}
