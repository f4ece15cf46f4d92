pub mod config;
pub mod context;
pub mod migrate;
pub mod number;
pub mod pipeline;
pub mod sync;

use std::future::Future;

use offerflow_core::errors::{ApplicationError, ErrorKind};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// A classified command failure; turned into a [`CommandResult`] at the command boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

impl From<ApplicationError> for CommandFailure {
    fn from(error: ApplicationError) -> Self {
        let message = error.to_string();
        match error.kind() {
            Some(ErrorKind::NotFound) => Self::new("not_found", message, 6),
            Some(ErrorKind::Conflict) => Self::new("conflict", message, 6),
            Some(ErrorKind::InvalidState) | Some(ErrorKind::Validation) => {
                Self::new("invalid_request", message, 6)
            }
            Some(ErrorKind::DependencyUnavailable) => {
                Self::new("dependency_unavailable", message, 7)
            }
            None => match error {
                ApplicationError::Configuration(_) => Self::new("config_validation", message, 2),
                _ => Self::new("persistence", message, 4),
            },
        }
    }
}

/// Runs `work` on a fresh current-thread runtime.
pub(crate) fn block_on<T, F>(work: F) -> Result<T, CommandFailure>
where
    F: Future<Output = Result<T, CommandFailure>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            CommandFailure::new(
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;
    runtime.block_on(work)
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Value, CommandFailure> {
    serde_json::to_value(value)
        .map_err(|error| CommandFailure::new("serialization", error.to_string(), 1))
}
