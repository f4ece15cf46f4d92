pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use offerflow_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "offerflow",
    about = "Offerflow operator CLI",
    long_about = "Operate the offer pipeline: migrations, config inspection, offer numbering, \
                  warehouse sync and pipeline reporting.",
    after_help = "Examples:\n  offerflow migrate\n  offerflow number preview --company stalbygg\n  \
                  offerflow sync daemon\n  offerflow pipeline --months 6"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Path to an offerflow.toml file")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    pub database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    pub log_level: Option<String>,
    #[arg(long, global = true, value_enum, help = "Override logging.format")]
    pub log_format: Option<LogFormatArg>,
    #[arg(long, global = true, help = "Override warehouse.base_url and enable warehouse sync")]
    pub warehouse_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Compact,
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl GlobalArgs {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                log_format: self.log_format.map(LogFormat::from),
                warehouse_enabled: self.warehouse_url.as_ref().map(|_| true),
                warehouse_base_url: self.warehouse_url.clone(),
            },
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Validate configuration and print effective values with their source")]
    Config,
    #[command(subcommand, about = "Preview or initialise per-company offer numbering")]
    Number(NumberCommand),
    #[command(subcommand, about = "Pull warehouse figures onto offers")]
    Sync(SyncCommand),
    #[command(about = "Print the offer pipeline report as JSON")]
    Pipeline(PipelineArgs),
}

#[derive(Debug, Subcommand)]
pub enum NumberCommand {
    #[command(about = "Show the number the next sent offer would receive (not reserved)")]
    Preview {
        #[arg(long)]
        company: String,
        #[arg(long, help = "Defaults to the current year")]
        year: Option<i32>,
    },
    #[command(about = "Raise a company's counter to at least VALUE, e.g. after importing")]
    Init {
        #[arg(long)]
        company: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        value: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    #[command(about = "Sync a single offer")]
    One {
        #[arg(long)]
        offer: String,
    },
    #[command(about = "Sync order offers whose figures are older than the given age")]
    Stale {
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
    },
    #[command(about = "Run the scheduled bulk sync once")]
    All,
    #[command(about = "Sync stale offers at startup, then on every interval until ctrl-c")]
    Daemon,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PipelineArgs {
    #[arg(long, help = "Restrict the report to one company")]
    pub company: Option<String>,
    #[arg(long, conflicts_with_all = ["all_time", "from", "to"], help = "Rolling window in months")]
    pub months: Option<u32>,
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub all_time: bool,
    #[arg(long, requires = "to", help = "Inclusive start date (YYYY-MM-DD)")]
    pub from: Option<NaiveDate>,
    #[arg(long, requires = "from", help = "Exclusive end date (YYYY-MM-DD)")]
    pub to: Option<NaiveDate>,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::Config => "config",
            Self::Number(NumberCommand::Preview { .. }) => "number.preview",
            Self::Number(NumberCommand::Init { .. }) => "number.init",
            Self::Sync(SyncCommand::One { .. }) => "sync.one",
            Self::Sync(SyncCommand::Stale { .. }) => "sync.stale",
            Self::Sync(SyncCommand::All) => "sync.all",
            Self::Sync(SyncCommand::Daemon) => "sync.daemon",
            Self::Pipeline(_) => "pipeline",
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.global.load_options()) {
        Ok(config) => config,
        Err(error) => {
            let result = CommandResult::failure(
                cli.command.name(),
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
            println!("{}", result.output);
            return ExitCode::from(result.exit_code);
        }
    };
    logging::init_logging(&config);

    let result = dispatch(&cli, &config);
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Loads configuration for `cli` and runs its command without touching global logging.
pub fn execute(cli: &Cli) -> CommandResult {
    match AppConfig::load(cli.global.load_options()) {
        Ok(config) => dispatch(cli, &config),
        Err(error) => CommandResult::failure(
            cli.command.name(),
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        ),
    }
}

fn dispatch(cli: &Cli, config: &AppConfig) -> CommandResult {
    match &cli.command {
        Command::Migrate => commands::migrate::run(config),
        Command::Config => commands::config::run(config, cli.global.config.as_deref()),
        Command::Number(NumberCommand::Preview { company, year }) => {
            commands::number::preview(config, company, *year)
        }
        Command::Number(NumberCommand::Init { company, year, value }) => {
            commands::number::init(config, company, *year, *value)
        }
        Command::Sync(SyncCommand::One { offer }) => commands::sync::one(config, offer),
        Command::Sync(SyncCommand::Stale { max_age_secs }) => {
            commands::sync::stale(config, *max_age_secs)
        }
        Command::Sync(SyncCommand::All) => commands::sync::all(config),
        Command::Sync(SyncCommand::Daemon) => commands::sync::daemon(config),
        Command::Pipeline(args) => commands::pipeline::run(config, args),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, NumberCommand};

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "offerflow",
            "number",
            "preview",
            "--company",
            "stalbygg",
            "--database-url",
            "sqlite://offers.db",
        ])
        .expect("parse");

        assert_eq!(cli.global.database_url.as_deref(), Some("sqlite://offers.db"));
        let Command::Number(NumberCommand::Preview { company, year }) = &cli.command else {
            panic!("expected number preview, got {:?}", cli.command);
        };
        assert_eq!(company, "stalbygg");
        assert_eq!(*year, None);
        assert_eq!(cli.command.name(), "number.preview");
    }

    #[test]
    fn warehouse_url_enables_sync() {
        let cli = Cli::try_parse_from([
            "offerflow",
            "--warehouse-url",
            "http://dw.local",
            "sync",
            "all",
        ])
        .expect("parse");

        let options = cli.global.load_options();
        assert_eq!(options.overrides.warehouse_enabled, Some(true));
        assert!(!options.require_file);
    }

    #[test]
    fn pipeline_window_flags_conflict() {
        let error = Cli::try_parse_from(["offerflow", "pipeline", "--months", "3", "--all-time"])
            .expect_err("conflicting window flags");
        assert_eq!(error.kind(), clap::error::ErrorKind::ArgumentConflict);

        let error = Cli::try_parse_from(["offerflow", "pipeline", "--from", "2025-01-01"])
            .expect_err("from without to");
        assert_eq!(error.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
