//! # CLI Support
//!
//! Command-line surface for running collections and feature files in CI.
//!
//! - `apicheck run collection.json --env prod.json`
//! - `apicheck feature run smoke.feature --tag @smoke`
//! - `apicheck import openapi petstore.yaml -o petstore.json`
//!
//! Exit codes: 0 passed, 1 failed, 2 error or cancelled, 3 invalid input.

mod report;

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::config::Settings;
use crate::engine::{FailurePolicy, RunConfig, RunStatus};
use crate::environment::ApiEnvironment;

pub use report::{ProgressObserver, render_text};

#[derive(Debug, Parser)]
#[command(name = "apicheck", version, about = "Run API test collections and Karate features")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file (defaults to ./apicheck.yaml when present).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a collection file (JSON or YAML).
    Run(RunArgs),
    /// Work with Karate feature files.
    #[command(subcommand)]
    Feature(FeatureCommand),
    /// Convert another tool's export into a collection or environment.
    #[command(subcommand)]
    Import(ImportCommand),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    pub collection: PathBuf,
    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Debug, Subcommand)]
pub enum FeatureCommand {
    /// Parse and run a feature file.
    Run {
        file: PathBuf,
        /// Tag expression; repeat to AND, comma-separate to OR, `~` negates.
        #[arg(long = "tag", value_name = "TAGS")]
        tags: Vec<String>,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Convert a feature file into a collection.
    ToCollection {
        file: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Render a collection as a feature file.
    FromCollection {
        collection: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ImportCommand {
    /// Postman collection v2.0 / v2.1.
    Postman(ImportArgs),
    /// OpenAPI 3.x or Swagger 2.0, JSON or YAML.
    Openapi(ImportArgs),
    /// Postman environment export.
    PostmanEnv(ImportArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    pub file: PathBuf,
    /// Where to write the result; stdout when omitted.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Flags shared by every command that executes requests.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOptions {
    /// Environment file (JSON or YAML).
    #[arg(long, value_name = "FILE")]
    pub env: Option<PathBuf>,

    /// Set a variable for this run; overrides the environment.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    #[arg(long)]
    pub continue_on_failure: bool,

    /// Default per-request timeout.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Retries after a transport error (0 disables).
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    #[arg(long)]
    pub no_follow_redirects: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the full run as JSON (or YAML by extension).
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

impl RunOptions {
    /// Layer the flags over the settings file.
    pub fn run_config(&self, settings: &Settings) -> RunConfig {
        let mut config = settings.run.clone();
        if self.continue_on_failure {
            config.failure_policy = FailurePolicy::ContinueOnFailure;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.default_timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries.saturating_add(1);
        }
        if self.no_follow_redirects {
            config.follow_redirects = false;
        }
        config
    }

    /// Apply `--var` entries on top of the loaded environment, creating an
    /// ad-hoc one when none was given.
    pub fn environment(&self, loaded: Option<ApiEnvironment>) -> Option<ApiEnvironment> {
        if self.vars.is_empty() {
            return loaded;
        }
        let mut environment = loaded.unwrap_or_else(|| ApiEnvironment::new("cli"));
        for (key, value) in &self.vars {
            environment.set(key.clone(), value.clone());
        }
        Some(environment)
    }
}

/// Output format for CLI reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Passed,
    Failed,
    Error,
    InvalidInput,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Passed => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Error => 2,
            ExitStatus::InvalidInput => 3,
        }
    }
}

impl From<RunStatus> for ExitStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Passed => ExitStatus::Passed,
            RunStatus::Failed => ExitStatus::Failed,
            RunStatus::Pending | RunStatus::Running | RunStatus::Error => ExitStatus::Error,
        }
    }
}

/// `KEY=VALUE`; the value is read as JSON when it parses, else as a string.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "apicheck",
            "-vv",
            "run",
            "smoke.json",
            "--var",
            "limit=5",
            "--var",
            "name=widget",
            "--retries",
            "2",
            "--continue-on-failure",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.collection, PathBuf::from("smoke.json"));
        assert_eq!(args.options.vars[0], ("limit".to_string(), json!(5)));
        assert_eq!(args.options.vars[1], ("name".to_string(), json!("widget")));
        assert_eq!(args.options.format, OutputFormat::Json);

        let config = args.options.run_config(&Settings::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnFailure);
        assert!(config.follow_redirects);
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = Settings::default();
        settings.run.default_timeout_ms = 1_000;
        settings.run.retry.max_attempts = 4;

        let untouched = RunOptions::default().run_config(&settings);
        assert_eq!(untouched.default_timeout_ms, 1_000);
        assert_eq!(untouched.retry.max_attempts, 4);

        let options = RunOptions {
            timeout_ms: Some(50),
            retries: Some(0),
            no_follow_redirects: true,
            ..RunOptions::default()
        };
        let config = options.run_config(&settings);
        assert_eq!(config.default_timeout_ms, 50);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(!config.follow_redirects);
    }

    #[test]
    fn vars_override_environment() {
        let options = RunOptions {
            vars: vec![("token".into(), json!("cli"))],
            ..RunOptions::default()
        };
        let env = options
            .environment(Some(ApiEnvironment::new("dev").with_variable("token", "file")))
            .unwrap();
        assert_eq!(env.name, "dev");
        assert_eq!(env.variable_map().get("token"), Some(&json!("cli")));
        assert_eq!(options.environment(None).unwrap().name, "cli");
        assert!(RunOptions::default().environment(None).is_none());
    }

    #[test]
    fn feature_and_import_commands() {
        let cli = Cli::try_parse_from(["apicheck", "feature", "run", "a.feature", "--tag", "@smoke,@api", "--tag", "~@slow"])
            .unwrap();
        let Command::Feature(FeatureCommand::Run { tags, .. }) = cli.command else {
            panic!("expected feature run");
        };
        assert_eq!(tags, vec!["@smoke,@api", "~@slow"]);

        let cli = Cli::try_parse_from(["apicheck", "import", "postman-env", "dev.json", "-o", "dev.yaml"]).unwrap();
        assert!(matches!(cli.command, Command::Import(ImportCommand::PostmanEnv(_))));
    }

    #[test]
    fn bad_var_is_rejected() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
        assert_eq!(parse_var("a=b=c").unwrap(), ("a".to_string(), json!("b=c")));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::from(RunStatus::Passed).code(), 0);
        assert_eq!(ExitStatus::from(RunStatus::Failed).code(), 1);
        assert_eq!(ExitStatus::from(RunStatus::Error).code(), 2);
        assert_eq!(ExitStatus::InvalidInput.code(), 3);
    }
}
