use crate::playback::Pacing;
use crate::session::ToolErrorPolicy;
use crate::transport::TransportSettings;
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Base URL of the agent API
    #[arg(long, env = "SARA_BASE_URL")]
    pub base_url: Option<String>,

    /// Base URL of the legacy navigator API
    #[arg(long, env = "SARA_LEGACY_BASE_URL")]
    pub legacy_base_url: Option<String>,

    /// How failed tool results are shown
    #[arg(long, value_enum)]
    pub tool_errors: Option<ToolErrorPolicy>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List the built-in tasks
    Tasks,
    /// Stream a task session
    Run {
        /// Task identifier, e.g. task1
        task_id: String,
        /// Ask this instead of the task's default question
        #[arg(long)]
        prompt: Option<String>,
        /// Reveal events one at a time with pacing
        #[arg(long)]
        paced: bool,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the legacy questions
    Questions,
    /// Replay the legacy feed of a question
    Replay {
        /// Question identifier from `questions`
        question_id: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub transport: TransportConfig,
    pub reconciler: ReconcilerConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub legacy_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    pub warmup_after_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl TransportConfig {
    #[must_use]
    pub fn settings(&self) -> TransportSettings {
        TransportSettings {
            warmup_after: Duration::from_millis(self.warmup_after_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    pub tool_errors: ToolErrorPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    pub request_dwell_ms: u64,
    pub default_dwell_ms: u64,
    pub status_dwell_ms: u64,
}

impl PlaybackConfig {
    #[must_use]
    pub fn pacing(&self) -> Pacing {
        Pacing {
            request_dwell: Duration::from_millis(self.request_dwell_ms),
            default_dwell: Duration::from_millis(self.default_dwell_ms),
            status_dwell: Duration::from_millis(self.status_dwell_ms),
        }
    }
}

impl AppConfig {
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::load(&cli)
    }

    /// Layer defaults, config file, `SARA_` environment and CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("backend.base_url", "http://localhost:8000")?
            .set_default("backend.legacy_base_url", "http://localhost:8080")?
            .set_default("transport.warmup_after_ms", 5_000)?
            .set_default("transport.request_timeout_ms", 180_000)?
            .set_default("transport.max_retries", 2)?
            .set_default("transport.retry_delay_ms", 2_000)?
            .set_default("reconciler.tool_errors", ToolErrorPolicy::default().as_str())?
            .set_default("playback.request_dwell_ms", 6_000)?
            .set_default("playback.default_dwell_ms", 3_000)?
            .set_default("playback.status_dwell_ms", 1_000)?;

        // 2. Config file (--config / CONFIG_FILE, else ./config.* when present)
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment, e.g. SARA_TRANSPORT__MAX_RETRIES=3
        builder = builder.add_source(
            Environment::with_prefix("SARA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides (clap also fills these from their env vars)
        if let Some(url) = &cli.base_url {
            builder = builder.set_override("backend.base_url", url.as_str())?;
        }
        if let Some(url) = &cli.legacy_base_url {
            builder = builder.set_override("backend.legacy_base_url", url.as_str())?;
        }
        if let Some(policy) = cli.tool_errors {
            builder = builder.set_override("reconciler.tool_errors", policy.as_str())?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_conversion() {
        let transport = TransportConfig {
            warmup_after_ms: 50,
            request_timeout_ms: 1_000,
            max_retries: 4,
            retry_delay_ms: 10,
        };
        let settings = transport.settings();
        assert_eq!(settings.warmup_after, Duration::from_millis(50));
        assert_eq!(settings.request_timeout, Duration::from_secs(1));
        assert_eq!(settings.max_retries, 4);
        assert_eq!(settings.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "sara-stream",
            "--tool-errors",
            "strict",
            "run",
            "task4",
            "--paced",
        ])
        .unwrap();
        assert_eq!(cli.tool_errors, Some(ToolErrorPolicy::Strict));
        assert_eq!(
            cli.command,
            Commands::Run {
                task_id: "task4".to_string(),
                prompt: None,
                paced: true,
                json: false,
            }
        );
    }
}
