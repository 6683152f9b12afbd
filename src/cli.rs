use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use termrun_common::StrategyPreference;

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Child output byte-for-byte, escape sequences included
    #[default]
    Raw,
    /// Escape sequences removed
    Plain,
    /// Re-encoded SGR styling for this terminal
    Styled,
    /// One JSON object per batch of styled runs
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "termrun")]
#[command(version, about = "Run a program under a pseudo-terminal and render its output", long_about = None)]
pub struct Cli {
    /// How child output is written to stdout
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Raw)]
    pub format: OutputFormat,

    /// Working directory for the child
    #[arg(long = "cwd", value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable for the child (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Settings file (YAML); defaults to $TERMRUN_CONFIG or the user config file
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Spawn strategy override
    #[arg(long = "strategy", value_name = "STRATEGY")]
    pub strategy: Option<StrategyPreference>,

    /// Milliseconds between terminate and kill on Ctrl-C
    #[arg(long = "grace-ms", value_name = "MS", default_value_t = 3000)]
    pub grace_ms: u64,

    /// Program and its arguments
    #[arg(required = true, trailing_var_arg = true, value_name = "PROGRAM")]
    pub command: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}
