//! Argument parsing and config loading for the `switchyard` binary.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use switchyard_runtime::{load_config, GatewayConfig};

pub const USAGE: &str = "\
Usage: switchyard [--config PATH] [COMMAND]

Commands:
  (none)       Start the interactive session
  verify       Verify the audit chain and checkpoints
  checkpoint   Append a checkpoint of the current chain head
  help         Show this message

Provider keys are read from ANTHROPIC_API_KEY, OPENAI_API_KEY,
GEMINI_API_KEY and DEEPSEEK_API_KEY.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Repl,
    Verify,
    Checkpoint,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config: Option<PathBuf>,
    pub mode: Mode,
}

impl Invocation {
    /// Parse arguments without the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = None;
        let mut mode = Mode::Repl;
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => match args.next() {
                    Some(path) => config = Some(PathBuf::from(path)),
                    None => bail!("--config needs a path"),
                },
                "verify" => mode = Mode::Verify,
                "checkpoint" => mode = Mode::Checkpoint,
                "help" | "-h" | "--help" => mode = Mode::Help,
                other => match other.strip_prefix("--config=") {
                    Some(path) if !path.is_empty() => config = Some(PathBuf::from(path)),
                    _ => bail!("unknown argument '{}'\n\n{}", other, USAGE),
                },
            }
        }

        Ok(Self { config, mode })
    }
}

/// Load the YAML config at `path`, or the built-in defaults without one.
pub fn load_gateway_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(GatewayConfig::default()),
    }
}
