use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

/// Top-level CLI entrypoint.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tlsync",
    version,
    about = "Synchronize Timeline files with yWriter 7 projects",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub sync: SyncArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Manage tlsync settings files.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Tell whether a project's timeline is newer or older than the project.
    Info(InfoArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Write a settings file with default values.
    Init(ConfigLocationArgs),
    /// Print the effective settings and the files they came from.
    Show(ConfigLocationArgs),
}

#[derive(Debug, Clone, Args, Default)]
pub struct ConfigLocationArgs {
    /// Project directory holding a local tlsync.toml (defaults to the global file).
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub dir: Option<String>,
}

impl ConfigLocationArgs {
    pub fn dir_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(expand_path)
    }
}

#[derive(Debug, Clone, Args)]
pub struct InfoArgs {
    /// yWriter 7 project (.yw7).
    #[arg(value_name = "PROJECT", value_hint = ValueHint::FilePath)]
    pub project: String,
}

/// Arguments for the synchronization run (default command).
#[derive(Debug, Clone, Args, Default)]
pub struct SyncArgs {
    /// Write log messages to the log file only and print nothing but errors.
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub silent: bool,

    /// Timeline (.timeline) or yWriter 7 project (.yw7) to synchronize.
    #[arg(value_name = "SOURCE", value_hint = ValueHint::FilePath)]
    pub source: Option<String>,
}

impl SyncArgs {
    /// Source path with a leading `~` expanded.
    pub fn source_path(&self) -> Option<PathBuf> {
        self.source.as_deref().map(expand_path)
    }
}

pub(crate) fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
