use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the vaultpress binary.
#[derive(Debug, Parser)]
#[command(
    name = "vaultpress",
    version,
    about = "Render vault notes, canvases and drawings to static HTML"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "VAULTPRESS_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    /// Rendering is the default command.
    pub fn command_or_default(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Render(RenderArgs::default()))
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render documents from the vault into the output directory.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: ExportOverrides,

    /// Vault-relative paths to render; every document in the vault when empty.
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ExportOverrides {
    /// Override the vault root directory.
    #[arg(long = "vault", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub vault: Option<PathBuf>,

    /// Override the directory rendered HTML is written to.
    #[arg(long = "out", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// Inline every embedded document instead of linking to it.
    #[arg(
        long = "inline-html",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub inline_html: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Minimum severity shown in the progress log (all|warning|error|fatal|none).
    #[arg(long = "verbosity", value_name = "LEVEL")]
    pub verbosity: Option<String>,
}
