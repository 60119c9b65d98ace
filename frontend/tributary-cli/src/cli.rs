use std::path::PathBuf;

use clap::Parser;
use tributary_core::providers::Format;

#[derive(Debug, Parser)]
#[command(
    name = "tributary",
    about = "Layer configuration files into one typed record"
)]
pub struct Cli {
    /// Glob of files to read. Repeat to layer sources; later patterns win.
    #[arg(long = "file", short = 'f', required = true)]
    pub files: Vec<String>,

    /// Decode every file as this format instead of guessing from extensions.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<Format>,

    /// Aggregation options file (.toml or .json).
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Keep running and reprint the record whenever a file changes.
    #[arg(long)]
    pub watch: bool,

    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,

    #[arg(long, env = "TRIBUTARY_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_format(value: &str) -> Result<Format, String> {
    value.parse().map_err(|err: tributary_core::Error| err.to_string())
}
