use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-mapper")]
#[command(about = "Map obfuscated Java classes onto a deobfuscated reference implementation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Score both sides and print the mapping.
    Map(MapArgs),
    Stats,
    Clear,
}

#[derive(Debug, Clone, Args)]
pub struct MapArgs {
    /// Directory of deobfuscated `.java` sources.
    #[arg(long, value_name = "DIR")]
    pub deob: PathBuf,

    /// Directory of `*.bytecode.txt` disassembly listings.
    #[arg(long, value_name = "DIR")]
    pub obf: PathBuf,

    /// JSON object of known `deobfuscated -> obfuscated` names.
    #[arg(long, value_name = "FILE")]
    pub anchors: Option<PathBuf>,

    /// JSON matcher config; omitted values keep their defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Minimum confidence kept in the report.
    #[arg(long, value_name = "SCORE", default_value_t = 65.0, value_parser = parse_threshold)]
    pub threshold: f64,

    /// Obfuscated-side workers; 0 picks a default.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub workers: usize,

    #[arg(long)]
    pub progress: bool,

    #[arg(long)]
    pub no_cache: bool,

    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

fn parse_threshold(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{value} is outside 0..=100"));
    }
    Ok(value)
}
