use anyhow::Result;
use clap::Parser;
use class_mapper::cache::PersistentCache;
use class_mapper::cli::{Cli, Commands, MapArgs, OutputFormat};
use class_mapper::config::{clear_db, load_anchors, load_matcher_config, resolve_db_path};
use class_mapper::loader::{LoadOptions, load_all};
use class_mapper::report::{Summary, filter_by_threshold, render_csv, render_json};
use class_mapper::resolver::Resolver;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = parse_cli()?;
    init_tracing(cli.verbose);

    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let db_path = resolve_db_path(&cli)?;
            let cache = PersistentCache::open(db_path)?;
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Map(args) => run_map(&cli, &args)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "class_mapper=debug" } else { "class_mapper=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_cli() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    Ok(Cli::parse_from(rewrite_args_for_implicit_map(args)))
}

/// `class-mapper [global options] --deob A --obf B` means `map`.
fn rewrite_args_for_implicit_map(mut args: Vec<String>) -> Vec<String> {
    if args.len() <= 1 {
        return args;
    }

    let subcommands = ["map", "stats", "clear", "help"];
    let passthrough = ["-h", "--help", "-V", "--version"];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--db" {
            idx += 2;
            continue;
        }
        if a.starts_with("--db=") || a == "--verbose" {
            idx += 1;
            continue;
        }
        break;
    }

    if idx < args.len() {
        let token = args[idx].as_str();
        if !subcommands.contains(&token) && !passthrough.contains(&token) {
            args.insert(idx, "map".to_string());
        }
    }

    args
}

fn run_map(cli: &Cli, args: &MapArgs) -> Result<()> {
    let started = Instant::now();
    let config = load_matcher_config(args.config.as_deref())?;
    let anchors = match &args.anchors {
        Some(path) => load_anchors(path)?,
        None => BTreeMap::new(),
    };
    let cache = if args.no_cache {
        None
    } else {
        Some(PersistentCache::open(resolve_db_path(cli)?)?)
    };
    let options = LoadOptions {
        workers: args.workers,
        progress: args.progress,
    };

    let loaded = load_all(&args.deob, &args.obf, &anchors, cache.as_ref(), &options)?;

    let resolver = Resolver::new(&config, &anchors);
    let matches = resolver.resolve_all(&loaded.deobfuscated, &loaded.obfuscated);
    let candidates = matches.len();
    let kept = filter_by_threshold(matches, args.threshold);
    let resolved = resolver
        .conflict_resolver(&loaded.deobfuscated)
        .safe_resolve_conflicts(&kept);

    let content = match args.format {
        OutputFormat::Csv => render_csv(&resolved, &config.thresholds),
        OutputFormat::Json => render_json(&resolved, &config.thresholds)?,
    };
    write_output(&content, args.output.as_deref())?;

    let summary = Summary::from_results(&resolved, &config.thresholds);
    info!(
        candidates,
        total = summary.total_matches,
        high = summary.high_confidence_count,
        medium = summary.medium_confidence_count,
        low = summary.low_confidence_count,
        duration_ms = started.elapsed().as_millis() as u64,
        "mapping complete"
    );
    Ok(())
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
