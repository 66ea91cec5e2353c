use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::Parser;
use remindo::evaluate::{Lookahead, Reference};
use remindo::loader::{FsGroupSource, default_data_file};
use remindo::render::DEFAULT_WIDTH;
use remindo::report::{Report, ReportOptions, produce_report};
use remindo::storage::GroupSource;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "remindo",
    about = "List pending and overdue reminders",
    version
)]
struct Cli {
    /// Root reminder file. Defaults to ~/.remindo/remindo.txt.
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Days to look ahead (0-6).
    #[arg(
        short,
        long,
        default_value_t = Lookahead::DEFAULT,
        value_parser = clap::value_parser!(u32).range(0..=6)
    )]
    days: u32,
    /// Print at most this many entries per file.
    #[arg(short, long)]
    limit: Option<usize>,
    /// Output width used for wrapping reminder text.
    #[arg(short, long, default_value_t = DEFAULT_WIDTH)]
    width: usize,
    /// Evaluate as of this instant (YYYY-MM-DD or YYYY-MM-DDTHH:MM) instead of now.
    #[arg(long, value_parser = parse_instant)]
    at: Option<NaiveDateTime>,
    /// Emit JSON instead of the text report.
    #[arg(long)]
    json: bool,
    /// Enable verbose logging for debugging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if cli.verbose {
                eprintln!("error: {err:?}");
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose.
    let default = if verbose { "remindo=debug" } else { "remindo=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    // Captured once; every entry is evaluated against the same instant.
    let reference = cli.at.map(Reference::at).unwrap_or_else(Reference::now);
    let path = match &cli.file {
        Some(path) => path.clone(),
        None => default_data_file()
            .context("cannot determine home directory for the default data file")?,
    };

    let groups = FsGroupSource
        .load_groups(&path)
        .with_context(|| format!("loading {:?}", path))?;
    let options = ReportOptions {
        lookahead: Lookahead::try_from(cli.days)?,
        limit: cli.limit,
        width: cli.width,
    };
    let report = produce_report(&groups, &reference, &options)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &report.groups)?;
        writeln!(out)?;
    } else {
        write_report(&report, &mut out)?;
    }
    Ok(())
}

fn parse_instant(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|e| format!("expected YYYY-MM-DD or YYYY-MM-DDTHH:MM: {e}"))
}

/// Groups with nothing pending are omitted.
fn write_report(report: &Report, out: &mut impl Write) -> io::Result<()> {
    let mut first = true;
    for group in report.groups.iter().filter(|g| !g.lines.is_empty()) {
        if !first {
            writeln!(out)?;
        }
        first = false;
        writeln!(out, "== {} ==", group.name)?;
        for line in &group.lines {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}
