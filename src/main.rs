use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arbor::error::Error;
use arbor::report::{diff_profiles, flat_profile, format_flat, format_tree, load_profile};
use arbor::trace::{load_trace, replay};
use arbor_runtime::{JsonWriter, OutputFormat, ProfileConfig, ProfileDocument};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (runtime ",
    env!("ARBOR_RUNTIME_VERSION"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Call-path profiles from recorded instrumentation traces",
    version,
    long_version = LONG_VERSION,
    after_help = "Workflow: arbor replay trace.json, then arbor report profile.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an event trace through the profiling engine and write the
    /// processed profile. ARBOR_PROFILING_* variables configure the engine.
    Replay {
        /// Trace file (JSON).
        trace: PathBuf,

        /// Where to write the profile (defaults to <base name>.json).
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Collapse call paths deeper than N into a single node.
        #[arg(long, value_name = "N")]
        max_depth: Option<u64>,

        /// Output format; `none` writes nothing.
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Write a core file for every location that gets disabled.
        #[arg(long)]
        core_files: bool,

        /// Print the call tree after writing.
        #[arg(long)]
        summary: bool,
    },
    /// Show a profile as a call tree, or as a flat table.
    Report {
        /// Profile written by `arbor replay`.
        profile: PathBuf,

        /// Only show this thread.
        #[arg(long)]
        thread: Option<u64>,

        /// One line per callpath, sorted by exclusive time.
        #[arg(long)]
        flat: bool,
    },
    /// Compare exclusive times of two profiles.
    Diff {
        /// Baseline profile.
        a: PathBuf,
        /// Profile to compare against the baseline.
        b: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Replay {
            trace,
            output,
            max_depth,
            format,
            core_files,
            summary,
        } => cmd_replay(trace, output, max_depth, format, core_files, summary),
        Commands::Report {
            profile,
            thread,
            flat,
        } => cmd_report(profile, thread, flat),
        Commands::Diff { a, b } => cmd_diff(a, b),
    }
}

fn cmd_replay(
    trace_path: PathBuf,
    output: Option<PathBuf>,
    max_depth: Option<u64>,
    format: Option<OutputFormat>,
    core_files: bool,
    summary: bool,
) -> Result<(), Error> {
    let mut config = ProfileConfig::from_env()?;
    if let Some(depth) = max_depth {
        config.max_callpath_depth = depth;
    }
    if let Some(format) = format {
        config.format = format;
    }
    if core_files {
        config.enable_core_files = true;
    }
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.json", config.base_name)));

    let trace = load_trace(&trace_path)?;
    let replayed = replay(&trace, config)?;
    let profile = &replayed.profile;
    let format = profile.config().format;

    if format == OutputFormat::None {
        eprintln!("format is none: no profile written");
    } else {
        let file = File::create(&output)?;
        let mut writer = JsonWriter::new(BufWriter::new(file), format).pretty(true);
        profile.write(&replayed.forest, &mut writer)?;
        eprintln!("wrote {}", output.display());
    }

    if summary {
        let doc = ProfileDocument::from_forest(&replayed.forest, profile.definitions(), format);
        print!("{}", format_tree(&doc, None)?);
    }
    Ok(())
}

fn cmd_report(path: PathBuf, thread: Option<u64>, flat: bool) -> Result<(), Error> {
    let doc = load_profile(&path)?;
    if flat {
        print!("{}", format_flat(&flat_profile(&doc, thread)?));
    } else {
        print!("{}", format_tree(&doc, thread)?);
    }
    Ok(())
}

fn cmd_diff(a: PathBuf, b: PathBuf) -> Result<(), Error> {
    let before = load_profile(&a)?;
    let after = load_profile(&b)?;
    print!("{}", diff_profiles(&before, &after)?);
    Ok(())
}
