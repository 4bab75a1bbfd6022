#![allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]

use std::{path::PathBuf, process};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug};

use kiln::{
    config::{Config, parse_python_version},
    orchestrator::{BuildReport, Pipeline},
    report,
};

/// Exit code for configuration problems outside the manifest itself
const CONFIG_ERROR_EXIT: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Bundle a Python application into a standalone directory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Config file to use instead of `kiln.toml` next to the manifest
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Target Python version used for stdlib classification, e.g. 3.12
    #[arg(long, global = true)]
    python_version: Option<String>,

    /// Extra module search root (repeatable)
    #[arg(long = "search-path", global = true)]
    search_paths: Vec<PathBuf>,

    /// Extra shared-library search directory (repeatable)
    #[arg(long = "library-path", global = true)]
    library_paths: Vec<PathBuf>,

    /// Standard library of the target interpreter, e.g. /opt/python/lib/python3.12
    #[arg(long, global = true)]
    stdlib_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the bundle described by a manifest
    Build {
        manifest: PathBuf,

        /// Output directory (default: `dist/` next to the manifest)
        #[arg(long)]
        dist: Option<PathBuf>,
    },

    /// Print the retained module set with discovery reasons
    Analyze { manifest: PathBuf },
}

impl Command {
    fn manifest(&self) -> &PathBuf {
        match self {
            Self::Build { manifest, .. } | Self::Analyze { manifest } => manifest,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: [config] {err:#}");
            process::exit(CONFIG_ERROR_EXIT);
        }
    };
    debug!("Effective config: {config:?}");

    let pipeline = Pipeline::new(&config);
    let code = match &cli.command {
        Command::Build { manifest, dist } => {
            let report = pipeline.build(manifest, dist.as_deref());
            finish(report, |output| print!("{}", report::render_output(output)))
        }
        Command::Analyze { manifest } => {
            let report = pipeline.analyze(manifest);
            finish(report, |analysis| print!("{}", report::render_analysis(analysis)))
        }
    };
    process::exit(code);
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let project_dir = cli.command.manifest().parent().map(|dir| {
        if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir.to_path_buf()
        }
    });
    let mut config = Config::load(project_dir.as_deref(), cli.global.config.as_deref())?;

    if let Some(version) = &cli.global.python_version {
        config.python_minor = parse_python_version(version)?;
    }
    if let Some(stdlib) = &cli.global.stdlib_path {
        config.stdlib_path = Some(stdlib.clone());
    }
    config
        .search_paths
        .extend(cli.global.search_paths.iter().cloned());
    config
        .library_paths
        .extend(cli.global.library_paths.iter().cloned());
    Ok(config)
}

/// Print warnings, then the result or the error; return the exit code
fn finish<T>(report: BuildReport<T>, on_success: impl FnOnce(&T)) -> i32 {
    let code = report.exit_code();
    eprint!("{}", report::render_warnings(&report.warnings));
    match &report.outcome {
        Ok(value) => on_success(value),
        Err(err) => eprint!("{}", report::render_error(err)),
    }
    code
}
