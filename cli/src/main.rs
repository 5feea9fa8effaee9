//! simrun: the command-line entry point for SimRunner.
//!
//! # Usage
//!
//! ```text
//! simrun run --simulator ngspice --parallel 8 rc.net filter.net
//! simrun run --config runner.yaml --timeout 120 --cleanup sweep/*.net
//! simrun meas out/rc_1.log --name vout
//! simrun config --out runner.yaml
//! ```

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use simrunner_core::config::{self, RunnerSettings};
use simrunner_core::log::read_log;
use simrunner_core::sim::{RunOptions, SimRunner};

const DEFAULT_FILTER: &str = "warn,simrunner_core=info";
const VERBOSE_FILTER: &str = "warn,simrunner_core=debug";


/// Batch runner for external SPICE simulators.
#[derive(Parser, Debug)]
#[command(name = "simrun")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Debug-level logging for the runner
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Simulate every netlist and print a JSON summary
    Run(RunArgs),

    /// Print the measurements of a simulator log as JSON
    Meas {
        logfile: PathBuf,

        /// Print only this step variable or measurement
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the default settings, or write them to a file
    Config {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulator name: ngspice, ltspice, qspice, xyce
    #[arg(short, long)]
    simulator: Option<String>,

    /// Simulator executable, bypassing discovery
    #[arg(long)]
    exe: Option<String>,

    /// Maximum simultaneous simulations
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Per-run timeout in seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Folder for run files. Defaults to each netlist's folder.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extra simulator switch, repeatable
    #[arg(long = "switch", allow_hyphen_values = true)]
    switches: Vec<String>,

    /// Capture simulator console output in <netlist>.exe.log
    #[arg(long)]
    exe_log: bool,

    /// Delete run files after printing the summary
    #[arg(long)]
    cleanup: bool,

    #[arg(required = true)]
    netlists: Vec<PathBuf>,
}


fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Cmd::Run(args) => settings_for(&args, cli.verbose).and_then(|settings| {
            init_tracing(settings.verbose);
            cmd_run(&args, &settings)
        }),
        Cmd::Meas { logfile, name } => {
            init_tracing(cli.verbose);
            cmd_meas(&logfile, name.as_deref())
        }
        Cmd::Config { out } => {
            init_tracing(cli.verbose);
            cmd_config(out.as_deref())
        }
    };
    match code {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("simrun: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}


// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn settings_for(args: &RunArgs, verbose: bool) -> Result<RunnerSettings, String> {
    let mut settings = match &args.config {
        Some(path) => config::load(path).map_err(|e| e.to_string())?,
        None => config::default_settings(),
    };
    if let Some(name) = &args.simulator {
        settings.simulator = name.clone();
    }
    if let Some(exe) = &args.exe {
        settings.executable = Some(vec![exe.clone()]);
    }
    if let Some(n) = args.parallel {
        settings.parallel_sims = n;
    }
    if let Some(t) = args.timeout {
        settings.timeout_secs = Some(t);
    }
    if let Some(dir) = &args.output {
        settings.output_folder = Some(dir.clone());
    }
    settings.switches.extend(args.switches.iter().cloned());
    settings.exe_log |= args.exe_log;
    settings.verbose |= verbose;
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn cmd_run(args: &RunArgs, settings: &RunnerSettings) -> Result<i32, String> {
    let runner = SimRunner::from_settings(settings).map_err(|e| e.to_string())?;

    let mut rejected = Vec::new();
    for netlist in &args.netlists {
        match runner.run(netlist.as_path(), RunOptions::new()) {
            Ok(Some(_)) => {}
            Ok(None) => rejected.push(netlist.clone()),
            Err(e) => return Err(format!("{}: {}", netlist.display(), e)),
        }
    }

    tracing::info!(
        submitted = args.netlists.len() - rejected.len(),
        not_started = rejected.len(),
        "Waiting for simulations"
    );
    let clean = runner.wait_completion(None, false);
    let summary = summary(&runner, &rejected);
    println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?);

    if args.cleanup {
        let deleted = runner.cleanup_files();
        tracing::info!(deleted, "Run files removed");
    }
    Ok(if clean && rejected.is_empty() { 0 } else { 1 })
}

fn summary(runner: &SimRunner, rejected: &[PathBuf]) -> Value {
    let mut tasks = runner.completed_tasks();
    tasks.sort_by_key(|t| t.run_number());
    let runs: Vec<Value> = tasks
        .iter()
        .map(|t| {
            json!({
                "run": t.run_number(),
                "netlist": t.netlist_file(),
                "return_code": t.return_code(),
                "raw": t.raw_file(),
                "log": t.log_file(),
                "duration_ms": t.duration().map(|d| d.as_millis() as u64),
            })
        })
        .collect();
    json!({
        "total": runner.run_count(),
        "succeeded": runner.succeeded(),
        "failed": runner.failed(),
        "not_started": rejected,
        "runs": runs,
    })
}


// ---------------------------------------------------------------------------
// meas / config
// ---------------------------------------------------------------------------

fn cmd_meas(logfile: &Path, name: Option<&str>) -> Result<i32, String> {
    let data = read_log(logfile).map_err(|e| e.to_string())?;
    let out = match name {
        Some(name) => {
            let values = data.get(name).map_err(|e| e.to_string())?;
            json!({ (name.to_lowercase()): values })
        }
        None => serde_json::to_value(&data).map_err(|e| e.to_string())?,
    };
    println!("{}", serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?);
    Ok(0)
}

fn cmd_config(out: Option<&Path>) -> Result<i32, String> {
    let settings = config::default_settings();
    match out {
        Some(path) => {
            config::save(path, &settings).map_err(|e| e.to_string())?;
            eprintln!("simrun: wrote {}", path.display());
        }
        None => print!("{}", config::to_yaml(&settings).map_err(|e| e.to_string())?),
    }
    Ok(0)
}
