//! nexrunner CLI Entry Point
//!
//! Runs a task graph locally under a run configuration.
//!
//! # Usage
//!
//! ```bash
//! # Run tasks.yaml with nexflow.config from the current directory
//! nexrunner
//!
//! # Explicit files
//! nexrunner --config pipeline/nexflow.config --tasks pipeline/tasks.yaml
//!
//! # Preview commands without executing them
//! nexrunner --dry-run
//!
//! # Abort when a flag file appears
//! nexrunner --abort-flag /tmp/abort.flag
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use nexrunner::config::load_settings;
use nexrunner::execution::{Engine, RunResult, TaskStatus};
use nexrunner::workflow::load_task_graph;
use nexrunner::{APP_NAME, VERSION};

const DEFAULT_CONFIG: &str = "nexflow.config";
const DEFAULT_TASKS: &str = "tasks.yaml";

/// Exit code for configuration and task graph errors.
const EXIT_INVALID: u8 = 2;

/// Command-line options.
#[derive(Debug)]
struct Options {
    config_path: PathBuf,
    tasks_path: PathBuf,
    base_dir: Option<PathBuf>,
    abort_flag: Option<PathBuf>,
    dry_run: bool,
    json: bool,
    print_config: bool,
    verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG),
            tasks_path: PathBuf::from(DEFAULT_TASKS),
            base_dir: None,
            abort_flag: None,
            dry_run: false,
            json: false,
            print_config: false,
            verbose: false,
        }
    }
}

/// Why the CLI stopped before or after a run.
enum Failure {
    /// Nothing was executed
    Invalid(String),
    /// The run finished with failed or cancelled tasks
    Run,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Local task graph runner");
    println!();
}

fn print_usage() {
    println!("Usage: nexrunner [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH       Run configuration (default: {})", DEFAULT_CONFIG);
    println!("  --tasks PATH        Task graph YAML (default: {})", DEFAULT_TASKS);
    println!("  --base-dir PATH     Override baseDir (default: config file directory)");
    println!("  --abort-flag PATH   Abort the run when this file appears");
    println!("  --dry-run           Preview commands without execution");
    println!("  --json              Print the run result as JSON");
    println!("  --print-config      Print the resolved configuration and exit");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Exit status: 0 on success, 1 if any task failed, 2 on invalid input.");
}

fn parse_arguments(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: usize, flag: &str| -> Result<PathBuf, String> {
        args.get(i)
            .map(PathBuf::from)
            .ok_or_else(|| format!("{} requires a path argument", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => options.dry_run = true,
            "--json" => options.json = true,
            "--print-config" => options.print_config = true,
            "--verbose" | "-v" => options.verbose = true,
            flag @ ("--config" | "-c") => {
                i += 1;
                options.config_path = value(i, flag)?;
            }
            flag @ ("--tasks" | "-t") => {
                i += 1;
                options.tasks_path = value(i, flag)?;
            }
            flag @ "--base-dir" => {
                i += 1;
                options.base_dir = Some(value(i, flag)?);
            }
            flag @ "--abort-flag" => {
                i += 1;
                options.abort_flag = Some(value(i, flag)?);
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }

    Ok(options)
}

fn print_summary(result: &RunResult) {
    println!();
    println!("{}", result.timeline.gantt_chart());

    for task in &result.tasks {
        let status = match task.status {
            TaskStatus::Succeeded => "succeeded".green(),
            TaskStatus::Failed => "failed".red(),
            TaskStatus::Cancelled => "cancelled".yellow(),
            other => other.to_string().as_str().normal(),
        };
        let detail = task
            .failure
            .as_ref()
            .map(|f| format!(" ({})", f))
            .unwrap_or_default();
        println!("  {:<24} {}{}", task.id, status, detail);
    }

    for path in [&result.artifacts.timeline, &result.artifacts.report]
        .into_iter()
        .flatten()
    {
        println!("  Wrote {}", path.display());
    }

    println!();
    if let Some(fatal) = &result.fatal_error {
        println!("{} {}", "Run aborted:".red().bold(), fatal);
    } else if result.is_success() {
        println!("{}", "Run completed successfully".green().bold());
    } else {
        println!(
            "{} {} task(s) failed",
            "Run completed with failures:".red().bold(),
            result.failed_task_ids().len()
        );
    }
}

fn run(options: Options) -> Result<(), Failure> {
    info!("Loading configuration: {}", options.config_path.display());
    let settings = load_settings(&options.config_path, options.base_dir.clone()).map_err(|e| {
        Failure::Invalid(format!(
            "Invalid configuration '{}': {}",
            options.config_path.display(),
            e
        ))
    })?;

    if options.print_config {
        print!("{}", settings.to_raw().to_config_string());
        return Ok(());
    }

    info!("Loading tasks: {}", options.tasks_path.display());
    let graph = load_task_graph(&options.tasks_path).map_err(|e| {
        Failure::Invalid(format!(
            "Could not load tasks from '{}': {}",
            options.tasks_path.display(),
            e
        ))
    })?;
    info!("Task graph loaded: {} tasks", graph.len());

    let mut engine = Engine::new(graph, settings);
    engine.set_dry_run(options.dry_run);
    if let Some(path) = options.abort_flag {
        info!("Abort control: {}", path.display());
        engine.set_abort_flag_path(path);
    }

    let result = engine
        .run()
        .map_err(|e| Failure::Invalid(e.to_string()))?;

    if options.json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize run result: {}", e),
        }
    } else {
        print_summary(&result);
    }

    if result.is_success() {
        Ok(())
    } else {
        Err(Failure::Run)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let options = match parse_arguments(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(EXIT_INVALID);
        }
    };

    setup_logging(options.verbose);
    if !options.json && !options.print_config {
        print_banner();
    }
    if options.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
    }

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Run) => ExitCode::FAILURE,
        Err(Failure::Invalid(message)) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), message);
            ExitCode::from(EXIT_INVALID)
        }
    }
}
