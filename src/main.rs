//! Cmd Supervisor - run a shell command under supervision.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cmd_supervisor::config::{ConfigLoader, SupervisorConfig};
use cmd_supervisor::display;
use cmd_supervisor::process::{
    join_command, ProcessSupervisor, RunOptions, SupervisorEvent, ALREADY_RUNNING,
};

#[derive(Parser)]
#[command(
    name = "cmd-supervisor",
    about = "Run a shell command with streamed output, progress and job control",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to .cmd-supervisor.toml or the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, streaming its output and lifecycle events.
    Run {
        /// Command to run. Several words are shell-escaped and joined.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Do not echo the command or its exit status.
        #[arg(short, long)]
        quiet: bool,
        /// Use the coarse progress interval.
        #[arg(long)]
        slowtick: bool,
        /// Estimated duration in ticks, reported with each progress tick.
        #[arg(short, long, default_value_t = 10)]
        estimate: u64,
        /// Named pipe to accept messages from other processes.
        #[arg(long)]
        fifo: Option<PathBuf>,
        /// Print events as JSON lines instead of rendered output.
        #[arg(long)]
        json: bool,
    },
    /// Run a command quietly and print only its trimmed standard output.
    Capture {
        /// Command to run. Several words are shell-escaped and joined.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Estimated duration in ticks.
        #[arg(short, long, default_value_t = 10)]
        estimate: u64,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>, verbosity: u8) -> Result<SupervisorConfig, ExitCode> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(mut config) => {
            config.debug_level = config.debug_level.max(verbosity);
            Ok(config)
        }
        Err(e) => {
            display::print_error(&e.to_string());
            Err(ExitCode::from(2))
        }
    }
}

/// Map a run result to a process exit code.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run_command(
    config: SupervisorConfig,
    command: &str,
    options: RunOptions,
    estimate: u64,
    json: bool,
) -> ExitCode {
    let fifo = config.fifo.clone();
    let supervisor = ProcessSupervisor::new(config);

    if let Some(path) = fifo {
        if !supervisor.connect_fifo(&path) {
            display::print_error(&format!("Could not open fifo {}", path.display()));
        }
    }

    let mut events = supervisor.subscribe();
    let quiet = options.quiet;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SupervisorEvent::Started { .. } | SupervisorEvent::Finished { .. })
                    if quiet && !json => {}
                Ok(event) => display::print_event(&event, json),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !options.quiet && !json {
        display::print_command(command);
    }

    let result = {
        let run = supervisor.run(command, options, estimate);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping command");
                if !supervisor.shutdown().await {
                    display::print_error("Command did not stop");
                }
                run.await
            }
        }
    };

    // Dropping the supervisor closes the event channel and ends the printer.
    drop(supervisor);
    let _ = printer.await;

    match result {
        Ok(ALREADY_RUNNING) => ExitCode::FAILURE,
        Ok(code) => exit_code(code),
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::from(127)
        }
    }
}

async fn capture_command(config: SupervisorConfig, command: &str, estimate: u64) -> ExitCode {
    let supervisor = ProcessSupervisor::new(config);
    match supervisor
        .get_output_of(command, RunOptions::new().quiet(), estimate)
        .await
    {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            supervisor.exit_code().map_or(ExitCode::FAILURE, exit_code)
        }
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::from(127)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match load_config(cli.config, cli.verbose) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Run {
            command,
            quiet,
            slowtick,
            estimate,
            fifo,
            json,
        } => {
            if fifo.is_some() {
                config.fifo = fifo;
            }
            let options = RunOptions { quiet, slow_tick: slowtick };
            let command = join_command(&command);
            tracing::debug!(command = %command, ?options, "Starting supervised run");
            run_command(config, &command, options, estimate, json).await
        }
        Commands::Capture { command, estimate } => {
            let command = join_command(&command);
            capture_command(config, &command, estimate).await
        }
    }
}
