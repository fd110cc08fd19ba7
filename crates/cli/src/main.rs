//! Procline CLI - run a program and stream its output line by line

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};

use procline_core::domain::{CommandSpec, ProcessState};
use procline_core::port::ProcessProbe;
use procline_infra_system::{StandardInput, StreamingProcess, SysinfoProcessProbe};

use logging::{init_logging, LogFormat};

/// Exit status reported when `--timeout-ms` elapses (same as coreutils `timeout`)
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser)]
#[command(name = "procline")]
#[command(about = "Run a program and stream its output line by line", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, env = "PROCLINE_LOG_FORMAT", value_enum, default_value = "pretty", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program, printing stdout as-is and stderr in red
    Run {
        /// Working directory for the program
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Environment variable for the program (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        envs: Vec<(String, String)>,

        /// Line written to the program's stdin before it is closed (repeatable)
        #[arg(long)]
        input: Vec<String>,

        /// Forward this process's stdin to the program instead of closing it
        #[arg(long, conflicts_with = "input")]
        forward_stdin: bool,

        /// Kill the program if it has not exited after this many milliseconds
        #[arg(long, env = "PROCLINE_TIMEOUT_MS")]
        timeout_ms: Option<u32>,

        /// Print a state snapshot after the program starts
        #[arg(long)]
        state: bool,

        /// Print the snapshot as JSON
        #[arg(long, requires = "state")]
        json: bool,

        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show a state snapshot of any running process
    State {
        /// Process ID
        pid: u32,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn state_rows(state: &ProcessState) -> Vec<StateRow> {
    let parent = state
        .parent_pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());

    vec![
        StateRow { field: "PID", value: state.pid.to_string() },
        StateRow { field: "Parent", value: parent },
        StateRow { field: "Name", value: state.name.clone() },
        StateRow { field: "Status", value: state.status.clone() },
        StateRow { field: "Memory", value: format!("{} MB", state.memory_mb()) },
        StateRow {
            field: "Virtual Memory",
            value: format!("{} MB", state.virtual_memory_bytes / 1024 / 1024),
        },
        StateRow { field: "CPU", value: format!("{:.1}%", state.cpu_usage_percent) },
        StateRow { field: "Run Time", value: format!("{}s", state.run_time_secs) },
        StateRow { field: "Captured", value: state.captured_at.to_rfc3339() },
    ]
}

fn print_state(state: &ProcessState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else {
        println!("{}", "Process State".cyan().bold());
        println!("{}", Table::new(state_rows(state)));
    }
    Ok(())
}

/// Copy our stdin into the child line by line, closing it at EOF
async fn forward_stdin(input: StandardInput) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = input.write_line(&line).await {
                    warn!(error = %e, "Child stopped accepting input");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    if let Err(e) = input.close().await {
        warn!(error = %e, "Failed to close child stdin");
    }
}

enum Outcome {
    Exited(i32),
    TimedOut,
    Interrupted,
}

struct RunOptions {
    spec: CommandSpec,
    input: Vec<String>,
    forward_stdin: bool,
    timeout_ms: Option<u32>,
    state: bool,
    json: bool,
}

async fn run(options: RunOptions) -> Result<i32> {
    let process = StreamingProcess::new(options.spec).context("Invalid command")?;

    let _stdout = process.on_output_line(|line| {
        if let Some(line) = line {
            println!("{}", line);
        }
    });
    let _stderr = process.on_error_line(|line| {
        if let Some(line) = line {
            eprintln!("{} {}", "[stderr]".red(), line.red());
        }
    });

    // Fires after the last output line has been printed
    let output_done = Arc::new(Notify::new());
    let _exit = process.on_exited({
        let output_done = output_done.clone();
        move |_| output_done.notify_one()
    });

    process.start().await.context("Failed to start program")?;
    info!(pid = ?process.pid(), "Program running");

    let input = process.standard_input()?;
    if options.forward_stdin {
        tokio::spawn(forward_stdin(input));
    } else {
        for line in &options.input {
            input.write_line(line).await.context("Failed to write stdin")?;
        }
        input.close().await.context("Failed to close stdin")?;
    }

    if options.state {
        match process.current_state().await {
            Ok(state) => print_state(&state, options.json)?,
            Err(e) => warn!(error = %e, "State snapshot unavailable"),
        }
    }

    let waited = async {
        match options.timeout_ms {
            Some(ms) => process.wait_for_exit_millis(ms).await.map(|wait| match wait.code() {
                Some(code) => Outcome::Exited(code),
                None => Outcome::TimedOut,
            }),
            None => process.wait_for_exit().await.map(Outcome::Exited),
        }
    };

    let outcome = tokio::select! {
        result = waited => result?,
        _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    };

    let code = match outcome {
        Outcome::Exited(code) => code,
        Outcome::TimedOut => {
            process.kill().await.context("Failed to kill program")?;
            process.wait_for_exit().await?;
            eprintln!("{}", "Timed out; program killed".yellow());
            TIMEOUT_EXIT_CODE
        }
        Outcome::Interrupted => {
            info!("Interrupted; killing program");
            process.kill().await.context("Failed to kill program")?;
            process.wait_for_exit().await?
        }
    };

    output_done.notified().await;
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    info!("Procline v{} starting", procline_core::VERSION);

    match cli.command {
        Commands::Run {
            cwd,
            envs,
            input,
            forward_stdin,
            timeout_ms,
            state,
            json,
            command,
        } => {
            let (program, args) = command
                .split_first()
                .context("No program given")?;

            let mut spec = CommandSpec::new(program.clone())
                .args(args.iter().cloned())
                .envs(envs);
            if let Some(dir) = cwd {
                spec = spec.working_dir(dir);
            }

            let code = run(RunOptions {
                spec,
                input,
                forward_stdin,
                timeout_ms,
                state,
                json,
            })
            .await?;

            std::process::exit(code);
        }
        Commands::State { pid, json } => {
            let probe = SysinfoProcessProbe::new();
            let state = probe
                .snapshot(pid)
                .await
                .with_context(|| format!("Cannot read process {}", pid))?;
            print_state(&state, json)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("A=1").unwrap(),
            ("A".to_string(), "1".to_string())
        );
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_cli_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "procline", "run", "--timeout-ms", "500", "--env", "K=V", "--", "sh", "-c", "echo hi",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { command, timeout_ms, envs, .. } => {
                assert_eq!(command, vec!["sh", "-c", "echo hi"]);
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(envs, vec![("K".to_string(), "V".to_string())]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_state_rows_cover_snapshot() {
        let state = ProcessState {
            pid: 10,
            parent_pid: None,
            name: "sh".to_string(),
            status: "Sleeping".to_string(),
            memory_bytes: 2 * 1024 * 1024,
            virtual_memory_bytes: 0,
            cpu_usage_percent: 1.5,
            start_time_secs: 0,
            run_time_secs: 4,
            captured_at: chrono::Utc::now(),
        };
        let rows = state_rows(&state);
        assert_eq!(rows[0].value, "10");
        assert_eq!(rows[1].value, "-");
        assert_eq!(rows[4].value, "2 MB");
        assert_eq!(rows[6].value, "1.5%");
    }
}
