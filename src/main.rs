//! Adaptive Poller CLI
//!
//! Runs a shell command on an adaptive interval and prints its output.

use std::future::Future;
use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use adaptive_poller::{fetch_fn, AdaptivePoller, CallbackObserver, FetchFailure, PollerConfig};

const USAGE: &str = "Usage: adaptive-poller [--config <path>] [--] <command> [args...]";

struct Args {
    config: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args(raw: &[String]) -> Option<Args> {
    let mut config = None;
    let mut rest = raw;

    while let Some(first) = rest.first() {
        match first.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(rest.get(1)?));
                rest = &rest[2..];
            }
            "--" => {
                rest = &rest[1..];
                break;
            }
            _ => break,
        }
    }

    if rest.is_empty() {
        return None;
    }
    Some(Args {
        config,
        command: rest.to_vec(),
    })
}

async fn run_command(command: &[String]) -> Result<String, FetchFailure> {
    let output = Command::new(&command[0])
        .args(&command[1..])
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FetchFailure::new(format!(
            "{} exited with {}: {}",
            command[0],
            output.status,
            stderr.trim()
        )))
    }
}

/// Applies stdin commands to the poller until quit, Ctrl-C, or end of input.
async fn control<T, R>(
    poller: &AdaptivePoller<T>,
    input: R,
    interrupt: impl Future<Output = std::io::Result<()>>,
) where
    T: Send + 'static,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    tokio::pin!(interrupt);
    let mut interrupt_armed = true;
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = &mut interrupt, if interrupt_armed => match signal {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C; use 'quit' to exit");
                    interrupt_armed = false;
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "hide" => poller.set_visible(false),
                    "show" => poller.set_visible(true),
                    "now" => {
                        if !poller.poll_now() {
                            eprintln!("poll skipped: fetch in flight or poller paused");
                        }
                    }
                    "status" => match serde_json::to_string_pretty(&poller.status()) {
                        Ok(json) => println!("{}", json),
                        Err(e) => eprintln!("failed to render status: {}", e),
                    },
                    "quit" | "exit" => break,
                    "" => {}
                    other => eprintln!("unknown command '{}'", other),
                },
                // Stdin closed; keep polling until interrupted.
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read stdin");
                    break;
                }
            },
            else => {
                tracing::warn!("no Ctrl-C listener and stdin closed; shutting down");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&raw) else {
        eprintln!("{}", USAGE);
        eprintln!("\nPolls <command>, backing off when it exits non-zero.");
        eprintln!("\nStdin commands: hide, show, now, status, quit");
        eprintln!("\nEnvironment variables:");
        eprintln!("  POLLER_BASE_INTERVAL_MS        Base interval (default: 60000)");
        eprintln!("  POLLER_MAX_BACKOFF_MULTIPLIER  Backoff ceiling (default: 8)");
        eprintln!("  POLLER_FETCH_TIMEOUT_MS        Per-run deadline (default: none)");
        std::process::exit(2);
    };

    let config = match args.config {
        Some(path) => PollerConfig::load(&path),
        None => Ok(PollerConfig::default()),
    }
    .and_then(PollerConfig::apply_env);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let command = args.command;
    let source = fetch_fn(move || {
        let command = command.clone();
        async move { run_command(&command).await }
    });
    let observer = CallbackObserver::new(
        |output: String| println!("{}", output),
        |error: &FetchFailure| eprintln!("poll failed: {}", error),
    );

    let poller = match AdaptivePoller::new(config, source, observer) {
        Ok(poller) => poller,
        Err(e) => {
            eprintln!("Failed to start poller: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(poller = %poller.id(), "polling every {:?}", poller.effective_interval());
    poller.start();

    control(
        &poller,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await;

    poller.stop();
    let status = poller.status();
    tracing::info!(
        cycles = status.cycles_completed,
        failures = status.failures,
        "poller shut down"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_command_without_flags() {
        let args = parse_args(&strings(&["curl", "-s", "http://localhost"])).unwrap();
        assert!(args.config.is_none());
        assert_eq!(args.command, strings(&["curl", "-s", "http://localhost"]));
    }

    #[test]
    fn parses_config_and_separator() {
        let args =
            parse_args(&strings(&["--config", "poller.toml", "--", "--weird-cmd"])).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("poller.toml")));
        assert_eq!(args.command, strings(&["--weird-cmd"]));
    }

    #[test]
    fn rejects_missing_command() {
        assert!(parse_args(&strings(&[])).is_none());
        assert!(parse_args(&strings(&["--config", "poller.toml"])).is_none());
        assert!(parse_args(&strings(&["--config"])).is_none());
    }

    #[tokio::test]
    async fn successful_command_yields_stdout() {
        let output = run_command(&strings(&["echo", "healthy"])).await.unwrap();
        assert_eq!(output, "healthy");
    }

    #[tokio::test]
    async fn failing_command_is_fetch_failure() {
        let err = run_command(&strings(&["false"])).await.unwrap_err();
        assert!(err.message().starts_with("false exited with"));
    }

    fn quiet_poller() -> AdaptivePoller<u32> {
        let source = fetch_fn(|| async { Ok::<u32, FetchFailure>(0) });
        let observer = CallbackObserver::new(|_: u32| {}, |_: &FetchFailure| {});
        AdaptivePoller::new(PollerConfig::default(), source, observer).unwrap()
    }

    #[tokio::test]
    async fn stdin_commands_still_apply_when_ctrl_c_is_unavailable() {
        let poller = quiet_poller();
        poller.start();

        let interrupt = async { Err(std::io::Error::other("signal driver unavailable")) };
        control(&poller, "hide\nstatus\n".as_bytes(), interrupt).await;

        assert!(poller.is_running());
        assert!(!poller.is_visible());
    }

    #[tokio::test]
    async fn closed_stdin_waits_for_interrupt() {
        let poller = quiet_poller();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let interrupt = async move {
            let _ = rx.await;
            Ok(())
        };

        let handle = async {
            control(&poller, "".as_bytes(), interrupt).await;
        };
        tokio::pin!(handle);

        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), &mut handle)
            .await
            .is_err());
        tx.send(()).unwrap();
        handle.await;
    }

    #[tokio::test]
    async fn quit_ends_control_loop() {
        let poller = quiet_poller();
        let interrupt = std::future::pending::<std::io::Result<()>>();
        control(&poller, "show\nquit\nhide\n".as_bytes(), interrupt).await;
        assert!(poller.is_visible());
    }
}
