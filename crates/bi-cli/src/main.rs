// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use bi_config::{LauncherConfig, Platform, load_config, validate_config_for};
use bi_host::{Instance, InstanceEvent, ProcessStatus};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bi", version, about = "Browser instance launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the configured instance and wait for it to stop.
    Launch {
        /// Path to the launcher TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Stop the instance after this many seconds.
        #[arg(long)]
        stop_after: Option<u64>,

        /// Seconds to wait for the instance to stop once a stop was
        /// requested. A second Ctrl-C also stops waiting.
        #[arg(long, default_value_t = 10)]
        stop_timeout: u64,

        /// Print the final instance snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate a config file without launching anything.
    Check {
        /// Path to the launcher TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Validate as if running on this platform (defaults to the host).
        #[arg(long, value_enum)]
        platform: Option<PlatformArg>,
    },

    /// Print the JSON schema of the config file.
    Schema,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Windows,
    Macos,
    Linux,
    Other,
}

impl From<PlatformArg> for Platform {
    fn from(v: PlatformArg) -> Self {
        match v {
            PlatformArg::Windows => Platform::Windows,
            PlatformArg::Macos => Platform::MacOs,
            PlatformArg::Linux => Platform::Linux,
            PlatformArg::Other => Platform::Other,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Launch {
            config,
            stop_after,
            stop_timeout,
            json,
        } => {
            let config = read_config(&config)?;
            init_tracing(cli.debug, config.log_level.as_deref());
            let stop_timeout = Duration::from_secs(stop_timeout);
            cmd_launch(config, stop_after, stop_timeout, json).await
        }
        Commands::Check { config, platform } => {
            init_tracing(cli.debug, None);
            cmd_check(&config, platform.map(Platform::from).unwrap_or_else(Platform::current))
        }
        Commands::Schema => cmd_schema(),
    }
}

fn init_tracing(debug: bool, level: Option<&str>) {
    let filter = if debug {
        EnvFilter::new("bi=debug")
    } else {
        EnvFilter::new(format!("bi={}", level.unwrap_or("info")))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_config(path: &Path) -> Result<LauncherConfig> {
    load_config(path).with_context(|| format!("load config {}", path.display()))
}

async fn cmd_launch(
    config: LauncherConfig,
    stop_after: Option<u64>,
    stop_timeout: Duration,
    json: bool,
) -> Result<()> {
    for warning in validate_config_for(&config, Platform::current())? {
        warn!(target: "bi.config", "{warning}");
    }

    let mut instance = Instance::new(config.instance);
    let mut events = instance.events();
    instance.start()?;

    let mut forwarders = Vec::new();
    if let Some(out) = instance.take_stdout() {
        forwarders.push(forward_lines(out, Output::Stdout));
    }
    if let Some(err) = instance.take_stderr() {
        forwarders.push(forward_lines(err, Output::Stderr));
    }

    let deadline = async {
        match stop_after {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    // Armed once a stop is requested. Quit requests and image kills may
    // never end in a Stop event, so the wait for one is bounded.
    let grace = tokio::time::sleep(stop_timeout);
    tokio::pin!(grace);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            ev = events.next() => match ev {
                Some(InstanceEvent::Error(e)) => {
                    error!(target: "bi.instance", kind = %e.kind(), "{e}");
                }
                Some(InstanceEvent::Stop) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if stop_requested {
                    warn!(target: "bi.instance", "interrupted again, no longer waiting for instance");
                    break;
                }
                info!(target: "bi.instance", "interrupted, stopping instance");
                stop_requested = true;
                grace.as_mut().reset(tokio::time::Instant::now() + stop_timeout);
                if let Err(e) = instance.stop() {
                    warn!(target: "bi.instance", "{e}");
                    break;
                }
            }
            _ = &mut deadline, if !stop_requested => {
                stop_requested = true;
                grace.as_mut().reset(tokio::time::Instant::now() + stop_timeout);
                if let Err(e) = instance.stop() {
                    warn!(target: "bi.instance", "{e}");
                    break;
                }
            }
            _ = &mut grace, if stop_requested => {
                warn!(
                    target: "bi.instance",
                    timeout_secs = stop_timeout.as_secs(),
                    "instance did not stop in time, no longer waiting"
                );
                break;
            }
        }
    }

    for handle in forwarders {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    let info = instance.info();
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        let status = match &info.status {
            ProcessStatus::Exited { code: Some(code) } => format!("exited with code {code}"),
            ProcessStatus::Exited { code: None } => "exited by signal".to_string(),
            ProcessStatus::Terminated { strategy } => format!("terminated ({strategy})"),
            ProcessStatus::SpawnFailed => "failed to spawn".to_string(),
            ProcessStatus::Running { pid } | ProcessStatus::HandedOff { pid } => {
                format!("still running (pid {pid})")
            }
            ProcessStatus::NotStarted => "not started".to_string(),
        };
        println!("instance {}: {status}", info.id);
    }
    Ok(())
}

/// Relay child output line by line into the log.
fn forward_lines<R>(reader: R, output: Output) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match output {
                Output::Stdout => info!(target: "bi.instance.stdout", "{line}"),
                Output::Stderr => warn!(target: "bi.instance.stderr", "{line}"),
            }
        }
    })
}

#[derive(Debug, Clone, Copy)]
enum Output {
    Stdout,
    Stderr,
}

fn cmd_check(path: &Path, platform: Platform) -> Result<()> {
    let config = read_config(path)?;
    let warnings = validate_config_for(&config, platform)?;
    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!("config ok ({platform}, {} warning(s))", warnings.len());
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(LauncherConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
