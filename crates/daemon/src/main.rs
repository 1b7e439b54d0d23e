//! Link Daemon
//!
//! Host-level broker that moves files between app staging directories.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use link_daemon::config::{default_config_path, Config};
use link_daemon::ipc::{self, get_socket_path, IpcClient, IpcServer, IpcTransport};
use link_daemon::orchestrator::{BrokerOrchestrator, OrchestratorEvent};
use link_daemon::plugins::{builtin_plugins, PluginPipeline};
use link_protocol::{LinkRequest, LinkType, StatusCode};

/// Link Daemon - moves files from one app's outbox to another app's inbox.
#[derive(Parser, Debug)]
#[command(name = "link-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the broker and listen for apps on the IPC socket
    Start {
        /// Socket path (overrides the configuration)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Submit one link request as an app and wait for its outcome
    Send {
        /// Identity to register as
        #[arg(long = "as", value_name = "APP_ID")]
        app_id: String,

        /// File name inside the sender's outbox
        file_name: String,

        /// Destination app identity
        destination: String,

        /// Relative subdirectory below outbox and inbox
        #[arg(long, default_value = "")]
        subdirectory: String,

        /// Link type
        #[arg(long, value_enum, default_value = "app2app")]
        link_type: LinkTypeArg,

        /// Replace an existing destination file
        #[arg(long)]
        overwrite: bool,

        /// Keep the source file after a successful transfer
        #[arg(long)]
        leave_source_file: bool,

        /// Tracking identifier (default: random UUID)
        #[arg(long)]
        tracking_id: Option<String>,

        /// Correlation identifier (default: the tracking identifier)
        #[arg(long)]
        correlation_id: Option<String>,

        /// Seconds to wait for each response
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Socket path (overrides the configuration)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Print the configuration file path instead
        #[arg(long)]
        path: bool,
    },
}

/// Link types accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTypeArg {
    Uplink,
    Downlink,
    Crosslink,
    App2app,
}

impl From<LinkTypeArg> for LinkType {
    fn from(arg: LinkTypeArg) -> Self {
        match arg {
            LinkTypeArg::Uplink => LinkType::Uplink,
            LinkTypeArg::Downlink => LinkType::Downlink,
            LinkTypeArg::Crosslink => LinkType::Crosslink,
            LinkTypeArg::App2app => LinkType::App2App,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match cli.command {
        Commands::Start { socket } => {
            let socket_path = socket
                .or_else(|| config.transport.socket_path.clone())
                .unwrap_or_else(get_socket_path);
            run_broker(config, socket_path).await?;
        }
        Commands::Send {
            app_id,
            file_name,
            destination,
            subdirectory,
            link_type,
            overwrite,
            leave_source_file,
            tracking_id,
            correlation_id,
            timeout,
            socket,
        } => {
            let socket_path = socket
                .or_else(|| config.transport.socket_path.clone())
                .unwrap_or_else(get_socket_path);

            let tracking_id = tracking_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let correlation_id = correlation_id.unwrap_or_else(|| tracking_id.clone());
            let request = LinkRequest::new(file_name, destination)
                .with_ids(tracking_id, correlation_id)
                .with_source(app_id.clone())
                .with_subdirectory(subdirectory)
                .with_link_type(link_type.into())
                .with_overwrite(overwrite)
                .with_leave_source_file(leave_source_file);

            let status = send_request(
                &socket_path,
                &app_id,
                request,
                Duration::from_secs(timeout),
            )
            .await?;
            if status != StatusCode::Successful {
                std::process::exit(1);
            }
        }
        Commands::Config { path } => {
            if path {
                let path = cli.config.unwrap_or_else(default_config_path);
                println!("{}", path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
        }
    }

    Ok(())
}

/// Run the broker until SIGINT or SIGTERM.
async fn run_broker(config: Config, socket_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Link daemon starting...");

    let pipeline = PluginPipeline::from_entries(&config.plugins, builtin_plugins());
    let transport = IpcTransport::new();
    let orchestrator = BrokerOrchestrator::new(config, pipeline, transport.clone())?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    let server = IpcServer::bind(&socket_path)
        .await
        .with_context(|| format!("Failed to bind IPC socket at {}", socket_path.display()))?;
    tracing::info!("Listening on {}", socket_path.display());

    orchestrator.start().await?;
    let accept_loop = tokio::spawn(ipc::serve(
        server,
        orchestrator.intake(),
        transport,
        orchestrator.shutdown_token(),
    ));

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;
    if let Err(e) = accept_loop.await {
        tracing::warn!("IPC accept loop ended abnormally: {}", e);
    }

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("Failed to remove socket file: {}", e);
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}

/// Submit `request` as `app_id`, print every response for it, and return the terminal status.
async fn send_request(
    socket_path: &std::path::Path,
    app_id: &str,
    request: LinkRequest,
    timeout: Duration,
) -> anyhow::Result<StatusCode> {
    let mut client = IpcClient::connect_with_timeout(socket_path, timeout)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to the broker at {}. Is it running?",
                socket_path.display()
            )
        })?;

    let registered = client.register(app_id).await?;
    tracing::debug!("Registered as {}", registered);

    let tracking_id = request.tracking_id.clone();
    client.submit(request).await?;

    loop {
        let response = client
            .next_response()
            .await
            .context("No response from the broker")?;
        if response.tracking_id() != tracking_id {
            continue;
        }

        println!("{}", response.to_json_pretty()?);
        if response.status().is_terminal() {
            return Ok(response.status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["link-daemon", "start"]).unwrap();
        match cli.command {
            Commands::Start { socket } => assert!(socket.is_none()),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_socket_and_config() {
        let cli = Cli::try_parse_from([
            "link-daemon",
            "--config",
            "/etc/link/config.toml",
            "start",
            "--socket",
            "/run/link.sock",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/link/config.toml")));
        match cli.command {
            Commands::Start { socket } => {
                assert_eq!(socket, Some(PathBuf::from("/run/link.sock")))
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_send_command_defaults() {
        let cli =
            Cli::try_parse_from(["link-daemon", "send", "--as", "appa", "a.jpg", "appb"]).unwrap();
        match cli.command {
            Commands::Send {
                app_id,
                file_name,
                destination,
                subdirectory,
                link_type,
                overwrite,
                leave_source_file,
                tracking_id,
                timeout,
                ..
            } => {
                assert_eq!(app_id, "appa");
                assert_eq!(file_name, "a.jpg");
                assert_eq!(destination, "appb");
                assert!(subdirectory.is_empty());
                assert_eq!(link_type, LinkTypeArg::App2app);
                assert!(!overwrite);
                assert!(!leave_source_file);
                assert!(tracking_id.is_none());
                assert_eq!(timeout, 30);
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_send_command_flags() {
        let cli = Cli::try_parse_from([
            "link-daemon",
            "send",
            "--as",
            "appa",
            "a.jpg",
            "appb",
            "--link-type",
            "downlink",
            "--overwrite",
            "--leave-source-file",
            "--subdirectory",
            "images",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                link_type,
                overwrite,
                leave_source_file,
                subdirectory,
                ..
            } => {
                assert_eq!(LinkType::from(link_type), LinkType::Downlink);
                assert!(overwrite);
                assert!(leave_source_file);
                assert_eq!(subdirectory, "images");
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_send_requires_app_id() {
        assert!(Cli::try_parse_from(["link-daemon", "send", "a.jpg", "appb"]).is_err());
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::try_parse_from(["link-daemon", "config", "--path"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { path: true }));
    }
}
