mod config_commands;
mod db_commands;
mod sessions_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    switchboard_config::SwitchboardConfig,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard: conversation routing gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and the user config dir).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "SWITCHBOARD_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Channel session management against a running gateway.
    Sessions {
        #[command(subcommand)]
        action: sessions_commands::SessionAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Effective settings after applying CLI overrides on top of the config file.
pub struct Resolved {
    pub config: SwitchboardConfig,
    /// File the config was read from, if any.
    pub config_path: Option<PathBuf>,
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Resolved {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(switchboard_config::loader::find_config_file);
        let config = match cli.config {
            Some(ref path) => switchboard_config::load_config(path)?,
            None => switchboard_config::discover_and_load(),
        };
        Ok(Self {
            config_path,
            bind: cli.bind.clone().unwrap_or_else(|| config.server.bind.clone()),
            port: cli.port.unwrap_or(config.server.port),
            data_dir: cli
                .data_dir
                .clone()
                .unwrap_or_else(switchboard_config::data_dir),
            config,
        })
    }

    pub fn database_url(&self) -> String {
        self.config
            .database
            .url
            .clone()
            .unwrap_or_else(|| switchboard_gateway::default_database_url(&self.data_dir))
    }

    pub fn gateway_url(&self) -> String {
        let host = match self.bind.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{host}:{}", self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let resolved = Resolved::from_cli(&cli)?;

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");
            let report = switchboard_config::validate(&resolved.config);
            for diagnostic in &report.diagnostics {
                warn!(path = diagnostic.path, severity = %diagnostic.severity, "{}", diagnostic.message);
            }
            if report.has_errors() {
                anyhow::bail!("configuration has errors; run `switchboard config check`");
            }
            switchboard_gateway::start_gateway(
                resolved.config,
                &resolved.bind,
                resolved.port,
                resolved.data_dir,
            )
            .await
        },
        Some(Commands::Sessions { action }) => {
            sessions_commands::handle_sessions(action, &resolved.gateway_url()).await
        },
        Some(Commands::Db { action }) => db_commands::handle_db(action, &resolved).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action, &resolved),
    }
}
