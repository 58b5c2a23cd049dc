//! Configuration management for the bustrack server
//!
//! Settings are layered: `conf/application.yml` (optional), then environment
//! variables (`BUSTRACK__SECTION__KEY`), then command line flags.

use std::sync::Arc;
use std::time::Duration;

use bustrack_auth::{AuthGate, DisabledAuthGate, JwtAuthGate};
use bustrack_common::{Bus, TrackerError};
use bustrack_core::{HubConfig, SimulatedFleet, SimulatedRoute};
use bustrack_persistence::mirror::DEFAULT_MIRROR_COLLECTION;
use bustrack_persistence::{
    HttpDocumentMirror, LocationStore, MemoryLocationStore, MirrorStore, NoopMirror,
    SqlLocationStore, StorageMode,
};
use clap::Parser;
use config::{Config, Environment};
use serde::Deserialize;
use tracing::{info, warn};

use super::constants::*;
use crate::startup::LoggingConfig;

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "bustrack-server", version)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

/// Bus record seeded into the in-memory store
#[derive(Clone, Debug, Deserialize)]
struct SeedBus {
    id: i64,
    username: String,
    #[serde(default)]
    plate_number: String,
    #[serde(default)]
    route: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

impl From<SeedBus> for Bus {
    fn from(seed: SeedBus) -> Self {
        Bus {
            id: seed.id,
            username: seed.username,
            plate_number: seed.plate_number,
            route: seed.route,
            active: seed.active,
        }
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );

        if let Some(v) = args.database_url {
            config_builder = config_builder.set_override(DB_URL, v)?;
        }
        if let Some(v) = args.port {
            config_builder = config_builder.set_override(SERVER_PORT, i64::from(v))?;
        }

        Ok(Self::from_config(config_builder.build()?))
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS)
            .unwrap_or(DEFAULT_SERVER_ADDRESS.to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int(SERVER_PORT)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(
            self.config
                .get_int(SHUTDOWN_TIMEOUT_SECS)
                .map(|v| v.max(0) as u64)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        )
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    /// Logging settings; environment variables take precedence over the file
    pub fn logging_config(&self) -> LoggingConfig {
        let env = LoggingConfig::from_env();

        let log_dir = std::env::var("BUSTRACK_LOG_DIR")
            .ok()
            .or_else(|| self.config.get_string(LOGGING_DIR).ok());
        let level = std::env::var("BUSTRACK_LOG_LEVEL")
            .ok()
            .or_else(|| self.config.get_string(LOGGING_LEVEL).ok())
            .unwrap_or_else(|| env.console_level.to_string());
        let console_output = self
            .config
            .get_bool(LOGGING_CONSOLE)
            .unwrap_or(env.console_output);
        let file_logging = self.config.get_bool(LOGGING_FILE).unwrap_or(env.file_logging);

        LoggingConfig::from_config(log_dir, console_output, file_logging, level)
    }

    // ========================================================================
    // Persistence Configuration
    // ========================================================================

    pub fn persistence_mode(&self) -> anyhow::Result<StorageMode> {
        let mode = self
            .config
            .get_string(PERSISTENCE_MODE)
            .unwrap_or(StorageMode::ExternalDb.to_string());

        mode.parse::<StorageMode>()
            .map_err(|e| TrackerError::ConfigError(e).into())
    }

    pub fn db_max_connections(&self) -> u32 {
        self.config
            .get_int(DB_MAX_CONNECTIONS)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.config
                .get_int(DB_CONNECT_TIMEOUT_SECS)
                .map(|v| v.max(1) as u64)
                .unwrap_or(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Bus records for the in-memory store
    pub fn memory_seed_buses(&self) -> anyhow::Result<Vec<Bus>> {
        match self.config.get::<Vec<SeedBus>>(PERSISTENCE_MEMORY_BUSES) {
            Ok(seeds) => Ok(seeds.into_iter().map(Bus::from).collect()),
            Err(config::ConfigError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(TrackerError::ConfigError(format!(
                "invalid {}: {}",
                PERSISTENCE_MEMORY_BUSES, e
            ))
            .into()),
        }
    }

    pub async fn location_store(&self) -> anyhow::Result<Arc<dyn LocationStore>> {
        match self.persistence_mode()? {
            StorageMode::ExternalDb => {
                let url = self.config.get_string(DB_URL).map_err(|_| {
                    TrackerError::ConfigError(format!(
                        "{} is required when {} is external_db",
                        DB_URL, PERSISTENCE_MODE
                    ))
                })?;

                let max_connections = self.db_max_connections();
                let connect_timeout = self.db_connect_timeout();
                let store =
                    SqlLocationStore::connect(&url, max_connections, connect_timeout).await?;

                info!(
                    max_connections,
                    connect_timeout_secs = connect_timeout.as_secs(),
                    "Database connection pool configured"
                );
                Ok(Arc::new(store))
            }
            StorageMode::Memory => {
                let buses = self.memory_seed_buses()?;
                info!(buses = buses.len(), "Using in-memory location store");
                Ok(Arc::new(MemoryLocationStore::with_buses(buses)))
            }
        }
    }

    // ========================================================================
    // Mirror Configuration
    // ========================================================================

    pub fn mirror_enabled(&self) -> bool {
        self.config.get_bool(MIRROR_ENABLED).unwrap_or(false)
    }

    pub fn mirror_endpoint(&self) -> Option<String> {
        self.config
            .get_string(MIRROR_ENDPOINT)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn mirror_collection(&self) -> String {
        self.config
            .get_string(MIRROR_COLLECTION)
            .unwrap_or(DEFAULT_MIRROR_COLLECTION.to_string())
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_millis(
            self.config
                .get_int(MIRROR_TIMEOUT_MS)
                .map(|v| v.max(1) as u64)
                .unwrap_or(DEFAULT_MIRROR_TIMEOUT_MS),
        )
    }

    pub fn mirror_store(&self) -> anyhow::Result<Arc<dyn MirrorStore>> {
        if !self.mirror_enabled() {
            return Ok(Arc::new(NoopMirror));
        }

        let endpoint = self.mirror_endpoint().ok_or_else(|| {
            TrackerError::ConfigError(format!(
                "{} is required when {} is true",
                MIRROR_ENDPOINT, MIRROR_ENABLED
            ))
        })?;
        let collection = self.mirror_collection();
        let mirror = HttpDocumentMirror::new(&endpoint, &collection, self.mirror_timeout())?;

        info!(url = mirror.collection_url(), "Mirror store enabled");
        Ok(Arc::new(mirror))
    }

    // ========================================================================
    // Auth Configuration
    // ========================================================================

    pub fn auth_enabled(&self) -> bool {
        self.config.get_bool(AUTH_ENABLED).unwrap_or(true)
    }

    pub fn auth_gate(&self) -> anyhow::Result<Arc<dyn AuthGate>> {
        if !self.auth_enabled() {
            warn!("Producer authentication is disabled");
            return Ok(Arc::new(DisabledAuthGate));
        }

        let secret = self.config.get_string(AUTH_SECRET_KEY).unwrap_or_default();
        Ok(Arc::new(JwtAuthGate::new(&secret)?))
    }

    // ========================================================================
    // Hub Configuration
    // ========================================================================

    pub fn hub_config(&self) -> HubConfig {
        let defaults = HubConfig::default();

        HubConfig {
            consumer_cadence: self
                .positive_int(HUB_CONSUMER_CADENCE_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_cadence),
            producer_idle_timeout: self
                .positive_int(HUB_PRODUCER_IDLE_TIMEOUT_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults.producer_idle_timeout),
            outbound_buffer: self
                .positive_int(HUB_OUTBOUND_BUFFER)
                .map(|v| v as usize)
                .unwrap_or(defaults.outbound_buffer),
            mirror_queue_capacity: self
                .positive_int(HUB_MIRROR_QUEUE_CAPACITY)
                .map(|v| v as usize)
                .unwrap_or(defaults.mirror_queue_capacity),
            bus_refresh_interval: self
                .positive_int(HUB_BUS_REFRESH_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults.bus_refresh_interval),
        }
    }

    pub fn hub_experimental(&self) -> bool {
        self.config.get_bool(HUB_EXPERIMENTAL).unwrap_or(false)
    }

    pub fn hub_warm_cache(&self) -> bool {
        self.config.get_bool(HUB_WARM_CACHE).unwrap_or(true)
    }

    pub fn simulation_routes(&self) -> anyhow::Result<Vec<SimulatedRoute>> {
        match self.config.get::<Vec<SimulatedRoute>>(HUB_SIMULATION_ROUTES) {
            Ok(routes) => Ok(routes),
            Err(config::ConfigError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(TrackerError::ConfigError(format!(
                "invalid {}: {}",
                HUB_SIMULATION_ROUTES, e
            ))
            .into()),
        }
    }

    /// Simulated fleet for experimental streams, if any routes are configured
    pub fn simulated_fleet(&self) -> anyhow::Result<Option<SimulatedFleet>> {
        let routes = self.simulation_routes()?;
        if routes.is_empty() {
            return Ok(None);
        }

        let fleet = SimulatedFleet::new(routes)?;
        info!(buses = fleet.len(), "Simulated fleet configured");
        Ok(Some(fleet))
    }

    fn positive_int(&self, key: &str) -> Option<u64> {
        self.config
            .get_int(key)
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u64)
    }
}
