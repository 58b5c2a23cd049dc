//! Configuration keys and defaults for the bustrack server

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const ENV_PREFIX: &str = "BUSTRACK";
pub const ENV_SEPARATOR: &str = "__";

// Server
pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const SHUTDOWN_TIMEOUT_SECS: &str = "server.shutdown_timeout_secs";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

// Persistence
pub const PERSISTENCE_MODE: &str = "persistence.mode";
pub const PERSISTENCE_MEMORY_BUSES: &str = "persistence.memory.buses";
pub const DB_URL: &str = "db.url";
pub const DB_MAX_CONNECTIONS: &str = "db.max_connections";
pub const DB_CONNECT_TIMEOUT_SECS: &str = "db.connect_timeout_secs";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

// Mirror
pub const MIRROR_ENABLED: &str = "mirror.enabled";
pub const MIRROR_ENDPOINT: &str = "mirror.endpoint";
pub const MIRROR_COLLECTION: &str = "mirror.collection";
pub const MIRROR_TIMEOUT_MS: &str = "mirror.timeout_ms";
pub const DEFAULT_MIRROR_TIMEOUT_MS: u64 = 3000;

// Auth
pub const AUTH_ENABLED: &str = "auth.enabled";
pub const AUTH_SECRET_KEY: &str = "auth.secret_key";

// Hub
pub const HUB_CONSUMER_CADENCE_MS: &str = "hub.consumer_cadence_ms";
pub const HUB_PRODUCER_IDLE_TIMEOUT_SECS: &str = "hub.producer_idle_timeout_secs";
pub const HUB_OUTBOUND_BUFFER: &str = "hub.outbound_buffer";
pub const HUB_MIRROR_QUEUE_CAPACITY: &str = "hub.mirror_queue_capacity";
pub const HUB_BUS_REFRESH_SECS: &str = "hub.bus_refresh_secs";
pub const HUB_EXPERIMENTAL: &str = "hub.experimental";
pub const HUB_WARM_CACHE: &str = "hub.warm_cache";
pub const HUB_SIMULATION_ROUTES: &str = "hub.simulation.routes";

// Logging
pub const LOGGING_DIR: &str = "logging.dir";
pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_CONSOLE: &str = "logging.console";
pub const LOGGING_FILE: &str = "logging.file";
