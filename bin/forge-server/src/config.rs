//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for forge-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:11434"`).
    pub bind_address: String,

    /// Root of `manifests/` + `blobs/` (spec §6 "Local layout").
    pub data_dir: String,

    /// SQLite (or other sqlx-compatible) database URL for request/session
    /// audit persistence. The path is resolved relative to the server
    /// process's working directory at connect time.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When `true`, serve the Swagger UI at `/swagger-ui` and the OpenAPI
    /// spec at `/api-docs/openapi.json`.
    pub enable_swagger: bool,

    /// Comma-separated list of allowed CORS origins. `None` allows all
    /// origins (`*`), suitable for development only.
    pub cors_allowed_origins: Option<String>,

    /// Optional bearer token required for `/v1/models/pull|push` and
    /// `DELETE /v1/models/{name}`. When `None`, those routes are
    /// unauthenticated.
    pub admin_api_token: Option<String>,

    /// Hard cap on concurrently loaded runners (`0` = auto, spec §4.1).
    pub max_loaded_models: Option<usize>,

    /// Default parallel sequences per runner.
    pub num_parallel: u32,

    /// Admission queue capacity (spec §4.1 "Admission").
    pub max_queue: usize,

    /// Default idle TTL applied when a request doesn't specify `keep_alive`.
    pub keep_alive: Duration,

    /// Suppresses post-pull blob pruning when `true` (spec §4.4 step 5).
    pub noprune: bool,

    /// Bytes reserved per GPU, subtracted from placement budgets.
    pub gpu_overhead: u64,

    /// Comma-separated whitelist of remote-model hosts (spec §6).
    pub remotes: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("FORGE_BIND", "0.0.0.0:11434"),
            data_dir: env_or("FORGE_DATA_DIR", "./forge-data"),
            database_url: env_or("FORGE_DATABASE_URL", "sqlite://forge.db?mode=rwc"),
            log_level: env_or("FORGE_LOG", "info"),
            log_json: bool_env("FORGE_LOG_JSON", false),
            enable_swagger: bool_env("FORGE_ENABLE_SWAGGER", true),
            cors_allowed_origins: std::env::var("FORGE_CORS_ORIGINS").ok(),
            admin_api_token: std::env::var("FORGE_ADMIN_TOKEN").ok(),
            max_loaded_models: std::env::var("FORGE_MAX_LOADED_MODELS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0),
            num_parallel: parse_env("FORGE_NUM_PARALLEL", 4u32),
            max_queue: parse_env("FORGE_MAX_QUEUE", 512usize),
            keep_alive: Duration::from_secs(parse_env("FORGE_KEEP_ALIVE", 5 * 60u64)),
            noprune: bool_env("FORGE_NOPRUNE", false),
            gpu_overhead: parse_env("FORGE_GPU_OVERHEAD", 0u64),
            remotes: std::env::var("FORGE_REMOTES").ok(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
