//! Service configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// `PostgreSQL` connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10).
    pub database_max_connections: u32,

    /// Root directory for uploaded and generated images (default: "uploads").
    pub uploads_dir: PathBuf,

    /// Prefix for public file URLs, e.g. `https://lab.example.com`.
    /// Empty means URLs are root-relative (`/uploads/...`).
    pub public_base_url: String,

    /// HS256 secret for user JWTs.
    pub jwt_secret: Option<String>,

    /// Expected JWT audience (default: "image-lab").
    pub auth_audience: String,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// OpenAI API key (optional).
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (default: `<https://api.openai.com>`).
    pub openai_base_url: String,

    /// Model used for image edits (default: "gpt-image-1").
    pub openai_image_model: String,

    /// Model used for prompt enhancement (default: "gpt-4o-mini").
    pub openai_chat_model: String,

    /// Timeout for OpenAI requests in seconds (default: 120).
    pub openai_timeout_seconds: u64,

    /// Product-enhancement webhook URL (optional).
    pub product_webhook_url: Option<String>,

    /// Timeout for the product webhook in seconds (default: 15).
    pub webhook_timeout_seconds: u64,

    /// Shared secret for payment webhook signatures (optional).
    pub payment_webhook_secret: Option<String>,

    /// Whether clients may request test mode (default: false).
    pub test_mode_allowed: bool,

    /// Whether fallback-simulated results are charged (default: false).
    pub charge_simulated: bool,

    /// Credit cost of a free-text prompt transformation (default: 1).
    pub custom_prompt_cost: i64,

    /// Days a transformation or upload is kept (default: 60).
    pub retention_days: i64,

    /// Hours an unreferenced file is kept (default: 24).
    pub orphan_grace_hours: i64,

    /// Seconds between retention sweeps (default: 3600).
    pub sweep_interval_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum upload size in bytes. Request bodies may exceed it by the
    /// multipart framing overhead.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// OpenAI secrets file structure.
#[derive(Debug, Deserialize)]
struct OpenAiSecrets {
    api_key: String,
    #[serde(default)]
    base_url: Option<String>,
}

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (openai_api_key, openai_base_url) = load_openai_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            uploads_dir: std::env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            openai_api_key,
            openai_base_url: openai_base_url.unwrap_or(defaults.openai_base_url),
            openai_image_model: std::env::var("OPENAI_IMAGE_MODEL")
                .unwrap_or(defaults.openai_image_model),
            openai_chat_model: std::env::var("OPENAI_CHAT_MODEL")
                .unwrap_or(defaults.openai_chat_model),
            openai_timeout_seconds: env_parse(
                "OPENAI_TIMEOUT_SECONDS",
                defaults.openai_timeout_seconds,
            ),
            product_webhook_url: std::env::var("PRODUCT_WEBHOOK_URL").ok(),
            webhook_timeout_seconds: env_parse(
                "WEBHOOK_TIMEOUT_SECONDS",
                defaults.webhook_timeout_seconds,
            ),
            payment_webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            test_mode_allowed: env_flag("TEST_MODE_ALLOWED", defaults.test_mode_allowed),
            charge_simulated: env_flag("CHARGE_SIMULATED", defaults.charge_simulated),
            custom_prompt_cost: env_parse("CUSTOM_PROMPT_COST", defaults.custom_prompt_cost)
                .max(0),
            retention_days: env_parse("RETENTION_DAYS", defaults.retention_days),
            orphan_grace_hours: env_parse("ORPHAN_GRACE_HOURS", defaults.orphan_grace_hours),
            sweep_interval_seconds: env_parse(
                "SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            ),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// Whether an OpenAI key is configured.
    #[must_use]
    pub fn has_openai(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Load OpenAI credentials from file or environment.
fn load_openai_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/openai.json",
        "image-lab/.secrets/openai.json",
        "../.secrets/openai.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<OpenAiSecrets>(path) {
            tracing::info!(path = %path, "Loaded OpenAI secrets from file");
            let base_url = secrets
                .base_url
                .or_else(|| std::env::var("OPENAI_BASE_URL").ok());
            return (Some(secrets.api_key), base_url);
        }
    }

    tracing::debug!("OpenAI secrets file not found, using environment variables");
    (
        std::env::var("OPENAI_API_KEY").ok(),
        std::env::var("OPENAI_BASE_URL").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            uploads_dir: PathBuf::from("uploads"),
            public_base_url: String::new(),
            jwt_secret: None,
            auth_audience: "image-lab".into(),
            admin_api_key: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
            openai_image_model: "gpt-image-1".into(),
            openai_chat_model: "gpt-4o-mini".into(),
            openai_timeout_seconds: 120,
            product_webhook_url: None,
            webhook_timeout_seconds: 15,
            payment_webhook_secret: None,
            test_mode_allowed: false,
            charge_simulated: false,
            custom_prompt_cost: 1,
            retention_days: 60,
            orphan_grace_hours: 24,
            sweep_interval_seconds: 3600,
            cors_origins: vec!["*".into()],
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_seconds: 180,
        }
    }
}
