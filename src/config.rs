use crate::{
    guard::{PathGuard, Receipts, Uploads},
    security::{Secret, TokenGate},
    store::Seed,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the token signing secret. Required.
pub const SECRET_ENV: &str = "JWT_SECRET";
pub const UPLOADS_DIR_ENV: &str = "UPLOADS_DIR";
pub const RECEIPTS_DIR_ENV: &str = "RECEIPTS_DIR";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub payments: Payments,
    #[serde(default)]
    pub seed: Seed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
    pub api_base_url: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_receipts_dir")]
    pub receipts_dir: PathBuf,
}
fn default_uploads_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_receipts_dir() -> PathBuf { PathBuf::from("uploads/invoices") }

impl Default for Storage {
    fn default() -> Self {
        Self { uploads_dir: default_uploads_dir(), receipts_dir: default_receipts_dir() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    #[serde(default = "default_max_upload_kb")]
    pub max_upload_kb: usize,
}
fn default_max_upload_kb() -> usize { 5 * 1024 }

impl Default for Limits {
    fn default() -> Self {
        Self { max_upload_kb: default_max_upload_kb() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Payments {
    #[serde(default = "default_endpoint_template")]
    pub endpoint_template: String,
    #[serde(default = "default_payment_timeout_s")]
    pub timeout_s: u64,
}
fn default_endpoint_template() -> String { "http://{brand}/payments".to_string() }
fn default_payment_timeout_s() -> u64 { 10 }

impl Default for Payments {
    fn default() -> Self {
        Self { endpoint_template: default_endpoint_template(), timeout_s: default_payment_timeout_s() }
    }
}

/// Process-wide security settings, built once at startup and shared read-only.
#[derive(Debug)]
pub struct Settings {
    pub tokens: TokenGate,
    pub uploads: PathGuard<Uploads>,
    pub receipts: PathGuard<Receipts>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    /// Directory overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(UPLOADS_DIR_ENV) {
            self.storage.uploads_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(RECEIPTS_DIR_ENV) {
            self.storage.receipts_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.api_base_url.trim().is_empty() { anyhow::bail!("api_base_url must not be empty"); }
        if self.limits.max_upload_kb == 0 { anyhow::bail!("max_upload_kb must be > 0"); }
        if self.payments.timeout_s == 0 { anyhow::bail!("payments timeout_s must be > 0"); }
        if !self.payments.endpoint_template.contains("{brand}") {
            anyhow::bail!("payments endpoint_template must contain {{brand}}");
        }
        if self.storage.uploads_dir.as_os_str().is_empty() || self.storage.receipts_dir.as_os_str().is_empty() {
            anyhow::bail!("storage directories must not be empty");
        }
        Ok(())
    }

    /// Reads the signing secret from the environment; a missing secret is fatal.
    pub fn secret_from_env() -> anyhow::Result<Secret> {
        Self::secret_from(std::env::var(SECRET_ENV).ok())
    }

    fn secret_from(raw: Option<String>) -> anyhow::Result<Secret> {
        let raw = raw.ok_or_else(|| anyhow::anyhow!("{SECRET_ENV} must be set"))?;
        Secret::new(raw)
    }

    pub fn settings(&self, secret: &Secret) -> anyhow::Result<Settings> {
        let uploads = PathGuard::<Uploads>::new(&self.storage.uploads_dir)?;
        let receipts = PathGuard::<Receipts>::new(&self.storage.receipts_dir)?;
        if uploads.root() == receipts.root() {
            anyhow::bail!("uploads_dir and receipts_dir must be distinct directories");
        }
        Ok(Settings { tokens: TokenGate::new(secret), uploads, receipts })
    }
}
