//! Settings for `ledgerctl`, read from `ledger.toml` (optional) and
//! `LEDGER__*` environment variables.
//!
//! ```toml
//! [app]
//! level = "info"
//!
//! [database]
//! sqlite = "./ledger.db"   # or: database = "memory"
//!
//! [invoices]
//! network = "bc"
//! default_expiry_secs = 86400
//! transport_endpoints = ["rpcs://proxy.example/json-rpc"]
//! ```
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

impl Default for Database {
    fn default() -> Self {
        Self::Sqlite("./ledger.db".to_string())
    }
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Self::Memory => String::from("sqlite::memory:"),
            Self::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Invoices {
    /// Bitcoin network the invoice codec binds to.
    pub network: String,
    pub default_expiry_secs: u64,
    pub transport_endpoints: Vec<String>,
}

impl Default for Invoices {
    fn default() -> Self {
        Self {
            network: "bc".to_string(),
            default_expiry_secs: ledger::DEFAULT_INVOICE_EXPIRY_SECS,
            transport_endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub invoices: Invoices,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(path.is_some()))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("invoices.transport_endpoints")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
