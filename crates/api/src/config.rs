//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::ItemId;
use thiserror::Error;

/// Which services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// Order service and `completion-events` consumer.
    Order,
    /// Inventory service and `pending-work` consumer.
    Inventory,
    /// Both, in one process.
    All,
}

impl ServiceRole {
    pub fn runs_orders(&self) -> bool {
        matches!(self, ServiceRole::Order | ServiceRole::All)
    }

    pub fn runs_inventory(&self) -> bool {
        matches!(self, ServiceRole::Inventory | ServiceRole::All)
    }
}

impl std::str::FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" | "orders" => Ok(ServiceRole::Order),
            "inventory" => Ok(ServiceRole::Inventory),
            "all" => Ok(ServiceRole::All),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SERVICE_ROLE must be one of order, inventory, all (got {0:?})")]
    InvalidRole(String),

    #[error("SEED_STOCK entry {0:?} is not of the form item=quantity")]
    InvalidSeedStock(String),
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE_ROLE`: `order`, `inventory` or `all` (default: `all`)
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `ORDER_PORT` / `INVENTORY_PORT`: listen ports (default: `3000` / `3001`)
/// - `INVENTORY_URL`: where the order service reaches inventory
///   (default: `"http://127.0.0.1:3001"`)
/// - `DATABASE_URL`: PostgreSQL for stores and queues; unset means
///   in-memory stores and the in-process broker
/// - `FULFILLMENT_DEADLINE_MS`, `FAULT_DELAY_MS`, `RECONNECT_DELAY_MS`
///   (default: `2000`, `5000`, `5000`)
/// - `LATENCY_WINDOW_SECS`, `LATENCY_SWEEP_SECS` (default: `30`, `5`)
/// - `MAX_DELIVERIES`: redeliveries before giving up on a message (default: `5`)
/// - `SEED_STOCK`: `item=qty,...` for in-memory stock (default: `widget=100,gadget=10`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub role: ServiceRole,
    pub host: String,
    pub order_port: u16,
    pub inventory_port: u16,
    pub inventory_url: String,
    pub database_url: Option<String>,
    pub fulfillment_deadline: Duration,
    pub fault_delay: Duration,
    pub reconnect_delay: Duration,
    pub latency_window: Duration,
    pub latency_sweep: Duration,
    pub max_deliveries: u32,
    pub seed_stock: Vec<(ItemId, u32)>,
    pub log_level: String,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            role: match var("SERVICE_ROLE") {
                Some(role) => role.parse()?,
                None => defaults.role,
            },
            host: var("HOST").unwrap_or(defaults.host),
            order_port: parsed("ORDER_PORT", defaults.order_port),
            inventory_port: parsed("INVENTORY_PORT", defaults.inventory_port),
            inventory_url: var("INVENTORY_URL").unwrap_or(defaults.inventory_url),
            database_url: var("DATABASE_URL"),
            fulfillment_deadline: Duration::from_millis(parsed("FULFILLMENT_DEADLINE_MS", 2000)),
            fault_delay: Duration::from_millis(parsed("FAULT_DELAY_MS", 5000)),
            reconnect_delay: Duration::from_millis(parsed("RECONNECT_DELAY_MS", 5000)),
            latency_window: Duration::from_secs(parsed("LATENCY_WINDOW_SECS", 30)),
            latency_sweep: Duration::from_secs(parsed("LATENCY_SWEEP_SECS", 5)),
            max_deliveries: parsed("MAX_DELIVERIES", defaults.max_deliveries),
            seed_stock: match var("SEED_STOCK") {
                Some(raw) => parse_seed_stock(&raw)?,
                None => defaults.seed_stock,
            },
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
        })
    }

    /// Returns the order service's `"host:port"` bind address.
    pub fn order_addr(&self) -> String {
        format!("{}:{}", self.host, self.order_port)
    }

    /// Returns the inventory service's `"host:port"` bind address.
    pub fn inventory_addr(&self) -> String {
        format!("{}:{}", self.host, self.inventory_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: ServiceRole::All,
            host: "0.0.0.0".to_string(),
            order_port: 3000,
            inventory_port: 3001,
            inventory_url: "http://127.0.0.1:3001".to_string(),
            database_url: None,
            fulfillment_deadline: Duration::from_secs(2),
            fault_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            latency_window: Duration::from_secs(30),
            latency_sweep: Duration::from_secs(5),
            max_deliveries: 5,
            seed_stock: vec![(ItemId::new("widget"), 100), (ItemId::new("gadget"), 10)],
            log_level: "info".to_string(),
        }
    }
}

/// Parses `item=qty` pairs separated by commas.
pub fn parse_seed_stock(raw: &str) -> Result<Vec<(ItemId, u32)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (item, quantity) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidSeedStock(entry.to_string()))?;
            let item = item.trim();
            let quantity = quantity
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidSeedStock(entry.to_string()))?;
            if item.is_empty() {
                return Err(ConfigError::InvalidSeedStock(entry.to_string()));
            }
            Ok((ItemId::new(item), quantity))
        })
        .collect()
}
