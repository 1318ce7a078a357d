//! Orchestrator configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Orchestration limits and sizing defaults.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum simultaneously active bots per user.
    pub bot_quota: usize,
    /// Smallest order quantity the exchange accepts; position sizing
    /// floors at this.
    pub min_order_size: f64,
    /// Default fraction of the allocation risked per position, in percent.
    pub risk_per_position_pct: f64,
    /// SQLite url for the durable store, e.g. `sqlite://data/botfleet.db`.
    pub database_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bot_quota: 5,
            min_order_size: 0.001,
            risk_per_position_pct: 2.0,
            database_url: "sqlite://data/botfleet.db".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bot_quota: Self::parse_usize("BOT_QUOTA", 5)?,
            min_order_size: Self::parse_f64("MIN_ORDER_SIZE", 0.001)?,
            risk_per_position_pct: Self::parse_f64("RISK_PER_POSITION_PCT", 2.0)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/botfleet.db".to_string()),
        })
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }
}
