use crate::domain::ports::BotStore;
use crate::domain::types::{AccountSnapshot, BotInstance, BotStatus, PositionSide};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite-backed store. Monetary amounts are stored as TEXT to keep the
/// Decimal representation exact.
pub struct SqliteBotStore {
    database: Database,
}

impl SqliteBotStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn status_from_str(value: &str) -> Result<BotStatus> {
    match value {
        "Pending" => Ok(BotStatus::Pending),
        "Running" => Ok(BotStatus::Running),
        "Stopped" => Ok(BotStatus::Stopped),
        "Error" => Ok(BotStatus::Error),
        other => bail!("Unknown bot status in store: {}", other),
    }
}

fn side_from_str(value: &str) -> Result<PositionSide> {
    match value {
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => bail!("Unknown position side in store: {}", other),
    }
}

type BotRow = (
    String,      // id
    String,      // user_id
    String,      // strategy_id
    String,      // symbol
    String,      // allocation
    i64,         // leverage
    String,      // side
    f64,         // quantity
    f64,         // stop_loss_pct
    f64,         // take_profit_pct
    Option<f64>, // entry_price
    String,      // status
    i64,         // cancel_requested
    i64,         // created_at
);

fn bot_from_row(row: BotRow) -> Result<BotInstance> {
    let (
        id,
        user_id,
        strategy_id,
        symbol,
        allocation,
        leverage,
        side,
        quantity,
        stop_loss_pct,
        take_profit_pct,
        entry_price,
        status,
        cancel_requested,
        created_at,
    ) = row;

    Ok(BotInstance {
        id: Uuid::parse_str(&id).context("Invalid bot id in store")?,
        user_id,
        strategy_id,
        symbol,
        allocation: Decimal::from_str(&allocation).unwrap_or_default(),
        leverage: leverage as u32,
        side: side_from_str(&side)?,
        quantity,
        stop_loss_pct,
        take_profit_pct,
        entry_price,
        status: status_from_str(&status)?,
        cancel_requested: cancel_requested != 0,
        close_in_flight: false,
        created_at,
    })
}

#[async_trait]
impl BotStore for SqliteBotStore {
    async fn save_bot(&self, bot: &BotInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bots (
                id, user_id, strategy_id, symbol, allocation, leverage,
                side, quantity, stop_loss_pct, take_profit_pct, entry_price,
                status, cancel_requested, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT(id) DO UPDATE SET
                entry_price = excluded.entry_price,
                status = excluded.status,
                cancel_requested = excluded.cancel_requested
            "#,
        )
        .bind(bot.id.to_string())
        .bind(&bot.user_id)
        .bind(&bot.strategy_id)
        .bind(&bot.symbol)
        .bind(bot.allocation.to_string())
        .bind(bot.leverage as i64)
        .bind(bot.side.to_string())
        .bind(bot.quantity)
        .bind(bot.stop_loss_pct)
        .bind(bot.take_profit_pct)
        .bind(bot.entry_price)
        .bind(bot.status.to_string())
        .bind(bot.cancel_requested as i64)
        .bind(bot.created_at)
        .execute(&self.database.pool)
        .await
        .context("Failed to save bot")?;

        Ok(())
    }

    async fn save_account(&self, account: &AccountSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, free_balance, allocated, active_bots)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(user_id) DO UPDATE SET
                free_balance = excluded.free_balance,
                allocated = excluded.allocated,
                active_bots = excluded.active_bots
            "#,
        )
        .bind(&account.user_id)
        .bind(account.free_balance.to_string())
        .bind(account.allocated.to_string())
        .bind(account.active_bots as i64)
        .execute(&self.database.pool)
        .await
        .context("Failed to save account")?;

        Ok(())
    }

    async fn load_bots(&self, user_id: &str) -> Result<Vec<BotInstance>> {
        let rows = sqlx::query_as::<_, BotRow>(
            r#"
            SELECT id, user_id, strategy_id, symbol, allocation, leverage,
                   side, quantity, stop_loss_pct, take_profit_pct, entry_price,
                   status, cancel_requested, created_at
            FROM bots
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load bots")?;

        rows.into_iter().map(bot_from_row).collect()
    }

    async fn load_account(&self, user_id: &str) -> Result<Option<AccountSnapshot>> {
        let row = sqlx::query_as::<_, (String, String, String, i64)>(
            r#"
            SELECT user_id, free_balance, allocated, active_bots
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load account")?;

        Ok(row.map(|(user_id, free, allocated, active_bots)| AccountSnapshot {
            user_id,
            free_balance: Decimal::from_str(&free).unwrap_or_default(),
            allocated: Decimal::from_str(&allocated).unwrap_or_default(),
            active_bots: active_bots as usize,
        }))
    }
}
