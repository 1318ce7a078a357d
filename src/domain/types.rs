use crate::domain::errors::InvariantViolation;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of a position. The risk formulas are written for longs;
/// shorts invert the sign of the percentage change before thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens a position in this direction.
    pub fn opening_order(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn closing_order(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle of a bot instance.
///
/// `Pending` while capital is reserved and the opening order is in
/// flight; `Running` only after a confirmed fill; `Stopped` and `Error`
/// are terminal. Every other transition is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Pending,
    Running,
    Stopped,
    Error,
}

impl BotStatus {
    pub fn can_transition(self, next: BotStatus) -> bool {
        matches!(
            (self, next),
            (BotStatus::Pending, BotStatus::Running)
                | (BotStatus::Pending, BotStatus::Error)
                | (BotStatus::Running, BotStatus::Stopped)
                | (BotStatus::Running, BotStatus::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BotStatus::Stopped | BotStatus::Error)
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a running position is being closed. Ordered by urgency:
/// liquidation proximity always wins an evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    LiquidationRisk,
    StopLoss,
    TakeProfit,
    UserRequested,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LiquidationRisk => write!(f, "LIQUIDATION_RISK"),
            CloseReason::StopLoss => write!(f, "STOP_LOSS"),
            CloseReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            CloseReason::UserRequested => write!(f, "USER_REQUESTED"),
        }
    }
}

/// One running strategy execution on behalf of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInstance {
    pub id: Uuid,
    pub user_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub allocation: Decimal,
    pub leverage: u32,
    pub side: PositionSide,
    /// Order quantity computed at admission time, reused for the close.
    pub quantity: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub entry_price: Option<f64>,
    pub status: BotStatus,
    /// Set when a stop request arrives while the opening order is still
    /// in flight. The fill confirmation and the cancellation are
    /// competing events; a cancel that loses the race to the fill
    /// triggers an immediate close instead of being dropped.
    pub cancel_requested: bool,
    /// Collapses concurrent close attempts into one dispatched order.
    #[serde(skip)]
    pub close_in_flight: bool,
    pub created_at: i64,
}

impl BotInstance {
    pub fn transition(&mut self, next: BotStatus) -> Result<(), InvariantViolation> {
        if !self.status.can_transition(next) {
            return Err(InvariantViolation::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A user's capital ledger, mutated only by the orchestrator under the
/// per-user lock.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user_id: String,
    pub free_balance: Decimal,
    pub allocated: Decimal,
    pub active_bots: usize,
    pub api_secret: String,
}

impl UserAccount {
    pub fn new(user_id: String, starting_balance: Decimal, api_secret: String) -> Self {
        Self {
            user_id,
            free_balance: starting_balance,
            allocated: Decimal::ZERO,
            active_bots: 0,
            api_secret,
        }
    }

    /// Persistable view of the ledger, without the secret.
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user_id.clone(),
            free_balance: self.free_balance,
            allocated: self.allocated,
            active_bots: self.active_bots,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSnapshot {
    pub user_id: String,
    pub free_balance: Decimal,
    pub allocated: Decimal,
    pub active_bots: usize,
}

/// Ephemeral argument set for one risk evaluation cycle. Derived from a
/// running bot plus the latest price, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct PositionSnapshot {
    pub entry_price: f64,
    pub current_price: f64,
    pub leverage: u32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub side: PositionSide,
}

/// Outcome reported by the exchange collaborator for one dispatched order.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled { price: f64 },
    Rejected { reason: String },
}

/// Fully assembled, authenticated payload ready for dispatch. One-shot:
/// the nonce inside `params` is fresh per construction and never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub params: BTreeMap<String, String>,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_bot() -> BotInstance {
        BotInstance {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            strategy_id: "momentum-v1".to_string(),
            symbol: "BTC/USDT".to_string(),
            allocation: dec!(100),
            leverage: 10,
            side: PositionSide::Long,
            quantity: 0.004,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            entry_price: None,
            status: BotStatus::Pending,
            cancel_requested: false,
            close_in_flight: false,
            created_at: 0,
        }
    }

    #[test]
    fn test_valid_transitions() {
        let mut bot = sample_bot();
        bot.transition(BotStatus::Running).unwrap();
        bot.transition(BotStatus::Stopped).unwrap();
        assert!(bot.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut bot = sample_bot();
        bot.transition(BotStatus::Error).unwrap();

        let err = bot.transition(BotStatus::Running).unwrap_err();
        assert!(err.to_string().contains("Error -> Running"));
    }

    #[test]
    fn test_no_transition_skips_pending() {
        // A terminated bot cannot be restarted; a fresh instance is the
        // only way back to Pending.
        assert!(!BotStatus::Stopped.can_transition(BotStatus::Pending));
        assert!(!BotStatus::Error.can_transition(BotStatus::Pending));
        assert!(!BotStatus::Running.can_transition(BotStatus::Pending));
    }

    #[test]
    fn test_bot_instance_serialization_round_trip() {
        let bot = sample_bot();
        let json = serde_json::to_string(&bot).unwrap();
        let parsed: BotInstance = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, bot.id);
        assert_eq!(parsed.allocation, bot.allocation);
        assert_eq!(parsed.status, BotStatus::Pending);
        // Transient flag is not part of the persisted shape.
        assert!(!json.contains("close_in_flight"));
    }

    #[test]
    fn test_closing_order_inverts_side() {
        assert_eq!(PositionSide::Long.closing_order(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.closing_order(), OrderSide::Buy);
    }
}
