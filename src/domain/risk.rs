//! Pure risk math for position sizing and close decisions.
//!
//! Every function here is deterministic and side-effect free: identical
//! market conditions must always yield identical decisions. Prices and
//! percentages are `f64`; the capital ledger stays in `Decimal` on the
//! orchestrator side.
//!
//! Zero or negative prices are validated by the caller before these
//! functions run; the predicates do not defend against division by zero.

use crate::domain::errors::RiskError;
use crate::domain::types::{CloseReason, PositionSide, PositionSnapshot};

/// Early-warning threshold as a fraction of the theoretical liquidation
/// distance (`entry / leverage`). Trips before actual exchange-side
/// liquidation so there is still room for corrective action.
pub const LIQUIDATION_WARNING_RATIO: f64 = 0.85;

/// Order quantities are rounded to this many decimal places.
pub const QUANTITY_DECIMALS: i32 = 6;

/// Quantity to open for a position risking `risk_percent` of `balance`
/// at `leverage`, floored at `min_order_size`.
///
/// The floor means the result can exceed what the risk amount alone
/// would buy; affordability is checked separately by the caller.
pub fn position_size(
    balance: f64,
    risk_percent: f64,
    entry_price: f64,
    leverage: u32,
    min_order_size: f64,
) -> Result<f64, RiskError> {
    if entry_price <= 0.0 {
        return Err(RiskError::InvalidArgument {
            reason: format!("entry_price must be > 0, got {}", entry_price),
        });
    }
    if leverage < 1 {
        return Err(RiskError::InvalidArgument {
            reason: format!("leverage must be >= 1, got {}", leverage),
        });
    }

    let risk_amount = balance * (risk_percent / 100.0);
    let quantity = risk_amount * leverage as f64 / entry_price;

    let scale = 10f64.powi(QUANTITY_DECIMALS);
    let rounded = (quantity * scale).round() / scale;

    Ok(rounded.max(min_order_size))
}

/// Signed percentage change from entry to current price.
pub fn percent_change(entry_price: f64, current_price: f64) -> f64 {
    (current_price - entry_price) / entry_price * 100.0
}

/// True when the position has moved against a long by at least
/// `sl_percent` (supplied as a magnitude).
pub fn should_stop_loss(entry_price: f64, current_price: f64, sl_percent: f64) -> bool {
    percent_change(entry_price, current_price) <= -sl_percent.abs()
}

/// True when a long is up by at least `tp_percent`.
pub fn should_take_profit(entry_price: f64, current_price: f64, tp_percent: f64) -> bool {
    percent_change(entry_price, current_price) >= tp_percent.abs()
}

/// True when the price has covered at least [`LIQUIDATION_WARNING_RATIO`]
/// of the theoretical liquidation distance, in either direction. The
/// comparison is inclusive at the boundary.
pub fn liquidation_proximity(entry_price: f64, current_price: f64, leverage: u32) -> bool {
    let liquidation_distance = entry_price / leverage as f64;
    (current_price - entry_price).abs() >= liquidation_distance * LIQUIDATION_WARNING_RATIO
}

/// Close decision for one evaluation cycle, in priority order:
/// liquidation proximity first, then stop-loss, then take-profit.
///
/// Short positions invert the sign of the move before the stop-loss and
/// take-profit thresholds; the liquidation distance is symmetric.
pub fn evaluate(snapshot: &PositionSnapshot) -> Option<CloseReason> {
    if liquidation_proximity(snapshot.entry_price, snapshot.current_price, snapshot.leverage) {
        return Some(CloseReason::LiquidationRisk);
    }

    let change = match snapshot.side {
        PositionSide::Long => percent_change(snapshot.entry_price, snapshot.current_price),
        PositionSide::Short => -percent_change(snapshot.entry_price, snapshot.current_price),
    };

    if change <= -snapshot.stop_loss_pct.abs() {
        return Some(CloseReason::StopLoss);
    }
    if change >= snapshot.take_profit_pct.abs() {
        return Some(CloseReason::TakeProfit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_size_exact() {
        // 1000 * 2% * 10 / 50000 = 0.004, above the floor
        let qty = position_size(1000.0, 2.0, 50000.0, 10, 0.001).unwrap();
        assert_eq!(qty, 0.004);
    }

    #[test]
    fn test_position_size_floored_at_minimum() {
        // 100 * 0.1% * 1 / 50000 = 0.000002 -> floored
        let qty = position_size(100.0, 0.1, 50000.0, 1, 0.001).unwrap();
        assert_eq!(qty, 0.001);
    }

    #[test]
    fn test_position_size_rounds_to_six_decimals() {
        // 1000 * 1% * 3 / 7000 = 0.00428571428...
        let qty = position_size(1000.0, 1.0, 7000.0, 3, 0.000001).unwrap();
        assert_eq!(qty, 0.004286);
    }

    #[test]
    fn test_position_size_rejects_bad_preconditions() {
        assert!(position_size(1000.0, 2.0, 0.0, 10, 0.001).is_err());
        assert!(position_size(1000.0, 2.0, -5.0, 10, 0.001).is_err());
        assert!(position_size(1000.0, 2.0, 50000.0, 0, 0.001).is_err());
    }

    #[test]
    fn test_stop_loss_threshold() {
        assert!(should_stop_loss(100.0, 94.0, 5.0)); // -6% <= -5%
        assert!(!should_stop_loss(100.0, 96.0, 5.0)); // -4% > -5%
        assert!(should_stop_loss(100.0, 95.0, 5.0)); // boundary inclusive
    }

    #[test]
    fn test_stop_loss_sign_derived_from_direction() {
        // Caller supplies a magnitude; a negative config means the same
        assert!(should_stop_loss(100.0, 94.0, -5.0));
    }

    #[test]
    fn test_take_profit_threshold() {
        assert!(should_take_profit(100.0, 110.0, 10.0));
        assert!(should_take_profit(100.0, 110.0, -10.0));
        assert!(!should_take_profit(100.0, 109.9, 10.0));
    }

    #[test]
    fn test_liquidation_proximity_boundary() {
        // Distance to liquidation at 10x on entry 100 is 10.0; the
        // warning trips at 8.5, inclusive.
        assert!(!liquidation_proximity(100.0, 100.0, 10));
        assert!(!liquidation_proximity(100.0, 91.6, 10)); // 8.4 < 8.5
        assert!(liquidation_proximity(100.0, 91.5, 10)); // 8.5 >= 8.5
        assert!(liquidation_proximity(100.0, 108.5, 10)); // symmetric
    }

    #[test]
    fn test_evaluate_priority_order() {
        // At 10x, a 9% drop trips liquidation warning, stop-loss and
        // nothing else; liquidation must win.
        let snapshot = PositionSnapshot {
            entry_price: 100.0,
            current_price: 91.0,
            leverage: 10,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            side: PositionSide::Long,
        };
        assert_eq!(evaluate(&snapshot), Some(CloseReason::LiquidationRisk));

        let snapshot = PositionSnapshot {
            current_price: 94.0,
            leverage: 2,
            ..snapshot
        };
        assert_eq!(evaluate(&snapshot), Some(CloseReason::StopLoss));

        let snapshot = PositionSnapshot {
            current_price: 111.0,
            ..snapshot
        };
        assert_eq!(evaluate(&snapshot), Some(CloseReason::TakeProfit));

        let snapshot = PositionSnapshot {
            current_price: 101.0,
            ..snapshot
        };
        assert_eq!(evaluate(&snapshot), None);
    }

    #[test]
    fn test_evaluate_short_inverts_sign() {
        // A short at entry 100 with price 94 is +6%: take-profit, not
        // stop-loss.
        let snapshot = PositionSnapshot {
            entry_price: 100.0,
            current_price: 94.0,
            leverage: 2,
            stop_loss_pct: 5.0,
            take_profit_pct: 5.0,
            side: PositionSide::Short,
        };
        assert_eq!(evaluate(&snapshot), Some(CloseReason::TakeProfit));

        let snapshot = PositionSnapshot {
            current_price: 106.0,
            ..snapshot
        };
        assert_eq!(evaluate(&snapshot), Some(CloseReason::StopLoss));
    }

    #[test]
    fn test_determinism() {
        let snapshot = PositionSnapshot {
            entry_price: 43251.37,
            current_price: 41876.02,
            leverage: 7,
            stop_loss_pct: 3.2,
            take_profit_pct: 6.4,
            side: PositionSide::Long,
        };
        let first = evaluate(&snapshot);
        for _ in 0..100 {
            assert_eq!(evaluate(&snapshot), first);
        }
    }
}
