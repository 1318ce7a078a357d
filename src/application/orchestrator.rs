//! Bot lifecycle orchestration and capital gatekeeping.
//!
//! All mutation of user ledgers and bot instances goes through this
//! module. The admission-check-and-reserve and release-on-close steps
//! run under a per-user mutex; the blocking exchange dispatch always
//! happens outside it, with the reservation already committed, so other
//! operations for the same user keep making progress while an order is
//! in flight. Operations on different users never contend.
//!
//! Map guards (`users`, `bots`) are held only long enough to clone an
//! `Arc` handle or insert one, never across another lock acquisition.

use crate::config::OrchestratorConfig;
use crate::domain::errors::{
    AdmissionRejected, DispatchError, InvariantViolation, OrchestratorError,
};
use crate::domain::ports::{BotStore, ExchangeService};
use crate::domain::risk;
use crate::domain::types::{
    BotInstance, BotStatus, CloseReason, FillOutcome, PositionSide, PositionSnapshot, UserAccount,
};
use crate::infrastructure::signer::RequestSigner;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Inputs for a start-bot admission decision.
#[derive(Debug, Clone)]
pub struct StartBotRequest {
    pub user_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub allocation: Decimal,
    pub leverage: u32,
    pub side: PositionSide,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Market price used for order sizing; the confirmed fill price
    /// becomes the entry price.
    pub reference_price: f64,
}

pub struct BotOrchestrator {
    config: OrchestratorConfig,
    signer: RequestSigner,
    exchange: Arc<dyn ExchangeService>,
    store: Arc<dyn BotStore>,
    users: RwLock<HashMap<String, Arc<Mutex<UserAccount>>>>,
    bots: RwLock<HashMap<Uuid, Arc<Mutex<BotInstance>>>>,
}

impl BotOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        exchange: Arc<dyn ExchangeService>,
        store: Arc<dyn BotStore>,
    ) -> Self {
        Self {
            config,
            signer: RequestSigner::new(),
            exchange,
            store,
            users: RwLock::new(HashMap::new()),
            bots: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a user's capital ledger. A no-op with a warning when the
    /// user is already registered.
    pub async fn register_user(
        &self,
        user_id: &str,
        starting_balance: Decimal,
        api_secret: &str,
    ) -> Result<(), OrchestratorError> {
        let account = UserAccount::new(
            user_id.to_string(),
            starting_balance,
            api_secret.to_string(),
        );
        let snapshot = account.snapshot();

        {
            let mut users = self.users.write().await;
            if users.contains_key(user_id) {
                warn!("Orchestrator: user {} already registered", user_id);
                return Ok(());
            }
            users.insert(user_id.to_string(), Arc::new(Mutex::new(account)));
        }

        self.store.save_account(&snapshot).await?;
        info!(
            "Orchestrator: registered user {} with balance {}",
            user_id, starting_balance
        );
        Ok(())
    }

    /// Rehydrate a user's ledger and running bots from the store.
    ///
    /// `Pending` bots cannot be resumed (their opening dispatch died
    /// with the previous process) and are left for reconciliation.
    pub async fn restore_user(
        &self,
        user_id: &str,
        api_secret: &str,
    ) -> Result<bool, OrchestratorError> {
        let Some(snapshot) = self.store.load_account(user_id).await? else {
            return Ok(false);
        };

        let account = UserAccount {
            user_id: snapshot.user_id.clone(),
            free_balance: snapshot.free_balance,
            allocated: snapshot.allocated,
            active_bots: snapshot.active_bots,
            api_secret: api_secret.to_string(),
        };
        self.users
            .write()
            .await
            .insert(user_id.to_string(), Arc::new(Mutex::new(account)));

        let bots = self.store.load_bots(user_id).await?;
        let mut restored = 0;
        for bot in bots {
            match bot.status {
                BotStatus::Running => {
                    self.bots
                        .write()
                        .await
                        .insert(bot.id, Arc::new(Mutex::new(bot)));
                    restored += 1;
                }
                BotStatus::Pending => {
                    warn!(
                        "Orchestrator: bot {} was pending at shutdown, needs reconciliation",
                        bot.id
                    );
                }
                _ => {}
            }
        }
        info!(
            "Orchestrator: restored user {} with {} running bots",
            user_id, restored
        );
        Ok(true)
    }

    /// Consistent read of a user's ledger.
    pub async fn account(
        &self,
        user_id: &str,
    ) -> Result<crate::domain::types::AccountSnapshot, OrchestratorError> {
        let handle = self.user_handle(user_id).await?;
        let account = handle.lock().await;
        Ok(account.snapshot())
    }

    pub async fn bot_status(&self, bot_id: Uuid) -> Result<BotStatus, OrchestratorError> {
        let handle = self.bot_handle(bot_id).await?;
        let bot = handle.lock().await;
        Ok(bot.status)
    }

    /// Ids and statuses of every bot owned by `user_id`.
    pub async fn user_bots(&self, user_id: &str) -> Vec<(Uuid, BotStatus)> {
        let handles: Vec<Arc<Mutex<BotInstance>>> =
            self.bots.read().await.values().cloned().collect();

        let mut out = Vec::new();
        for handle in handles {
            let bot = handle.lock().await;
            if bot.user_id == user_id {
                out.push((bot.id, bot.status));
            }
        }
        out
    }

    /// Admit, reserve and launch a new bot.
    ///
    /// The three preconditions (positive allocation, quota headroom,
    /// sufficient free balance) are checked as one atomic decision under
    /// the user lock, and the reservation is committed before the
    /// opening order leaves the building. A dispatch failure rolls the
    /// reservation back deterministically.
    pub async fn start_bot(&self, request: StartBotRequest) -> Result<Uuid, OrchestratorError> {
        if request.reference_price <= 0.0 {
            return Err(InvariantViolation::NonPositivePrice {
                symbol: request.symbol.clone(),
                price: request.reference_price,
            }
            .into());
        }

        let quantity = risk::position_size(
            request.allocation.to_f64().unwrap_or(0.0),
            self.config.risk_per_position_pct,
            request.reference_price,
            request.leverage,
            self.config.min_order_size,
        )?;

        let account_handle = self.user_handle(&request.user_id).await?;

        // Admission + reservation, atomic per user.
        let (bot_handle, bot_id, secret) = {
            let mut account = account_handle.lock().await;

            if request.allocation <= Decimal::ZERO {
                return Err(AdmissionRejected::InvalidAllocation {
                    requested: request.allocation,
                }
                .into());
            }
            if account.active_bots >= self.config.bot_quota {
                return Err(AdmissionRejected::QuotaExceeded {
                    active: account.active_bots,
                    quota: self.config.bot_quota,
                }
                .into());
            }
            if account.free_balance < request.allocation {
                return Err(AdmissionRejected::InsufficientBalance {
                    requested: request.allocation,
                    free: account.free_balance,
                }
                .into());
            }

            account.free_balance -= request.allocation;
            account.allocated += request.allocation;
            account.active_bots += 1;

            let bot = BotInstance {
                id: Uuid::new_v4(),
                user_id: request.user_id.clone(),
                strategy_id: request.strategy_id.clone(),
                symbol: request.symbol.clone(),
                allocation: request.allocation,
                leverage: request.leverage,
                side: request.side,
                quantity,
                stop_loss_pct: request.stop_loss_pct,
                take_profit_pct: request.take_profit_pct,
                entry_price: None,
                status: BotStatus::Pending,
                cancel_requested: false,
                close_in_flight: false,
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            let bot_id = bot.id;

            let persisted = match self.store.save_bot(&bot).await {
                Ok(()) => self.store.save_account(&account.snapshot()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = persisted {
                // Undo the reservation before surfacing the store error.
                account.free_balance += request.allocation;
                account.allocated -= request.allocation;
                account.active_bots -= 1;
                return Err(OrchestratorError::Store(e));
            }

            info!(
                "Orchestrator: bot {} admitted for {} ({} {} at {}x, allocation {})",
                bot_id,
                request.user_id,
                request.side,
                request.symbol,
                request.leverage,
                request.allocation
            );

            (Arc::new(Mutex::new(bot)), bot_id, account.api_secret.clone())
        };
        self.bots.write().await.insert(bot_id, bot_handle.clone());

        // Opening order, dispatched outside the user lock.
        let params = self.order_params(
            &request.symbol,
            request.side.opening_order().to_string(),
            quantity,
            bot_id,
        );
        let signed = self.signer.sign(params, &secret);

        match Self::flatten_outcome(self.exchange.dispatch(signed).await) {
            Ok(price) => {
                self.finalize_open(&bot_handle, price).await?;
                Ok(bot_id)
            }
            Err(e) => {
                self.rollback_open(&bot_handle, &account_handle).await?;
                Err(e.into())
            }
        }
    }

    /// An exchange-side rejection and a transport failure resolve the
    /// same way: the order did not fill.
    fn flatten_outcome(outcome: Result<FillOutcome, DispatchError>) -> Result<f64, DispatchError> {
        match outcome {
            Ok(FillOutcome::Filled { price }) => Ok(price),
            Ok(FillOutcome::Rejected { reason }) => Err(DispatchError::Rejected { reason }),
            Err(e) => Err(e),
        }
    }

    /// Risk evaluation for one bot against one price update. At most one
    /// closing action per cycle; anything but a `Running` bot is a no-op.
    pub async fn evaluate_bot(
        &self,
        bot_id: Uuid,
        current_price: f64,
    ) -> Result<Option<CloseReason>, OrchestratorError> {
        let bot_handle = self.bot_handle(bot_id).await?;

        let snapshot = {
            let bot = bot_handle.lock().await;
            if bot.status != BotStatus::Running || bot.close_in_flight {
                return Ok(None);
            }
            if current_price <= 0.0 {
                return Err(InvariantViolation::NonPositivePrice {
                    symbol: bot.symbol.clone(),
                    price: current_price,
                }
                .into());
            }
            let entry_price =
                bot.entry_price
                    .ok_or_else(|| InvariantViolation::MissingEntryPrice {
                        bot_id: bot.id.to_string(),
                    })?;
            PositionSnapshot {
                entry_price,
                current_price,
                leverage: bot.leverage,
                stop_loss_pct: bot.stop_loss_pct,
                take_profit_pct: bot.take_profit_pct,
                side: bot.side,
            }
        };

        match risk::evaluate(&snapshot) {
            Some(reason) => {
                info!(
                    "Orchestrator: bot {} closing ({}), entry {} current {}",
                    bot_id, reason, snapshot.entry_price, current_price
                );
                self.close_position(&bot_handle, reason).await?;
                Ok(Some(reason))
            }
            None => Ok(None),
        }
    }

    /// Evaluate every bot trading `symbol`. Returns the close decisions
    /// taken this cycle.
    pub async fn on_price_update(
        &self,
        symbol: &str,
        price: f64,
    ) -> Result<Vec<(Uuid, CloseReason)>, OrchestratorError> {
        let handles: Vec<(Uuid, Arc<Mutex<BotInstance>>)> = {
            let bots = self.bots.read().await;
            bots.iter().map(|(id, h)| (*id, h.clone())).collect()
        };

        let mut closed = Vec::new();
        for (bot_id, handle) in handles {
            let matches = {
                let bot = handle.lock().await;
                bot.symbol == symbol
            };
            if !matches {
                continue;
            }
            // One bot's dispatch failure must not starve the rest of the
            // sweep; the bot itself is already marked Error.
            match self.evaluate_bot(bot_id, price).await {
                Ok(Some(reason)) => closed.push((bot_id, reason)),
                Ok(None) => {}
                Err(e) => error!("Orchestrator: evaluation of bot {} failed: {}", bot_id, e),
            }
        }
        Ok(closed)
    }

    /// User-initiated stop. Valid from `Pending` (flags the in-flight
    /// start for cancellation) or `Running` (closes the position).
    pub async fn stop_bot(&self, bot_id: Uuid) -> Result<(), OrchestratorError> {
        let bot_handle = self.bot_handle(bot_id).await?;

        {
            let mut bot = bot_handle.lock().await;
            match bot.status {
                BotStatus::Pending => {
                    bot.cancel_requested = true;
                    self.store.save_bot(&bot).await?;
                    info!("Orchestrator: bot {} flagged for cancellation", bot_id);
                    return Ok(());
                }
                BotStatus::Running => {}
                other => {
                    return Err(InvariantViolation::InvalidTransition {
                        from: other.to_string(),
                        to: BotStatus::Stopped.to_string(),
                    }
                    .into());
                }
            }
        }

        self.close_position(&bot_handle, CloseReason::UserRequested)
            .await
    }

    async fn user_handle(
        &self,
        user_id: &str,
    ) -> Result<Arc<Mutex<UserAccount>>, InvariantViolation> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| InvariantViolation::UnknownUser {
                user_id: user_id.to_string(),
            })
    }

    async fn bot_handle(
        &self,
        bot_id: Uuid,
    ) -> Result<Arc<Mutex<BotInstance>>, InvariantViolation> {
        self.bots
            .read()
            .await
            .get(&bot_id)
            .cloned()
            .ok_or_else(|| InvariantViolation::UnknownBot {
                bot_id: bot_id.to_string(),
            })
    }

    fn order_params(
        &self,
        symbol: &str,
        side: String,
        quantity: f64,
        bot_id: Uuid,
    ) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("side".to_string(), side);
        params.insert("type".to_string(), "MARKET".to_string());
        params.insert("quantity".to_string(), quantity.to_string());
        params.insert("client_order_id".to_string(), bot_id.to_string());
        params.insert(
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        params
    }

    /// Confirmed opening fill: record the entry and go `Running`. A
    /// cancellation that lost the race to the fill closes immediately
    /// instead of being dropped.
    async fn finalize_open(
        &self,
        bot_handle: &Arc<Mutex<BotInstance>>,
        fill_price: f64,
    ) -> Result<(), OrchestratorError> {
        let cancel_pending = {
            let mut bot = bot_handle.lock().await;
            bot.entry_price = Some(fill_price);
            bot.transition(BotStatus::Running)?;
            self.store.save_bot(&bot).await?;
            info!(
                "Orchestrator: bot {} running, entry price {}",
                bot.id, fill_price
            );
            bot.cancel_requested
        };

        if cancel_pending {
            info!("Orchestrator: cancellation raced fill, closing immediately");
            self.close_position(bot_handle, CloseReason::UserRequested)
                .await?;
        }
        Ok(())
    }

    /// Failed opening dispatch: release the reservation and mark the bot
    /// `Error`. The rollback is deterministic; capital never leaks into
    /// an unknown state.
    async fn rollback_open(
        &self,
        bot_handle: &Arc<Mutex<BotInstance>>,
        account_handle: &Arc<Mutex<UserAccount>>,
    ) -> Result<(), OrchestratorError> {
        let allocation = {
            let mut bot = bot_handle.lock().await;
            bot.transition(BotStatus::Error)?;
            self.store.save_bot(&bot).await?;
            bot.allocation
        };

        let mut account = account_handle.lock().await;
        if account.allocated < allocation {
            return Err(InvariantViolation::LedgerMismatch {
                user_id: account.user_id.clone(),
                allocated: account.allocated,
                free: account.free_balance,
            }
            .into());
        }
        account.free_balance += allocation;
        account.allocated -= allocation;
        account.active_bots -= 1;
        self.store.save_account(&account.snapshot()).await?;
        warn!(
            "Orchestrator: opening dispatch failed, reservation released for {}",
            account.user_id
        );
        Ok(())
    }

    /// Close a running position: dispatch the closing order outside the
    /// locks, then settle the ledger. Concurrent close attempts collapse
    /// into the first one via the close-in-flight flag.
    async fn close_position(
        &self,
        bot_handle: &Arc<Mutex<BotInstance>>,
        reason: CloseReason,
    ) -> Result<(), OrchestratorError> {
        let (bot_id, user_id, symbol, side, quantity, allocation, leverage, entry_price) = {
            let mut bot = bot_handle.lock().await;
            if bot.status != BotStatus::Running || bot.close_in_flight {
                return Ok(());
            }
            let entry_price =
                bot.entry_price
                    .ok_or_else(|| InvariantViolation::MissingEntryPrice {
                        bot_id: bot.id.to_string(),
                    })?;
            bot.close_in_flight = true;
            (
                bot.id,
                bot.user_id.clone(),
                bot.symbol.clone(),
                bot.side,
                bot.quantity,
                bot.allocation,
                bot.leverage,
                entry_price,
            )
        };

        let account_handle = self.user_handle(&user_id).await?;
        let secret = {
            let account = account_handle.lock().await;
            account.api_secret.clone()
        };

        let params = self.order_params(&symbol, side.closing_order().to_string(), quantity, bot_id);
        let signed = self.signer.sign(params, &secret);

        match Self::flatten_outcome(self.exchange.dispatch(signed).await) {
            Ok(price) => {
                let returned = Self::settle_amount(allocation, leverage, entry_price, price, side);

                {
                    let mut account = account_handle.lock().await;
                    if account.allocated < allocation {
                        return Err(InvariantViolation::LedgerMismatch {
                            user_id: account.user_id.clone(),
                            allocated: account.allocated,
                            free: account.free_balance,
                        }
                        .into());
                    }
                    account.free_balance += returned;
                    account.allocated -= allocation;
                    account.active_bots -= 1;
                    self.store.save_account(&account.snapshot()).await?;
                }

                let mut bot = bot_handle.lock().await;
                bot.close_in_flight = false;
                bot.transition(BotStatus::Stopped)?;
                self.store.save_bot(&bot).await?;
                info!(
                    "Orchestrator: bot {} stopped ({}), returned {} of {} allocated",
                    bot_id, reason, returned, allocation
                );
                Ok(())
            }
            Err(err) => {
                // Allocation stays reserved until manual reconciliation;
                // the bot no longer occupies quota.
                {
                    let mut account = account_handle.lock().await;
                    account.active_bots = account.active_bots.saturating_sub(1);
                    self.store.save_account(&account.snapshot()).await?;
                }

                let mut bot = bot_handle.lock().await;
                bot.close_in_flight = false;
                bot.transition(BotStatus::Error)?;
                self.store.save_bot(&bot).await?;

                error!(
                    "Orchestrator: closing dispatch failed for bot {}: {}",
                    bot_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Amount returned to free balance after a close: allocation plus
    /// leveraged realized PnL, floored at zero (a leveraged loss beyond
    /// the allocation is margin accounting, not a negative credit).
    fn settle_amount(
        allocation: Decimal,
        leverage: u32,
        entry_price: f64,
        close_price: f64,
        side: PositionSide,
    ) -> Decimal {
        let change = match side {
            PositionSide::Long => (close_price - entry_price) / entry_price,
            PositionSide::Short => (entry_price - close_price) / entry_price,
        };
        let pnl_fraction = Decimal::from_f64(change * leverage as f64).unwrap_or(Decimal::ZERO);
        let returned = allocation + allocation * pnl_fraction;
        returned.max(Decimal::ZERO)
    }
}
