use crate::domain::errors::DispatchError;
use crate::domain::types::{AccountSnapshot, BotInstance, FillOutcome, SignedRequest};
use anyhow::Result;
use async_trait::async_trait;

/// Dispatch boundary to the exchange. Transport, socket-level retries
/// and response parsing live behind this trait; the orchestrator only
/// hands over a fully signed request and consumes the outcome.
///
/// A `SignedRequest` is one-shot: implementations receive a fresh nonce
/// per call and must never be handed the same descriptor twice.
#[async_trait]
pub trait ExchangeService: Send + Sync {
    async fn dispatch(&self, request: SignedRequest) -> Result<FillOutcome, DispatchError>;
}

/// Durable store for bot instances and account ledgers.
///
/// The store is deliberately dumb: all invariant enforcement happens in
/// the orchestrator, which calls these methods inside the same per-user
/// atomic scope as its in-memory bookkeeping.
#[async_trait]
pub trait BotStore: Send + Sync {
    async fn save_bot(&self, bot: &BotInstance) -> Result<()>;

    async fn save_account(&self, account: &AccountSnapshot) -> Result<()>;

    async fn load_bots(&self, user_id: &str) -> Result<Vec<BotInstance>>;

    async fn load_account(&self, user_id: &str) -> Result<Option<AccountSnapshot>>;
}
