use crate::domain::errors::DispatchError;
use crate::domain::ports::{BotStore, ExchangeService};
use crate::domain::types::{AccountSnapshot, BotInstance, FillOutcome, SignedRequest};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Scripted outcome for one dispatched request.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Fill { price: f64 },
    Reject { reason: String },
    Fail { reason: String },
}

/// Exchange double for tests: pops scripted behaviors in order and falls
/// back to filling at a configurable price. Records every dispatched
/// request for assertions.
#[derive(Clone)]
pub struct MockExchange {
    script: Arc<RwLock<VecDeque<MockBehavior>>>,
    default_fill_price: Arc<RwLock<f64>>,
    latency: Arc<RwLock<Option<Duration>>>,
    dispatched: Arc<RwLock<Vec<SignedRequest>>>,
}

impl MockExchange {
    pub fn new(fill_price: f64) -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            default_fill_price: Arc::new(RwLock::new(fill_price)),
            latency: Arc::new(RwLock::new(None)),
            dispatched: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_fill_price(&self, price: f64) {
        *self.default_fill_price.write().await = price;
    }

    /// Simulated network latency before each outcome.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = Some(latency);
    }

    /// Queue a behavior for the next dispatch call.
    pub async fn script(&self, behavior: MockBehavior) {
        self.script.write().await.push_back(behavior);
    }

    pub async fn dispatched(&self) -> Vec<SignedRequest> {
        self.dispatched.read().await.clone()
    }

    pub async fn dispatch_count(&self) -> usize {
        self.dispatched.read().await.len()
    }
}

#[async_trait]
impl ExchangeService for MockExchange {
    async fn dispatch(&self, request: SignedRequest) -> Result<FillOutcome, DispatchError> {
        self.dispatched.write().await.push(request);

        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let behavior = self.script.write().await.pop_front();
        match behavior {
            Some(MockBehavior::Fill { price }) => Ok(FillOutcome::Filled { price }),
            Some(MockBehavior::Reject { reason }) => Ok(FillOutcome::Rejected { reason }),
            Some(MockBehavior::Fail { reason }) => Err(DispatchError::Transport { reason }),
            None => {
                let price = *self.default_fill_price.read().await;
                debug!("MockExchange: filling at default price {}", price);
                Ok(FillOutcome::Filled { price })
            }
        }
    }
}

/// Thread-safe in-memory store, the default when no database is wired.
#[derive(Clone, Default)]
pub struct InMemoryBotStore {
    bots: Arc<RwLock<HashMap<Uuid, BotInstance>>>,
    accounts: Arc<RwLock<HashMap<String, AccountSnapshot>>>,
}

impl InMemoryBotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BotStore for InMemoryBotStore {
    async fn save_bot(&self, bot: &BotInstance) -> Result<()> {
        self.bots.write().await.insert(bot.id, bot.clone());
        Ok(())
    }

    async fn save_account(&self, account: &AccountSnapshot) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.user_id.clone(), account.clone());
        Ok(())
    }

    async fn load_bots(&self, user_id: &str) -> Result<Vec<BotInstance>> {
        Ok(self
            .bots
            .read()
            .await
            .values()
            .filter(|bot| bot.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn load_account(&self, user_id: &str) -> Result<Option<AccountSnapshot>> {
        Ok(self.accounts.read().await.get(user_id).cloned())
    }
}
