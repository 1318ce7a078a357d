//! SQLite store round-trips.

use botfleet::domain::ports::BotStore;
use botfleet::domain::types::{AccountSnapshot, BotInstance, BotStatus, PositionSide};
use botfleet::infrastructure::persistence::{Database, SqliteBotStore};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn temp_store() -> SqliteBotStore {
    let path = std::env::temp_dir().join(format!("botfleet_test_{}.db", Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());
    let database = Database::new(&url).await.unwrap();
    SqliteBotStore::new(database)
}

fn sample_bot(user_id: &str) -> BotInstance {
    BotInstance {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        strategy_id: "grid-v2".to_string(),
        symbol: "ETH/USDT".to_string(),
        allocation: dec!(250.75),
        leverage: 3,
        side: PositionSide::Short,
        quantity: 0.125,
        stop_loss_pct: 4.0,
        take_profit_pct: 8.0,
        entry_price: None,
        status: BotStatus::Pending,
        cancel_requested: false,
        close_in_flight: false,
        created_at: 1_700_000_000_000,
    }
}

#[tokio::test]
async fn test_bot_round_trip_and_upsert() {
    let store = temp_store().await;
    let mut bot = sample_bot("alice");
    store.save_bot(&bot).await.unwrap();

    let loaded = store.load_bots("alice").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, bot.id);
    assert_eq!(loaded[0].allocation, dec!(250.75));
    assert_eq!(loaded[0].side, PositionSide::Short);
    assert_eq!(loaded[0].status, BotStatus::Pending);
    assert_eq!(loaded[0].entry_price, None);

    // Status updates land on the same row.
    bot.entry_price = Some(1875.5);
    bot.status = BotStatus::Running;
    store.save_bot(&bot).await.unwrap();

    let loaded = store.load_bots("alice").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].status, BotStatus::Running);
    assert_eq!(loaded[0].entry_price, Some(1875.5));

    assert!(store.load_bots("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_account_round_trip() {
    let store = temp_store().await;
    let account = AccountSnapshot {
        user_id: "alice".to_string(),
        free_balance: dec!(900),
        allocated: dec!(100),
        active_bots: 1,
    };
    store.save_account(&account).await.unwrap();

    let loaded = store.load_account("alice").await.unwrap().unwrap();
    assert_eq!(loaded, account);

    let updated = AccountSnapshot {
        free_balance: dec!(1055),
        allocated: dec!(0),
        active_bots: 0,
        ..account
    };
    store.save_account(&updated).await.unwrap();
    let loaded = store.load_account("alice").await.unwrap().unwrap();
    assert_eq!(loaded, updated);

    assert!(store.load_account("bob").await.unwrap().is_none());
}
