pub mod mock;
pub mod persistence;
pub mod signer;

pub use mock::{InMemoryBotStore, MockBehavior, MockExchange};
pub use signer::RequestSigner;
