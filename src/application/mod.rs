pub mod orchestrator;

pub use orchestrator::{BotOrchestrator, StartBotRequest};
