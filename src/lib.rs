//! Multi-bot trading orchestration: admission and capital gatekeeping,
//! deterministic risk decisions, and signed exchange requests. Transport
//! and account management are collaborators behind the `domain::ports`
//! traits.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
