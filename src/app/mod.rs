//! Application layer containing business logic and shared state.

pub mod limits;
pub mod service;
pub mod settlement;
pub mod state;
pub mod worker;

pub use limits::{LimitAssessment, LimitEnforcer};
pub use service::{AppService, LedgerReplay};
pub use settlement::{SettlementConfig, SettlementStep, WebhookOutcome};
pub use state::AppState;
pub use worker::{SettlementQueue, SettlementReceiver, WorkerConfig, spawn_crank, spawn_worker};
