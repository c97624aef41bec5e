pub mod bank;
pub mod config;
pub mod embedding;
pub mod emotion;
pub mod error;
pub mod evaluator;
pub mod interviewer;
pub mod report;
pub mod selector;
pub mod session;
pub mod store;
pub mod types;
pub mod vision;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use session::{SessionEngine, StartedSession, TurnRequest};
