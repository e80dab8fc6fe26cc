pub mod agent;
pub mod health;

pub use agent::*;
pub use health::*;

use std::sync::Arc;

use crate::config::Config;
use crate::services::Orchestrator;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Config,
}
