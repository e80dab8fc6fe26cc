pub mod document;
pub mod query;
pub mod run_state;

pub use document::*;
pub use query::*;
pub use run_state::*;
