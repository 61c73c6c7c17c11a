pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{CrisisError, Result};
pub use state::{Field, MergePolicy, MergeTable, SessionState, StateUpdate};
pub use types::*;
