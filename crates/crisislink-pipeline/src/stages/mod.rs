//! The six conversation stages. Each holds its collaborators, injected at
//! construction, and touches only the fields it owns.

mod input;
mod postprocess;
mod reply;
mod scenario;
mod speech;
mod voice;

pub use input::NextInputAcquire;
pub use postprocess::{AudioPostprocess, SESSION_AMBIENCE};
pub use reply::ReplyGenerate;
pub use scenario::ScenarioSetup;
pub use speech::SpeechSynthesize;
pub use voice::VoiceProvision;

use crisislink_core::error::CrisisError;

use crate::graph::StageId;

fn missing(stage: StageId, what: &str) -> CrisisError {
    CrisisError::MissingInput {
        stage: stage.to_string(),
        what: what.to_string(),
    }
}
