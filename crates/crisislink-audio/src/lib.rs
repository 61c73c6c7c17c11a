//! Mono audio tracks and the deterministic voice-over-ambience mixer.

mod error;
mod mixer;
mod track;

pub use error::AudioError;
pub use mixer::{db_to_gain, mix, prepare_background, MixParams};
pub use track::AudioTrack;
