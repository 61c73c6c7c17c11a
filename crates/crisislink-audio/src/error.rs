use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid PCM data: {0}")]
    InvalidPcm(String),

    #[error("Background track is empty")]
    EmptyBackground,

    #[error("Sample rate mismatch: foreground {foreground} Hz, background {background} Hz")]
    SampleRateMismatch { foreground: u32, background: u32 },
}
