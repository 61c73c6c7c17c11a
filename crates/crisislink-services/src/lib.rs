pub mod elevenlabs;
pub mod ollama;
pub mod stdin;

pub use elevenlabs::ElevenLabsClient;
pub use ollama::OllamaClient;
pub use stdin::StdinInput;
