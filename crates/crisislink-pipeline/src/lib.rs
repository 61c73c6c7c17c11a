pub mod artifacts;
pub mod checkpoint;
pub mod conversation;
pub mod engine;
pub mod graph;
pub mod scenario_store;
pub mod stages;

pub use artifacts::FsAudioStore;
pub use checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, SessionStatus, SqliteCheckpointStore,
};
pub use conversation::{
    conversation_graph, import_background, Collaborators, PipelineSettings, BACKGROUND_KEY,
};
pub use engine::{PipelineEngine, StageRecord, TurnOutcome, TurnReport};
pub use graph::{Edge, Route, Router, Stage, StageContext, StageGraph, StageGraphBuilder, StageId};
pub use scenario_store::SqliteScenarioStore;
