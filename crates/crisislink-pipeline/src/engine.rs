//! Execution engine: runs turns of a [`StageGraph`] against durable sessions.
//!
//! One call runs stages strictly in graph order until one of:
//! - the graph's suspend point (state committed, control returned),
//! - the terminal marker (state committed, session completed),
//! - a stage failure (state committed as-is, plus any output the stage
//!   asked to keep, error returned),
//! - an undeclared route (state committed, session halted, error returned).
//!
//! Updates merged earlier in a failing turn are not rolled back.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::{Field, SessionState, StateUpdate};
use crisislink_core::traits::Transcriber;
use crisislink_core::types::SessionId;

use crate::checkpoint::{Checkpoint, CheckpointStore, SessionStatus};
use crate::graph::{Route, StageContext, StageGraph, StageId};

/// Record of one executed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: StageId,
    /// Fields whose committed value changed.
    #[serde(serialize_with = "serialize_fields")]
    pub changed: Vec<Field>,
    pub elapsed_ms: u64,
}

fn serialize_fields<S: serde::Serializer>(
    fields: &[Field],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(fields.iter().map(|f| f.name()))
}

/// How an engine call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Waiting for the next dispatcher input.
    Suspended,
    /// The call is over.
    Completed,
}

/// Result of a successful engine call.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub session_id: SessionId,
    pub outcome: TurnOutcome,
    /// Stages executed by this call, in order.
    pub stages: Vec<StageRecord>,
    /// The committed state.
    pub state: SessionState,
    pub turn: usize,
}

/// Drives sessions through a fixed stage graph.
///
/// Distinct sessions share nothing but the graph and the store, so they may
/// run concurrently. Calls for the same session must be serialized by the
/// caller.
pub struct PipelineEngine {
    graph: StageGraph,
    checkpoints: Arc<dyn CheckpointStore>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl PipelineEngine {
    pub fn new(graph: StageGraph, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            checkpoints,
            transcriber: None,
        }
    }

    /// Attach a transcriber for [`PipelineEngine::step_audio`].
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Begin a session, optionally from seed data, and run to the first
    /// suspend point or the terminal marker.
    pub async fn start(
        &self,
        session_id: &SessionId,
        seed: Option<SessionState>,
    ) -> Result<TurnReport> {
        let mut cp = self.checkpoints.load(session_id)?;
        if cp.status != SessionStatus::New {
            return Err(lifecycle(session_id, format!("already started ({})", cp.status.label())));
        }
        if let Some(seed) = seed {
            cp.state = seed;
        }

        info!(session_id = %session_id, seeded = cp.state.scenario.is_some(), "Starting session");
        let entry = self.graph.entry();
        self.run(cp, entry, true).await
    }

    /// Merge `input` as a dispatcher message into a suspended session and
    /// resume it.
    pub async fn step(&self, session_id: &SessionId, input: &str) -> Result<TurnReport> {
        let mut cp = self.checkpoints.load(session_id)?;
        let after = match cp.status {
            SessionStatus::Suspended(after) => after,
            other => {
                return Err(lifecycle(
                    session_id,
                    format!("cannot accept input while {}", other.label()),
                ))
            }
        };

        self.graph
            .merge_table()
            .apply(&mut cp.state, StateUpdate::dispatcher_input(input));
        info!(session_id = %session_id, input = %input, "Resuming with dispatcher input");

        match self.follow(&mut cp, after)? {
            Route::Stage(next) => self.run(cp, next, true).await,
            Route::Terminal => self.finish(cp, Vec::new()),
        }
    }

    /// Transcribe dispatcher audio, then [`step`](Self::step) with the text.
    pub async fn step_audio(&self, session_id: &SessionId, audio: Vec<u8>) -> Result<TurnReport> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| CrisisError::Config("no transcriber configured".into()))?;
        let text = transcriber.transcribe(audio).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CrisisError::malformed("transcription", "empty transcript"));
        }
        self.step(session_id, text).await
    }

    /// Re-run a session whose last turn failed, starting at the failed stage.
    pub async fn resume(&self, session_id: &SessionId) -> Result<TurnReport> {
        let cp = self.checkpoints.load(session_id)?;
        match cp.status {
            SessionStatus::Failed(stage) => {
                info!(session_id = %session_id, stage = %stage, "Retrying failed stage");
                self.run(cp, stage, false).await
            }
            other => Err(lifecycle(
                session_id,
                format!("nothing to resume ({})", other.label()),
            )),
        }
    }

    /// The last committed state, without executing anything.
    pub fn inspect(&self, session_id: &SessionId) -> Result<SessionState> {
        Ok(self.checkpoints.load(session_id)?.state)
    }

    /// The full last committed checkpoint.
    pub fn checkpoint(&self, session_id: &SessionId) -> Result<Checkpoint> {
        self.checkpoints.load(session_id)
    }

    async fn run(&self, mut cp: Checkpoint, from: StageId, new_turn: bool) -> Result<TurnReport> {
        let entry = self.graph.entry();
        let suspend_after = self.graph.suspend_after();
        let mut records = Vec::new();
        let mut current = from;
        let mut count_entry = new_turn;

        loop {
            if current == entry {
                if count_entry {
                    cp.turn += 1;
                }
                count_entry = true;
            }

            let stage = self.graph.stage(current)?;
            let ctx = StageContext {
                session_id: cp.session_id.clone(),
                turn: cp.turn,
            };

            debug!(session_id = %ctx.session_id, stage = %current, turn = ctx.turn, "Running stage");
            let started = Instant::now();
            let result = stage.run(&ctx, &cp.state).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let update = match result {
                Ok(update) => update,
                Err(e) => {
                    let e = match e {
                        CrisisError::Incomplete { update, source } => {
                            let kept = self.graph.merge_table().apply(&mut cp.state, *update);
                            debug!(session_id = %ctx.session_id, stage = %current, kept = kept.len(), "Keeping partial stage output");
                            *source
                        }
                        other => other,
                    };
                    error!(
                        session_id = %ctx.session_id,
                        stage = %current,
                        error = %e,
                        "Stage failed, aborting turn"
                    );
                    cp.status = SessionStatus::Failed(current);
                    self.commit(&mut cp)?;
                    return Err(CrisisError::Stage {
                        stage: current.to_string(),
                        source: Box::new(e),
                    });
                }
            };

            let changed = self.graph.merge_table().apply(&mut cp.state, update);
            records.push(StageRecord {
                stage: current,
                changed,
                elapsed_ms,
            });

            if suspend_after == Some(current) {
                cp.status = SessionStatus::Suspended(current);
                self.commit(&mut cp)?;
                info!(session_id = %cp.session_id, turn = cp.turn, "Suspended for dispatcher input");
                return Ok(report(cp, TurnOutcome::Suspended, records));
            }

            match self.follow(&mut cp, current)? {
                Route::Stage(next) => current = next,
                Route::Terminal => return self.finish(cp, records),
            }
        }
    }

    /// Evaluate the edge out of `from`. An undeclared route halts the session.
    fn follow(&self, cp: &mut Checkpoint, from: StageId) -> Result<Route> {
        match self.graph.next(from, &cp.state) {
            Ok(route) => {
                debug!(session_id = %cp.session_id, from = %from, to = %route, "Routing");
                Ok(route)
            }
            Err(e) => {
                error!(session_id = %cp.session_id, from = %from, error = %e, "Invalid route, halting session");
                cp.status = SessionStatus::Halted(from);
                if let Err(commit_err) = self.commit(cp) {
                    warn!(error = %commit_err, "Could not persist halted session");
                    let detail = match commit_err {
                        CrisisError::Checkpoint(msg) => msg,
                        other => other.to_string(),
                    };
                    return Err(CrisisError::Checkpoint(format!(
                        "{} while halting after: {}",
                        detail, e
                    )));
                }
                Err(e)
            }
        }
    }

    fn finish(&self, mut cp: Checkpoint, records: Vec<StageRecord>) -> Result<TurnReport> {
        cp.status = SessionStatus::Completed;
        self.commit(&mut cp)?;
        info!(
            session_id = %cp.session_id,
            turns = cp.turn,
            utterances = cp.state.audio_history.len(),
            "Call ended"
        );
        Ok(report(cp, TurnOutcome::Completed, records))
    }

    fn commit(&self, cp: &mut Checkpoint) -> Result<()> {
        cp.updated_at = Utc::now();
        self.checkpoints.commit(cp)
    }
}

fn report(cp: Checkpoint, outcome: TurnOutcome, stages: Vec<StageRecord>) -> TurnReport {
    TurnReport {
        session_id: cp.session_id,
        outcome,
        stages,
        state: cp.state,
        turn: cp.turn,
    }
}

fn lifecycle(session_id: &SessionId, message: String) -> CrisisError {
    CrisisError::SessionState {
        session: session_id.clone(),
        message,
    }
}
