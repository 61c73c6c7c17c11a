//! Session state and the per-field merge model.
//!
//! Stages never mutate a [`SessionState`] directly. They return a sparse
//! [`StateUpdate`] and the engine folds it into the committed state through a
//! [`MergeTable`], which declares exactly one [`MergePolicy`] per [`Field`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrisisError, Result};
use crate::types::{AudioRef, Message, Role, Scenario, ScenarioRecord, VoiceDefinition};

/// The record threaded through every stage of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub scenario: Option<Scenario>,
    #[serde(default)]
    pub voice_definition: Option<VoiceDefinition>,
    #[serde(default)]
    pub current_text: Option<String>,
    #[serde(default)]
    pub audio_history: Vec<AudioRef>,
    #[serde(default)]
    pub final_audio: Option<AudioRef>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state seeded from a saved scenario/voice pair, so the setup stages
    /// become no-ops on the first turn.
    pub fn seeded(record: &ScenarioRecord) -> Self {
        Self {
            scenario: Some(record.scenario()),
            voice_definition: Some(record.voice()),
            ..Self::default()
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the most recent entry spoken by `role`.
    pub fn last_from(&self, role: Role) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
    }
}

/// A sparse update returned by a stage. `None` / empty means "untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub scenario: Option<Scenario>,
    pub voice_definition: Option<VoiceDefinition>,
    pub current_text: Option<String>,
    pub audio_history: Vec<AudioRef>,
    pub final_audio: Option<AudioRef>,
    pub messages: Vec<Message>,
}

impl StateUpdate {
    /// An update that touches nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// The update that injects one dispatcher line, used both for external
    /// input on resume and for the in-graph input stage.
    pub fn dispatcher_input(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::none()
            .with_text(text.clone())
            .push_message(Message::dispatcher(text))
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn with_voice(mut self, voice: VoiceDefinition) -> Self {
        self.voice_definition = Some(voice);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.current_text = Some(text.into());
        self
    }

    pub fn push_audio(mut self, audio: AudioRef) -> Self {
        self.audio_history.push(audio);
        self
    }

    pub fn with_final_audio(mut self, audio: AudioRef) -> Self {
        self.final_audio = Some(audio);
        self
    }

    pub fn push_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Fields this update carries a value for.
    pub fn touched(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| match f {
                Field::Scenario => self.scenario.is_some(),
                Field::VoiceDefinition => self.voice_definition.is_some(),
                Field::CurrentText => self.current_text.is_some(),
                Field::AudioHistory => !self.audio_history.is_empty(),
                Field::FinalAudio => self.final_audio.is_some(),
                Field::Messages => !self.messages.is_empty(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }
}

/// Every field of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Scenario,
    VoiceDefinition,
    CurrentText,
    AudioHistory,
    FinalAudio,
    Messages,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Scenario,
        Field::VoiceDefinition,
        Field::CurrentText,
        Field::AudioHistory,
        Field::FinalAudio,
        Field::Messages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Scenario => "scenario",
            Field::VoiceDefinition => "voice_definition",
            Field::CurrentText => "current_text",
            Field::AudioHistory => "audio_history",
            Field::FinalAudio => "final_audio",
            Field::Messages => "messages",
        }
    }

    /// Sequence fields can only be appended to; scalar fields can only be replaced.
    pub fn is_sequence(self) -> bool {
        matches!(self, Field::AudioHistory | Field::Messages)
    }

    fn index(self) -> usize {
        match self {
            Field::Scenario => 0,
            Field::VoiceDefinition => 1,
            Field::CurrentText => 2,
            Field::AudioHistory => 3,
            Field::FinalAudio => 4,
            Field::Messages => 5,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage's value for a field is folded into the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Overwrite the prior value.
    Replace,
    /// Overwrite only while the field is unset; later values are ignored.
    WriteOnce,
    /// Concatenate to the end of the existing sequence.
    Append,
}

impl MergePolicy {
    fn fits(self, field: Field) -> bool {
        match self {
            MergePolicy::Append => field.is_sequence(),
            MergePolicy::Replace | MergePolicy::WriteOnce => !field.is_sequence(),
        }
    }
}

/// The policies the conversation pipeline runs with.
pub const STANDARD_POLICIES: [(Field, MergePolicy); 6] = [
    (Field::Scenario, MergePolicy::WriteOnce),
    (Field::VoiceDefinition, MergePolicy::Replace),
    (Field::CurrentText, MergePolicy::Replace),
    (Field::AudioHistory, MergePolicy::Append),
    (Field::FinalAudio, MergePolicy::Replace),
    (Field::Messages, MergePolicy::Append),
];

/// A validated field → policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTable {
    policies: [MergePolicy; 6],
}

impl MergeTable {
    /// Build a table, checking that every field is declared exactly once and
    /// that each policy fits the field's shape.
    pub fn new(entries: &[(Field, MergePolicy)]) -> Result<Self> {
        let mut slots: [Option<MergePolicy>; 6] = [None; 6];

        for (field, policy) in entries {
            if !policy.fits(*field) {
                return Err(CrisisError::Config(format!(
                    "merge policy {:?} does not fit field '{}'",
                    policy, field
                )));
            }
            let slot = &mut slots[field.index()];
            if slot.is_some() {
                return Err(CrisisError::Config(format!(
                    "field '{}' declared more than once in merge table",
                    field
                )));
            }
            *slot = Some(*policy);
        }

        let mut policies = [MergePolicy::Replace; 6];
        for field in Field::ALL {
            policies[field.index()] = slots[field.index()].ok_or_else(|| {
                CrisisError::Config(format!("field '{}' has no merge policy", field))
            })?;
        }
        Ok(Self { policies })
    }

    pub fn standard() -> Result<Self> {
        Self::new(&STANDARD_POLICIES)
    }

    pub fn policy(&self, field: Field) -> MergePolicy {
        self.policies[field.index()]
    }

    /// Fold `update` into `state`. Returns the fields whose value changed.
    pub fn apply(&self, state: &mut SessionState, update: StateUpdate) -> Vec<Field> {
        let mut changed = Vec::new();
        let StateUpdate {
            scenario,
            voice_definition,
            current_text,
            audio_history,
            final_audio,
            messages,
        } = update;

        if merge_scalar(self.policy(Field::Scenario), &mut state.scenario, scenario) {
            changed.push(Field::Scenario);
        }
        if merge_scalar(
            self.policy(Field::VoiceDefinition),
            &mut state.voice_definition,
            voice_definition,
        ) {
            changed.push(Field::VoiceDefinition);
        }
        if merge_scalar(
            self.policy(Field::CurrentText),
            &mut state.current_text,
            current_text,
        ) {
            changed.push(Field::CurrentText);
        }
        if merge_sequence(&mut state.audio_history, audio_history) {
            changed.push(Field::AudioHistory);
        }
        if merge_scalar(
            self.policy(Field::FinalAudio),
            &mut state.final_audio,
            final_audio,
        ) {
            changed.push(Field::FinalAudio);
        }
        if merge_sequence(&mut state.messages, messages) {
            changed.push(Field::Messages);
        }

        debug!(fields = ?changed, "Merged stage update");
        changed
    }
}

fn merge_scalar<T>(policy: MergePolicy, slot: &mut Option<T>, value: Option<T>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match policy {
        MergePolicy::WriteOnce if slot.is_some() => false,
        MergePolicy::Replace | MergePolicy::WriteOnce => {
            *slot = Some(value);
            true
        }
        // MergeTable::new rejects Append on scalar fields.
        MergePolicy::Append => unreachable!("append policy on a scalar field"),
    }
}

// Sequence fields only ever carry Append (enforced by MergeTable::new).
fn merge_sequence<T>(slot: &mut Vec<T>, values: Vec<T>) -> bool {
    if values.is_empty() {
        return false;
    }
    slot.extend(values);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(name: &str) -> Scenario {
        Scenario {
            voice_name: name.into(),
            voice_prompt: "calm female voice".into(),
            persona_text: format!("You are {}.", name),
            sample_dialogue: String::new(),
            sound_prompt: String::new(),
        }
    }

    #[test]
    fn test_standard_table_is_valid() {
        let table = MergeTable::standard().unwrap();
        assert_eq!(table.policy(Field::Scenario), MergePolicy::WriteOnce);
        assert_eq!(table.policy(Field::Messages), MergePolicy::Append);
        assert_eq!(table.policy(Field::FinalAudio), MergePolicy::Replace);
    }

    #[test]
    fn test_table_rejects_missing_field() {
        let err = MergeTable::new(&STANDARD_POLICIES[..5]).unwrap_err();
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn test_table_rejects_duplicate_field() {
        let mut entries = STANDARD_POLICIES.to_vec();
        entries.push((Field::CurrentText, MergePolicy::Replace));
        assert!(MergeTable::new(&entries).is_err());
    }

    #[test]
    fn test_table_rejects_shape_mismatch() {
        let mut entries = STANDARD_POLICIES.to_vec();
        entries[3] = (Field::AudioHistory, MergePolicy::Replace);
        assert!(MergeTable::new(&entries).is_err());

        let mut entries = STANDARD_POLICIES.to_vec();
        entries[2] = (Field::CurrentText, MergePolicy::Append);
        assert!(MergeTable::new(&entries).is_err());
    }

    #[test]
    fn test_replace_keeps_last_non_omitted_value() {
        let table = MergeTable::standard().unwrap();
        let mut state = SessionState::new();

        table.apply(&mut state, StateUpdate::none().with_text("first"));
        table.apply(&mut state, StateUpdate::none());
        table.apply(&mut state, StateUpdate::none().with_text("second"));
        table.apply(&mut state, StateUpdate::none().push_message(Message::victim("x")));

        assert_eq!(state.current_text.as_deref(), Some("second"));
    }

    #[test]
    fn test_append_concatenates_in_order() {
        let table = MergeTable::standard().unwrap();
        let mut state = SessionState::new();

        table.apply(
            &mut state,
            StateUpdate::none()
                .push_message(Message::dispatcher("a"))
                .push_message(Message::victim("b")),
        );
        table.apply(&mut state, StateUpdate::none());
        table.apply(&mut state, StateUpdate::none().push_message(Message::dispatcher("c")));

        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_scenario_is_write_once() {
        let table = MergeTable::standard().unwrap();
        let mut state = SessionState::new();

        let changed = table.apply(&mut state, StateUpdate::none().with_scenario(scenario("Arthur")));
        assert_eq!(changed, vec![Field::Scenario]);

        let changed = table.apply(&mut state, StateUpdate::none().with_scenario(scenario("Maria")));
        assert!(changed.is_empty());
        assert_eq!(state.scenario.unwrap().voice_name, "Arthur");
    }

    #[test]
    fn test_untouched_fields_keep_prior_values() {
        let table = MergeTable::standard().unwrap();
        let mut state = SessionState::new();
        table.apply(
            &mut state,
            StateUpdate::none()
                .with_voice(VoiceDefinition::new("v1"))
                .with_final_audio(AudioRef("s/mix-0001.wav".into())),
        );
        let before = state.clone();

        table.apply(&mut state, StateUpdate::none().with_text("hello"));

        assert_eq!(state.voice_definition, before.voice_definition);
        assert_eq!(state.final_audio, before.final_audio);
        assert_eq!(state.messages, before.messages);
    }

    #[test]
    fn test_dispatcher_input_update() {
        let update = StateUpdate::dispatcher_input("please send help");
        assert_eq!(update.touched(), vec![Field::CurrentText, Field::Messages]);
        assert_eq!(update.messages[0].role, Role::Dispatcher);
    }

    #[test]
    fn test_seeded_state() {
        let record = ScenarioRecord {
            voice_reference: "v-9".into(),
            voice_name: "Lena".into(),
            voice_prompt: "young woman".into(),
            persona_text: "You are Lena.".into(),
            description: Some("kitchen fire".into()),
        };
        let state = SessionState::seeded(&record);
        assert_eq!(state.voice_definition.unwrap().voice_reference, "v-9");
        assert_eq!(state.scenario.unwrap().voice_name, "Lena");
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_state_json_roundtrip() {
        let table = MergeTable::standard().unwrap();
        let mut state = SessionState::new();
        table.apply(
            &mut state,
            StateUpdate::none()
                .with_scenario(scenario("Arthur"))
                .push_audio(AudioRef("s/utterance-0001.wav".into()))
                .push_message(Message::victim("help me")),
        );
        let json = serde_json::to_string(&state).unwrap();
        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
