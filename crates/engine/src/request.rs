//! JSON request surface.
//!
//! Every request maps onto one [`EngineContext`] method. Responses are plain
//! JSON: snapshots, maps of snapshots, or booleans. Invalid input and failed
//! creations answer `null`; failed batch or toggle operations answer `false`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mixcast_common::error::MixcastResult;
use mixcast_composition::audio::AudioCompositionSpec;
use mixcast_composition::custom::CompositionSpec;
use mixcast_host_core::host::{HostEvent, OutputKind, TransitionKind};
use mixcast_output::output::OutputSpec;

use crate::context::EngineContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all_fields = "camelCase")]
pub enum Request {
    CreateComposition {
        spec: CompositionSpec,
    },
    RemoveCompositionsByIds {
        ids: Vec<String>,
    },
    SerializeAllCompositions,
    CreateAudioComposition {
        spec: AudioCompositionSpec,
    },
    RemoveAudioCompositionsByIds {
        ids: Vec<String>,
    },
    SerializeAllAudioCompositions,
    GetCompositionHolders {
        id: String,
    },
    AddScene {
        composition_id: String,
        name: String,
    },
    RemoveScene {
        composition_id: String,
        name: String,
    },
    SetCurrentScene {
        composition_id: String,
        name: String,
    },
    SetTransition {
        composition_id: String,
        kind: TransitionKind,
    },
    SetTransitionDuration {
        composition_id: String,
        duration_ms: u32,
    },
    CreateOutput {
        kind: OutputKind,
        spec: OutputSpec,
    },
    EnableOutput {
        id: String,
    },
    DisableOutput {
        id: String,
    },
    StartOutput {
        id: String,
    },
    StopOutput {
        id: String,
    },
    RemoveOutputsByIds {
        ids: Vec<String>,
    },
    SerializeAllOutputs {
        #[serde(default)]
        kind: Option<OutputKind>,
    },
    SetPaused {
        id: String,
        paused: bool,
    },
    SaveReplayBuffer {
        id: String,
    },
    HostEvent {
        event: HostEvent,
    },
}

impl Request {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateComposition { .. } => "CreateComposition",
            Request::RemoveCompositionsByIds { .. } => "RemoveCompositionsByIds",
            Request::SerializeAllCompositions => "SerializeAllCompositions",
            Request::CreateAudioComposition { .. } => "CreateAudioComposition",
            Request::RemoveAudioCompositionsByIds { .. } => "RemoveAudioCompositionsByIds",
            Request::SerializeAllAudioCompositions => "SerializeAllAudioCompositions",
            Request::GetCompositionHolders { .. } => "GetCompositionHolders",
            Request::AddScene { .. } => "AddScene",
            Request::RemoveScene { .. } => "RemoveScene",
            Request::SetCurrentScene { .. } => "SetCurrentScene",
            Request::SetTransition { .. } => "SetTransition",
            Request::SetTransitionDuration { .. } => "SetTransitionDuration",
            Request::CreateOutput { .. } => "CreateOutput",
            Request::EnableOutput { .. } => "EnableOutput",
            Request::DisableOutput { .. } => "DisableOutput",
            Request::StartOutput { .. } => "StartOutput",
            Request::StopOutput { .. } => "StopOutput",
            Request::RemoveOutputsByIds { .. } => "RemoveOutputsByIds",
            Request::SerializeAllOutputs { .. } => "SerializeAllOutputs",
            Request::SetPaused { .. } => "SetPaused",
            Request::SaveReplayBuffer { .. } => "SaveReplayBuffer",
            Request::HostEvent { .. } => "HostEvent",
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// `null` on error.
fn or_null<T: Serialize>(name: &str, result: MixcastResult<T>) -> Value {
    match result {
        Ok(value) => to_json(value),
        Err(e) => {
            tracing::warn!(request = name, error = %e, "Request failed");
            Value::Null
        }
    }
}

/// `false` on error.
fn succeeded<T>(name: &str, result: MixcastResult<T>) -> Value {
    match result {
        Ok(_) => Value::Bool(true),
        Err(e) => {
            tracing::warn!(request = name, error = %e, "Request failed");
            Value::Bool(false)
        }
    }
}

impl EngineContext {
    pub fn dispatch(&self, request: Request) -> Value {
        let name = request.name();
        tracing::debug!(request = name, "Dispatching request");
        match request {
            Request::CreateComposition { spec } => or_null(name, self.create_composition(&spec)),
            Request::RemoveCompositionsByIds { ids } => {
                Value::Bool(self.remove_compositions_by_ids(&ids))
            }
            Request::SerializeAllCompositions => to_json(self.serialize_all_compositions()),
            Request::CreateAudioComposition { spec } => {
                or_null(name, self.create_audio_composition(&spec))
            }
            Request::RemoveAudioCompositionsByIds { ids } => {
                Value::Bool(self.remove_audio_compositions_by_ids(&ids))
            }
            Request::SerializeAllAudioCompositions => {
                to_json(self.serialize_all_audio_compositions())
            }
            Request::GetCompositionHolders { id } => or_null(name, self.composition_holders(&id)),
            Request::AddScene {
                composition_id,
                name: scene,
            } => succeeded(name, self.add_scene(&composition_id, &scene)),
            Request::RemoveScene {
                composition_id,
                name: scene,
            } => succeeded(name, self.remove_scene(&composition_id, &scene)),
            Request::SetCurrentScene {
                composition_id,
                name: scene,
            } => succeeded(name, self.set_current_scene(&composition_id, &scene)),
            Request::SetTransition {
                composition_id,
                kind,
            } => succeeded(name, self.set_transition(&composition_id, kind)),
            Request::SetTransitionDuration {
                composition_id,
                duration_ms,
            } => succeeded(
                name,
                self.set_transition_duration(&composition_id, duration_ms),
            ),
            Request::CreateOutput { kind, spec } => or_null(name, self.create_output(kind, &spec)),
            Request::EnableOutput { id } => Value::Bool(self.enable_output(&id)),
            Request::DisableOutput { id } => Value::Bool(self.disable_output(&id)),
            Request::StartOutput { id } => Value::Bool(self.start_output(&id)),
            Request::StopOutput { id } => Value::Bool(self.stop_output(&id)),
            Request::RemoveOutputsByIds { ids } => Value::Bool(self.remove_outputs_by_ids(&ids)),
            Request::SerializeAllOutputs { kind } => to_json(self.serialize_all_outputs(kind)),
            Request::SetPaused { id, paused } => Value::Bool(self.set_paused(&id, paused)),
            Request::SaveReplayBuffer { id } => Value::Bool(self.save_replay_buffer(&id)),
            Request::HostEvent { event } => {
                self.handle_host_event(event);
                Value::Bool(true)
            }
        }
    }

    /// Parse and dispatch one JSON request. Unparseable input answers
    /// `null`.
    pub fn dispatch_json(&self, request: &str) -> Value {
        match serde_json::from_str::<Request>(request) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable request");
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_value(json!({
            "request": "SetCurrentScene",
            "compositionId": "abc",
            "name": "Wide",
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::SetCurrentScene {
                composition_id: "abc".to_string(),
                name: "Wide".to_string(),
            }
        );

        let request: Request =
            serde_json::from_value(json!({ "request": "SerializeAllOutputs" })).unwrap();
        assert_eq!(request, Request::SerializeAllOutputs { kind: None });
        assert_eq!(request.name(), "SerializeAllOutputs");
    }

    #[test]
    fn test_create_output_request() {
        let request: Request = serde_json::from_value(json!({
            "request": "CreateOutput",
            "kind": "replay_buffer",
            "spec": {
                "name": "Replays",
                "settings": { "path": "/tmp", "maxSeconds": 20, "maxSizeMb": 256 },
            },
        }))
        .unwrap();
        let Request::CreateOutput { kind, spec } = request else {
            panic!("expected CreateOutput");
        };
        assert_eq!(kind, OutputKind::ReplayBuffer);
        assert_eq!(spec.composition_id, "native");
        assert_eq!(spec.audio_composition_id, "native-audio");
        assert!(spec.enabled);
    }

    #[test]
    fn test_host_event_request() {
        let request: Request = serde_json::from_value(json!({
            "request": "HostEvent",
            "event": { "started": "streaming" },
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::HostEvent {
                event: HostEvent::Started(OutputKind::Streaming)
            }
        );
    }
}
