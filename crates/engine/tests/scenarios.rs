//! End-to-end scenarios against the simulated host.

use std::sync::Arc;

use serde_json::{json, Value};

use mixcast_common::config::EngineConfig;
use mixcast_composition::audio::AudioCompositionSpec;
use mixcast_composition::custom::CompositionSpec;
use mixcast_engine::{EngineContext, Request};
use mixcast_host_core::events::MemorySink;
use mixcast_host_core::host::{HostEvent, OutputKind, TransitionKind};
use mixcast_host_core::sim::{FailPoint, SimProbe, SimulatedHost};
use mixcast_output::output::{OutputSpec, OutputState};

fn engine() -> (EngineContext, SimProbe, Arc<MemorySink>) {
    let (host, probe) = SimulatedHost::new(1920, 1080);
    let sink = Arc::new(MemorySink::new());
    let ctx = EngineContext::start(Box::new(host), EngineConfig::default(), sink.clone()).unwrap();
    (ctx, probe, sink)
}

fn recording_spec(composition_id: &str) -> OutputSpec {
    OutputSpec {
        composition_id: composition_id.to_string(),
        enabled: false,
        ..OutputSpec::new("Recorder", json!({ "path": "/tmp/mixcast" }))
    }
}

#[test]
fn odd_dimensions_round_down() {
    let (ctx, _probe, _sink) = engine();
    let snapshot = ctx
        .create_composition(&CompositionSpec::new("Odd", 1921, 1081))
        .unwrap();
    assert_eq!((snapshot.width, snapshot.height), (1920, 1080));

    let all = ctx.serialize_all_compositions();
    let stored = &all[&snapshot.id];
    assert_eq!(stored.name, "Odd");
    assert_eq!((stored.width, stored.height), (1920, 1080));
}

#[test]
fn composition_with_outputs_cannot_be_removed() {
    let (ctx, _probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Vertical", 1080, 1920))
        .unwrap()
        .id;

    let first = ctx
        .create_output(OutputKind::Recording, &recording_spec(&id))
        .unwrap()
        .id;
    let second = ctx
        .create_output(OutputKind::Streaming, &OutputSpec {
            composition_id: id.clone(),
            enabled: false,
            ..OutputSpec::new("Stream", json!({ "server": "rtmp://ingest.example.com/live" }))
        })
        .unwrap()
        .id;

    let ids = vec![id.clone()];
    assert!(!ctx.remove_compositions_by_ids(&ids));
    assert!(ctx.remove_outputs_by_ids(&[first]));
    assert!(!ctx.remove_compositions_by_ids(&ids));
    assert!(ctx.remove_outputs_by_ids(&[second]));
    assert!(ctx.remove_compositions_by_ids(&ids));
    assert!(ctx.composition(&id).is_err());
}

#[test]
fn disabled_output_never_starts() {
    let (ctx, probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let output = ctx
        .create_output(OutputKind::Recording, &recording_spec(&id))
        .unwrap();
    assert_eq!(output.state, OutputState::Disabled);

    assert!(!ctx.start_output(&output.id));
    assert!(!ctx.output(&output.id).unwrap().is_active());
    assert!(probe.engine_outputs().is_empty());
}

#[test]
fn disabling_twice_is_a_noop() {
    let (ctx, _probe, sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let output = ctx
        .create_output(OutputKind::Recording, &recording_spec(&id))
        .unwrap()
        .id;

    assert!(ctx.disable_output(&output));
    assert!(ctx.disable_output(&output));
    assert_eq!(sink.count("OutputDisabled"), 0);

    assert!(ctx.enable_output(&output));
    assert!(ctx.disable_output(&output));
    let events = sink.events().len();
    assert!(ctx.disable_output(&output));
    assert_eq!(sink.events().len(), events);
}

#[test]
fn remove_outputs_with_one_bad_id_removes_nothing() {
    let (ctx, _probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let mut ids: Vec<String> = (0..3)
        .map(|_| {
            ctx.create_output(OutputKind::Recording, &recording_spec(&id))
                .unwrap()
                .id
        })
        .collect();
    ids.push("not-an-output".to_string());

    assert!(!ctx.remove_outputs_by_ids(&ids));
    assert_eq!(ctx.serialize_all_outputs(Some(OutputKind::Recording)).len(), 4);
}

#[test]
fn second_switch_wins_and_first_target_stays_valid() {
    let (ctx, probe, sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let b = ctx.add_scene(&id, "B").unwrap();
    ctx.add_scene(&id, "C").unwrap();

    assert!(ctx.set_current_scene(&id, "B").unwrap());
    assert!(ctx.set_current_scene(&id, "C").unwrap());
    assert!(probe.scene_alive(b.handle));

    assert_eq!(probe.complete_transitions(), 1);
    let snapshot = &ctx.serialize_all_compositions()[&id];
    assert_eq!(snapshot.current_scene.as_deref(), Some("C"));
    let ended = sink.last("SceneTransitionEnded").unwrap();
    assert_eq!(ended.payload["sceneName"], "C");
    assert!(probe.scene_alive(b.handle));
}

#[test]
fn only_scene_cannot_be_removed() {
    let (ctx, _probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let before = ctx.serialize_all_compositions()[&id].clone();
    assert!(ctx.remove_scene(&id, "Scene").is_err());
    assert_eq!(ctx.serialize_all_compositions()[&id], before);
}

#[test]
fn failed_construction_leaks_nothing() {
    let points = [
        FailPoint::CreateTransition,
        FailPoint::CreateView,
        FailPoint::CreateVideoEncoder,
        FailPoint::CreateScene,
    ];
    for point in points {
        let (ctx, probe, _sink) = engine();
        let before = probe.live_counts();
        probe.fail_next(point);
        assert!(ctx
            .create_composition(&CompositionSpec::new("Cam", 1280, 720))
            .is_err());
        assert_eq!(probe.live_counts(), before, "leak after {point:?}");
        assert_eq!(ctx.audio_slots().occupied(), 0);
        assert_eq!(ctx.serialize_all_compositions().len(), 1);
    }

    for point in [FailPoint::CreateAudioMix, FailPoint::CreateAudioEncoder] {
        let (ctx, probe, _sink) = engine();
        let before = probe.live_counts();
        probe.fail_next(point);
        assert!(ctx
            .create_audio_composition(&AudioCompositionSpec::new("Music"))
            .is_err());
        assert_eq!(probe.live_counts(), before, "leak after {point:?}");
    }
}

#[test]
fn output_start_failure_records_error() {
    let (ctx, probe, sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let output = ctx
        .create_output(OutputKind::Recording, &recording_spec(&id))
        .unwrap()
        .id;
    probe.fail_next(FailPoint::OutputStart(-1));

    assert!(ctx.enable_output(&output));
    assert!(probe.engine_outputs().is_empty());
    let snapshot = &ctx.serialize_all_outputs(None)[&output];
    assert_eq!(snapshot.state, OutputState::Idle);
    assert_eq!(snapshot.last_error.as_ref().unwrap().reason, "bad_path");
    assert_eq!(sink.last("OutputStopped").unwrap().payload["reason"], "bad_path");
}

#[test]
fn native_composition_needs_host_encoders() {
    let (ctx, probe, _sink) = engine();
    let output = ctx
        .create_output(OutputKind::Recording, &recording_spec("native"))
        .unwrap()
        .id;

    assert!(ctx.enable_output(&output));
    assert!(!ctx.output(&output).unwrap().is_active());
    let error = ctx.output(&output).unwrap().last_error().unwrap();
    assert_eq!(error.reason, "invalid_stream");

    probe.start_host_output(OutputKind::Streaming);
    assert!(ctx.start_output(&output));
    assert!(ctx.output(&output).unwrap().is_active());
}

#[test]
fn application_exit_stops_everything() {
    let (ctx, probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let outputs: Vec<String> = (0..2)
        .map(|_| {
            let spec = OutputSpec {
                enabled: true,
                ..recording_spec(&id)
            };
            ctx.create_output(OutputKind::Recording, &spec).unwrap().id
        })
        .collect();
    probe.start_host_output(OutputKind::Recording);
    ctx.handle_host_event(HostEvent::Started(OutputKind::Recording));
    assert!(ctx.output("native-recording").unwrap().is_active());
    assert_eq!(probe.engine_outputs().len(), 2);

    ctx.handle_host_event(HostEvent::ApplicationExiting);
    assert!(probe.engine_outputs().is_empty());
    for id in outputs.iter().map(String::as_str).chain(["native-recording"]) {
        assert!(!ctx.output(id).unwrap().is_active(), "{id} still active");
    }
}

#[test]
fn collection_reset_keeps_custom_identity() {
    let (ctx, _probe, sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    ctx.add_scene(&id, "Extra").unwrap();

    ctx.handle_host_event(HostEvent::SceneCollectionReset);
    let snapshot = &ctx.serialize_all_compositions()[&id];
    assert_eq!(snapshot.scenes, ["Scene"]);
    assert_eq!((snapshot.width, snapshot.height), (1280, 720));
    assert_eq!(sink.count("CompositionReset"), 2);
}

#[test]
fn holders_match_reference_count() {
    let (ctx, _probe, _sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    for _ in 0..3 {
        ctx.create_output(OutputKind::Recording, &recording_spec(&id))
            .unwrap();
    }
    let composition = ctx.composition(&id).unwrap();
    let holders = ctx.composition_holders(&id).unwrap();
    if cfg!(debug_assertions) {
        assert_eq!(holders.values().sum::<usize>(), composition.ref_count());
        assert!(holders.keys().all(|tag| tag.starts_with("output:")));
    }
    assert_eq!(composition.ref_count(), 3);

    let native = ctx.composition_holders("native-audio").unwrap();
    if cfg!(debug_assertions) {
        assert_eq!(native.values().sum::<usize>(), 6);
    }
}

#[test]
fn replay_buffer_save_and_pause_rules() {
    let (ctx, probe, sink) = engine();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    let spec = OutputSpec {
        composition_id: id.clone(),
        ..OutputSpec::new(
            "Replays",
            json!({ "path": "/tmp/mixcast", "maxSeconds": 30, "maxSizeMb": 512 }),
        )
    };
    let replay = ctx.create_output(OutputKind::ReplayBuffer, &spec).unwrap().id;
    assert!(ctx.output(&replay).unwrap().is_active());

    assert!(!ctx.set_paused(&replay, true));
    assert!(ctx.save_replay_buffer(&replay));
    assert_eq!(sink.count("ReplayBufferSaved"), 1);
    assert_eq!(probe.replays_saved(probe.engine_outputs()[0]), 1);

    assert!(ctx.disable_output(&replay));
    assert!(!ctx.save_replay_buffer(&replay));
}

#[test]
fn transition_swap_keeps_audio_route() {
    let (ctx, probe, _sink) = engine();
    let snapshot = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap();
    let slot = snapshot.audio_slot.unwrap();
    let before = ctx.audio_slots().current_source(slot).unwrap();

    ctx.set_transition(&snapshot.id, TransitionKind::Fade).unwrap();
    let after = ctx.audio_slots().current_source(slot).unwrap();
    assert_ne!(before, after);
    assert!(probe.transition_alive(after));
    assert!(!probe.transition_alive(before));
}

#[test]
fn shutdown_releases_all_native_objects() {
    let (ctx, probe, _sink) = engine();
    let baseline = probe.live_counts();
    let id = ctx
        .create_composition(&CompositionSpec::new("Cam", 1280, 720))
        .unwrap()
        .id;
    ctx.create_audio_composition(&AudioCompositionSpec::new("Music"))
        .unwrap();
    ctx.create_output(OutputKind::Recording, &OutputSpec {
        enabled: true,
        ..recording_spec(&id)
    })
    .unwrap();
    assert_ne!(probe.live_counts(), baseline);

    let _host = ctx.shutdown().unwrap();
    assert_eq!(probe.live_counts(), baseline);
}

#[test]
fn json_dispatch_round_trip() {
    let (ctx, _probe, _sink) = engine();
    let created = ctx.dispatch_json(
        r#"{"request":"CreateComposition","spec":{"name":"Json","width":641,"height":361}}"#,
    );
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["width"], 640);
    assert_eq!(created["height"], 360);

    let invalid = ctx.dispatch_json(
        r#"{"request":"CreateComposition","spec":{"name":"","width":640,"height":360}}"#,
    );
    assert_eq!(invalid, Value::Null);
    assert_eq!(ctx.dispatch_json("not json"), Value::Null);

    let all = ctx.dispatch(Request::SerializeAllCompositions);
    assert!(all.get(&id).is_some());
    assert!(all.get("native").is_some());

    let removed = ctx.dispatch(Request::RemoveCompositionsByIds {
        ids: vec![id, "bogus".to_string()],
    });
    assert_eq!(removed, Value::Bool(false));
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

    #[test]
    fn create_then_remove_leaves_no_native_objects(width in 2u32..4096, height in 2u32..4096) {
        let (ctx, probe, _sink) = engine();
        let baseline = probe.live_counts();

        let snapshot = ctx
            .create_composition(&CompositionSpec::new("Prop", width, height))
            .unwrap();
        proptest::prop_assert_eq!(snapshot.width, width - width % 2);
        proptest::prop_assert_eq!(snapshot.height, height - height % 2);

        proptest::prop_assert!(ctx.remove_compositions_by_ids(&[snapshot.id]));
        proptest::prop_assert_eq!(probe.live_counts(), baseline);
    }
}
