//! Id-keyed output registry.
//!
//! Holds the three host-native outputs for its whole lifetime plus any
//! number of custom outputs. Removal by ids is all-or-nothing and only ever
//! applies to custom outputs.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::json;

use mixcast_common::config::OutputDefaults;
use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_composition::audio::{AudioComposition, NATIVE_AUDIO_ID};
use mixcast_composition::lease::CompositionListener;
use mixcast_composition::registry::CompositionRegistry;
use mixcast_composition::video::{VideoComposition, NATIVE_VIDEO_ID};
use mixcast_host_core::actor::EngineHandle;
use mixcast_host_core::events::EventSink;
use mixcast_host_core::host::{HostEvent, OutputKind};

use crate::output::{holder_tag, native_output_id, Output, OutputSnapshot, OutputSpec};

const KIND: &str = "output";

pub struct OutputRegistry {
    items: RwLock<BTreeMap<String, Arc<Output>>>,
    engine: EngineHandle,
    sink: Arc<dyn EventSink>,
    defaults: OutputDefaults,
}

impl OutputRegistry {
    /// A registry holding the host-native outputs, each leasing the native
    /// compositions.
    pub fn new(
        engine: EngineHandle,
        sink: Arc<dyn EventSink>,
        defaults: OutputDefaults,
        videos: &CompositionRegistry<VideoComposition>,
        audios: &CompositionRegistry<AudioComposition>,
    ) -> MixcastResult<Self> {
        let mut items = BTreeMap::new();
        for kind in OutputKind::ALL {
            let output = Output::host_native(kind, engine.clone(), Arc::clone(&sink));
            let tag = holder_tag(output.id());
            let weak: Weak<Output> = Arc::downgrade(&output);
            let listener: Weak<dyn CompositionListener> = weak;
            let video = videos.acquire(NATIVE_VIDEO_ID, Some(listener), &tag)?;
            let audio = audios.acquire(NATIVE_AUDIO_ID, None, &tag)?;
            output.attach_compositions(video, audio);
            items.insert(native_output_id(kind).to_string(), output);
        }
        Ok(Self {
            items: RwLock::new(items),
            engine,
            sink,
            defaults,
        })
    }

    /// Validate `spec`, lease its compositions and register a new custom
    /// output. The output is enabled afterwards if the spec asks for it.
    pub fn create(
        &self,
        kind: OutputKind,
        spec: &OutputSpec,
        videos: &CompositionRegistry<VideoComposition>,
        audios: &CompositionRegistry<AudioComposition>,
    ) -> MixcastResult<Arc<Output>> {
        let (name, settings) = spec.validate(kind)?;
        let id = uuid::Uuid::new_v4().to_string();
        let output = Output::custom(
            id.clone(),
            name,
            settings,
            spec.host_dependency,
            self.defaults.start_on_enable,
            self.engine.clone(),
            Arc::clone(&self.sink),
        );

        let tag = holder_tag(&id);
        let weak: Weak<Output> = Arc::downgrade(&output);
        let listener: Weak<dyn CompositionListener> = weak;
        let video = videos.acquire(&spec.composition_id, Some(listener), &tag)?;
        let audio = audios.acquire(&spec.audio_composition_id, None, &tag)?;
        output.attach_compositions(video, audio);

        self.items.write().insert(id.clone(), Arc::clone(&output));
        tracing::info!(
            id = %id,
            %kind,
            name = %output.name(),
            composition = %spec.composition_id,
            "Created output"
        );
        self.sink.publish(
            "OutputCreated",
            json!({ "outputId": id, "kind": kind, "name": output.name() }),
        );

        if spec.enabled {
            output.set_enabled(true);
        }
        Ok(output)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Output>> {
        self.items.read().get(id).cloned()
    }

    pub fn try_get(&self, id: &str) -> MixcastResult<Arc<Output>> {
        self.get(id).ok_or_else(|| MixcastError::not_found(KIND, id))
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<Output>> {
        self.items.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> MixcastResult<bool> {
        Ok(self.try_get(id)?.set_enabled(enabled))
    }

    /// Remove every listed custom output, or none of them. Removed outputs
    /// are stopped and release their composition leases.
    pub fn remove_by_ids(&self, ids: &[String]) -> MixcastResult<Vec<Arc<Output>>> {
        let removed = {
            let mut items = self.items.write();
            for id in ids {
                let output = items
                    .get(id)
                    .ok_or_else(|| MixcastError::not_found(KIND, id.as_str()))?;
                if output.is_host_native() {
                    return Err(MixcastError::invariant(format!(
                        "host output {id} cannot be removed"
                    )));
                }
            }
            ids.iter()
                .filter_map(|id| items.remove(id))
                .collect::<Vec<_>>()
        };

        for output in &removed {
            output.shutdown();
            tracing::info!(id = %output.id(), "Removed output");
            self.sink.publish(
                "OutputRemoved",
                json!({ "outputId": output.id(), "kind": output.kind() }),
            );
        }
        Ok(removed)
    }

    /// Forward a host lifecycle notification to every output.
    pub fn handle_host_event(&self, event: HostEvent) {
        for output in self.all() {
            output.on_host_event(event);
        }
    }

    /// Stop every output, custom and host-native alike.
    pub fn stop_all(&self) {
        for output in self.all() {
            output.stop();
        }
    }

    /// Stop everything and drop every output, host-native ones included.
    /// All composition leases are returned.
    pub fn shutdown(&self) -> usize {
        let drained = std::mem::take(&mut *self.items.write());
        for output in drained.values() {
            output.shutdown();
        }
        tracing::debug!(count = drained.len(), "Output registry shut down");
        drained.len()
    }

    /// Snapshots of the outputs of `kind`, or of every output.
    pub fn serialize_all(&self, kind: Option<OutputKind>) -> BTreeMap<String, OutputSnapshot> {
        self.all()
            .into_iter()
            .filter(|o| kind.map_or(true, |k| o.kind() == k))
            .map(|o| (o.id().to_string(), o.snapshot()))
            .collect()
    }
}

impl std::fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixcast_common::config::{AudioDefaults, CompositionDefaults};
    use mixcast_composition::context::CompositionContext;
    use mixcast_composition::custom::CompositionSpec;
    use mixcast_host_core::actor::EngineThread;
    use mixcast_host_core::audio::AudioSlotTable;
    use mixcast_host_core::events::MemorySink;
    use mixcast_host_core::sim::{SimProbe, SimulatedHost};

    use crate::output::OutputState;

    struct Fixture {
        _engine: EngineThread,
        probe: SimProbe,
        sink: Arc<MemorySink>,
        videos: CompositionRegistry<VideoComposition>,
        audios: CompositionRegistry<AudioComposition>,
        outputs: OutputRegistry,
        custom_id: String,
    }

    fn fixture() -> Fixture {
        let (host, probe) = SimulatedHost::new(1920, 1080);
        let engine = EngineThread::spawn(Box::new(host)).unwrap();
        let sink = Arc::new(MemorySink::new());
        let ctx = CompositionContext::new(
            engine.handle(),
            sink.clone(),
            Arc::new(AudioSlotTable::new(4)),
            CompositionDefaults::default(),
            AudioDefaults::default(),
        );
        let videos = CompositionRegistry::new(VideoComposition::native(ctx.clone()));
        let audios = CompositionRegistry::new(AudioComposition::native(ctx.clone()));
        let custom =
            VideoComposition::create_custom(&CompositionSpec::new("Vertical", 1080, 1920), ctx)
                .unwrap();
        let custom_id = custom.id().to_string();
        videos.insert(custom);
        let outputs = OutputRegistry::new(
            engine.handle(),
            sink.clone(),
            OutputDefaults::default(),
            &videos,
            &audios,
        )
        .unwrap();
        Fixture {
            _engine: engine,
            probe,
            sink,
            videos,
            audios,
            outputs,
            custom_id,
        }
    }

    fn recording_spec(fx: &Fixture, enabled: bool) -> OutputSpec {
        OutputSpec {
            composition_id: fx.custom_id.clone(),
            enabled,
            ..OutputSpec::new("Recorder", json!({ "path": "/tmp/mixcast" }))
        }
    }

    fn create(fx: &Fixture, enabled: bool) -> Arc<Output> {
        fx.outputs
            .create(OutputKind::Recording, &recording_spec(fx, enabled), &fx.videos, &fx.audios)
            .unwrap()
    }

    #[test]
    fn test_native_outputs_exist() {
        let fx = fixture();
        assert_eq!(
            fx.outputs.ids(),
            ["native-recording", "native-replay-buffer", "native-streaming"]
        );
        let holders = fx.videos.get("native").unwrap().ref_count();
        assert_eq!(holders, 3);
        assert!(fx.outputs.remove_by_ids(&["native-streaming".to_string()]).is_err());
    }

    #[test]
    fn test_create_enabled_starts_immediately() {
        let fx = fixture();
        let output = create(&fx, true);
        assert!(output.is_active());
        assert_eq!(fx.sink.count("OutputCreated"), 1);
        assert_eq!(fx.sink.count("OutputEnabled"), 1);
        assert_eq!(fx.probe.engine_outputs().len(), 1);
    }

    #[test]
    fn test_invalid_spec_touches_nothing() {
        let fx = fixture();
        let mut spec = recording_spec(&fx, true);
        spec.settings = json!({ "path": "" });
        assert!(fx
            .outputs
            .create(OutputKind::Recording, &spec, &fx.videos, &fx.audios)
            .is_err());

        let mut spec = recording_spec(&fx, true);
        spec.composition_id = "missing".to_string();
        assert!(fx
            .outputs
            .create(OutputKind::Recording, &spec, &fx.videos, &fx.audios)
            .is_err());

        assert_eq!(fx.outputs.len(), 3);
        assert_eq!(fx.videos.get(&fx.custom_id).unwrap().ref_count(), 0);
        assert!(fx.probe.engine_outputs().is_empty());
    }

    #[test]
    fn test_remove_is_all_or_nothing() {
        let fx = fixture();
        let ids: Vec<String> = (0..3).map(|_| create(&fx, false).id().to_string()).collect();

        let mut with_bad = ids.clone();
        with_bad.insert(1, "bogus".to_string());
        assert!(fx.outputs.remove_by_ids(&with_bad).is_err());
        assert_eq!(fx.outputs.len(), 6);

        assert_eq!(fx.outputs.remove_by_ids(&ids).unwrap().len(), 3);
        assert_eq!(fx.outputs.len(), 3);
        assert_eq!(fx.sink.count("OutputRemoved"), 3);
        assert_eq!(fx.videos.get(&fx.custom_id).unwrap().ref_count(), 0);
    }

    #[test]
    fn test_host_dependency_follows_host() {
        let fx = fixture();
        let spec = OutputSpec {
            host_dependency: Some(OutputKind::Streaming),
            ..recording_spec(&fx, true)
        };
        let output = fx
            .outputs
            .create(OutputKind::Recording, &spec, &fx.videos, &fx.audios)
            .unwrap();
        assert_eq!(output.state(), OutputState::Idle);

        fx.probe.start_host_output(OutputKind::Streaming);
        fx.outputs
            .handle_host_event(HostEvent::Starting(OutputKind::Streaming));
        assert!(output.is_active());
        fx.outputs
            .handle_host_event(HostEvent::Started(OutputKind::Streaming));
        assert!(fx.outputs.get("native-streaming").unwrap().is_active());

        fx.probe.stop_host_output(OutputKind::Streaming);
        fx.outputs
            .handle_host_event(HostEvent::Stopped(OutputKind::Streaming));
        assert!(!output.is_active());
        assert!(!fx.outputs.get("native-streaming").unwrap().is_active());
    }

    #[test]
    fn test_serialize_by_kind() {
        let fx = fixture();
        create(&fx, false);
        let recordings = fx.outputs.serialize_all(Some(OutputKind::Recording));
        assert_eq!(recordings.len(), 2);
        assert!(recordings.values().all(|s| s.kind == OutputKind::Recording));
        assert_eq!(fx.outputs.serialize_all(None).len(), 4);
    }

    #[test]
    fn test_shutdown_returns_every_lease() {
        let fx = fixture();
        create(&fx, true);
        assert_eq!(fx.outputs.shutdown(), 4);
        assert_eq!(fx.videos.get("native").unwrap().ref_count(), 0);
        assert_eq!(fx.audios.get("native-audio").unwrap().ref_count(), 0);
        assert_eq!(fx.videos.get(&fx.custom_id).unwrap().ref_count(), 0);
        assert!(fx.probe.engine_outputs().is_empty());
    }
}
