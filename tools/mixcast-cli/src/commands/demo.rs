//! Scripted session against the simulated host.

use std::sync::Arc;

use serde_json::json;

use mixcast_common::config::EngineConfig;
use mixcast_composition::custom::CompositionSpec;
use mixcast_engine::EngineContext;
use mixcast_host_core::events::TracingSink;
use mixcast_host_core::host::{HostEvent, OutputKind, TransitionKind};
use mixcast_host_core::sim::SimulatedHost;
use mixcast_output::output::OutputSpec;

pub fn run(config: EngineConfig, width: u32, height: u32) -> anyhow::Result<()> {
    let (host, probe) = SimulatedHost::new(width, height);
    let baseline = probe.live_counts();
    let ctx = EngineContext::start(Box::new(host), config, Arc::new(TracingSink))
        .map_err(|e| anyhow::anyhow!("Failed to start engine: {e}"))?;

    println!("Host canvas: {width}x{height}");
    println!();

    let vertical = ctx.create_composition(&CompositionSpec::new("Vertical", height, width))?;
    println!(
        "Created composition {} ({}x{})",
        vertical.name, vertical.width, vertical.height
    );

    ctx.add_scene(&vertical.id, "Close-up")?;
    ctx.set_transition(&vertical.id, TransitionKind::Fade)?;
    ctx.set_current_scene(&vertical.id, "Close-up")?;
    let completed = probe.complete_transitions();
    println!("Switched to Close-up ({completed} transition(s) completed)");

    let recorder = ctx.create_output(
        OutputKind::Recording,
        &OutputSpec {
            composition_id: vertical.id.clone(),
            ..OutputSpec::new(
                "Vertical recording",
                json!({ "path": std::env::temp_dir(), "format": "mp4" }),
            )
        },
    )?;
    let streamer = ctx.create_output(
        OutputKind::Streaming,
        &OutputSpec {
            composition_id: vertical.id.clone(),
            host_dependency: Some(OutputKind::Streaming),
            ..OutputSpec::new(
                "Vertical stream",
                json!({ "server": "rtmp://live.example.com/app", "key": "demo" }),
            )
        },
    )?;
    println!("Created outputs {} and {}", recorder.name, streamer.name);

    probe.start_host_output(OutputKind::Streaming);
    ctx.handle_host_event(HostEvent::Starting(OutputKind::Streaming));
    ctx.handle_host_event(HostEvent::Started(OutputKind::Streaming));
    println!();

    println!("Compositions:");
    println!(
        "{}",
        serde_json::to_string_pretty(&ctx.serialize_all_compositions())?
    );
    println!();
    println!("Outputs:");
    println!(
        "{}",
        serde_json::to_string_pretty(&ctx.serialize_all_outputs(None))?
    );
    println!();

    let holders = ctx.composition_holders(&vertical.id)?;
    println!("Holders of {}: {holders:?}", vertical.name);
    let refused = !ctx.remove_compositions_by_ids(std::slice::from_ref(&vertical.id));
    println!("Removal while leased refused: {refused}");

    ctx.handle_host_event(HostEvent::Stopping(OutputKind::Streaming));
    probe.stop_host_output(OutputKind::Streaming);
    ctx.handle_host_event(HostEvent::Stopped(OutputKind::Streaming));
    ctx.handle_host_event(HostEvent::ApplicationExiting);

    let removed = ctx.remove_outputs_by_ids(&[recorder.id, streamer.id])
        && ctx.remove_compositions_by_ids(&[vertical.id]);
    println!("Outputs and composition removed: {removed}");

    ctx.shutdown()
        .map_err(|e| anyhow::anyhow!("Engine shutdown failed: {e}"))?;
    let left = probe.live_counts();
    println!(
        "Native objects after shutdown: {left:?} (baseline {baseline:?}, {})",
        if left == baseline { "clean" } else { "leaked" }
    );
    Ok(())
}
