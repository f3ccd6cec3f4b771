//! Dispatch a file of JSON requests against the simulated host.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use mixcast_common::config::EngineConfig;
use mixcast_engine::{EngineContext, Request};
use mixcast_host_core::events::TracingSink;
use mixcast_host_core::host::HostEvent;
use mixcast_host_core::sim::{SimProbe, SimulatedHost};

const CANVAS: (u32, u32) = (1920, 1080);

pub fn run(config: EngineConfig, path: PathBuf, compact: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let requests: Vec<Value> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a JSON array: {e}", path.display()))?;

    let (host, probe) = SimulatedHost::new(CANVAS.0, CANVAS.1);
    let ctx = EngineContext::start(Box::new(host), config, Arc::new(TracingSink))
        .map_err(|e| anyhow::anyhow!("Failed to start engine: {e}"))?;

    for (index, raw) in requests.into_iter().enumerate() {
        let response = match serde_json::from_value::<Request>(raw) {
            Ok(request) => {
                tracing::info!(index, request = request.name(), "Request");
                if let Request::HostEvent { event } = &request {
                    drive_host(&probe, *event);
                }
                ctx.dispatch(request)
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping unparseable request");
                Value::Null
            }
        };
        let rendered = if compact {
            serde_json::to_string(&response)?
        } else {
            serde_json::to_string_pretty(&response)?
        };
        println!("[{index}] {rendered}");
    }

    ctx.shutdown()
        .map_err(|e| anyhow::anyhow!("Engine shutdown failed: {e}"))?;
    Ok(())
}

/// Mirror host output lifecycle events onto the simulated host so the
/// host-native outputs have something to attach to.
fn drive_host(probe: &SimProbe, event: HostEvent) {
    match event {
        HostEvent::Started(kind) => {
            probe.start_host_output(kind);
        }
        HostEvent::Stopped(kind) => {
            probe.stop_host_output(kind);
        }
        _ => {}
    }
}
