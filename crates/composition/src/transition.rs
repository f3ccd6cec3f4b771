//! Scene-switch planning.
//!
//! A composition's transition node is either idle on one scene or blending
//! towards a target. Switching while a blend is in flight replaces the
//! target in place: there is no queue and the last request wins. The blend
//! keeps its elapsed time.

use serde::{Deserialize, Serialize};

use mixcast_host_core::handle::{SceneHandle, TransitionHandle};
use mixcast_host_core::host::{HostEngine, TransitionPhase};

/// What a scene switch does to the transition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPlan {
    /// Target is already where the node is headed.
    Noop,
    /// Hard cut, no blend.
    Cut(SceneHandle),
    /// Start a timed blend from the current scene.
    Start {
        target: SceneHandle,
        duration_ms: u32,
    },
    /// Replace the destination of the in-flight blend.
    Retarget(SceneHandle),
}

/// Decide how to reach `target` from the node's observed phase.
pub fn plan_switch(
    phase: Option<TransitionPhase>,
    target: SceneHandle,
    duration_ms: u32,
) -> SwitchPlan {
    match phase {
        Some(TransitionPhase::InFlight { to, .. }) if to == target => SwitchPlan::Noop,
        Some(TransitionPhase::InFlight { .. }) => SwitchPlan::Retarget(target),
        Some(TransitionPhase::Idle {
            showing: Some(showing),
        }) if showing == target => SwitchPlan::Noop,
        Some(TransitionPhase::Idle { showing: Some(_) }) if duration_ms > 0 => SwitchPlan::Start {
            target,
            duration_ms,
        },
        _ => SwitchPlan::Cut(target),
    }
}

/// Run a plan against the host. Returns false if the host refused it.
pub fn execute_switch(
    host: &mut dyn HostEngine,
    transition: TransitionHandle,
    plan: SwitchPlan,
) -> bool {
    match plan {
        SwitchPlan::Noop => true,
        SwitchPlan::Cut(target) => {
            host.transition_set_scene(transition, Some(target));
            true
        }
        SwitchPlan::Start {
            target,
            duration_ms,
        } => host.transition_start(transition, duration_ms, target),
        SwitchPlan::Retarget(target) => host.transition_retarget(transition, target),
    }
}

/// Observable transition state, with scenes named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransitionStatus {
    Idle {
        showing: Option<String>,
    },
    InFlight {
        from: Option<String>,
        to: String,
        progress: f64,
    },
}

impl TransitionStatus {
    /// Name a host phase through `name_of`.
    pub fn describe(phase: TransitionPhase, name_of: impl Fn(SceneHandle) -> Option<String>) -> Self {
        match phase {
            TransitionPhase::Idle { showing } => TransitionStatus::Idle {
                showing: showing.and_then(&name_of),
            },
            TransitionPhase::InFlight { from, to, progress } => TransitionStatus::InFlight {
                from: from.and_then(&name_of),
                to: name_of(to).unwrap_or_default(),
                progress,
            },
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransitionStatus::InFlight { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SceneHandle = SceneHandle(1);
    const B: SceneHandle = SceneHandle(2);
    const C: SceneHandle = SceneHandle(3);

    fn idle(scene: SceneHandle) -> Option<TransitionPhase> {
        Some(TransitionPhase::Idle {
            showing: Some(scene),
        })
    }

    fn blending(from: SceneHandle, to: SceneHandle) -> Option<TransitionPhase> {
        Some(TransitionPhase::InFlight {
            from: Some(from),
            to,
            progress: 0.5,
        })
    }

    #[test]
    fn test_idle_switch_starts_blend() {
        assert_eq!(
            plan_switch(idle(A), B, 300),
            SwitchPlan::Start {
                target: B,
                duration_ms: 300
            }
        );
        assert_eq!(plan_switch(idle(A), A, 300), SwitchPlan::Noop);
    }

    #[test]
    fn test_zero_duration_cuts() {
        assert_eq!(plan_switch(idle(A), B, 0), SwitchPlan::Cut(B));
    }

    #[test]
    fn test_empty_node_cuts() {
        let empty = Some(TransitionPhase::Idle { showing: None });
        assert_eq!(plan_switch(empty, B, 300), SwitchPlan::Cut(B));
        assert_eq!(plan_switch(None, B, 300), SwitchPlan::Cut(B));
    }

    #[test]
    fn test_in_flight_switch_retargets() {
        assert_eq!(plan_switch(blending(A, B), C, 300), SwitchPlan::Retarget(C));
        assert_eq!(plan_switch(blending(A, B), A, 300), SwitchPlan::Retarget(A));
        assert_eq!(plan_switch(blending(A, B), B, 300), SwitchPlan::Noop);
    }

    #[test]
    fn test_status_names_scenes() {
        let status = TransitionStatus::describe(
            TransitionPhase::InFlight {
                from: Some(A),
                to: B,
                progress: 0.25,
            },
            |s| Some(format!("scene-{}", s.raw())),
        );
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "state": "in_flight",
                "from": "scene-1",
                "to": "scene-2",
                "progress": 0.25
            })
        );
    }
}
