//! Scope guard for multi-step native construction.
//!
//! Every resource acquired through the guard is recorded. If the guard is
//! dropped without [`Rollback::commit`], the recorded resources are released
//! in reverse acquisition order, so an early `?` return cannot leak.

use crate::handle::{
    AudioMixHandle, EncoderHandle, OutputHandle, SceneHandle, TransitionHandle, ViewHandle,
};
use crate::host::HostEngine;

/// A native resource (or binding) that must be undone on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Scene(SceneHandle),
    Transition(TransitionHandle),
    TransitionSignals(TransitionHandle),
    View(ViewHandle),
    ViewSource(ViewHandle),
    Encoder(EncoderHandle),
    AudioMix(AudioMixHandle),
    Output(OutputHandle),
    OutputEncoders(OutputHandle),
    OutputSignals(OutputHandle),
}

impl Acquired {
    /// Undo this acquisition.
    pub fn release(self, host: &mut dyn HostEngine) {
        match self {
            Acquired::Scene(scene) => host.release_scene(scene),
            Acquired::Transition(transition) => host.release_transition(transition),
            Acquired::TransitionSignals(transition) => {
                host.disconnect_transition_signals(transition)
            }
            Acquired::View(view) => host.release_view(view),
            Acquired::ViewSource(view) => host.view_set_source(view, None),
            Acquired::Encoder(encoder) => host.release_encoder(encoder),
            Acquired::AudioMix(mix) => host.release_audio_mix(mix),
            Acquired::Output(output) => {
                host.output_force_stop(output);
                host.release_output(output);
            }
            Acquired::OutputEncoders(output) => host.output_unbind_encoders(output),
            Acquired::OutputSignals(output) => host.disconnect_output_signals(output),
        }
    }
}

/// Records acquisitions against a host and unwinds them unless committed.
pub struct Rollback<'a> {
    host: &'a mut dyn HostEngine,
    acquired: Vec<Acquired>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    pub fn new(host: &'a mut dyn HostEngine) -> Self {
        Self {
            host,
            acquired: Vec::new(),
            committed: false,
        }
    }

    /// The guarded host.
    pub fn host(&mut self) -> &mut dyn HostEngine {
        &mut *self.host
    }

    /// Record an acquisition to undo on failure.
    pub fn track(&mut self, acquired: Acquired) {
        self.acquired.push(acquired);
    }

    /// Keep everything acquired so far.
    pub fn commit(mut self) {
        self.committed = true;
    }

    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.committed || self.acquired.is_empty() {
            return;
        }
        tracing::debug!(
            resources = self.acquired.len(),
            "Unwinding partially constructed native resources"
        );
        while let Some(acquired) = self.acquired.pop() {
            acquired.release(&mut *self.host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TransitionKind;
    use crate::sim::SimulatedHost;
    use mixcast_common::error::{MixcastError, MixcastResult};

    fn build(host: &mut dyn HostEngine, fail_late: bool) -> MixcastResult<ViewHandle> {
        let mut guard = Rollback::new(host);
        let transition = guard
            .host()
            .create_transition(TransitionKind::Cut, 1280, 720)?;
        guard.track(Acquired::Transition(transition));
        let view = guard.host().create_view(1280, 720)?;
        guard.track(Acquired::View(view));
        guard.host().view_set_source(view, Some(transition));
        guard.track(Acquired::ViewSource(view));
        if fail_late {
            return Err(MixcastError::resource("late failure"));
        }
        guard.commit();
        Ok(view)
    }

    #[test]
    fn test_uncommitted_guard_releases_everything() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let before = probe.live_counts();

        assert!(build(&mut host, true).is_err());
        assert_eq!(probe.live_counts(), before);

        let log = probe.call_log();
        let view_release = log.iter().position(|c| c.starts_with("release_view"));
        let transition_release = log.iter().position(|c| c.starts_with("release_transition"));
        assert!(view_release.unwrap() < transition_release.unwrap());
    }

    #[test]
    fn test_committed_guard_keeps_resources() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let before = probe.live_counts();

        build(&mut host, false).unwrap();
        let after = probe.live_counts();
        assert_eq!(after.views, before.views + 1);
        assert_eq!(after.transitions, before.transitions + 1);
    }
}
