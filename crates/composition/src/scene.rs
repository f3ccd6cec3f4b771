//! Scenes owned by a custom composition.

use serde::{Deserialize, Serialize};

use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_host_core::handle::SceneHandle;

/// A renderable scene graph owned by exactly one composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub handle: SceneHandle,
    pub name: String,
}

impl Scene {
    pub fn new(handle: SceneHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }
}

/// What a scene removal will do, decided before anything is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPlan {
    pub removed: Scene,
    /// Scene that becomes current first, when the removed one was current.
    pub new_current: Option<Scene>,
}

/// The scenes of a composition plus the current one.
///
/// Never empty, and the current scene is always a member.
#[derive(Debug, Clone)]
pub struct SceneSet {
    scenes: Vec<Scene>,
    current: SceneHandle,
}

impl SceneSet {
    pub fn new(initial: Scene) -> Self {
        Self {
            current: initial.handle,
            scenes: vec![initial],
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.name.clone()).collect()
    }

    pub fn handles(&self) -> Vec<SceneHandle> {
        self.scenes.iter().map(|s| s.handle).collect()
    }

    pub fn current(&self) -> &Scene {
        self.scenes
            .iter()
            .find(|s| s.handle == self.current)
            .unwrap_or(&self.scenes[0])
    }

    pub fn find(&self, name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, handle: SceneHandle) -> bool {
        self.scenes.iter().any(|s| s.handle == handle)
    }

    /// Reject an empty or already used scene name.
    pub fn check_new_name(&self, name: &str) -> MixcastResult<()> {
        if name.trim().is_empty() {
            return Err(MixcastError::validation("scene name must not be empty"));
        }
        if self.find(name).is_some() {
            return Err(MixcastError::validation(format!(
                "scene '{name}' already exists"
            )));
        }
        Ok(())
    }

    pub fn insert(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    /// Make `handle` current. Returns false if it is not a member.
    pub fn set_current(&mut self, handle: SceneHandle) -> bool {
        if !self.contains(handle) {
            return false;
        }
        self.current = handle;
        true
    }

    /// Decide how to remove `name`.
    ///
    /// Plain removal refuses the current scene. Safe removal moves the
    /// current scene to the first other scene first. Both refuse the only
    /// scene.
    pub fn plan_removal(&self, name: &str, safe: bool) -> MixcastResult<RemovalPlan> {
        let removed = self
            .find(name)
            .cloned()
            .ok_or_else(|| MixcastError::not_found("scene", name))?;
        if self.scenes.len() == 1 {
            return Err(MixcastError::invariant(format!(
                "scene '{name}' is the only scene of the composition"
            )));
        }
        if removed.handle != self.current {
            return Ok(RemovalPlan {
                removed,
                new_current: None,
            });
        }
        if !safe {
            return Err(MixcastError::invariant(format!(
                "scene '{name}' is current; switch away or use a safe removal"
            )));
        }
        let new_current = self
            .scenes
            .iter()
            .find(|s| s.handle != removed.handle)
            .cloned();
        Ok(RemovalPlan {
            removed,
            new_current,
        })
    }

    /// Apply a plan from [`SceneSet::plan_removal`].
    pub fn apply_removal(&mut self, plan: &RemovalPlan) {
        if let Some(next) = &plan.new_current {
            self.current = next.handle;
        }
        self.scenes.retain(|s| s.handle != plan.removed.handle);
    }

    /// Drop every scene in favour of `fresh`. Returns the dropped scenes.
    pub fn reset(&mut self, fresh: Scene) -> Vec<Scene> {
        self.current = fresh.handle;
        std::mem::replace(&mut self.scenes, vec![fresh])
    }
}
