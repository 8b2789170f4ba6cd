//! Lifecycle hooks.
//!
//! Hooks observe resource lifecycle events in strict order: PreRefresh
//! before PostRefresh, PreDiff before PostDiff, PreApply before
//! PostApply. Every method returns a [`HookAction`]; answering
//! [`HookAction::Halt`] makes the walker stop scheduling further
//! resources without failing the run.

use crate::diff::ResourceDiff;
use crate::state::ResourceState;
use std::sync::atomic::{AtomicBool, Ordering};

/// Verdict returned by every hook method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Keep going
    Continue,
    /// Stop scheduling further resources; the run completes cleanly
    Halt,
}

/// User callback invoked around resource lifecycle events.
///
/// All methods default to [`HookAction::Continue`], so implementations
/// only override the events they care about.
pub trait Hook: Send + Sync {
    fn pre_refresh(&self, id: &str, state: &ResourceState) -> HookAction {
        let _ = (id, state);
        HookAction::Continue
    }

    fn post_refresh(&self, id: &str, state: &ResourceState) -> HookAction {
        let _ = (id, state);
        HookAction::Continue
    }

    fn pre_diff(&self, id: &str, state: &ResourceState) -> HookAction {
        let _ = (id, state);
        HookAction::Continue
    }

    fn post_diff(&self, id: &str, diff: &ResourceDiff) -> HookAction {
        let _ = (id, diff);
        HookAction::Continue
    }

    fn pre_apply(&self, id: &str, state: &ResourceState, diff: &ResourceDiff) -> HookAction {
        let _ = (id, state, diff);
        HookAction::Continue
    }

    fn post_apply(&self, id: &str, state: &ResourceState) -> HookAction {
        let _ = (id, state);
        HookAction::Continue
    }
}

/// System hook appended after all user hooks.
///
/// Owns the cooperative stop flag: once armed via [`StopHook::stop`],
/// every event answers Halt until [`StopHook::reset`] runs at the end
/// of the run.
#[derive(Debug, Default)]
pub(crate) struct StopHook {
    armed: AtomicBool,
}

impl StopHook {
    pub(crate) fn new() -> StopHook {
        StopHook::default()
    }

    pub(crate) fn stop(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn verdict(&self) -> HookAction {
        if self.armed.load(Ordering::SeqCst) {
            HookAction::Halt
        } else {
            HookAction::Continue
        }
    }
}

impl Hook for StopHook {
    fn pre_refresh(&self, _id: &str, _state: &ResourceState) -> HookAction {
        self.verdict()
    }

    fn post_refresh(&self, _id: &str, _state: &ResourceState) -> HookAction {
        self.verdict()
    }

    fn pre_diff(&self, _id: &str, _state: &ResourceState) -> HookAction {
        self.verdict()
    }

    fn post_diff(&self, _id: &str, _diff: &ResourceDiff) -> HookAction {
        self.verdict()
    }

    fn pre_apply(&self, _id: &str, _state: &ResourceState, _diff: &ResourceDiff) -> HookAction {
        self.verdict()
    }

    fn post_apply(&self, _id: &str, _state: &ResourceState) -> HookAction {
        self.verdict()
    }
}
