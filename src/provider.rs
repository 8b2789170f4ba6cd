//! Resource provider traits.
//!
//! A [`ResourceProvider`] is the plugin seam: it knows how to validate,
//! diff, apply, and refresh resources of certain types. Providers are
//! handed a [`ResourceConfig`] view of the interpolated configuration
//! and must be re-entrant across distinct resources; the engine never
//! calls a provider concurrently for the same resource.

use crate::config::{RawConfig, UNKNOWN_VALUE};
use crate::diff::ResourceDiff;
use crate::state::ResourceState;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Interpolated configuration handed to providers.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    /// Resolved attribute values
    pub attrs: BTreeMap<String, String>,
    /// Attributes whose value is not yet known (unresolved references
    /// or the unknown sentinel)
    pub computed_keys: BTreeSet<String>,
}

impl ResourceConfig {
    /// Build the provider view of a raw config in its current
    /// (resolved or raw) form.
    pub fn new(raw: &RawConfig) -> ResourceConfig {
        let attrs = raw.attrs().clone();
        let computed_keys = attrs
            .iter()
            .filter(|(_, v)| v.contains(UNKNOWN_VALUE) || v.contains("${"))
            .map(|(k, _)| k.clone())
            .collect();
        ResourceConfig {
            attrs,
            computed_keys,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Whether this attribute's value is still unknown.
    pub fn is_computed(&self, key: &str) -> bool {
        self.computed_keys.contains(key)
    }
}

/// Capability interface the execution core consumes.
///
/// Implementations run behind an `Arc` and may be invoked from multiple
/// worker threads for distinct resources. The fallible operations speak
/// `anyhow::Result` so implementations can surface whatever error type
/// their backend produces; the engine wraps failures with the resource
/// id before reporting them.
pub trait ResourceProvider: Send + Sync {
    /// Validate the provider's own configuration block. Returns
    /// warnings and errors; both empty means valid.
    fn validate(&self, config: &ResourceConfig) -> (Vec<String>, Vec<String>) {
        let _ = config;
        (Vec::new(), Vec::new())
    }

    /// Validate the configuration of a single resource of the given
    /// type.
    fn validate_resource(
        &self,
        resource_type: &str,
        config: &ResourceConfig,
    ) -> (Vec<String>, Vec<String>) {
        let _ = (resource_type, config);
        (Vec::new(), Vec::new())
    }

    /// Configure the provider itself. Called once per walk before any
    /// resource of this provider is visited.
    fn configure(&self, config: &ResourceConfig) -> anyhow::Result<()> {
        let _ = config;
        Ok(())
    }

    /// Compute the delta between observed state and desired
    /// configuration.
    fn diff(
        &self,
        state: &ResourceState,
        config: &ResourceConfig,
    ) -> anyhow::Result<ResourceDiff>;

    /// Apply a diff. `None` means the resource no longer exists.
    fn apply(
        &self,
        state: &ResourceState,
        diff: &ResourceDiff,
    ) -> anyhow::Result<Option<ResourceState>>;

    /// Re-read the live state of a resource. `None` is treated as an
    /// empty state.
    fn refresh(&self, state: &ResourceState) -> anyhow::Result<Option<ResourceState>>;
}

/// Zero-argument constructor for a provider.
///
/// Factories run once per graph build; the produced provider instance
/// is shared by every resource the provider serves in that run.
pub trait ResourceProviderFactory: Send + Sync {
    fn open(&self) -> anyhow::Result<Arc<dyn ResourceProvider>>;
}

impl<F> ResourceProviderFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn ResourceProvider>> + Send + Sync,
{
    fn open(&self) -> anyhow::Result<Arc<dyn ResourceProvider>> {
        self()
    }
}
