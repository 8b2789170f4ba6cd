//! Persisted resource state.
//!
//! [`State`] is the ground truth a run starts from: a mapping from
//! resource id to [`ResourceState`], plus the outputs computed by the
//! last successful apply. A run builds a fresh copy and atomically
//! replaces the context's state when it returns, even on error, so
//! partial progress is never lost.

use crate::config::UNKNOWN_VALUE;
use crate::diff::ResourceDiff;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

/// Full persisted state: every known resource plus computed outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Resource states keyed by id (`type.name` or `type.name.index`)
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Output values from the last successful apply; `None` means
    /// outputs were never computed, which is distinct from an empty map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, String>>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    /// Read a state blob from JSON.
    pub fn read(reader: impl io::Read) -> Result<State> {
        let state: State = serde_json::from_reader(reader)?;
        log::debug!("read state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Write this state as pretty-printed JSON.
    pub fn write(&self, writer: impl io::Write) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// State of a single resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type tag, e.g. `aws_instance`
    #[serde(default)]
    pub resource_type: String,
    /// Provider-assigned id; empty means the resource does not exist
    #[serde(default)]
    pub id: String,
    /// Attribute values as last observed
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Extra metadata keys recorded by the provider
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub extra: BTreeSet<String>,
}

impl ResourceState {
    /// Whether the resource exists (has a provider-assigned id).
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Produce the hypothetical post-apply state for a diff.
    ///
    /// Used during planning so later resources interpolate against the
    /// values this resource will have once the diff is applied.
    /// Computed-but-unknown attributes come through as the
    /// [`UNKNOWN_VALUE`] sentinel.
    pub fn merge_diff(&self, diff: &ResourceDiff) -> ResourceState {
        let mut result = self.clone();
        if diff.destroy {
            result.id = String::new();
            result.attributes.clear();
        }
        for (key, attr) in &diff.attributes {
            let value = if attr.new_computed {
                UNKNOWN_VALUE.to_string()
            } else {
                attr.new.clone()
            };
            result.attributes.insert(key.clone(), value);
        }
        result
    }
}
