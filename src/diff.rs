//! Resource diffs.
//!
//! A [`ResourceDiff`] is the delta a provider computed between a
//! resource's observed state and its desired configuration; a [`Diff`]
//! collects them across a whole plan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The change planned for one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrDiff {
    /// Observed value
    #[serde(default)]
    pub old: String,
    /// Desired value
    #[serde(default)]
    pub new: String,
    /// The new value is only known after apply
    #[serde(default)]
    pub new_computed: bool,
    /// Changing this attribute forces replacement of the resource
    #[serde(default)]
    pub requires_new: bool,
}

/// The delta computed for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// The resource is to be destroyed
    #[serde(default)]
    pub destroy: bool,
    /// Per-attribute changes
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrDiff>,
}

impl ResourceDiff {
    /// True iff the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        !self.destroy && self.attributes.is_empty()
    }

    /// Whether any attribute change forces replacement.
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|a| a.requires_new)
    }

    /// Check that a diff recomputed at apply time still describes the
    /// change this (planned) diff promised.
    ///
    /// The destroy flag and the attribute key sets must match, and any
    /// attribute the plan did not mark computed must carry the same new
    /// value. Computed attributes are exempt from the value check, since
    /// apply-time interpolation resolves them.
    pub fn same_as(&self, other: &ResourceDiff) -> Result<(), String> {
        if self.destroy != other.destroy {
            return Err(format!(
                "destroy flag changed from {} to {}",
                self.destroy, other.destroy
            ));
        }
        for key in self.attributes.keys() {
            if !other.attributes.contains_key(key) {
                return Err(format!("attribute '{}' missing from recomputed diff", key));
            }
        }
        for key in other.attributes.keys() {
            if !self.attributes.contains_key(key) {
                return Err(format!("unplanned attribute '{}' in recomputed diff", key));
            }
        }
        for (key, planned) in &self.attributes {
            if planned.new_computed {
                continue;
            }
            // Key presence was checked above.
            if let Some(actual) = other.attributes.get(key) {
                if planned.new != actual.new {
                    return Err(format!(
                        "attribute '{}' changed from '{}' to '{}'",
                        key, planned.new, actual.new
                    ));
                }
            }
        }
        Ok(())
    }
}

/// All diffs produced by a plan, keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDiff>,
}

impl Diff {
    /// True iff no resource has a pending change.
    pub fn is_empty(&self) -> bool {
        self.resources.values().all(|d| d.is_empty())
    }
}
