//! Execution plans.
//!
//! A [`Plan`] captures everything needed to apply a set of changes
//! later: the configuration, the user variables, the state snapshot at
//! plan time, and the computed diff.

use crate::config::Config;
use crate::diff::Diff;
use crate::error::Result;
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;

/// Options controlling plan generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOpts {
    /// Plan the destruction of every existing resource instead of
    /// converging on the configuration.
    pub destroy: bool,
}

/// A saved execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub config: Config,
    /// User variables the plan was computed with
    pub vars: BTreeMap<String, String>,
    /// State snapshot at plan time
    pub state: State,
    pub diff: Diff,
}

impl Plan {
    /// Read a plan blob from JSON.
    pub fn read(reader: impl io::Read) -> Result<Plan> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write this plan as pretty-printed JSON.
    pub fn write(&self, writer: impl io::Write) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
