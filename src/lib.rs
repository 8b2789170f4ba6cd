//! # Converge
//!
//! The execution core of a declarative infrastructure orchestrator.
//!
//! Given a parsed [`Config`], a persisted [`State`], and a set of
//! [`ResourceProvider`] plugins, a [`Context`] drives every declared
//! resource through four operations (validate, refresh, plan, apply)
//! by walking a dependency graph leaves-first and feeding computed
//! attributes between resources through `${...}` variable
//! interpolation.
//!
//! ## Core concepts
//!
//! - **Resource**: one addressable infrastructure object, identified by
//!   `type.name` (or `type.name.index` when counted)
//! - **Provider**: plugin that knows how to diff/apply/refresh/validate
//!   resources of certain types
//! - **Plan**: the full set of diffs plus the configuration and state
//!   at planning time
//! - **Hook**: callback invoked around lifecycle events; may halt the
//!   run cooperatively
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Config, Context, ContextOpts, PlanOpts};
//!
//! let config = Config::from_toml_str(r#"
//!     [[resources]]
//!     resource_type = "aws_instance"
//!     name = "web"
//!     raw = { ami = "ami-123" }
//! "#)?;
//!
//! let ctx = Context::new(ContextOpts {
//!     config,
//!     providers: my_provider_factories(),
//!     ..Default::default()
//! });
//!
//! let (warnings, errors) = ctx.validate();
//! assert!(errors.is_empty());
//!
//! let plan = ctx.plan(PlanOpts::default())?;
//! if !plan.diff.is_empty() {
//!     let state = ctx.apply()?;
//!     println!("{} resources", state.resources.len());
//! }
//! ```
//!
//! Partial progress is never lost: the context's state is replaced even
//! when a run returns an error, and [`Context::stop`] cancels a run
//! cooperatively without failing it.

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod graph;
pub mod hook;
pub mod plan;
pub mod provider;
pub mod state;

// Re-export main types at crate root
pub use config::{
    Config, InterpolatedVariable, OutputDecl, ProviderDecl, RawConfig, ResourceDecl,
    ResourceVariable, UserVariable, VariableDecl, UNKNOWN_VALUE,
};
pub use context::{Context, ContextOpts};
pub use diff::{AttrDiff, Diff, ResourceDiff};
pub use error::{Error, Result};
pub use graph::{Graph, Noun, NounMeta, Resource, ROOT_NOUN};
pub use hook::{Hook, HookAction};
pub use plan::{Plan, PlanOpts};
pub use provider::{ResourceConfig, ResourceProvider, ResourceProviderFactory};
pub use state::{ResourceState, State};
