//! The execution context.
//!
//! A [`Context`] owns everything needed to operate on infrastructure:
//! the configuration, the persisted state, the provider factories, the
//! user variables, and the hooks. Each of the four operations (validate,
//! refresh, plan, apply) builds a dependency graph and walks it
//! leaves-first, feeding computed attributes forward through the
//! variable store as resources complete.
//!
//! At most one of refresh/plan/apply runs at a time per context;
//! concurrent callers block on the run gate. [`Context::stop`]
//! cooperatively cancels the active run: in-flight provider calls
//! finish, everything not yet started becomes a no-op, and the partial
//! state is kept.

use crate::config::{Config, InterpolatedVariable, RawConfig, UNKNOWN_VALUE};
use crate::diff::{Diff, ResourceDiff};
use crate::error::{Error, Result};
use crate::graph::{self, Graph, Noun, NounMeta, Resource};
use crate::hook::{Hook, HookAction, StopHook};
use crate::plan::{Plan, PlanOpts};
use crate::provider::{ResourceConfig, ResourceProviderFactory};
use crate::state::State;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

/// Everything needed to create a [`Context`].
///
/// The values are moved in; mutating the originals afterwards has no
/// effect on the context.
#[derive(Default)]
pub struct ContextOpts {
    pub config: Config,
    /// Diff to apply, normally produced by a prior plan
    pub diff: Option<Diff>,
    pub hooks: Vec<Arc<dyn Hook>>,
    /// Prior state; `None` means nothing exists yet
    pub state: Option<State>,
    /// Provider factories keyed by provider name (type prefix)
    pub providers: BTreeMap<String, Arc<dyn ResourceProviderFactory>>,
    /// User variable values, unprefixed
    pub variables: BTreeMap<String, String>,
}

impl ContextOpts {
    /// Seed options from a saved plan: its config, variables, state
    /// snapshot, and diff. The caller supplies providers and hooks,
    /// then the resulting context can apply the plan directly.
    pub fn from_plan(plan: &Plan) -> ContextOpts {
        ContextOpts {
            config: plan.config.clone(),
            diff: Some(plan.diff.clone()),
            state: Some(plan.state.clone()),
            variables: plan.vars.clone(),
            ..Default::default()
        }
    }
}

struct Shared {
    state: Option<State>,
    diff: Option<Diff>,
    running: bool,
}

/// The reentrant coordinator driving resource lifecycles.
pub struct Context {
    config: Config,
    hooks: Vec<Arc<dyn Hook>>,
    providers: BTreeMap<String, Arc<dyn ResourceProviderFactory>>,
    variables: BTreeMap<String, String>,
    shared: Mutex<Shared>,
    run_done: Condvar,
    stop_hook: Arc<StopHook>,
}

impl Context {
    /// Create a new context. The system stop hook is appended after the
    /// supplied hooks so user hooks always see an event first.
    pub fn new(opts: ContextOpts) -> Context {
        let stop_hook = Arc::new(StopHook::new());
        let mut hooks = opts.hooks;
        hooks.push(stop_hook.clone() as Arc<dyn Hook>);

        Context {
            config: opts.config,
            hooks,
            providers: opts.providers,
            variables: opts.variables,
            shared: Mutex::new(Shared {
                state: opts.state,
                diff: opts.diff,
                running: false,
            }),
            run_done: Condvar::new(),
            stop_hook,
        }
    }

    /// Snapshot of the current state. Populated after any run, even one
    /// that returned an error, so partial progress can be inspected.
    pub fn state(&self) -> Option<State> {
        self.shared.lock().unwrap().state.clone()
    }

    /// Validate the configuration, the user variables, and every
    /// resource and provider config through the providers.
    ///
    /// The walk never short-circuits: all diagnostics are collected.
    /// Does not touch state, diff, or variables, and does not take the
    /// run gate.
    pub fn validate(&self) -> (Vec<String>, Vec<Error>) {
        let mut errs: Vec<Error> = Vec::new();
        errs.extend(self.config.validate());
        errs.extend(self.check_variables());

        let graph = match self.graph(true) {
            Ok(g) => g,
            Err(e) => {
                errs.push(e);
                return (Vec::new(), errs);
            }
        };

        let warns = Mutex::new(Vec::new());
        let walk_errs = Mutex::new(Vec::new());
        let walk_result = graph.walk(|noun| {
            self.validate_noun(noun, &warns, &walk_errs);
            Ok(())
        });
        if let Err(e) = walk_result {
            errs.push(e);
        }
        errs.extend(walk_errs.into_inner().unwrap());
        (warns.into_inner().unwrap(), errs)
    }

    /// Refresh every resource to its live state.
    ///
    /// The context's state is replaced with the result even when a
    /// provider fails part way; the error is returned and the partial
    /// state is available via [`Context::state`].
    pub fn refresh(&self) -> Result<State> {
        self.acquire_run();
        let result = self.refresh_inner();
        self.release_run();
        result
    }

    /// Compute an execution plan and install its diff on the context so
    /// apply can follow immediately.
    pub fn plan(&self, opts: PlanOpts) -> Result<Plan> {
        self.acquire_run();
        let result = self.plan_inner(opts);
        self.release_run();
        result
    }

    /// Apply the current diff and return the resulting state.
    ///
    /// The context's state is replaced even on error. Outputs are
    /// computed only when the walk finished cleanly.
    pub fn apply(&self) -> Result<State> {
        self.acquire_run();
        let result = self.apply_inner();
        self.release_run();
        result
    }

    /// Request cooperative cancellation of the active run, then block
    /// until it completes. Returns immediately when nothing is running.
    pub fn stop(&self) {
        let mut sh = self.shared.lock().unwrap();
        if !sh.running {
            return;
        }
        log::info!("stop requested, waiting for the active run");
        self.stop_hook.stop();
        while sh.running {
            sh = self.run_done.wait(sh).unwrap();
        }
    }

    // ------------------------------------------------------------------
    // Run gate
    // ------------------------------------------------------------------

    fn acquire_run(&self) {
        let mut sh = self.shared.lock().unwrap();
        while sh.running {
            sh = self.run_done.wait(sh).unwrap();
        }
        sh.running = true;
    }

    fn release_run(&self) {
        {
            let mut sh = self.shared.lock().unwrap();
            sh.running = false;
            self.stop_hook.reset();
        }
        self.run_done.notify_all();
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn refresh_inner(&self) -> Result<State> {
        let graph = self.graph(false)?;
        let result = Mutex::new(State::new());

        let walk_result = self.generic_walk(&graph, |ws, r| {
            if self.hook_halted(ws, |h| h.pre_refresh(&r.id, &r.state)) {
                return Ok(BTreeMap::new());
            }
            log::debug!("{}: refreshing", r.id);
            let rs = r
                .provider
                .refresh(&r.state)
                .map_err(|e| Error::Provider {
                    id: r.id.clone(),
                    source: e,
                })?;
            let mut rs = rs.unwrap_or_default();
            rs.resource_type = r.resource_type.clone();
            result.lock().unwrap().resources.insert(r.id.clone(), rs.clone());
            self.hook_halted(ws, |h| h.post_refresh(&r.id, &rs));
            Ok(BTreeMap::new())
        });

        let state = result.into_inner().unwrap();
        self.shared.lock().unwrap().state = Some(state.clone());
        walk_result?;
        Ok(state)
    }

    fn plan_inner(&self, opts: PlanOpts) -> Result<Plan> {
        let graph = self.graph(false)?;
        let prior = self.shared.lock().unwrap().state.clone().unwrap_or_default();
        let result = Mutex::new(Plan {
            config: self.config.clone(),
            vars: self.variables.clone(),
            state: prior,
            diff: Diff::default(),
        });

        let walk_result = self.generic_walk(&graph, |ws, r| {
            if self.hook_halted(ws, |h| h.pre_diff(&r.id, &r.state)) {
                return Ok(BTreeMap::new());
            }

            let diff = if opts.destroy {
                if r.state.exists() {
                    log::debug!("{}: marking for destroy", r.id);
                    ResourceDiff {
                        destroy: true,
                        ..Default::default()
                    }
                } else {
                    ResourceDiff::default()
                }
            } else if let Some(config) = &r.config {
                log::debug!("{}: computing diff", r.id);
                r.provider.diff(&r.state, config).map_err(|e| Error::Provider {
                    id: r.id.clone(),
                    source: e,
                })?
            } else {
                // Orphan: present in state, gone from config.
                log::debug!("{}: orphan, marking for destroy", r.id);
                ResourceDiff {
                    destroy: true,
                    ..Default::default()
                }
            };

            if !diff.is_empty() {
                result
                    .lock()
                    .unwrap()
                    .diff
                    .resources
                    .insert(r.id.clone(), diff.clone());
            }

            if self.hook_halted(ws, |h| h.post_diff(&r.id, &diff)) {
                return Ok(BTreeMap::new());
            }

            // Later resources interpolate against the hypothetical
            // post-apply values, unknown markers included.
            if !diff.is_empty() {
                r.state = r.state.merge_diff(&diff);
            }
            Ok(r.vars())
        });

        let plan = result.into_inner().unwrap();
        self.shared.lock().unwrap().diff = Some(plan.diff.clone());
        walk_result?;
        Ok(plan)
    }

    fn apply_inner(&self) -> Result<State> {
        let graph = self.graph(true)?;

        // Preserve prior resources so untouched entries survive.
        let mut seed = State::new();
        {
            let sh = self.shared.lock().unwrap();
            if let Some(prior) = &sh.state {
                seed.resources = prior.resources.clone();
            }
        }
        let result = Mutex::new(seed);

        let walk_result = self.generic_walk(&graph, |ws, r| {
            let planned = r.diff.clone().unwrap_or_default();
            if planned.is_empty() {
                // No-op nodes still export their variables.
                return Ok(r.vars());
            }

            let diff = if planned.destroy {
                planned
            } else {
                // Re-diff to pick up interpolation done after planning,
                // then hold the provider to what was planned.
                let fallback = ResourceConfig::default();
                let config = r.config.as_ref().unwrap_or(&fallback);
                let recomputed =
                    r.provider.diff(&r.state, config).map_err(|e| Error::Provider {
                        id: r.id.clone(),
                        source: e,
                    })?;
                if let Err(reason) = planned.same_as(&recomputed) {
                    return Err(Error::DiffMismatch {
                        id: r.id.clone(),
                        reason,
                    });
                }
                recomputed
            };

            if self.hook_halted(ws, |h| h.pre_apply(&r.id, &r.state, &diff)) {
                return Ok(BTreeMap::new());
            }

            log::debug!("{}: executing apply", r.id);
            let rs = r.provider.apply(&r.state, &diff).map_err(|e| Error::Provider {
                id: r.id.clone(),
                source: e,
            })?;
            let mut rs = rs.unwrap_or_default();
            rs.resource_type = r.resource_type.clone();

            // An unknown sentinel surviving apply is an error; drop the
            // attribute but keep the resource.
            let mut errs = Vec::new();
            rs.attributes.retain(|key, value| {
                if value == UNKNOWN_VALUE {
                    errs.push(Error::UnknownValue(key.clone()));
                    false
                } else {
                    true
                }
            });

            {
                let mut out = result.lock().unwrap();
                if rs.id.is_empty() {
                    out.resources.remove(&r.id);
                } else {
                    out.resources.insert(r.id.clone(), rs.clone());
                }
            }
            r.state = rs;

            if self.hook_halted(ws, |h| h.post_apply(&r.id, &r.state)) {
                return Ok(BTreeMap::new());
            }
            if !errs.is_empty() {
                return Err(Error::multi(errs));
            }
            Ok(r.vars())
        });

        let mut state = result.into_inner().unwrap();
        let mut err = walk_result.err();

        if err.is_none() && !self.config.outputs.is_empty() {
            let mut outputs = BTreeMap::new();
            for output in &self.config.outputs {
                match self.compute_vars(&state, &output.raw) {
                    Ok(attrs) => {
                        outputs.insert(
                            output.name.clone(),
                            attrs.get("value").cloned().unwrap_or_default(),
                        );
                    }
                    Err(e) => {
                        err = Some(e);
                        break;
                    }
                }
            }
            state.outputs = Some(outputs);
        }

        self.shared.lock().unwrap().state = Some(state.clone());
        match err {
            None => Ok(state),
            Some(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Walk plumbing
    // ------------------------------------------------------------------

    fn graph(&self, with_diff: bool) -> Result<Graph> {
        // Snapshot under the lock; the build itself runs provider
        // factories and must not hold it.
        let (state, diff) = {
            let sh = self.shared.lock().unwrap();
            let diff = if with_diff { sh.diff.clone() } else { None };
            (sh.state.clone(), diff)
        };
        graph::build(&self.config, &self.providers, state.as_ref(), diff.as_ref())
    }

    /// User variables as store bindings: declaration defaults overlaid
    /// by supplied values, keyed `var.NAME`.
    fn user_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        for (name, decl) in &self.config.variables {
            if let Some(default) = &decl.default {
                vars.insert(format!("var.{}", name), default.clone());
            }
        }
        for (name, value) in &self.variables {
            vars.insert(format!("var.{}", name), value.clone());
        }
        vars
    }

    fn check_variables(&self) -> Vec<Error> {
        let mut errs = Vec::new();
        for name in self.variables.keys() {
            if !self.config.variables.contains_key(name) {
                errs.push(Error::Config(format!(
                    "variable '{}' is not declared in the configuration",
                    name
                )));
            }
        }
        for (name, decl) in &self.config.variables {
            if decl.default.is_none() && !self.variables.contains_key(name) {
                errs.push(Error::Config(format!(
                    "required variable '{}' is not set",
                    name
                )));
            }
        }
        errs
    }

    /// Fire one hook event across all hooks in order. The first Halt
    /// arms the walk's stop flag and wins; later hooks do not see the
    /// event.
    fn hook_halted(&self, ws: &WalkState, event: impl Fn(&dyn Hook) -> HookAction) -> bool {
        for hook in &self.hooks {
            if event(hook.as_ref()) == HookAction::Halt {
                ws.stop.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    /// Drive the graph with the shared node dispatch: meta nouns record
    /// counts, provider nouns get configured, resource nouns run the
    /// per-operation callback and merge their exported variables back
    /// into the store.
    fn generic_walk<F>(&self, graph: &Graph, cb: F) -> Result<()>
    where
        F: Fn(&WalkState, &mut Resource) -> Result<BTreeMap<String, String>> + Sync,
    {
        let ws = WalkState {
            vars: RwLock::new(self.user_vars()),
            counts: RwLock::new(BTreeMap::new()),
            stop: AtomicBool::new(false),
        };
        graph.walk(|noun| self.visit_noun(&ws, noun, &cb))
    }

    fn visit_noun<F>(&self, ws: &WalkState, noun: &Noun, cb: &F) -> Result<()>
    where
        F: Fn(&WalkState, &mut Resource) -> Result<BTreeMap<String, String>> + Sync,
    {
        if matches!(noun.meta, NounMeta::Root) {
            return Ok(());
        }
        if ws.stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        match &noun.meta {
            NounMeta::Root => Ok(()),
            NounMeta::ResourceMeta { id, count } => {
                ws.counts.write().unwrap().insert(id.clone(), *count);
                Ok(())
            }
            NounMeta::Provider(cell) => {
                let mut node = cell.lock().unwrap();
                let mut config = ResourceConfig::default();
                if let Some(raw) = node.raw.as_mut() {
                    self.compute_aggregate_vars(ws, raw)?;
                    let vars = ws.vars.read().unwrap();
                    raw.interpolate(&vars)?;
                    config = ResourceConfig::new(raw);
                }
                for (key, provider) in &node.providers {
                    log::info!("configuring provider: {}", key);
                    provider.configure(&config).map_err(|e| Error::Provider {
                        id: key.clone(),
                        source: e,
                    })?;
                }
                Ok(())
            }
            NounMeta::Resource(cell) => {
                let mut node = cell.lock().unwrap();
                if let Some(raw) = node.raw.as_ref() {
                    self.compute_aggregate_vars(ws, raw)?;
                }
                if node.orphan {
                    // Orphans carry no config; providers work off state.
                    node.resource.config = None;
                } else if let Some(raw) = node.raw.as_mut() {
                    {
                        let vars = ws.vars.read().unwrap();
                        raw.interpolate(&vars)?;
                    }
                    node.resource.config = Some(ResourceConfig::new(raw));
                } else {
                    node.resource.config = Some(ResourceConfig::default());
                }

                log::info!("walking: {}", node.resource.id);
                let new_vars = cb(ws, &mut node.resource)?;
                if !new_vars.is_empty() {
                    ws.vars.write().unwrap().extend(new_vars);
                }
                Ok(())
            }
        }
    }

    /// Synthesize aggregate variables referenced by this raw config.
    ///
    /// `TYPE.NAME.*.FIELD` becomes the comma-join of every present
    /// `TYPE.NAME.i.FIELD` for `i` below the recorded count. Fan-out is
    /// expensive to precompute, so it happens on demand right before
    /// the node that needs it.
    fn compute_aggregate_vars(&self, ws: &WalkState, raw: &RawConfig) -> Result<()> {
        for var in raw.variables()? {
            let InterpolatedVariable::Resource(rv) = var else {
                continue;
            };
            if !rv.multi {
                continue;
            }
            let base = format!("{}.{}", rv.resource_type, rv.name);
            let count = ws.counts.read().unwrap().get(&base).copied();
            let Some(count) = count else {
                // The graph builder orders a ResourceMeta noun before
                // every aggregate consumer; a missing count means the
                // graph is malformed, not that the user erred.
                panic!(
                    "aggregate variable '{}' requested before the count for '{}' was recorded",
                    rv.full_key(),
                    base
                );
            };

            let mut vars = ws.vars.write().unwrap();
            let joined = (0..count)
                .filter_map(|i| {
                    vars.get(&format!("{}.{}.{}.{}", rv.resource_type, rv.name, i, rv.field))
                        .cloned()
                })
                .collect::<Vec<_>>()
                .join(",");
            vars.insert(rv.full_key(), joined);
        }
        Ok(())
    }

    /// Strictly resolve a raw config against a state: every resource
    /// reference must name an existing resource and attribute. Used for
    /// output computation after a successful apply.
    fn compute_vars(&self, state: &State, raw: &RawConfig) -> Result<BTreeMap<String, String>> {
        let mut resolved = raw.clone();
        let vars = resolved.variables()?;
        if vars.is_empty() {
            return Ok(resolved.attrs().clone());
        }

        let mut bindings = BTreeMap::new();
        for var in vars {
            match var {
                InterpolatedVariable::User(u) => {
                    let value = self
                        .variables
                        .get(&u.name)
                        .cloned()
                        .or_else(|| {
                            self.config
                                .variables
                                .get(&u.name)
                                .and_then(|d| d.default.clone())
                        })
                        .unwrap_or_default();
                    bindings.insert(format!("var.{}", u.name), value);
                }
                InterpolatedVariable::Resource(rv) => {
                    let id = rv.resource_id();
                    let resource =
                        state
                            .resources
                            .get(&id)
                            .ok_or_else(|| Error::UnknownResource {
                                resource: id.clone(),
                                variable: rv.full_key(),
                            })?;
                    let value = resource.attributes.get(&rv.field).ok_or_else(|| {
                        Error::UnknownAttribute {
                            resource: id.clone(),
                            attribute: rv.field.clone(),
                            variable: rv.full_key(),
                        }
                    })?;
                    bindings.insert(rv.full_key(), value.clone());
                }
            }
        }

        resolved.interpolate(&bindings)?;
        Ok(resolved.attrs().clone())
    }

    fn validate_noun(
        &self,
        noun: &Noun,
        warns: &Mutex<Vec<String>>,
        errs: &Mutex<Vec<Error>>,
    ) {
        match &noun.meta {
            NounMeta::Resource(cell) => {
                let node = cell.lock().unwrap();
                let Some(raw) = node.raw.as_ref() else {
                    return;
                };
                let config = ResourceConfig::new(raw);
                log::info!("validating resource: {}", node.resource.id);
                let (ws, es) = node
                    .resource
                    .provider
                    .validate_resource(&node.resource.resource_type, &config);
                warns.lock().unwrap().extend(
                    ws.into_iter()
                        .map(|w| format!("'{}' warning: {}", node.resource.id, w)),
                );
                errs.lock().unwrap().extend(
                    es.into_iter()
                        .map(|e| Error::Config(format!("'{}' error: {}", node.resource.id, e))),
                );
            }
            NounMeta::Provider(cell) => {
                let node = cell.lock().unwrap();
                let Some(raw) = node.raw.as_ref() else {
                    return;
                };
                let config = ResourceConfig::new(raw);
                for (key, provider) in &node.providers {
                    log::info!("validating provider: {}", key);
                    let (ws, es) = provider.validate(&config);
                    warns.lock().unwrap().extend(
                        ws.into_iter()
                            .map(|w| format!("Provider '{}' warning: {}", key, w)),
                    );
                    errs.lock().unwrap().extend(
                        es.into_iter()
                            .map(|e| Error::Config(format!("Provider '{}' error: {}", key, e))),
                    );
                }
            }
            _ => {}
        }
    }
}

/// Per-walk shared mutable state. Discarded when the walk returns.
struct WalkState {
    /// Fully-qualified variable bindings
    vars: RwLock<BTreeMap<String, String>>,
    /// Instance counts recorded from ResourceMeta nouns
    counts: RwLock<BTreeMap<String, usize>>,
    /// Cooperative stop: armed by a Halt verdict, checked at node entry
    stop: AtomicBool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputDecl, ProviderDecl, ResourceDecl, VariableDecl};
    use crate::diff::AttrDiff;
    use crate::provider::ResourceProvider;
    use crate::state::ResourceState;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    type DiffFn =
        Box<dyn Fn(&ResourceState, &ResourceConfig) -> anyhow::Result<ResourceDiff> + Send + Sync>;
    type ApplyFn = Box<
        dyn Fn(&ResourceState, &ResourceDiff) -> anyhow::Result<Option<ResourceState>>
            + Send
            + Sync,
    >;
    type RefreshFn =
        Box<dyn Fn(&ResourceState) -> anyhow::Result<Option<ResourceState>> + Send + Sync>;

    /// Test provider: creates resources with sequential ids, mirrors
    /// config changes into diffs, and lets individual tests override
    /// any operation.
    #[derive(Default)]
    struct MockProvider {
        next_id: AtomicUsize,
        apply_count: AtomicUsize,
        apply_delay: Option<Duration>,
        diff_fn: Option<DiffFn>,
        apply_fn: Option<ApplyFn>,
        refresh_fn: Option<RefreshFn>,
        validate_warn: Option<String>,
        validate_error: Option<String>,
        configured: Mutex<Option<ResourceConfig>>,
    }

    impl ResourceProvider for MockProvider {
        fn validate(&self, _config: &ResourceConfig) -> (Vec<String>, Vec<String>) {
            (
                self.validate_warn.iter().cloned().collect(),
                self.validate_error.iter().cloned().collect(),
            )
        }

        fn validate_resource(
            &self,
            _resource_type: &str,
            _config: &ResourceConfig,
        ) -> (Vec<String>, Vec<String>) {
            (
                self.validate_warn.iter().cloned().collect(),
                self.validate_error.iter().cloned().collect(),
            )
        }

        fn configure(&self, config: &ResourceConfig) -> anyhow::Result<()> {
            *self.configured.lock().unwrap() = Some(config.clone());
            Ok(())
        }

        fn diff(
            &self,
            state: &ResourceState,
            config: &ResourceConfig,
        ) -> anyhow::Result<ResourceDiff> {
            if let Some(f) = &self.diff_fn {
                return f(state, config);
            }
            let mut diff = ResourceDiff::default();
            for (key, value) in &config.attrs {
                let old = state.attributes.get(key).cloned().unwrap_or_default();
                if old != *value {
                    diff.attributes.insert(
                        key.clone(),
                        AttrDiff {
                            old,
                            new: value.clone(),
                            new_computed: config.is_computed(key),
                            requires_new: false,
                        },
                    );
                }
            }
            if !state.exists() && !config.attrs.is_empty() {
                diff.attributes.insert(
                    "id".into(),
                    AttrDiff {
                        new_computed: true,
                        ..Default::default()
                    },
                );
            }
            Ok(diff)
        }

        fn apply(
            &self,
            state: &ResourceState,
            diff: &ResourceDiff,
        ) -> anyhow::Result<Option<ResourceState>> {
            if let Some(f) = &self.apply_fn {
                return f(state, diff);
            }
            self.apply_count.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.apply_delay {
                thread::sleep(delay);
            }
            if diff.destroy {
                return Ok(None);
            }
            let mut rs = state.clone();
            for (key, attr) in &diff.attributes {
                if key == "id" && attr.new_computed {
                    let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    rs.id = format!("i-{}", n);
                    rs.attributes.insert("id".into(), rs.id.clone());
                } else if attr.new_computed {
                    rs.attributes.insert(key.clone(), UNKNOWN_VALUE.into());
                } else {
                    rs.attributes.insert(key.clone(), attr.new.clone());
                }
            }
            Ok(Some(rs))
        }

        fn refresh(&self, state: &ResourceState) -> anyhow::Result<Option<ResourceState>> {
            if let Some(f) = &self.refresh_fn {
                return f(state);
            }
            Ok(Some(state.clone()))
        }
    }

    struct Fixed(Arc<dyn ResourceProvider>);

    impl ResourceProviderFactory for Fixed {
        fn open(&self) -> anyhow::Result<Arc<dyn ResourceProvider>> {
            Ok(self.0.clone())
        }
    }

    fn providers(
        provider: Arc<MockProvider>,
    ) -> BTreeMap<String, Arc<dyn ResourceProviderFactory>> {
        let mut map: BTreeMap<String, Arc<dyn ResourceProviderFactory>> = BTreeMap::new();
        map.insert("aws".into(), Arc::new(Fixed(provider)));
        map
    }

    fn raw(attrs: &[(&str, &str)]) -> RawConfig {
        RawConfig::new(
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .unwrap()
    }

    fn resource(
        resource_type: &str,
        name: &str,
        count: usize,
        attrs: &[(&str, &str)],
    ) -> ResourceDecl {
        ResourceDecl {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            count,
            raw: raw(attrs),
        }
    }

    fn existing(resource_type: &str, id: &str, attrs: &[(&str, &str)]) -> ResourceState {
        let mut attributes: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        attributes.insert("id".into(), id.to_string());
        ResourceState {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            attributes,
            ..Default::default()
        }
    }

    /// Counts lifecycle events.
    #[derive(Default)]
    struct CountHook {
        pre_apply: AtomicUsize,
        post_apply: AtomicUsize,
    }

    impl Hook for CountHook {
        fn pre_apply(
            &self,
            _id: &str,
            _state: &ResourceState,
            _diff: &ResourceDiff,
        ) -> HookAction {
            self.pre_apply.fetch_add(1, Ordering::SeqCst);
            HookAction::Continue
        }

        fn post_apply(&self, _id: &str, _state: &ResourceState) -> HookAction {
            self.post_apply.fetch_add(1, Ordering::SeqCst);
            HookAction::Continue
        }
    }

    /// Halts after a specific resource finishes applying.
    struct HaltAfter(String);

    impl Hook for HaltAfter {
        fn post_apply(&self, id: &str, _state: &ResourceState) -> HookAction {
            if id == self.0 {
                HookAction::Halt
            } else {
                HookAction::Continue
            }
        }
    }

    #[test]
    fn test_apply_empty_config() {
        let ctx = Context::new(ContextOpts::default());
        let state = ctx.apply().unwrap();
        assert!(state.resources.is_empty());

        let plan = ctx.plan(PlanOpts::default()).unwrap();
        assert!(plan.diff.is_empty());
    }

    #[test]
    fn test_plan_then_apply_creates_resource() {
        let provider = Arc::new(MockProvider::default());
        let hook = Arc::new(CountHook::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-123")])],
                ..Default::default()
            },
            providers: providers(provider.clone()),
            hooks: vec![hook.clone()],
            ..Default::default()
        });

        let plan = ctx.plan(PlanOpts::default()).unwrap();
        let planned = plan.diff.resources.get("aws_instance.foo").unwrap();
        assert_eq!(planned.attributes.get("ami").unwrap().new, "ami-123");

        let state = ctx.apply().unwrap();
        let rs = state.resources.get("aws_instance.foo").unwrap();
        assert_eq!(rs.resource_type, "aws_instance");
        assert_eq!(rs.id, "i-1");
        assert_eq!(rs.attributes.get("ami").unwrap(), "ami-123");

        assert_eq!(hook.pre_apply.load(Ordering::SeqCst), 1);
        assert_eq!(hook.post_apply.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_interpolates_dependencies() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![
                    resource("aws_instance", "a", 1, &[("ami", "ami-a")]),
                    resource(
                        "aws_instance",
                        "b",
                        1,
                        &[("ami", "ami-b"), ("source", "${aws_instance.a.id}")],
                    ),
                ],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let state = ctx.apply().unwrap();

        let a = state.resources.get("aws_instance.a").unwrap();
        let b = state.resources.get("aws_instance.b").unwrap();
        assert!(!a.id.is_empty());
        // b's config was resolved to a's real id before its diff ran.
        assert_eq!(b.attributes.get("source").unwrap(), &a.id);
    }

    #[test]
    fn test_apply_joins_aggregate_variables() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![
                    resource("aws_instance", "web", 3, &[("ami", "ami-web")]),
                    resource("aws_elb", "e", 1, &[("members", "${aws_instance.web.*.id}")]),
                ],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let state = ctx.apply().unwrap();

        let ids: Vec<String> = (0..3)
            .map(|i| {
                state
                    .resources
                    .get(&format!("aws_instance.web.{}", i))
                    .unwrap()
                    .id
                    .clone()
            })
            .collect();
        let members = state
            .resources
            .get("aws_elb.e")
            .unwrap()
            .attributes
            .get("members")
            .unwrap();
        // The aggregate is the comma-join of the instance ids in index
        // order.
        assert_eq!(*members, ids.join(","));
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["i-1", "i-2", "i-3"]);
    }

    #[test]
    fn test_plan_marks_orphans_for_destroy() {
        let provider = Arc::new(MockProvider::default());
        let mut state = State::new();
        state
            .resources
            .insert("aws_instance.x".into(), existing("aws_instance", "i-9", &[]));
        let ctx = Context::new(ContextOpts {
            config: Config::default(),
            providers: providers(provider),
            state: Some(state),
            ..Default::default()
        });

        let plan = ctx.plan(PlanOpts::default()).unwrap();
        assert!(plan.diff.resources.get("aws_instance.x").unwrap().destroy);

        let state = ctx.apply().unwrap();
        assert!(!state.resources.contains_key("aws_instance.x"));
    }

    #[test]
    fn test_stop_mid_apply() {
        let provider = Arc::new(MockProvider {
            apply_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let ctx = Arc::new(Context::new(ContextOpts {
            config: Config {
                resources: vec![
                    resource("aws_instance", "a", 1, &[("ami", "ami-a")]),
                    resource(
                        "aws_instance",
                        "b",
                        1,
                        &[("source", "${aws_instance.a.id}")],
                    ),
                ],
                ..Default::default()
            },
            providers: providers(provider.clone()),
            ..Default::default()
        }));

        ctx.plan(PlanOpts::default()).unwrap();

        let worker = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.apply())
        };
        // Wait until the slow apply is actually in flight, then stop.
        while provider.apply_count.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        ctx.stop();

        // Cancellation is not an error; the in-flight apply finished,
        // everything after it never started.
        let state = worker.join().unwrap().unwrap();
        assert!(state.resources.contains_key("aws_instance.a"));
        assert!(!state.resources.contains_key("aws_instance.b"));
        assert_eq!(provider.apply_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_unknown_value_is_error() {
        let provider = Arc::new(MockProvider {
            apply_fn: Some(Box::new(|_state, _diff| {
                Ok(Some(ResourceState {
                    id: "x".into(),
                    attributes: [
                        ("foo".to_string(), UNKNOWN_VALUE.to_string()),
                        ("ok".to_string(), "fine".to_string()),
                    ]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                }))
            })),
            ..Default::default()
        });
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let err = ctx.apply().unwrap_err();
        assert!(err.to_string().contains("Attribute with unknown value: foo"));

        // The resource still installed, minus the offending attribute.
        let state = ctx.state().unwrap();
        let rs = state.resources.get("aws_instance.foo").unwrap();
        assert!(!rs.attributes.contains_key("foo"));
        assert_eq!(rs.attributes.get("ok").unwrap(), "fine");
    }

    #[test]
    fn test_plan_is_empty_after_apply() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-123")])],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        ctx.apply().unwrap();

        let plan = ctx.plan(PlanOpts::default()).unwrap();
        assert!(plan.diff.is_empty(), "plan after apply should be empty");
    }

    #[test]
    fn test_destroy_plan() {
        let provider = Arc::new(MockProvider::default());
        let mut state = State::new();
        state.resources.insert(
            "aws_instance.foo".into(),
            existing("aws_instance", "i-1", &[("ami", "ami-123")]),
        );
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-123")])],
                ..Default::default()
            },
            providers: providers(provider),
            state: Some(state),
            ..Default::default()
        });

        let plan = ctx.plan(PlanOpts { destroy: true }).unwrap();
        assert!(plan.diff.resources.get("aws_instance.foo").unwrap().destroy);

        let state = ctx.apply().unwrap();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_apply_computes_outputs() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                outputs: vec![OutputDecl {
                    name: "instance_id".into(),
                    raw: raw(&[("value", "${aws_instance.foo.id}")]),
                }],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let state = ctx.apply().unwrap();
        let outputs = state.outputs.unwrap();
        assert_eq!(outputs.get("instance_id").unwrap(), "i-1");
    }

    #[test]
    fn test_output_missing_attribute_errors() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                outputs: vec![OutputDecl {
                    name: "oops".into(),
                    raw: raw(&[("value", "${aws_instance.foo.missing}")]),
                }],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let err = ctx.apply().unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { .. }));

        // Resource state survives the failed output computation.
        let state = ctx.state().unwrap();
        assert!(state.resources.contains_key("aws_instance.foo"));
    }

    #[test]
    fn test_refresh_updates_state() {
        let provider = Arc::new(MockProvider {
            refresh_fn: Some(Box::new(|state| {
                let mut rs = state.clone();
                rs.attributes.insert("ami".into(), "ami-drifted".into());
                Ok(Some(rs))
            })),
            ..Default::default()
        });
        let mut prior = State::new();
        prior.resources.insert(
            "aws_instance.foo".into(),
            existing("aws_instance", "i-1", &[("ami", "ami-123")]),
        );
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-123")])],
                ..Default::default()
            },
            providers: providers(provider),
            state: Some(prior),
            ..Default::default()
        });

        let state = ctx.refresh().unwrap();
        assert_eq!(
            state
                .resources
                .get("aws_instance.foo")
                .unwrap()
                .attributes
                .get("ami")
                .unwrap(),
            "ami-drifted"
        );
        assert_eq!(ctx.state().unwrap(), state);
    }

    #[test]
    fn test_refresh_nil_becomes_empty_state() {
        let provider = Arc::new(MockProvider {
            refresh_fn: Some(Box::new(|_| Ok(None))),
            ..Default::default()
        });
        let mut prior = State::new();
        prior.resources.insert(
            "aws_instance.foo".into(),
            existing("aws_instance", "i-1", &[]),
        );
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                ..Default::default()
            },
            providers: providers(provider),
            state: Some(prior),
            ..Default::default()
        });

        let state = ctx.refresh().unwrap();
        let rs = state.resources.get("aws_instance.foo").unwrap();
        assert!(!rs.exists());
        assert_eq!(rs.resource_type, "aws_instance");
    }

    #[test]
    fn test_run_gate_serializes_runs() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(MockProvider {
            refresh_fn: Some(Box::new({
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                move |state| {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(Some(state.clone()))
                }
            })),
            ..Default::default()
        });
        let mut prior = State::new();
        prior.resources.insert(
            "aws_instance.foo".into(),
            existing("aws_instance", "i-1", &[]),
        );
        let ctx = Arc::new(Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                ..Default::default()
            },
            providers: providers(provider),
            state: Some(prior),
            ..Default::default()
        }));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let ctx = ctx.clone();
                thread::spawn(move || ctx.refresh())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "runs overlapped");
    }

    #[test]
    fn test_hook_halt_stops_walk_without_error() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![
                    resource("aws_instance", "a", 1, &[("ami", "ami-a")]),
                    resource(
                        "aws_instance",
                        "b",
                        1,
                        &[("source", "${aws_instance.a.id}")],
                    ),
                ],
                ..Default::default()
            },
            providers: providers(provider.clone()),
            hooks: vec![Arc::new(HaltAfter("aws_instance.a".into()))],
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let state = ctx.apply().unwrap();
        assert!(state.resources.contains_key("aws_instance.a"));
        assert!(!state.resources.contains_key("aws_instance.b"));
        assert_eq!(provider.apply_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_preserves_partial_state_on_provider_error() {
        let provider = Arc::new(MockProvider {
            apply_fn: Some(Box::new(|state, diff| {
                let ami = diff
                    .attributes
                    .get("ami")
                    .map(|a| a.new.clone())
                    .unwrap_or_default();
                if ami == "boom" {
                    anyhow::bail!("simulated apply failure");
                }
                let mut rs = state.clone();
                rs.id = format!("i-{}", ami);
                rs.attributes.insert("ami".into(), ami);
                rs.attributes.insert("id".into(), rs.id.clone());
                Ok(Some(rs))
            })),
            ..Default::default()
        });
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![
                    resource("aws_instance", "good", 1, &[("ami", "ok")]),
                    resource("aws_instance", "bad", 1, &[("ami", "boom")]),
                ],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let err = ctx.apply().unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let state = ctx.state().unwrap();
        assert!(state.resources.contains_key("aws_instance.good"));
        assert!(!state.resources.contains_key("aws_instance.bad"));
        // Outputs are never computed on a failed walk.
        assert!(state.outputs.is_none());
    }

    #[test]
    fn test_apply_rejects_diff_drift() {
        let desired = Arc::new(Mutex::new("v1".to_string()));
        let provider = Arc::new(MockProvider {
            diff_fn: Some(Box::new({
                let desired = desired.clone();
                move |_state, _config| {
                    let mut diff = ResourceDiff::default();
                    diff.attributes.insert(
                        "value".into(),
                        AttrDiff {
                            new: desired.lock().unwrap().clone(),
                            ..Default::default()
                        },
                    );
                    Ok(diff)
                }
            })),
            ..Default::default()
        });
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("value", "v1")])],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        *desired.lock().unwrap() = "v2".to_string();
        let err = ctx.apply().unwrap_err();
        assert!(matches!(err, Error::DiffMismatch { .. }));
        assert!(err.to_string().contains("changed between plan and apply"));
    }

    #[test]
    fn test_validate_reports_diagnostics() {
        let provider = Arc::new(MockProvider {
            validate_warn: Some("deprecated field".into()),
            validate_error: Some("bad ami".into()),
            ..Default::default()
        });
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        let (warns, errs) = ctx.validate();
        assert_eq!(warns.len(), 1);
        assert_eq!(warns[0], "'aws_instance.foo' warning: deprecated field");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("'aws_instance.foo' error: bad ami"));

        // Validate takes no state snapshot side effects.
        assert!(ctx.state().is_none());
    }

    #[test]
    fn test_validate_provider_config() {
        let provider = Arc::new(MockProvider {
            validate_warn: Some("region unset".into()),
            ..Default::default()
        });
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[])],
                providers: vec![ProviderDecl {
                    name: "aws".into(),
                    raw: raw(&[("region", "us-east-1")]),
                }],
                ..Default::default()
            },
            providers: providers(provider),
            ..Default::default()
        });

        let (warns, _errs) = ctx.validate();
        assert!(warns.contains(&"Provider 'aws' warning: region unset".to_string()));
    }

    #[test]
    fn test_validate_checks_variables() {
        let provider = Arc::new(MockProvider::default());
        let mut variables = BTreeMap::new();
        variables.insert(
            "region".to_string(),
            VariableDecl {
                default: None,
                description: None,
            },
        );
        let mut supplied = BTreeMap::new();
        supplied.insert("typo".to_string(), "x".to_string());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[])],
                variables,
                ..Default::default()
            },
            providers: providers(provider),
            variables: supplied,
            ..Default::default()
        });

        let (_warns, errs) = ctx.validate();
        let messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("'typo' is not declared")));
        assert!(messages.iter().any(|m| m.contains("required variable 'region' is not set")));
    }

    #[test]
    fn test_user_variables_interpolate() {
        let provider = Arc::new(MockProvider::default());
        let mut variables = BTreeMap::new();
        variables.insert(
            "ami".to_string(),
            VariableDecl {
                default: Some("ami-default".into()),
                description: None,
            },
        );
        let mut supplied = BTreeMap::new();
        supplied.insert("ami".to_string(), "ami-supplied".to_string());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "${var.ami}")])],
                variables,
                ..Default::default()
            },
            providers: providers(provider),
            variables: supplied,
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let state = ctx.apply().unwrap();
        assert_eq!(
            state
                .resources
                .get("aws_instance.foo")
                .unwrap()
                .attributes
                .get("ami")
                .unwrap(),
            "ami-supplied"
        );
    }

    #[test]
    fn test_provider_gets_configured() {
        let provider = Arc::new(MockProvider::default());
        let ctx = Context::new(ContextOpts {
            config: Config {
                resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-1")])],
                providers: vec![ProviderDecl {
                    name: "aws".into(),
                    raw: raw(&[("region", "us-east-1")]),
                }],
                ..Default::default()
            },
            providers: providers(provider.clone()),
            ..Default::default()
        });

        ctx.plan(PlanOpts::default()).unwrap();
        let configured = provider.configured.lock().unwrap();
        assert_eq!(
            configured.as_ref().unwrap().get("region"),
            Some("us-east-1")
        );
    }

    #[test]
    fn test_stop_when_idle_returns_immediately() {
        let ctx = Context::new(ContextOpts::default());
        ctx.stop();
    }

    #[test]
    fn test_context_from_saved_plan() {
        let provider = Arc::new(MockProvider::default());
        let config = Config {
            resources: vec![resource("aws_instance", "foo", 1, &[("ami", "ami-123")])],
            ..Default::default()
        };
        let planning = Context::new(ContextOpts {
            config,
            providers: providers(provider.clone()),
            ..Default::default()
        });
        let plan = planning.plan(PlanOpts::default()).unwrap();

        // A fresh context seeded from the plan applies it directly.
        let ctx = Context::new(ContextOpts {
            providers: providers(provider),
            ..ContextOpts::from_plan(&plan)
        });
        let state = ctx.apply().unwrap();
        assert_eq!(state.resources.get("aws_instance.foo").unwrap().id, "i-1");
    }
}
