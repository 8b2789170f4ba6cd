//! Dependency graph of resources and providers.
//!
//! The graph is a DAG of [`Noun`]s built from a configuration, the
//! prior state (for orphans), an optional diff (for apply), and the
//! provider factories. [`Graph::walk`] visits nouns leaves-first, so a
//! resource is only visited after everything it depends on has been
//! fully processed; independent nouns of the same wave may run on
//! multiple worker threads.
//!
//! Each [`Resource`] is owned by exactly one noun and sits behind that
//! noun's mutex, locked for the duration of its visit; the builder
//! never aliases a resource across nouns, which is what makes the
//! parallel walk safe without per-resource locks.

use crate::config::{Config, InterpolatedVariable, RawConfig, ResourceDecl, ResourceVariable};
use crate::diff::{Diff, ResourceDiff};
use crate::error::{Error, Result};
use crate::provider::{ResourceConfig, ResourceProvider, ResourceProviderFactory};
use crate::state::{ResourceState, State};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Name of the sentinel root noun.
pub const ROOT_NOUN: &str = "root";

/// The walker's runtime view of one resource.
pub struct Resource {
    /// Resource id: `type.name` or `type.name.index`
    pub id: String,
    pub resource_type: String,
    /// State snapshot, updated in place as the walk progresses
    pub state: ResourceState,
    /// Interpolated configuration; `None` for orphans
    pub config: Option<ResourceConfig>,
    /// Diff planned for this resource, when walking with one
    pub diff: Option<ResourceDiff>,
    pub provider: Arc<dyn ResourceProvider>,
}

impl Resource {
    /// Qualified variables this resource exports: one
    /// `<id>.<attribute>` key per state attribute.
    pub fn vars(&self) -> BTreeMap<String, String> {
        self.state
            .attributes
            .iter()
            .map(|(k, v)| (format!("{}.{}", self.id, k), v.clone()))
            .collect()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("diff", &self.diff)
            .finish_non_exhaustive()
    }
}

/// Resource noun payload.
#[derive(Debug)]
pub struct ResourceNode {
    pub resource: Resource,
    /// Raw config template; `None` for orphans
    pub raw: Option<RawConfig>,
    /// Present in state but no longer declared; must be destroyed
    pub orphan: bool,
}

/// Provider noun payload.
pub struct ProviderNode {
    /// Provider configuration template, when the config declares one
    pub raw: Option<RawConfig>,
    /// Opened provider instances by provider key
    pub providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
}

impl fmt::Debug for ProviderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderNode")
            .field("raw", &self.raw)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Typed payload of a graph noun.
#[derive(Debug)]
pub enum NounMeta {
    /// Sentinel root; ignored by walkers
    Root,
    Resource(Mutex<ResourceNode>),
    /// Declares the instance count of a counted resource; guaranteed to
    /// be visited before any noun that reads `id.*.field`
    ResourceMeta { id: String, count: usize },
    Provider(Mutex<ProviderNode>),
}

/// One node of the dependency graph.
#[derive(Debug)]
pub struct Noun {
    pub name: String,
    pub meta: NounMeta,
    deps: Vec<usize>,
}

impl Noun {
    /// Indices of the nouns this one depends on.
    pub fn deps(&self) -> &[usize] {
        &self.deps
    }
}

/// The dependency DAG.
#[derive(Debug)]
pub struct Graph {
    nouns: Vec<Noun>,
}

impl Graph {
    pub fn nouns(&self) -> &[Noun] {
        &self.nouns
    }

    /// Visit every noun in reverse dependency order (leaves first).
    ///
    /// Nouns whose dependencies are all complete form a wave; waves run
    /// through rayon, so independent nouns may execute concurrently. An
    /// error stops dispatch of later waves (nouns already running in
    /// the same wave finish first) and is returned to the caller.
    pub fn walk<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Noun) -> Result<()> + Sync,
    {
        let n = self.nouns.len();
        let mut remaining: Vec<usize> = self.nouns.iter().map(|x| x.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, noun) in self.nouns.iter().enumerate() {
            for &d in &noun.deps {
                dependents[d].push(i);
            }
        }

        let mut wave: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        while !wave.is_empty() {
            log::debug!("walking wave of {} nouns", wave.len());
            let results: Vec<(usize, Result<()>)> =
                wave.par_iter().map(|&i| (i, f(&self.nouns[i]))).collect();

            let mut next = Vec::new();
            for (i, result) in results {
                result?;
                for &j in &dependents[i] {
                    remaining[j] -= 1;
                    if remaining[j] == 0 {
                        next.push(j);
                    }
                }
            }
            wave = next;
        }
        Ok(())
    }
}

/// Build the dependency graph for a run.
///
/// Emits one resource noun per declared instance (indexed when
/// `count > 1`, with a [`NounMeta::ResourceMeta`] noun taking the
/// un-indexed name), orphan nouns for state entries with no surviving
/// declaration, and one provider noun per provider key in use. Edges
/// come from provider ownership and from every resource-variable
/// reference in the raw configs; the sentinel root depends on
/// everything. Cycles are rejected here rather than detected mid-walk.
pub fn build(
    config: &Config,
    factories: &BTreeMap<String, Arc<dyn ResourceProviderFactory>>,
    state: Option<&State>,
    diff: Option<&Diff>,
) -> Result<Graph> {
    let mut b = Builder {
        config,
        factories,
        state,
        diff,
        nouns: vec![Noun {
            name: ROOT_NOUN.to_string(),
            meta: NounMeta::Root,
            deps: Vec::new(),
        }],
        index: BTreeMap::new(),
        provider_nouns: BTreeMap::new(),
        instances: BTreeMap::new(),
    };

    // Declared resources, expanded by count.
    let mut declared = BTreeSet::new();
    for decl in &config.resources {
        declared.insert(decl.id());
        let (pidx, provider) = b.provider_noun(&decl.resource_type)?;
        if decl.count == 1 {
            b.push_resource(decl.id(), decl, pidx, provider)?;
        } else {
            let mut instances = Vec::new();
            for i in 0..decl.count {
                let id = format!("{}.{}", decl.id(), i);
                declared.insert(id.clone());
                instances.push(b.push_resource(id, decl, pidx, provider.clone())?);
            }
            b.push(Noun {
                name: decl.id(),
                meta: NounMeta::ResourceMeta {
                    id: decl.id(),
                    count: decl.count,
                },
                deps: instances,
            });
        }
    }

    // Orphans: in state, no longer declared.
    if let Some(state) = state {
        for (id, rs) in &state.resources {
            if declared.contains(id) {
                continue;
            }
            let resource_type = if rs.resource_type.is_empty() {
                id.split('.').next().unwrap_or("").to_string()
            } else {
                rs.resource_type.clone()
            };
            let (pidx, provider) = b.provider_noun(&resource_type)?;
            log::debug!("{}: orphaned, scheduling for destroy", id);
            let resource = Resource {
                id: id.clone(),
                resource_type,
                state: rs.clone(),
                config: None,
                diff: diff.and_then(|d| d.resources.get(id)).cloned(),
                provider,
            };
            b.push(Noun {
                name: id.clone(),
                meta: NounMeta::Resource(Mutex::new(ResourceNode {
                    resource,
                    raw: None,
                    orphan: true,
                })),
                deps: vec![pidx],
            });
        }
    }

    // Edges from variable references.
    let mut edges = Vec::new();
    for (idx, noun) in b.nouns.iter().enumerate() {
        let raw = match &noun.meta {
            NounMeta::Resource(cell) => cell.lock().unwrap().raw.clone(),
            NounMeta::Provider(cell) => cell.lock().unwrap().raw.clone(),
            _ => None,
        };
        let Some(raw) = raw else { continue };
        for v in raw.variables()? {
            let InterpolatedVariable::Resource(rv) = v else {
                continue;
            };
            let target = b.resolve_target(&rv, &noun.name)?;
            if target != idx {
                edges.push((idx, target));
            }
        }
    }
    for (idx, target) in edges {
        if !b.nouns[idx].deps.contains(&target) {
            b.nouns[idx].deps.push(target);
        }
    }

    // Root depends on everything.
    b.nouns[0].deps = (1..b.nouns.len()).collect();

    check_cycles(&b.nouns)?;
    Ok(Graph { nouns: b.nouns })
}

struct Builder<'a> {
    config: &'a Config,
    factories: &'a BTreeMap<String, Arc<dyn ResourceProviderFactory>>,
    state: Option<&'a State>,
    diff: Option<&'a Diff>,
    nouns: Vec<Noun>,
    index: BTreeMap<String, usize>,
    provider_nouns: BTreeMap<String, usize>,
    instances: BTreeMap<String, Arc<dyn ResourceProvider>>,
}

impl Builder<'_> {
    fn push(&mut self, noun: Noun) -> usize {
        let idx = self.nouns.len();
        self.index.insert(noun.name.clone(), idx);
        self.nouns.push(noun);
        idx
    }

    /// The provider noun serving a resource type, created on first use.
    /// The matching factory is the one with the longest key that
    /// prefixes the type (`aws` serves `aws_instance`).
    fn provider_noun(
        &mut self,
        resource_type: &str,
    ) -> Result<(usize, Arc<dyn ResourceProvider>)> {
        let key = self
            .factories
            .keys()
            .filter(|k| resource_type.starts_with(k.as_str()))
            .max_by_key(|k| k.len())
            .cloned()
            .ok_or_else(|| {
                Error::GraphBuild(format!(
                    "no provider for resource type '{}'",
                    resource_type
                ))
            })?;

        if let Some(&idx) = self.provider_nouns.get(&key) {
            return Ok((idx, self.instances[&key].clone()));
        }

        let provider = self.factories[&key].open().map_err(|e| {
            Error::GraphBuild(format!("opening provider '{}': {}", key, e))
        })?;
        let raw = self
            .config
            .providers
            .iter()
            .find(|p| p.name == key)
            .map(|p| p.raw.clone());
        let mut providers = BTreeMap::new();
        providers.insert(key.clone(), provider.clone());
        let idx = self.push(Noun {
            name: format!("provider.{}", key),
            meta: NounMeta::Provider(Mutex::new(ProviderNode { raw, providers })),
            deps: Vec::new(),
        });
        self.provider_nouns.insert(key.clone(), idx);
        self.instances.insert(key, provider.clone());
        Ok((idx, provider))
    }

    fn push_resource(
        &mut self,
        id: String,
        decl: &ResourceDecl,
        provider_idx: usize,
        provider: Arc<dyn ResourceProvider>,
    ) -> Result<usize> {
        let mut rs = ResourceState {
            resource_type: decl.resource_type.clone(),
            ..Default::default()
        };
        if let Some(prior) = self.state_resource(&id) {
            rs = prior;
            rs.resource_type = decl.resource_type.clone();
        }
        let resource = Resource {
            id: id.clone(),
            resource_type: decl.resource_type.clone(),
            state: rs,
            config: None,
            diff: self.diff.and_then(|d| d.resources.get(&id)).cloned(),
            provider,
        };
        Ok(self.push(Noun {
            name: id,
            meta: NounMeta::Resource(Mutex::new(ResourceNode {
                resource,
                raw: Some(decl.raw.clone()),
                orphan: false,
            })),
            deps: vec![provider_idx],
        }))
    }

    fn state_resource(&self, id: &str) -> Option<ResourceState> {
        self.state.and_then(|s| s.resources.get(id)).cloned()
    }

    /// Noun a resource-variable reference points at.
    fn resolve_target(&self, rv: &ResourceVariable, owner: &str) -> Result<usize> {
        let base = format!("{}.{}", rv.resource_type, rv.name);
        if rv.multi {
            let idx = *self.index.get(&base).ok_or_else(|| {
                Error::GraphBuild(format!(
                    "resource '{}' referenced by '{}' is not declared",
                    base, owner
                ))
            })?;
            return match self.nouns[idx].meta {
                NounMeta::ResourceMeta { .. } => Ok(idx),
                _ => Err(Error::GraphBuild(format!(
                    "'{}' references all instances of '{}', which is not a counted resource",
                    owner, base
                ))),
            };
        }
        if rv.index.is_some() {
            if let Some(&idx) = self.index.get(&rv.resource_id()) {
                return Ok(idx);
            }
        }
        self.index.get(&base).copied().ok_or_else(|| {
            Error::GraphBuild(format!(
                "resource '{}' referenced by '{}' is not declared",
                base, owner
            ))
        })
    }
}

fn check_cycles(nouns: &[Noun]) -> Result<()> {
    let n = nouns.len();
    let mut remaining: Vec<usize> = nouns.iter().map(|x| x.deps.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, noun) in nouns.iter().enumerate() {
        for &d in &noun.deps {
            dependents[d].push(i);
        }
    }
    let mut queue: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut done = 0;
    while let Some(i) = queue.pop() {
        done += 1;
        for &j in &dependents[i] {
            remaining[j] -= 1;
            if remaining[j] == 0 {
                queue.push(j);
            }
        }
    }
    if done != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|&i| remaining[i] > 0 && !matches!(nouns[i].meta, NounMeta::Root))
            .map(|i| nouns[i].name.as_str())
            .collect();
        return Err(Error::GraphBuild(format!(
            "dependency cycle involving: {}",
            stuck.join(", ")
        )));
    }
    Ok(())
}
