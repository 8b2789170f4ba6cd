//! Configuration model and variable interpolation.
//!
//! A [`Config`] is the parsed declarative input: resource, provider,
//! output, and variable declarations. Attribute values are held as
//! [`RawConfig`] templates that may embed `${...}` references to user
//! variables (`var.NAME`) or resource attributes
//! (`TYPE.NAME[.N|.*].FIELD`), resolved against a binding map as the
//! dependency walk progresses.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel for attribute values that only become known after apply.
///
/// Providers write this into diff and merged-state attributes to say
/// "computed later"; it must never survive into an applied state.
pub const UNKNOWN_VALUE: &str = "<unknown>";

// ============================================================================
// Declarations
// ============================================================================

/// Parsed declarative configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Declared resources
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Declared providers
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
    /// Named outputs computed from the final state
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    /// User variable declarations
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDecl>,
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource type, e.g. `aws_instance`
    pub resource_type: String,
    /// Resource name, unique within its type
    pub name: String,
    /// Number of instances to create
    #[serde(default = "default_count")]
    pub count: usize,
    /// Attribute templates
    #[serde(default)]
    pub raw: RawConfig,
}

impl ResourceDecl {
    /// The un-indexed resource id, `type.name`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

fn default_count() -> usize {
    1
}

/// One declared provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecl {
    /// Provider name; matched as a prefix of resource types (`aws`
    /// configures `aws_*` resources)
    pub name: String,
    /// Attribute templates for provider configuration
    #[serde(default)]
    pub raw: RawConfig,
}

/// One named output, computed from the final state after a successful
/// apply. The `value` attribute of the raw config carries the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    #[serde(default)]
    pub raw: RawConfig,
}

/// Declaration of a user variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Value used when the caller supplies none; `None` makes the
    /// variable required
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    /// Structural validation: duplicate ids, bad counts, malformed
    /// references, undeclared variables, outputs without a value.
    ///
    /// Returns every problem found; an empty list means the
    /// configuration is well-formed.
    pub fn validate(&self) -> Vec<Error> {
        let mut errs = Vec::new();

        let mut seen = BTreeMap::new();
        for r in &self.resources {
            if seen.insert(r.id(), ()).is_some() {
                errs.push(Error::Config(format!(
                    "resource '{}' declared more than once",
                    r.id()
                )));
            }
            if r.count == 0 {
                errs.push(Error::Config(format!(
                    "resource '{}' has count 0; count must be at least 1",
                    r.id()
                )));
            }
        }

        for o in &self.outputs {
            if !o.raw.has_attr("value") {
                errs.push(Error::Config(format!(
                    "output '{}' is missing a 'value' attribute",
                    o.name
                )));
            }
        }

        // Every reference must parse, and user variables must be declared.
        let raws = self
            .resources
            .iter()
            .map(|r| (r.id(), &r.raw))
            .chain(
                self.providers
                    .iter()
                    .map(|p| (format!("provider.{}", p.name), &p.raw)),
            )
            .chain(
                self.outputs
                    .iter()
                    .map(|o| (format!("output.{}", o.name), &o.raw)),
            );
        for (owner, raw) in raws {
            match raw.variables() {
                Ok(vars) => {
                    for v in vars {
                        if let InterpolatedVariable::User(u) = &v {
                            if !self.variables.contains_key(&u.name) {
                                errs.push(Error::Config(format!(
                                    "'{}' references undeclared variable 'var.{}'",
                                    owner, u.name
                                )));
                            }
                        }
                    }
                }
                Err(e) => errs.push(Error::Config(format!("'{}': {}", owner, e))),
            }
        }

        errs
    }
}

// ============================================================================
// Raw configs and interpolation
// ============================================================================

/// An interpolable attribute template map.
///
/// The raw templates are immutable once constructed;
/// [`RawConfig::interpolate`] computes a resolved view, so
/// re-interpolating with identical bindings is idempotent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawConfig {
    raw: BTreeMap<String, String>,
    #[serde(skip)]
    resolved: Option<BTreeMap<String, String>>,
}

impl RawConfig {
    /// Build a raw config from attribute templates, validating that
    /// every embedded reference parses.
    pub fn new(raw: BTreeMap<String, String>) -> Result<RawConfig> {
        let rc = RawConfig { raw, resolved: None };
        rc.variables()?;
        Ok(rc)
    }

    /// Whether an attribute exists, resolved or not.
    pub fn has_attr(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    /// All variable references embedded in the templates.
    pub fn variables(&self) -> Result<Vec<InterpolatedVariable>> {
        let mut vars = Vec::new();
        for template in self.raw.values() {
            scan_references(template, &mut vars)?;
        }
        Ok(vars)
    }

    /// Resolve the templates against a binding map, keyed by the
    /// canonical full key of each reference. Bindings that are absent
    /// resolve to the empty string; strict resolution is the caller's
    /// job (the walker guarantees presence through dependency order).
    pub fn interpolate(&mut self, bindings: &BTreeMap<String, String>) -> Result<()> {
        let mut resolved = BTreeMap::new();
        for (key, template) in &self.raw {
            resolved.insert(key.clone(), substitute(template, bindings)?);
        }
        self.resolved = Some(resolved);
        Ok(())
    }

    /// The current view: the resolved attributes if
    /// [`RawConfig::interpolate`] ran, otherwise the raw templates.
    pub fn attrs(&self) -> &BTreeMap<String, String> {
        self.resolved.as_ref().unwrap_or(&self.raw)
    }
}

/// Replace each `${ref}` in `template` with its binding, leaving
/// surrounding text untouched.
fn substitute(template: &str, bindings: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Config(format!("unterminated reference in '{}'", template)))?;
        let var = InterpolatedVariable::parse(after[..end].trim())?;
        if let Some(value) = bindings.get(&var.full_key()) {
            out.push_str(value);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn scan_references(template: &str, vars: &mut Vec<InterpolatedVariable>) -> Result<()> {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Config(format!("unterminated reference in '{}'", template)))?;
        vars.push(InterpolatedVariable::parse(after[..end].trim())?);
        rest = &after[end + 1..];
    }
    Ok(())
}

// ============================================================================
// Variable references
// ============================================================================

/// A single parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpolatedVariable {
    /// `var.NAME`
    User(UserVariable),
    /// `TYPE.NAME[.N|.*].FIELD`
    Resource(ResourceVariable),
}

/// Reference to a user-supplied variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVariable {
    pub name: String,
}

/// Reference to an attribute of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceVariable {
    pub resource_type: String,
    pub name: String,
    /// Index into a counted resource, when addressed as `TYPE.NAME.N.FIELD`
    pub index: Option<usize>,
    /// True for aggregate references, `TYPE.NAME.*.FIELD`
    pub multi: bool,
    pub field: String,
}

impl ResourceVariable {
    /// The id of the resource this reference points at.
    ///
    /// Aggregate references resolve against the un-indexed id; indexed
    /// references against the instance id.
    pub fn resource_id(&self) -> String {
        match self.index {
            Some(i) => format!("{}.{}.{}", self.resource_type, self.name, i),
            None => format!("{}.{}", self.resource_type, self.name),
        }
    }

    /// Canonical dotted key used in the variable store.
    pub fn full_key(&self) -> String {
        if self.multi {
            format!("{}.{}.*.{}", self.resource_type, self.name, self.field)
        } else {
            format!("{}.{}", self.resource_id(), self.field)
        }
    }
}

impl InterpolatedVariable {
    /// Parse the inner text of a `${...}` reference.
    pub fn parse(key: &str) -> Result<InterpolatedVariable> {
        if let Some(name) = key.strip_prefix("var.") {
            if name.is_empty() {
                return Err(Error::Config(format!(
                    "invalid variable reference '{}'",
                    key
                )));
            }
            return Ok(InterpolatedVariable::User(UserVariable {
                name: name.to_string(),
            }));
        }

        let parts: Vec<&str> = key.splitn(3, '.').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(format!(
                "invalid variable reference '{}': expected var.NAME or TYPE.NAME.FIELD",
                key
            )));
        }
        let (resource_type, name, field_spec) = (parts[0], parts[1], parts[2]);

        let (index, multi, field) = if let Some(field) = field_spec.strip_prefix("*.") {
            (None, true, field)
        } else if let Some((head, tail)) = field_spec.split_once('.') {
            match head.parse::<usize>() {
                Ok(i) => (Some(i), false, tail),
                Err(_) => (None, false, field_spec),
            }
        } else {
            (None, false, field_spec)
        };
        if field.is_empty() {
            return Err(Error::Config(format!(
                "invalid variable reference '{}'",
                key
            )));
        }

        Ok(InterpolatedVariable::Resource(ResourceVariable {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            index,
            multi,
            field: field.to_string(),
        }))
    }

    /// Canonical dotted key used in the variable store.
    pub fn full_key(&self) -> String {
        match self {
            InterpolatedVariable::User(u) => format!("var.{}", u.name),
            InterpolatedVariable::Resource(r) => r.full_key(),
        }
    }
}
