//! Typed model of a manifest document.
//!
//! Values that the document may spell in more than one way (environment
//! directives, hostname markers, numbers written as strings) are decided
//! here, once, when the manifest is deserialized.

use std::collections::BTreeMap;
use std::fmt;

use convoy_common::constants::HOSTNAME_USE_DEFAULT;
use convoy_common::error::{ConvoyError, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// Environment of a container or hook: variable name to value.
pub type Environment = BTreeMap<String, EnvValue>;

/// A single environment value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEnvValue")]
pub enum EnvValue {
    /// Used verbatim.
    Literal(String),
    /// Resolved at run time by calling `function` with `argument`.
    Directive {
        /// Resolver function name.
        function: String,
        /// Argument passed to the function.
        argument: String,
    },
}

impl EnvValue {
    /// Creates a literal value.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a directive value.
    #[must_use]
    pub fn directive(function: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::Directive {
            function: function.into(),
            argument: argument.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
    Directive(BTreeMap<String, String>),
}

impl TryFrom<RawEnvValue> for EnvValue {
    type Error = String;

    fn try_from(raw: RawEnvValue) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawEnvValue::Text(s) => Ok(Self::Literal(s)),
            RawEnvValue::Integer(n) => Ok(Self::Literal(n.to_string())),
            RawEnvValue::Float(n) => Ok(Self::Literal(n.to_string())),
            RawEnvValue::Flag(b) => Ok(Self::Literal(b.to_string())),
            RawEnvValue::Directive(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((function, argument)), None) => Ok(Self::Directive { function, argument }),
                    _ => Err("environment directive must have exactly one key".into()),
                }
            }
        }
    }
}

/// How the container's hostname is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum HostnameDirective {
    /// Not set: use the host's own hostname.
    #[default]
    HostDefault,
    /// `{"use-default": true}`: let the engine pick.
    EngineDefault,
    /// Passed through unchanged.
    Literal(String),
    /// Any other shape, rejected when resolved.
    Invalid(String),
}

impl From<serde_json::Value> for HostnameDirective {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::HostDefault,
            Value::String(s) => Self::Literal(s),
            Value::Object(ref map)
                if map.len() == 1 && map.get(HOSTNAME_USE_DEFAULT) == Some(&Value::Bool(true)) =>
            {
                Self::EngineDefault
            }
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// A value the document may write either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    /// Written as a number.
    Number(i64),
    /// Written as a string.
    Text(String),
}

impl NumberOrString {
    /// Normalizes to an integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Config`] if the string form does not parse.
    pub fn to_i64(&self, what: &str) -> Result<i64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s.trim().parse().map_err(|_| ConvoyError::Config {
                message: format!("{what}: expected an integer, got \"{s}\""),
            }),
        }
    }
}

impl fmt::Display for NumberOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// The privileged flag, written as a boolean or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PrivilegedFlag {
    /// Written as a boolean.
    Bool(bool),
    /// Written as a string.
    Text(String),
}

impl PrivilegedFlag {
    /// Normalizes to a boolean; strings compare case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Config`] for strings other than `true`/`false`.
    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Self::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            Self::Text(s) => Err(ConvoyError::Config {
                message: format!("privileged: expected true or false, got \"{s}\""),
            }),
        }
    }
}

/// A resource limit entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ulimit {
    /// Limit name (`nofile`, `nproc`, ...).
    pub name: String,
    /// Soft limit.
    pub soft: NumberOrString,
    /// Hard limit.
    pub hard: NumberOrString,
}

/// A command, written as a single line or as an argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Shell-quoted command line, split with POSIX word rules.
    Line(String),
    /// Explicit argument vector.
    Argv(Vec<String>),
}

impl Command {
    /// Returns the argument vector.
    ///
    /// A command line is split the way a POSIX shell splits words, so
    /// quoted arguments keep their inner whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Manifest`] if a command line has an
    /// unterminated quote or a trailing escape.
    pub fn argv(&self) -> Result<Vec<String>> {
        match self {
            Self::Line(line) => shlex::split(line).ok_or_else(|| ConvoyError::Manifest {
                message: format!("unbalanced quotes in command: {line}"),
            }),
            Self::Argv(args) => Ok(args.clone()),
        }
    }

    /// Returns `true` if the command has no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Line(line) => line.trim().is_empty(),
            Self::Argv(args) => args.is_empty(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => f.write_str(line.trim()),
            Self::Argv(args) => f.write_str(&args.join(" ")),
        }
    }
}

/// A run-to-completion container executed before its owner is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreStartHook {
    /// Command run in the transient container.
    pub command: Command,
    /// Overlay applied on top of the owner's resolved environment.
    #[serde(default, alias = "env")]
    pub environment: Environment,
}

/// Desired configuration of one container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    /// Unique container name, taken from the manifest key.
    #[serde(skip)]
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command overriding the image default.
    #[serde(default)]
    pub command: Option<Command>,
    /// Environment variables.
    #[serde(default, alias = "env")]
    pub environment: Environment,
    /// Volume binds, `host:container[:mode]`.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Port bindings: container port (`80`, `80/tcp`) to host port.
    #[serde(default)]
    pub ports: BTreeMap<String, NumberOrString>,
    /// Dependencies: container name to optional link alias.
    #[serde(default)]
    pub links: BTreeMap<String, Option<String>>,
    /// Hooks run, in order, before the container is created.
    #[serde(default)]
    pub pre_start: Vec<PreStartHook>,
    /// Hostname directive.
    #[serde(default)]
    pub hostname: HostnameDirective,
    /// Privileged mode.
    #[serde(default)]
    pub privileged: Option<PrivilegedFlag>,
    /// Resource limits.
    #[serde(default)]
    pub ulimits: Vec<Ulimit>,
    /// Relative CPU weight.
    #[serde(default)]
    pub cpu_shares: Option<NumberOrString>,
    /// Network mode (`bridge`, `host`, `container:<name>`, ...).
    #[serde(default)]
    pub network_mode: Option<String>,
    /// IPC namespace mode.
    #[serde(default)]
    pub ipc_mode: Option<String>,
    /// PID namespace mode.
    #[serde(default)]
    pub pid_mode: Option<String>,
}

impl ContainerSpec {
    /// Creates a container with only a name and an image.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: None,
            environment: Environment::new(),
            volumes: Vec::new(),
            ports: BTreeMap::new(),
            links: BTreeMap::new(),
            pre_start: Vec::new(),
            hostname: HostnameDirective::HostDefault,
            privileged: None,
            ulimits: Vec::new(),
            cpu_shares: None,
            network_mode: None,
            ipc_mode: None,
            pid_mode: None,
        }
    }

    /// Names of the containers this one links to.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }
}

/// The desired container set for a host, keyed by container name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    containers: BTreeMap<String, ContainerSpec>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Manifest`] if the name is already taken.
    pub fn insert(&mut self, spec: ContainerSpec) -> Result<()> {
        if self.containers.contains_key(&spec.name) {
            return Err(ConvoyError::Manifest {
                message: format!("duplicate container name: \"{}\"", spec.name),
            });
        }
        let _ = self.containers.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Looks up a container by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.get(name)
    }

    /// Returns `true` if a container with this name is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    /// Iterates over containers in name order.
    pub fn containers(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.containers.values()
    }

    /// Iterates over container names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.containers.keys().map(String::as_str)
    }

    /// Number of declared containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns `true` if no containers are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

struct ManifestVisitor;

impl<'de> Visitor<'de> for ManifestVisitor {
    type Value = Manifest;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of container name to container definition")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Manifest, A::Error> {
        let mut manifest = Manifest::new();
        while let Some((name, mut spec)) = map.next_entry::<String, ContainerSpec>()? {
            spec.name = name;
            manifest.insert(spec).map_err(de::Error::custom)?;
        }
        Ok(manifest)
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(ManifestVisitor)
    }
}
