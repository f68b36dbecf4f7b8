use std::fmt;
use std::path::Path;

use facet::Facet;
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::util::{self, ByteSize};

/// Only documents directly under a directory with this name are workflows.
pub const WORKFLOW_DIR_VERSION: &str = "v1";

/// Schemes the `image` key may use. `release`/`daily` are symbolic remotes,
/// the rest are custom image URLs.
const SYMBOLIC_SCHEMES: &[&str] = &["release", "daily"];
const URL_SCHEMES: &[&str] = &["http", "https", "file"];

// ── Types ────────────────────────────────────────────────

/// A resource a workflow can put a floor on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cores,
    Memory,
    Disk,
}

impl Resource {
    /// Name used when a request falls short of the minimum.
    pub fn label(self) -> &'static str {
        match self {
            Resource::Cores => "Number of CPUs",
            Resource::Memory => "Memory size",
            Resource::Disk => "Disk space",
        }
    }

    /// Key under `limits` in the workflow document.
    pub fn key(self) -> &'static str {
        match self {
            Resource::Cores => "min-cpu",
            Resource::Memory => "min-mem",
            Resource::Disk => "min-disk",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Cores => "CPU",
            Resource::Memory => "memory size",
            Resource::Disk => "disk space",
        })
    }
}

/// A minimum together with the text it was written as, for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minimum<T> {
    pub value: T,
    pub text: String,
}

/// The image a workflow boots from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageQuery {
    Alias {
        release: String,
        remote_name: Option<String>,
    },
    Custom {
        url: String,
    },
}

impl Default for ImageQuery {
    fn default() -> Self {
        ImageQuery::Alias {
            release: "default".into(),
            remote_name: None,
        }
    }
}

impl fmt::Display for ImageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageQuery::Alias {
                release,
                remote_name: Some(remote),
            } => write!(f, "{remote}:{release}"),
            ImageQuery::Alias { release, .. } => f.write_str(release),
            ImageQuery::Custom { url } => f.write_str(url),
        }
    }
}

/// A validated workflow. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,
    /// Lookup names, `id` first.
    pub aliases: Vec<String>,
    pub version: String,
    pub description: String,
    /// Architectures this workflow runs on. Empty means all.
    pub runs_on: Vec<String>,
    pub image: ImageQuery,
    pub minimum_cores: Option<Minimum<u32>>,
    pub minimum_memory: Option<Minimum<ByteSize>>,
    pub minimum_disk: Option<Minimum<ByteSize>>,
    pub cloud_init: Option<Value>,
    /// Zero means no timeout.
    pub timeout_seconds: u64,
}

impl WorkflowDefinition {
    pub fn runs_on(&self, arch: Option<&str>) -> bool {
        self.runs_on.is_empty() || arch.is_some_and(|a| self.runs_on.iter().any(|r| r == a))
    }

    pub fn info(&self) -> WorkflowInfo {
        WorkflowInfo {
            aliases: self.aliases.clone(),
            title: self.description.clone(),
            version: self.version.clone(),
        }
    }
}

/// Summary shown to callers listing or inspecting workflows.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct WorkflowInfo {
    pub aliases: Vec<String>,
    pub title: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("Cannot parse the {workflow} workflow document")]
    Unparseable { workflow: String },

    #[error("The '{key}' key is required for the {workflow} workflow")]
    MissingKey { key: &'static str, workflow: String },

    #[error("Cannot convert '{key}' key for the {workflow} workflow")]
    Unconvertible { key: &'static str, workflow: String },

    #[error("Invalid workflow name '{name}': must be a valid host name")]
    InvalidName { name: String },

    #[error("Duplicate workflow name '{name}'")]
    DuplicateName { name: String },

    #[error("Unsupported image scheme in the {workflow} workflow")]
    UnsupportedImageScheme { workflow: String },

    #[error("Minimum {resource} value in the {workflow} workflow is invalid")]
    InvalidMinimum { resource: Resource, workflow: String },

    #[error("Cannot convert cloud-init data for the {workflow} workflow")]
    InvalidCloudInit { workflow: String },

    #[error("Invalid timeout given in the {workflow} workflow")]
    InvalidTimeout { workflow: String },
}

impl SchemaViolation {
    /// The document key (or pseudo-key) the violation is about.
    pub fn field(&self) -> &'static str {
        match self {
            SchemaViolation::Unparseable { .. } => "document",
            SchemaViolation::MissingKey { key, .. } | SchemaViolation::Unconvertible { key, .. } => {
                *key
            }
            SchemaViolation::InvalidName { .. } | SchemaViolation::DuplicateName { .. } => "name",
            SchemaViolation::UnsupportedImageScheme { .. } => "image",
            SchemaViolation::InvalidMinimum { resource, .. } => resource.key(),
            SchemaViolation::InvalidCloudInit { .. } => "cloud-init",
            SchemaViolation::InvalidTimeout { .. } => "timeout",
        }
    }
}

// ── Archive entry names ──────────────────────────────────

/// The workflow id for an archive entry, or `None` if the entry is not a
/// workflow document (`<anything>/v1/<id>.yaml` or `.yml`).
pub fn workflow_id(entry_name: &str) -> Option<String> {
    let path = Path::new(entry_name);
    let dir = path.parent()?.file_name()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    if dir != WORKFLOW_DIR_VERSION || !matches!(ext, "yaml" | "yml") {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

// ── Parsing ──────────────────────────────────────────────

/// Parse and validate one workflow document. The first violated rule wins.
pub fn parse(id: &str, raw: &[u8]) -> Result<WorkflowDefinition, SchemaViolation> {
    let doc = parse_document(id, raw)?;
    let text = HeaderText::read(raw);
    let description = required_string(&doc, "description", text.description, id)?;
    let version = required_string(&doc, "version", text.version, id)?;
    let runs_on = runs_on(&doc, id)?;
    let aliases = aliases(&doc, id)?;

    let instance = doc.get("instances").and_then(|i| i.get(id));
    let limits = instance.and_then(|i| i.get("limits"));

    let image = image(instance, id)?;
    let minimum_cores = minimum_cores(limits, id)?;
    let minimum_memory = minimum_size(limits, Resource::Memory, id)?;
    let minimum_disk = minimum_size(limits, Resource::Disk, id)?;
    let cloud_init = cloud_init(instance, id)?;
    let timeout_seconds = timeout(instance, id)?;

    Ok(WorkflowDefinition {
        id: id.to_string(),
        aliases,
        version,
        description,
        runs_on,
        image,
        minimum_cores,
        minimum_memory,
        minimum_disk,
        cloud_init,
        timeout_seconds,
    })
}

fn parse_document(id: &str, raw: &[u8]) -> Result<Value, SchemaViolation> {
    match serde_yaml::from_slice::<Value>(raw) {
        Ok(doc @ Value::Mapping(_)) => Ok(doc),
        _ => Err(SchemaViolation::Unparseable {
            workflow: id.to_string(),
        }),
    }
}

/// `description` and `version` exactly as written. Going through `Value`
/// would turn `version: 1.10` into the float `1.1`; deserializing into
/// `String` keeps the scalar's source text.
#[derive(Debug, Default, Deserialize)]
struct HeaderText {
    description: Option<String>,
    version: Option<String>,
}

impl HeaderText {
    /// Fails soft: if either key is not a scalar, both fall back to `Value`,
    /// which then reports the precise violation.
    fn read(raw: &[u8]) -> Self {
        serde_yaml::from_slice(raw).unwrap_or_default()
    }
}

/// Scalars convert to strings the way YAML users expect: `version: 0.1` is
/// the string `"0.1"`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_string(
    doc: &Value,
    key: &'static str,
    as_written: Option<String>,
    id: &str,
) -> Result<String, SchemaViolation> {
    let value = doc.get(key).ok_or_else(|| SchemaViolation::MissingKey {
        key,
        workflow: id.to_string(),
    })?;
    if let Some(text) = as_written {
        return Ok(text);
    }
    scalar_string(value).ok_or_else(|| SchemaViolation::Unconvertible {
        key,
        workflow: id.to_string(),
    })
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_sequence()?
        .iter()
        .map(|v| scalar_string(v).filter(|s| !s.is_empty()))
        .collect()
}

fn runs_on(doc: &Value, id: &str) -> Result<Vec<String>, SchemaViolation> {
    let Some(value) = doc.get("runs-on") else {
        return Ok(Vec::new());
    };
    string_list(value).ok_or_else(|| SchemaViolation::Unconvertible {
        key: "runs-on",
        workflow: id.to_string(),
    })
}

fn aliases(doc: &Value, id: &str) -> Result<Vec<String>, SchemaViolation> {
    if !util::valid_hostname(id) {
        return Err(SchemaViolation::InvalidName {
            name: id.to_string(),
        });
    }

    let mut aliases = vec![id.to_string()];
    let Some(value) = doc.get("aliases") else {
        return Ok(aliases);
    };
    let extra = string_list(value).ok_or_else(|| SchemaViolation::Unconvertible {
        key: "aliases",
        workflow: id.to_string(),
    })?;
    for alias in extra {
        if !util::valid_hostname(&alias) {
            return Err(SchemaViolation::InvalidName { name: alias });
        }
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    Ok(aliases)
}

fn image(instance: Option<&Value>, id: &str) -> Result<ImageQuery, SchemaViolation> {
    let Some(value) = instance.and_then(|i| i.get("image")) else {
        return Ok(ImageQuery::default());
    };
    let unsupported = || SchemaViolation::UnsupportedImageScheme {
        workflow: id.to_string(),
    };

    let image = value.as_str().ok_or_else(unsupported)?;
    let (scheme, rest) = image.split_once(':').ok_or_else(unsupported)?;

    if SYMBOLIC_SCHEMES.contains(&scheme) && !rest.is_empty() {
        Ok(ImageQuery::Alias {
            release: rest.to_string(),
            remote_name: Some(scheme.to_string()),
        })
    } else if URL_SCHEMES.contains(&scheme) && rest.starts_with("//") {
        Ok(ImageQuery::Custom {
            url: image.to_string(),
        })
    } else {
        Err(unsupported())
    }
}

fn minimum_cores(
    limits: Option<&Value>,
    id: &str,
) -> Result<Option<Minimum<u32>>, SchemaViolation> {
    let Some(value) = limits.and_then(|l| l.get(Resource::Cores.key())) else {
        return Ok(None);
    };
    let text = scalar_string(value);
    match text.as_deref().map(|t| t.trim().parse::<u32>()) {
        Some(Ok(cores)) if cores > 0 => Ok(Some(Minimum {
            value: cores,
            text: cores.to_string(),
        })),
        _ => Err(SchemaViolation::InvalidMinimum {
            resource: Resource::Cores,
            workflow: id.to_string(),
        }),
    }
}

fn minimum_size(
    limits: Option<&Value>,
    resource: Resource,
    id: &str,
) -> Result<Option<Minimum<ByteSize>>, SchemaViolation> {
    let Some(value) = limits.and_then(|l| l.get(resource.key())) else {
        return Ok(None);
    };
    let invalid = || SchemaViolation::InvalidMinimum {
        resource,
        workflow: id.to_string(),
    };
    let text = scalar_string(value).ok_or_else(invalid)?;
    let size: ByteSize = text.parse().map_err(|_| invalid())?;
    Ok(Some(Minimum { value: size, text }))
}

/// `cloud-init.vendor-data` is usually YAML text embedded in the document;
/// an inline mapping is accepted as well.
fn cloud_init(instance: Option<&Value>, id: &str) -> Result<Option<Value>, SchemaViolation> {
    let Some(value) = instance
        .and_then(|i| i.get("cloud-init"))
        .and_then(|c| c.get("vendor-data"))
    else {
        return Ok(None);
    };
    let invalid = || SchemaViolation::InvalidCloudInit {
        workflow: id.to_string(),
    };
    match value {
        Value::String(text) => match serde_yaml::from_str::<Value>(text) {
            Ok(data @ Value::Mapping(_)) => Ok(Some(data)),
            _ => Err(invalid()),
        },
        Value::Mapping(_) => Ok(Some(value.clone())),
        _ => Err(invalid()),
    }
}

fn timeout(instance: Option<&Value>, id: &str) -> Result<u64, SchemaViolation> {
    let Some(value) = instance.and_then(|i| i.get("timeout")) else {
        return Ok(0);
    };
    let invalid = || SchemaViolation::InvalidTimeout {
        workflow: id.to_string(),
    };
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(invalid),
        Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
