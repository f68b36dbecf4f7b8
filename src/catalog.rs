use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::archive::{ArchiveEntry, ArchiveReader};
use crate::error::HerdError;
use crate::fetch::ArchiveFetcher;
use crate::paths;
use crate::provision::{self, VmProvisioningRequest};
use crate::workflow::{self, ImageQuery, SchemaViolation, WorkflowDefinition, WorkflowInfo};

/// `tracing` target for catalog diagnostics.
pub const LOG_TARGET: &str = "herd::workflows";

/// Where a catalog gets its workflows from and how long they stay fresh.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub archive_url: String,
    pub cache_dir: PathBuf,
    /// Zero refreshes on every call.
    pub ttl: Duration,
    /// Host architecture matched against `runs-on`.
    pub compatibility_tag: Option<String>,
}

/// Why an archive entry is not offered.
#[derive(Debug, Clone)]
enum Rejection {
    Invalid(SchemaViolation),
    Incompatible { id: String },
}

/// One refresh worth of workflows. Built completely before being swapped in.
#[derive(Debug, Default)]
struct Snapshot {
    workflows: Vec<WorkflowDefinition>,
    /// id and alias → index into `workflows`
    by_name: HashMap<String, usize>,
    rejected: HashMap<String, Rejection>,
}

impl Snapshot {
    fn build(entries: Vec<ArchiveEntry>, arch: Option<&str>) -> Self {
        let mut snapshot = Snapshot::default();

        for entry in entries {
            let Some(id) = workflow::workflow_id(&entry.name) else {
                continue;
            };
            if snapshot.knows(&id) {
                log_violation(&SchemaViolation::DuplicateName { name: id });
                continue;
            }

            let definition = match workflow::parse(&id, &entry.data) {
                Ok(definition) => definition,
                Err(violation) => {
                    log_violation(&violation);
                    snapshot.rejected.insert(id, Rejection::Invalid(violation));
                    continue;
                }
            };

            if let Some(taken) = definition.aliases.iter().find(|a| snapshot.knows(a)) {
                log_violation(&SchemaViolation::DuplicateName {
                    name: taken.clone(),
                });
                continue;
            }

            if !definition.runs_on(arch) {
                tracing::debug!(
                    target: LOG_TARGET,
                    "Skipping workflow '{id}': not compatible with {}",
                    arch.unwrap_or("this host")
                );
                for alias in &definition.aliases {
                    snapshot
                        .rejected
                        .insert(alias.clone(), Rejection::Incompatible { id: id.clone() });
                }
                continue;
            }

            let index = snapshot.workflows.len();
            for alias in &definition.aliases {
                snapshot.by_name.insert(alias.clone(), index);
            }
            snapshot.workflows.push(definition);
        }

        snapshot
    }

    fn knows(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.rejected.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Result<&WorkflowDefinition, HerdError> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(&self.workflows[index]);
        }
        match self.rejected.get(name) {
            Some(Rejection::Invalid(violation)) => {
                Err(HerdError::InvalidWorkflow(violation.clone()))
            }
            Some(Rejection::Incompatible { id }) => {
                Err(HerdError::IncompatibleWorkflow { name: id.clone() })
            }
            None => Err(HerdError::UnknownWorkflow {
                name: name.to_string(),
            }),
        }
    }
}

fn log_violation(violation: &SchemaViolation) {
    match violation {
        SchemaViolation::InvalidName { .. } => tracing::error!(target: LOG_TARGET, "{violation}"),
        _ => tracing::error!(target: LOG_TARGET, "Invalid workflow: {violation}"),
    }
}

/// Everything needed to launch a workflow, read from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Canonical id, even when looked up by alias.
    pub id: String,
    pub image: ImageQuery,
    /// Zero means no timeout.
    pub timeout_seconds: u64,
}

struct CatalogState {
    last_refresh: Option<Instant>,
    snapshot: Snapshot,
}

/// The set of workflows currently offered to VM creation.
///
/// Every operation first refreshes the cached archive if its TTL has run out.
/// The state lock is held across the refresh and the lookup that follows, so
/// callers sharing one catalog never see a half-built snapshot.
pub struct WorkflowCatalog<F, R> {
    archive_url: String,
    archive_path: PathBuf,
    cache_dir: PathBuf,
    ttl: Duration,
    compatibility_tag: Option<String>,
    fetcher: F,
    reader: R,
    state: Mutex<CatalogState>,
}

impl<F: ArchiveFetcher, R: ArchiveReader> WorkflowCatalog<F, R> {
    /// Create the catalog and perform the first refresh.
    ///
    /// Download and archive failures leave the catalog empty; any other error
    /// is returned.
    pub async fn new(settings: CatalogSettings, fetcher: F, reader: R) -> Result<Self, HerdError> {
        let catalog = Self {
            archive_path: paths::archive_path(&settings.cache_dir, &settings.archive_url),
            archive_url: settings.archive_url,
            cache_dir: settings.cache_dir,
            ttl: settings.ttl,
            compatibility_tag: settings.compatibility_tag,
            fetcher,
            reader,
            state: Mutex::new(CatalogState {
                last_refresh: None,
                snapshot: Snapshot::default(),
            }),
        };

        {
            let mut state = catalog.state.lock().await;
            catalog.refresh(&mut state).await?;
        }

        Ok(catalog)
    }

    pub fn archive_path(&self) -> &std::path::Path {
        &self.archive_path
    }

    /// Summaries of every valid, compatible workflow in archive order.
    pub async fn all_workflows(&self) -> Result<Vec<WorkflowInfo>, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        Ok(state.snapshot.workflows.iter().map(WorkflowDefinition::info).collect())
    }

    pub async fn info_for(&self, name: &str) -> Result<WorkflowInfo, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        state.snapshot.resolve(name).map(WorkflowDefinition::info)
    }

    /// Apply the named workflow to `request` and return the image to boot.
    pub async fn fetch_workflow_for(
        &self,
        name: &str,
        request: &mut VmProvisioningRequest,
    ) -> Result<ImageQuery, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        let definition = state.snapshot.resolve(name)?;
        provision::apply(definition, request)
    }

    /// Like [`fetch_workflow_for`](Self::fetch_workflow_for), but also returns
    /// the canonical id and timeout. One lock and at most one refresh cover
    /// all three, so they always come from the same snapshot.
    pub async fn prepare_launch(
        &self,
        name: &str,
        request: &mut VmProvisioningRequest,
    ) -> Result<LaunchPlan, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        let definition = state.snapshot.resolve(name)?;
        let image = provision::apply(definition, request)?;
        Ok(LaunchPlan {
            id: definition.id.clone(),
            image,
            timeout_seconds: definition.timeout_seconds,
        })
    }

    /// Canonical id for `name`, or an empty string if no usable workflow
    /// goes by that name.
    pub async fn name_from_workflow(&self, name: &str) -> Result<String, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        Ok(state
            .snapshot
            .resolve(name)
            .map(|d| d.id.clone())
            .unwrap_or_default())
    }

    /// Launch timeout in seconds; 0 for unknown workflows and workflows that
    /// set none. A workflow rejected for a schema violation reports it.
    pub async fn workflow_timeout(&self, name: &str) -> Result<u64, HerdError> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        match state.snapshot.resolve(name) {
            Ok(definition) => Ok(definition.timeout_seconds),
            Err(HerdError::UnknownWorkflow { .. } | HerdError::IncompatibleWorkflow { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Refresh now regardless of the TTL, with the same failure policy.
    pub async fn refresh_now(&self) -> Result<(), HerdError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await
    }

    async fn ensure_fresh(&self, state: &mut CatalogState) -> Result<(), HerdError> {
        if let Some(last) = state.last_refresh
            && last.elapsed() < self.ttl
        {
            return Ok(());
        }
        self.refresh(state).await
    }

    async fn refresh(&self, state: &mut CatalogState) -> Result<(), HerdError> {
        match self.load_snapshot().await {
            Ok(snapshot) => {
                tracing::info!(
                    target: LOG_TARGET,
                    url = %self.archive_url,
                    workflows = snapshot.workflows.len(),
                    "workflows refreshed"
                );
                state.snapshot = snapshot;
                state.last_refresh = Some(Instant::now());
                Ok(())
            }
            Err(e) if e.is_recoverable_refresh_failure() => {
                match &e {
                    HerdError::ArchiveCorrupt { message } => tracing::error!(
                        target: LOG_TARGET,
                        "Error extracting Workflows zip file: {message}"
                    ),
                    _ => tracing::error!(target: LOG_TARGET, "Error fetching workflows: {e}"),
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_snapshot(&self) -> Result<Snapshot, HerdError> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| HerdError::Io {
                context: format!("creating cache dir {}", self.cache_dir.display()),
                source: e,
            })?;

        self.fetcher.download(&self.archive_url, &self.archive_path).await?;
        let entries = self.reader.open(&self.archive_path)?;
        Ok(Snapshot::build(entries, self.compatibility_tag.as_deref()))
    }
}
