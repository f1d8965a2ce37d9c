//! Data source and ingestion
//!
//! Ingestion is started when the data source was created by this run, when
//! new documents were uploaded, or when the data source has no job that is
//! running or has completed. The last case picks up a run that failed
//! between creating the data source and starting its first job. An
//! identical re-run after a successful one starts nothing. Whether the job
//! is awaited is governed by `IngestionConfig`.

use super::{logged, tolerate_existing, vanished, ResourceHandle, StageEnv};
use crate::cloud::{DataSourceSpec, IngestionJob, ResourceKind, ResourceStatus};
use crate::error::{ProvisionError, Result};
use crate::policy;
use crate::tenant::ProvisioningContext;

/// Result of the data-source stage
#[derive(Debug, Clone)]
pub struct DataSourceOutcome {
    /// Data source and, when started, ingestion job handles
    pub handles: Vec<ResourceHandle>,
    /// Ingestion job started by this run
    pub ingestion_job: Option<IngestionJob>,
}

/// Upserts the tenant's data source and triggers ingestion
pub struct DataSourceProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

impl<'a> DataSourceProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    /// Find or create the data source, then ingest if needed
    ///
    /// # Arguments
    /// * `ctx` - Run context; the knowledge base id must be resolved
    /// * `documents_changed` - Whether this run uploaded new documents
    ///
    /// # Returns
    /// * `Ok((ctx, outcome))` - Context with the data source id resolved
    /// * `Err(ProvisionError)` - Missing knowledge base, provider error, or failed ingestion
    pub async fn ensure(
        &self,
        ctx: ProvisioningContext,
        documents_changed: bool,
    ) -> Result<(ProvisioningContext, DataSourceOutcome)> {
        let name = ctx.names().data_source.clone();
        logged(
            ResourceKind::DataSource,
            &name,
            self.ensure_inner(ctx, documents_changed).await,
        )
    }

    async fn find(&self, kb_id: &str, name: &str) -> Result<Option<String>> {
        let sources = self
            .env
            .clients
            .knowledge_bases()
            .list_data_sources(kb_id)
            .await?;
        Ok(sources.into_iter().find(|ds| ds.name == name).map(|ds| ds.id))
    }

    /// Whether any job of the data source is running or has completed
    async fn has_usable_job(&self, kb_id: &str, ds_id: &str) -> Result<bool> {
        let jobs = self
            .env
            .clients
            .knowledge_bases()
            .list_ingestion_jobs(kb_id, ds_id)
            .await?;
        Ok(jobs
            .iter()
            .any(|job| job.status.lifecycle() != ResourceStatus::Failed))
    }

    async fn ensure_inner(
        &self,
        ctx: ProvisioningContext,
        documents_changed: bool,
    ) -> Result<(ProvisioningContext, DataSourceOutcome)> {
        let knowledge_bases = self.env.clients.knowledge_bases();
        let kb_id = ctx.require_knowledge_base_id()?.to_string();
        let names = ctx.names();
        let name = names.data_source.as_str();

        let (id, created) = match self.find(&kb_id, name).await? {
            Some(id) => {
                tracing::info!(data_source = %name, id = %id, "Data source already exists");
                (id, false)
            }
            None => {
                let spec = DataSourceSpec {
                    name: name.to_string(),
                    description: "Data source for the Financial Knowledge Base".to_string(),
                    data_source_configuration: policy::data_source_configuration(names),
                    chunking_configuration: policy::chunking_configuration(),
                };
                self.env
                    .settle(
                        self.env.config.timing.settle.before_data_source,
                        "knowledge base readiness",
                    )
                    .await?;
                match tolerate_existing(
                    ResourceKind::DataSource,
                    name,
                    knowledge_bases.create_data_source(&kb_id, &spec).await,
                )? {
                    Some(ds) => {
                        tracing::info!(data_source = %name, id = %ds.id, "Created data source");
                        (ds.id, true)
                    }
                    None => (
                        self.find(&kb_id, name)
                            .await?
                            .ok_or_else(|| vanished(ResourceKind::DataSource, name))?,
                        false,
                    ),
                }
            }
        };

        let (kb, ds) = (kb_id.as_str(), id.as_str());
        self.env
            .wait_until_active(ResourceKind::DataSource, name, || async move {
                Ok::<_, ProvisionError>(knowledge_bases.get_data_source(kb, ds).await?.status)
            })
            .await?;

        let mut handles = vec![ResourceHandle::synchronous(ResourceKind::DataSource, name, created)
            .with_id(ds)
            .with_status(ResourceStatus::Active)];

        let reason = if created {
            Some("data source created")
        } else if documents_changed {
            Some("new documents uploaded")
        } else if !self.has_usable_job(kb, ds).await? {
            Some("no running or completed ingestion job")
        } else {
            None
        };

        let ingestion_job = if let Some(reason) = reason {
            tracing::debug!(data_source = %name, reason, "Starting ingestion");
            let job = knowledge_bases.start_ingestion_job(kb, ds).await?;
            tracing::info!(data_source = %name, job = %job.id, "Started ingestion job");
            let mut handle = ResourceHandle::synchronous(ResourceKind::IngestionJob, &job.id, true)
                .with_id(&job.id)
                .with_status(job.status.lifecycle());

            if self.env.config.ingestion.wait_for_completion {
                let job_id = job.id.as_str();
                self.env
                    .wait_until_active(ResourceKind::IngestionJob, job_id, || async move {
                        let job = knowledge_bases.get_ingestion_job(kb, ds, job_id).await?;
                        Ok::<_, ProvisionError>(job.status.lifecycle())
                    })
                    .await?;
                handle = handle.with_status(ResourceStatus::Active);
            }
            handles.push(handle);
            Some(job)
        } else {
            tracing::debug!(data_source = %name, "Data source is ingested, skipping ingestion");
            None
        };

        Ok((
            ctx.with_data_source_id(ds),
            DataSourceOutcome {
                handles,
                ingestion_job,
            },
        ))
    }
}
