//! Document bucket and document upload

use super::{logged, tolerate_existing, ResourceHandle, StageEnv};
use crate::cloud::ResourceKind;
use crate::error::Result;
use crate::tenant::TenantNames;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Outcome of uploading a document source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSync {
    /// Keys uploaded by this run
    pub uploaded: Vec<String>,
    /// Keys already present in the bucket
    pub skipped: Vec<String>,
}

impl DocumentSync {
    /// Whether this run uploaded anything
    pub fn changed(&self) -> bool {
        !self.uploaded.is_empty()
    }
}

/// Creates the tenant bucket and uploads documents into it
pub struct BucketProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

impl<'a> BucketProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    /// Make sure the tenant bucket exists
    pub async fn ensure_bucket(&self, names: &TenantNames) -> Result<ResourceHandle> {
        logged(ResourceKind::Bucket, &names.bucket, self.ensure_bucket_inner(names).await)
    }

    async fn ensure_bucket_inner(&self, names: &TenantNames) -> Result<ResourceHandle> {
        let storage = self.env.clients.storage();
        let arn = names.bucket_arn();

        if storage.head_bucket(&names.bucket).await? {
            tracing::info!(bucket = %names.bucket, "Bucket already exists");
            return Ok(ResourceHandle::synchronous(ResourceKind::Bucket, &names.bucket, false)
                .with_arn(arn));
        }

        let created = tolerate_existing(
            ResourceKind::Bucket,
            &names.bucket,
            storage.create_bucket(&names.bucket, &names.region).await,
        )?
        .is_some();
        if created {
            tracing::info!(bucket = %names.bucket, region = %names.region, "Created bucket");
        }
        Ok(ResourceHandle::synchronous(ResourceKind::Bucket, &names.bucket, created).with_arn(arn))
    }

    /// Upload every regular file of `source` that is not in the bucket yet
    ///
    /// `source` is either a directory, whose top-level regular files are
    /// uploaded, or a single file. Presence is decided by key only.
    ///
    /// # Arguments
    /// * `names` - Tenant names (bucket and key prefix)
    /// * `source` - Local document directory or file
    ///
    /// # Returns
    /// * `Ok(DocumentSync)` - Uploaded and skipped keys
    /// * `Err(ProvisionError)` - The source cannot be read or an upload failed
    pub async fn sync_documents(&self, names: &TenantNames, source: &Path) -> Result<DocumentSync> {
        logged(
            ResourceKind::Document,
            &names.document_prefix,
            self.sync_documents_inner(names, source).await,
        )
    }

    async fn sync_documents_inner(&self, names: &TenantNames, source: &Path) -> Result<DocumentSync> {
        let storage = self.env.clients.storage();
        let mut sync = DocumentSync::default();

        for path in list_documents(source).await? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!(path = %path.display(), "Skipping file with a non UTF-8 name");
                continue;
            };
            let key = names.document_key(file_name);

            if storage.head_object(&names.bucket, &key).await? {
                tracing::debug!(key = %key, "Document already uploaded");
                sync.skipped.push(key);
                continue;
            }

            let body = fs::read(&path).await?;
            let size = body.len();
            storage.put_object(&names.bucket, &key, body).await?;
            tracing::info!(bucket = %names.bucket, key = %key, bytes = size, "Uploaded document");
            sync.uploaded.push(key);
        }

        Ok(sync)
    }
}

/// Regular files of a document source, sorted by path
async fn list_documents(source: &Path) -> Result<Vec<PathBuf>> {
    let metadata = fs::metadata(source).await?;
    if metadata.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
