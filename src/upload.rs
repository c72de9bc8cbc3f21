//! Document submission and deletion.
//!
//! Uploaded bytes are copied to `<upload_dir>/<tenant>/<8 hex>_<name>` and a
//! `pending` document is recorded; the ingestion pipeline picks it up later.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use docchat_core::error::RagError;
use docchat_core::models::Document;
use docchat_core::store::Store;

use crate::config::Config;
use crate::extract::DocumentFormat;

const FALLBACK_NAME: &str = "upload";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("tenant {0} not found")]
    UnknownTenant(String),
    #[error("tenant id {0:?} cannot be used as a directory name")]
    InvalidTenantId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] RagError),
}

/// Strip directories, replace characters outside `[A-Za-z0-9_.-]` with `_`
/// and collapse runs of dots.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            c
        } else {
            '_'
        };
        if c == '.' && out.ends_with('.') {
            continue;
        }
        out.push(c);
    }

    if out.is_empty() || out == "." {
        FALLBACK_NAME.to_string()
    } else {
        out
    }
}

/// The tenant's upload directory. Ids that are not a single plain path
/// segment are refused rather than rewritten, so two tenants never share
/// a directory.
fn tenant_dir(config: &Config, tenant_id: &str) -> Result<PathBuf, UploadError> {
    let plain = !tenant_id.is_empty()
        && !tenant_id.starts_with('.')
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !plain {
        return Err(UploadError::InvalidTenantId(tenant_id.to_string()));
    }
    Ok(config.storage.upload_dir.join(tenant_id))
}

/// Copy `source` into the tenant's upload directory and record a pending
/// document. `name` defaults to the source file name.
pub async fn submit_document(
    store: &dyn Store,
    config: &Config,
    tenant_id: &str,
    source: &Path,
    name: Option<&str>,
) -> Result<Document, UploadError> {
    let tenant_dir = tenant_dir(config, tenant_id)?;
    if store.get_tenant(tenant_id).await?.is_none() {
        return Err(UploadError::UnknownTenant(tenant_id.to_string()));
    }

    let display_name = name
        .map(str::to_string)
        .or_else(|| source.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let safe_name = sanitize_filename(&display_name);

    let media_type = DocumentFormat::media_type_for(Path::new(&safe_name))
        .or_else(|| DocumentFormat::media_type_for(source))
        .ok_or_else(|| UploadError::Unsupported(display_name.clone()))?;

    let size = tokio::fs::metadata(source).await?.len();
    let limit = config.storage.max_upload_mb * 1024 * 1024;
    if size > limit {
        return Err(UploadError::TooLarge { size, limit });
    }

    tokio::fs::create_dir_all(&tenant_dir).await?;
    let file_id = uuid::Uuid::new_v4().simple().to_string();
    let target = tenant_dir.join(format!("{}_{}", &file_id[..8], safe_name));
    tokio::fs::copy(source, &target).await?;

    let doc = Document::pending(
        tenant_id,
        &safe_name,
        &target.display().to_string(),
        media_type,
        size as i64,
    );
    if let Err(err) = store.insert_document(&doc).await {
        let _ = tokio::fs::remove_file(&target).await;
        return Err(err.into());
    }

    info!(tenant = tenant_id, document = %doc.id, name = %doc.name, size, "document submitted");
    Ok(doc)
}

/// Delete a tenant's document, its passages and, when it lives under the
/// upload directory, its stored file.
pub async fn delete_document(
    store: &dyn Store,
    config: &Config,
    tenant_id: &str,
    document_id: &str,
) -> Result<Document, UploadError> {
    let doc = store
        .delete_document(tenant_id, document_id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;

    let location = PathBuf::from(&doc.location);
    if is_within(&location, &config.storage.upload_dir) {
        if let Err(err) = tokio::fs::remove_file(&location).await {
            warn!(path = %location.display(), error = %err, "could not remove stored file");
        }
    }

    info!(tenant = tenant_id, document = document_id, "document deleted");
    Ok(doc)
}

fn is_within(path: &Path, dir: &Path) -> bool {
    match (path.canonicalize(), dir.canonicalize()) {
        (Ok(path), Ok(dir)) => path.starts_with(dir),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use docchat_core::models::{DocumentStatus, Tenant};
    use docchat_core::store::memory::InMemoryStore;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report 2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_filename("price...list.txt"), "price.list.txt");
        assert_eq!(sanitize_filename("cennik-zł.txt"), "cennik-z_.txt");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
    }

    fn config(upload_dir: &Path, max_mb: u64) -> Config {
        parse_config(&format!(
            "[db]\npath = \"x\"\n[storage]\nupload_dir = \"{}\"\nmax_upload_mb = {max_mb}\n",
            upload_dir.display()
        ))
        .unwrap()
    }

    async fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_tenant(&Tenant::new("t1", "Acme")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_submit_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let source = dir.path().join("Opening Hours.txt");
        std::fs::write(&source, "Mon-Fri 9-17").unwrap();

        let store = store().await;
        let cfg = config(&uploads, 25);
        let doc = submit_document(&store, &cfg, "t1", &source, None).await.unwrap();

        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.name, "Opening_Hours.txt");
        assert_eq!(doc.media_type, "text/plain");
        assert_eq!(doc.size_bytes, 12);
        let stored = PathBuf::from(&doc.location);
        assert!(stored.exists());
        assert!(stored.starts_with(uploads.join("t1")));

        delete_document(&store, &cfg, "t1", &doc.id).await.unwrap();
        assert!(!stored.exists());
        assert!(store.load_document(&doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_rejects_unsupported_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        let cfg = config(&dir.path().join("uploads"), 1);

        let exe = dir.path().join("tool.exe");
        std::fs::write(&exe, b"MZ").unwrap();
        assert!(matches!(
            submit_document(&store, &cfg, "t1", &exe, None).await,
            Err(UploadError::Unsupported(_))
        ));

        let big = dir.path().join("big.txt");
        std::fs::write(&big, vec![b'a'; 1024 * 1024 + 1]).unwrap();
        assert!(matches!(
            submit_document(&store, &cfg, "t1", &big, None).await,
            Err(UploadError::TooLarge { .. })
        ));

        assert!(matches!(
            submit_document(&store, &cfg, "nobody", &big, None).await,
            Err(UploadError::UnknownTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_tenant_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("faq.md");
        std::fs::write(&source, "# FAQ").unwrap();
        let store = store().await;
        store.create_tenant(&Tenant::new("t2", "Other")).await.unwrap();
        let cfg = config(&dir.path().join("uploads"), 25);

        let doc = submit_document(&store, &cfg, "t1", &source, None).await.unwrap();
        let err = delete_document(&store, &cfg, "t2", &doc.id).await.unwrap_err();
        assert!(matches!(err, UploadError::Store(RagError::NotFound(_))));
        assert!(PathBuf::from(&doc.location).exists());
    }

    #[tokio::test]
    async fn test_submit_refuses_tenant_ids_that_escape_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let source = dir.path().join("faq.md");
        std::fs::write(&source, "# FAQ").unwrap();
        let store = InMemoryStore::new();
        let cfg = config(&uploads, 25);

        for id in ["../escape", "a/b", "..", "c:\\x", ""] {
            store.create_tenant(&Tenant::new(id, "Odd")).await.unwrap();
            let err = submit_document(&store, &cfg, id, &source, None).await.unwrap_err();
            assert!(matches!(err, UploadError::InvalidTenantId(_)), "{id:?} -> {err:?}");
        }
        assert!(!dir.path().join("escape").exists());
        assert!(!uploads.exists());
    }
}
