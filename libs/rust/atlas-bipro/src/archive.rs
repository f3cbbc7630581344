//! Document archive port
//!
//! Thin port to the external document archive. The archive deduplicates by
//! content hash, so uploading the same bytes twice is idempotent and the
//! orchestrator's at-least-once acknowledge semantics are safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the archive adapter.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive request failed: {0}")]
    Http(String),
    #[error("archive returned HTTP {0}")]
    Status(u16),
}

/// A document reference as the archive reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveDocument {
    pub id: i64,
    pub filename: String,
    /// SHA-256 of the content, the archive's dedup key.
    pub content_hash: String,
    pub box_type: String,
    pub size: u64,
}

/// Aggregate archive statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxStats {
    pub total_documents: u64,
    pub total_bytes: u64,
    pub by_box: HashMap<String, u64>,
}

/// CRUD surface of the external archive.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Upload a file. Byte-identical uploads return the existing document.
    async fn upload(
        &self,
        path: &Path,
        source_type: &str,
        box_type: Option<&str>,
    ) -> Result<Option<ArchiveDocument>, ArchiveError>;

    /// Download a document into `target_dir`; returns the written path.
    async fn download(
        &self,
        doc_id: i64,
        target_dir: &Path,
        filename_override: Option<&str>,
    ) -> Result<Option<PathBuf>, ArchiveError>;

    async fn list(
        &self,
        box_type: Option<&str>,
        is_archived: Option<bool>,
    ) -> Result<Vec<ArchiveDocument>, ArchiveError>;

    async fn stats(&self) -> Result<BoxStats, ArchiveError>;
}

/// REST client for the production archive service.
pub struct HttpArchive {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    filename: &'a str,
    content_base64: String,
    source_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    box_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct DownloadResponse {
    filename: String,
    content_base64: String,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ArchiveStore for HttpArchive {
    async fn upload(
        &self,
        path: &Path,
        source_type: &str,
        box_type: Option<&str>,
    ) -> Result<Option<ArchiveDocument>, ArchiveError> {
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let request = UploadRequest {
            filename: &filename,
            content_base64: {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(&content)
            },
            source_type,
            box_type,
        };

        let response = self
            .client
            .post(self.url("/documents"))
            .json(&request)
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        match response.status().as_u16() {
            200 | 201 => {
                let doc = response
                    .json::<ArchiveDocument>()
                    .await
                    .map_err(|e| ArchiveError::Http(e.to_string()))?;
                Ok(Some(doc))
            }
            404 => Ok(None),
            status => Err(ArchiveError::Status(status)),
        }
    }

    async fn download(
        &self,
        doc_id: i64,
        target_dir: &Path,
        filename_override: Option<&str>,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        let response = self
            .client
            .get(self.url(&format!("/documents/{doc_id}/content")))
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        match response.status().as_u16() {
            200 => {
                let payload = response
                    .json::<DownloadResponse>()
                    .await
                    .map_err(|e| ArchiveError::Http(e.to_string()))?;
                let content = {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD
                        .decode(payload.content_base64.as_bytes())
                        .map_err(|e| ArchiveError::Http(format!("invalid content: {e}")))?
                };
                let filename = filename_override.unwrap_or(&payload.filename);
                let target = target_dir.join(filename);
                tokio::fs::write(&target, content).await?;
                Ok(Some(target))
            }
            404 => Ok(None),
            status => Err(ArchiveError::Status(status)),
        }
    }

    async fn list(
        &self,
        box_type: Option<&str>,
        is_archived: Option<bool>,
    ) -> Result<Vec<ArchiveDocument>, ArchiveError> {
        let mut request = self.client.get(self.url("/documents"));
        if let Some(box_type) = box_type {
            request = request.query(&[("box_type", box_type)]);
        }
        if let Some(is_archived) = is_archived {
            request = request.query(&[("is_archived", is_archived)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Status(response.status().as_u16()));
        }
        response
            .json::<Vec<ArchiveDocument>>()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))
    }

    async fn stats(&self) -> Result<BoxStats, ArchiveError> {
        let response = self
            .client
            .get(self.url("/documents/stats"))
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Status(response.status().as_u16()));
        }
        response
            .json::<BoxStats>()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))
    }
}

/// In-memory archive with the same content-hash dedup semantics, used by
/// the orchestrator tests.
#[derive(Default)]
pub struct MemoryArchive {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    by_hash: HashMap<String, usize>,
    documents: Vec<(ArchiveDocument, Vec<u8>)>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct documents stored.
    pub fn document_count(&self) -> usize {
        self.state.lock().unwrap().documents.len()
    }

    /// Filenames in upload order, for ordering assertions.
    pub fn filenames(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .documents
            .iter()
            .map(|(doc, _)| doc.filename.clone())
            .collect()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn upload(
        &self,
        path: &Path,
        _source_type: &str,
        box_type: Option<&str>,
    ) -> Result<Option<ArchiveDocument>, ArchiveError> {
        let content = tokio::fs::read(path).await?;
        let hash = hex::encode(Sha256::digest(&content));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.by_hash.get(&hash) {
            return Ok(Some(state.documents[idx].0.clone()));
        }
        state.next_id += 1;
        let doc = ArchiveDocument {
            id: state.next_id,
            filename,
            content_hash: hash.clone(),
            box_type: box_type.unwrap_or("inbox").to_string(),
            size: content.len() as u64,
        };
        state.documents.push((doc.clone(), content));
        let idx = state.documents.len() - 1;
        state.by_hash.insert(hash, idx);
        Ok(Some(doc))
    }

    async fn download(
        &self,
        doc_id: i64,
        target_dir: &Path,
        filename_override: Option<&str>,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        let (filename, content) = {
            let state = self.state.lock().unwrap();
            match state.documents.iter().find(|(doc, _)| doc.id == doc_id) {
                Some((doc, content)) => (doc.filename.clone(), content.clone()),
                None => return Ok(None),
            }
        };
        let target = target_dir.join(filename_override.unwrap_or(&filename));
        tokio::fs::write(&target, content).await?;
        Ok(Some(target))
    }

    async fn list(
        &self,
        box_type: Option<&str>,
        _is_archived: Option<bool>,
    ) -> Result<Vec<ArchiveDocument>, ArchiveError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .documents
            .iter()
            .map(|(doc, _)| doc.clone())
            .filter(|doc| box_type.map_or(true, |b| doc.box_type == b))
            .collect())
    }

    async fn stats(&self) -> Result<BoxStats, ArchiveError> {
        let state = self.state.lock().unwrap();
        let mut by_box: HashMap<String, u64> = HashMap::new();
        let mut total_bytes = 0;
        for (doc, content) in &state.documents {
            *by_box.entry(doc.box_type.clone()).or_default() += 1;
            total_bytes += content.len() as u64;
        }
        Ok(BoxStats {
            total_documents: state.documents.len() as u64,
            total_bytes,
            by_box,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_archive_dedupes_by_content() {
        let archive = MemoryArchive::new();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        tokio::fs::write(&a, b"same bytes").await.unwrap();
        tokio::fs::write(&b, b"same bytes").await.unwrap();

        let first = archive.upload(&a, "bipro", None).await.unwrap().unwrap();
        let second = archive.upload(&b, "bipro", None).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(archive.document_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_archive_stats() {
        let archive = MemoryArchive::new();
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("a.pdf", "aaa"), ("b.xml", "bb")] {
            let path = dir.path().join(name);
            tokio::fs::write(&path, content).await.unwrap();
            archive.upload(&path, "bipro", Some("inbox")).await.unwrap();
        }
        let stats = archive.stats().await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_bytes, 5);
        assert_eq!(stats.by_box.get("inbox"), Some(&2));
    }

    #[tokio::test]
    async fn test_memory_archive_download_roundtrip() {
        let archive = MemoryArchive::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        tokio::fs::write(&path, b"content").await.unwrap();
        let doc = archive.upload(&path, "bipro", None).await.unwrap().unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let downloaded = archive
            .download(doc.id, out_dir.path(), Some("renamed.pdf"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tokio::fs::read(&downloaded).await.unwrap(), b"content");
        assert!(downloaded.ends_with("renamed.pdf"));

        assert!(archive
            .download(999, out_dir.path(), None)
            .await
            .unwrap()
            .is_none());
    }
}
