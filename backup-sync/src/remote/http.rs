//! REST implementation of the remote upload contract.
//!
//! Endpoints (all answer with a JSON `{ "id": .., "uuid": .. }`):
//! - `POST /api/folders` with `{ "parent_id", "name" }`
//! - `POST /api/files?parent_id=..&name=..` with the file content as body
//! - `PUT /api/files/{uuid}/content` with the new content as body

use super::{RemoteRef, RemoteUploader, UploadRequest};
use crate::config::RemoteConfig;
use crate::tree::NodeKind;
use crate::utils::errors::{BackupError, UploadError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct CreateFolderBody<'a> {
    parent_id: u64,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteItem {
    id: u64,
    #[serde(default)]
    uuid: Option<String>,
}

/// Uploader talking to the storage REST API
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: &str) -> Result<Self, BackupError> {
        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| BackupError::Config(format!("invalid remote token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("backup-sync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, BackupError> {
        Self::new(&config.url, &config.token)
    }

    async fn create_folder(&self, parent_id: u64, name: &str) -> Result<RemoteRef, UploadError> {
        let url = format!("{}/api/folders", self.base_url);
        debug!("Creating remote folder '{}' under {}", name, parent_id);

        let resp = self
            .client
            .post(&url)
            .json(&CreateFolderBody { parent_id, name })
            .send()
            .await?;

        parse_item(resp).await
    }

    async fn create_file(
        &self,
        parent_id: u64,
        name: &str,
        path: &Path,
        size: u64,
    ) -> Result<RemoteRef, UploadError> {
        let url = format!("{}/api/files", self.base_url);
        debug!("Creating remote file '{}' under {}", name, parent_id);

        let resp = self
            .client
            .post(&url)
            .query(&[("parent_id", parent_id.to_string().as_str()), ("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-total-size", size.to_string())
            .body(file_body(path).await?)
            .send()
            .await?;

        parse_item(resp).await
    }

    async fn replace_file(&self, uuid: &str, path: &Path, size: u64) -> Result<RemoteRef, UploadError> {
        let url = format!("{}/api/files/{}/content", self.base_url, uuid);
        debug!("Replacing content of remote file {}", uuid);

        let resp = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-total-size", size.to_string())
            .body(file_body(path).await?)
            .send()
            .await?;

        parse_item(resp).await
    }
}

async fn file_body(path: &Path) -> Result<reqwest::Body, UploadError> {
    let file = tokio::fs::File::open(path).await?;
    Ok(reqwest::Body::wrap_stream(ReaderStream::new(file)))
}

async fn parse_item(resp: reqwest::Response) -> Result<RemoteRef, UploadError> {
    let status = resp.status();
    if status.is_success() {
        let item: RemoteItem = resp.json().await?;
        Ok(RemoteRef::new(item.id, item.uuid))
    } else {
        let message = resp
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(UploadError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteUploader for HttpRemote {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<RemoteRef, UploadError> {
        let node = request.node;

        let remote = match node.kind {
            NodeKind::Folder => self.create_folder(request.parent_id, &node.name).await?,
            NodeKind::File => match request.previous.and_then(|p| p.remote_uuid.as_deref()) {
                Some(uuid) => self.replace_file(uuid, request.path, request.size).await?,
                None => {
                    self.create_file(request.parent_id, &node.name, request.path, request.size)
                        .await?
                }
            },
        };

        info!(
            "Uploaded {} ({} bytes) as remote id {}",
            node.local_id, request.size, remote.id
        );
        Ok(remote)
    }
}
