// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RomM HTTP client.
//!
//! Endpoints used:
//! - `GET /api/platforms`, `GET /api/platforms/{id}`
//! - `GET /api/roms?platform_ids={id}&limit=1000&offset={n}` (paged)
//! - `GET /api/roms/{id}`
//! - `GET /api/roms/{rom_id}/content/{file_id}` (file bytes)
//!
//! Requests use HTTP basic auth when a username is configured.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{partial_path, CatalogSource, ProgressFn, RemoteError, RemoteResult};
use crate::config::RommConfig;
use crate::types::{CatalogFile, CatalogItem, PlatformSummary};

/// Timeout for metadata requests.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connect timeout, shared by downloads.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// RomM page size.
pub const PAGE_SIZE: usize = 1000;

/// `/api/roms` answers either `{ "items": [...] }` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RomPage {
    Paged { items: Vec<CatalogItem> },
    Bare(Vec<CatalogItem>),
}

impl RomPage {
    fn into_items(self) -> Vec<CatalogItem> {
        match self {
            Self::Paged { items } => items,
            Self::Bare(items) => items,
        }
    }
}

/// Client for a RomM server.
#[derive(Debug, Clone)]
pub struct RommClient {
    base_url: String,
    username: String,
    password: String,
    /// Client for metadata calls (whole-request timeout).
    client: reqwest::Client,
    /// Client for file transfers (no whole-request timeout; the queue
    /// manager bounds each transfer).
    download_client: reqwest::Client,
}

impl RommClient {
    pub fn new(config: &RommConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("romsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let download_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("romsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build download client")?;

        Ok(Self {
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
            download_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, client: &reqwest::Client, path: &str) -> reqwest::RequestBuilder {
        let request = client.get(self.url(path));
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> RemoteResult<T> {
        let response = self
            .get(&self.client, path)
            .query(query)
            .send()
            .await
            .map_err(|e| request_error(what, e))?;
        let response = check_status(response, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Invalid response for {}: {}", what, e)))
    }
}

fn request_error(what: &str, e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Unavailable(format!("Request for {} timed out", what))
    } else if e.is_connect() {
        RemoteError::Unavailable(format!("Failed to connect to RomM for {}: {}", what, e))
    } else {
        RemoteError::Unavailable(format!("Network error for {}: {}", what, e))
    }
}

async fn check_status(response: Response, what: &str) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(RemoteError::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::Unauthorized(format!(
            "RomM rejected the credentials ({}) for {}",
            status, what
        ))),
        _ => Err(RemoteError::Unavailable(format!(
            "RomM returned HTTP {} for {}",
            status.as_u16(),
            what
        ))),
    }
}

#[async_trait]
impl CatalogSource for RommClient {
    async fn platforms(&self) -> RemoteResult<Vec<PlatformSummary>> {
        let platforms: Vec<PlatformSummary> = self.get_json("/api/platforms", &[], "platforms").await?;
        tracing::info!("Retrieved {} platforms from RomM", platforms.len());
        Ok(platforms)
    }

    async fn platform(&self, id: u64) -> RemoteResult<PlatformSummary> {
        self.get_json(&format!("/api/platforms/{}", id), &[], &format!("platform {}", id))
            .await
    }

    async fn roms_for_platform(&self, platform_id: u64) -> RemoteResult<Vec<CatalogItem>> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: RomPage = self
                .get_json(
                    "/api/roms",
                    &[
                        ("platform_ids", platform_id.to_string()),
                        ("limit", PAGE_SIZE.to_string()),
                        ("offset", offset.to_string()),
                    ],
                    &format!("roms of platform {}", platform_id),
                )
                .await?;
            let items = page.into_items();
            let count = items.len();
            all.extend(items);
            if count < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
            tracing::debug!(platform_id, offset, "Fetching next page");
        }
        tracing::info!("Retrieved {} ROMs for platform {}", all.len(), platform_id);
        Ok(all)
    }

    async fn rom(&self, id: u64) -> RemoteResult<CatalogItem> {
        self.get_json(&format!("/api/roms/{}", id), &[], &format!("rom {}", id))
            .await
    }

    async fn download_file(
        &self,
        item: &CatalogItem,
        file: &CatalogFile,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> RemoteResult<u64> {
        let what = format!("file {} of rom {}", file.id, item.id);
        let path = format!("/api/roms/{}/content/{}", item.id, file.id);

        let response = self
            .get(&self.download_client, &path)
            .send()
            .await
            .map_err(|e| request_error(&what, e))?;
        let response = check_status(response, &what).await?;

        let total = response
            .content_length()
            .or((file.file_size_bytes > 0).then_some(file.file_size_bytes));

        let part = partial_path(dest);
        let result = stream_to_file(response, &part, total, progress).await;
        match result {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await.map_err(|e| {
                    RemoteError::Io(format!("Failed to move {:?} into place: {}", dest, e))
                })?;
                tracing::info!("Downloaded {} ({} bytes) to {:?}", what, written, dest);
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

async fn stream_to_file(
    response: Response,
    part: &Path,
    total: Option<u64>,
    progress: ProgressFn<'_>,
) -> RemoteResult<u64> {
    if let Some(parent) = part.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RemoteError::Io(format!("Failed to create {:?}: {}", parent, e)))?;
    }
    let mut out = tokio::fs::File::create(part)
        .await
        .map_err(|e| RemoteError::Io(format!("Failed to create {:?}: {}", part, e)))?;

    let mut written = 0u64;
    progress(0, total);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| request_error("file body", e))?;
        out.write_all(&chunk)
            .await
            .map_err(|e| RemoteError::Io(format!("Failed to write {:?}: {}", part, e)))?;
        written += chunk.len() as u64;
        progress(written, total);
    }
    out.flush()
        .await
        .map_err(|e| RemoteError::Io(format!("Failed to flush {:?}: {}", part, e)))?;
    Ok(written)
}
