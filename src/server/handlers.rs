//! Request handlers and their request/response types.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::config::{suggest_mapping, PlatformMapping};
use crate::download::{QueueCounts, QueueEntry};
use crate::error::SyncError;
use crate::errors::{ApiResult, UserError};
use crate::inventory::InventoryStats;
use crate::reconcile::{annotate, AnnotatedItem, ViewFilter};
use crate::remote::fill_platform_name;
use crate::scan::ScanJob;
use crate::types::{LocalPlatformStats, PlatformSummary, PlatformView};
use crate::utils::mask_sensitive;

/// How long `/health` waits for RomM.
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum ids in one batch request.
const MAX_BATCH_SIZE: usize = 500;

type AppStateRef = State<Arc<AppState>>;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    romm_status: &'static str,
    local_roms: usize,
    queue: QueueCounts,
    scan_in_progress: bool,
}

#[derive(Serialize)]
pub struct RommView {
    url: String,
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    romm: RommView,
    roms_root: String,
    platform_mapping: PlatformMapping,
    max_concurrent_downloads: usize,
}

#[derive(Deserialize, Default)]
pub struct RomListQuery {
    #[serde(default)]
    view: Option<String>,
}

#[derive(Serialize)]
pub struct RomListResponse {
    platform: PlatformView,
    view: ViewFilter,
    count: usize,
    roms: Vec<AnnotatedItem>,
}

#[derive(Deserialize, Default)]
pub struct ScanRequest {
    /// Local folders; all mapped folders when empty.
    #[serde(default)]
    platforms: Vec<String>,
}

#[derive(Serialize)]
pub struct ScanStatusResponse {
    job: ScanJob,
    inventory: InventoryStats,
}

#[derive(Deserialize)]
pub struct DownloadRequest {
    rom_id: u64,
    /// Remote platform name (or a mapped local folder).
    platform: String,
}

#[derive(Deserialize)]
pub struct BatchDownloadRequest {
    rom_ids: Vec<u64>,
    platform: String,
}

#[derive(Serialize)]
pub struct BatchDownloadResponse {
    /// Ids handed to the background batch.
    accepted: usize,
    /// Local folder the batch downloads into.
    platform: String,
}

#[derive(Serialize)]
pub struct QueueResponse {
    entries: Vec<QueueEntry>,
    counts: QueueCounts,
}

#[derive(Serialize)]
pub struct ClearResponse {
    removed: usize,
}

#[derive(Serialize)]
pub struct RemoteStats {
    total_platforms: usize,
    platforms: Vec<PlatformSummary>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    local: InventoryStats,
    remote: Option<RemoteStats>,
    queue: QueueCounts,
}

#[derive(Serialize)]
pub struct MappingResponse {
    suggested: PlatformMapping,
    current: PlatformMapping,
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve the destination folder of a download request.
///
/// Accepts a remote platform name from the mapping or, failing that, one of
/// the mapped folder names itself.
fn resolve_folder(mapping: &PlatformMapping, platform: &str) -> Result<String, SyncError> {
    let platform = platform.trim();
    if let Some(folder) = mapping.folder_for(platform) {
        return Ok(folder.to_string());
    }
    if !platform.is_empty() && mapping.folders().contains(&platform) {
        return Ok(platform.to_string());
    }
    Err(SyncError::Configuration(format!(
        "no local folder is mapped for platform '{}'; add it to platform_mapping",
        platform
    )))
}

fn platform_view(state: &AppState, platform: PlatformSummary) -> PlatformView {
    let local_folder = state
        .config
        .platform_mapping
        .folder_for(&platform.name)
        .map(str::to_string);
    let local_stats = match &local_folder {
        Some(folder) => LocalPlatformStats {
            exists: true,
            file_count: state.inventory.read(|s| s.platform_file_count(folder)),
        },
        None => LocalPlatformStats::default(),
    };
    PlatformView {
        platform,
        local_folder,
        local_stats,
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check handler.
///
/// Reports `degraded` when RomM cannot be reached.
pub async fn health(State(state): AppStateRef) -> Json<HealthResponse> {
    let romm_ok = matches!(
        tokio::time::timeout(HEALTH_PING_TIMEOUT, state.catalog.ping()).await,
        Ok(Ok(()))
    );

    Json(HealthResponse {
        status: if romm_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        romm_status: if romm_ok { "ok" } else { "unavailable" },
        local_roms: state.inventory.read(|s| s.total_files()),
        queue: state.downloads.counts(),
        scan_in_progress: state.scans.is_running(),
    })
}

pub async fn get_config(State(state): AppStateRef) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        romm: RommView {
            url: config.romm.url.clone(),
            username: config.romm.username.clone(),
            password: mask_sensitive(&config.romm.password, 0),
        },
        roms_root: config.roms_root().display().to_string(),
        platform_mapping: config.platform_mapping.clone(),
        max_concurrent_downloads: state.downloads.settings().max_concurrent,
    })
}

pub async fn list_platforms(State(state): AppStateRef) -> ApiResult<Json<Vec<PlatformView>>> {
    let platforms = state.catalog.platforms().await.map_err(SyncError::from)?;
    let views = platforms
        .into_iter()
        .map(|p| platform_view(&state, p))
        .collect();
    Ok(Json(views))
}

pub async fn platform_roms(
    State(state): AppStateRef,
    Path(platform_id): Path<u64>,
    Query(query): Query<RomListQuery>,
) -> ApiResult<Json<RomListResponse>> {
    let view: ViewFilter = query
        .view
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: String| UserError::invalid_request(&e, Some("view")))?;

    let (platform, roms) = tokio::join!(
        state.catalog.platform(platform_id),
        state.catalog.roms_for_platform(platform_id)
    );
    let platform = platform.map_err(SyncError::from)?;
    let mut roms = roms.map_err(SyncError::from)?;
    fill_platform_name(&mut roms, &platform);

    let mapping = &state.config.platform_mapping;
    let annotated = state.inventory.read(|snapshot| annotate(roms, snapshot, mapping));
    let roms = view.apply(annotated);
    tracing::info!(platform_id, ?view, count = roms.len(), "Returning annotated ROM list");

    Ok(Json(RomListResponse {
        platform: platform_view(&state, platform),
        view,
        count: roms.len(),
        roms,
    }))
}

pub async fn rom_details(
    State(state): AppStateRef,
    Path(rom_id): Path<u64>,
) -> ApiResult<Json<AnnotatedItem>> {
    let item = state.catalog.rom(rom_id).await.map_err(SyncError::from)?;
    let mut items = vec![item];
    if items[0].platform_name.is_empty() && items[0].platform_id != 0 {
        // Best effort; an unknown platform just means "not available".
        if let Ok(platform) = state.catalog.platform(items[0].platform_id).await {
            fill_platform_name(&mut items, &platform);
        }
    }

    let mapping = &state.config.platform_mapping;
    let annotated = state.inventory.read(|snapshot| annotate(items, snapshot, mapping));
    annotated
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| UserError::internal_error("annotation returned no item"))
}

pub async fn start_scan(
    State(state): AppStateRef,
    body: Option<Json<ScanRequest>>,
) -> ApiResult<(StatusCode, Json<ScanJob>)> {
    let mut platforms = body.map(|Json(b)| b.platforms).unwrap_or_default();
    if platforms.iter().all(|p| p.trim().is_empty()) {
        platforms = state
            .config
            .platform_mapping
            .folders()
            .into_iter()
            .map(str::to_string)
            .collect();
    }
    let job = state.scans.start_scan(platforms)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn scan_status(State(state): AppStateRef) -> Json<ScanStatusResponse> {
    Json(ScanStatusResponse {
        job: state.scans.status(),
        inventory: state.inventory.stats(),
    })
}

pub async fn reset_scan(State(state): AppStateRef) -> Json<ScanJob> {
    Json(state.scans.reset())
}

pub async fn download(
    State(state): AppStateRef,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<(StatusCode, Json<QueueEntry>)> {
    let folder = resolve_folder(&state.config.platform_mapping, &request.platform)?;
    let entry = state.downloads.enqueue(request.rom_id, &folder).await?;
    Ok((StatusCode::ACCEPTED, Json(entry)))
}

pub async fn download_batch(
    State(state): AppStateRef,
    Json(request): Json<BatchDownloadRequest>,
) -> ApiResult<(StatusCode, Json<BatchDownloadResponse>)> {
    if request.rom_ids.is_empty() {
        return Err(UserError::invalid_request("rom_ids must not be empty", Some("rom_ids")));
    }
    if request.rom_ids.len() > MAX_BATCH_SIZE {
        return Err(UserError::invalid_request(
            &format!("at most {} ROMs per batch", MAX_BATCH_SIZE),
            Some("rom_ids"),
        ));
    }
    let folder = resolve_folder(&state.config.platform_mapping, &request.platform)?;
    let accepted = request.rom_ids.len();
    // Runs past the request; progress and failures are visible in the queue.
    state.downloads.spawn_batch(request.rom_ids, &folder)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchDownloadResponse {
            accepted,
            platform: folder,
        }),
    ))
}

pub async fn queue(State(state): AppStateRef) -> Json<QueueResponse> {
    Json(QueueResponse {
        entries: state.downloads.entries(),
        counts: state.downloads.counts(),
    })
}

pub async fn clear_queue(State(state): AppStateRef) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.downloads.clear_finished(),
    })
}

pub async fn dismiss(
    State(state): AppStateRef,
    Path(id): Path<u64>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(state.downloads.dismiss(id)?))
}

pub async fn stats(State(state): AppStateRef) -> Json<StatsResponse> {
    let remote = match state.catalog.platforms().await {
        Ok(platforms) => Some(RemoteStats {
            total_platforms: platforms.len(),
            platforms,
        }),
        Err(e) => {
            tracing::warn!("Remote stats unavailable: {}", e);
            None
        }
    };
    Json(StatsResponse {
        local: state.inventory.stats(),
        remote,
        queue: state.downloads.counts(),
    })
}

pub async fn suggest_mappings(State(state): AppStateRef) -> ApiResult<Json<MappingResponse>> {
    let platforms = state.catalog.platforms().await.map_err(SyncError::from)?;
    Ok(Json(MappingResponse {
        suggested: suggest_mapping(&platforms),
        current: state.config.platform_mapping.clone(),
    }))
}
