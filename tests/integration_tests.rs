//! Integration tests for the romsync server
//!
//! Each test starts a real server on an ephemeral port, backed by an
//! in-memory catalog and a temporary ROM root, and talks to it over HTTP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use romsync::config::Config;
use romsync::download::QueueStatus;
use romsync::inventory::LocalInventory;
use romsync::remote::MemoryCatalog;
use romsync::server::{AppState, Server};

const SNES: &str = "Super Nintendo Entertainment System";

struct TestServer {
    base: String,
    client: Client,
    catalog: Arc<MemoryCatalog>,
    state: Arc<AppState>,
    roms: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.delete(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    fn write_rom(&self, folder: &str, name: &str, bytes: &[u8]) {
        let dir = self.roms.path().join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    /// Wait until the queue entry for `id` reaches `status`.
    async fn wait_for_status(&self, id: u64, status: QueueStatus) {
        for _ in 0..100 {
            if self.state.downloads.get(id).map(|e| e.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("rom {} never reached {:?}", id, status);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn test_config(roms_root: &Path) -> Config {
    let mut config = Config::default();
    config.romm.url = "http://romm.test".to_string();
    config.romm.username = "admin".to_string();
    config.romm.password = "hunter2".to_string();
    config.paths.roms_root = roms_root.to_path_buf();
    config.platform_mapping.insert(SNES, "snes");
    config.platform_mapping.insert("Game Boy", "gb");
    config.downloads.batch_delay_ms = 0;
    config.downloads.refresh_delay_ms = 10;
    config.downloads.cleanup_delay_secs = 60;
    config
}

/// A catalog with SNES (id 1, three ROMs) and Game Boy (id 2, one ROM).
fn seeded_catalog() -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog.add_platform(1, SNES, "snes");
    catalog.add_platform(2, "Game Boy", "gb");
    catalog.add_rom(10, 1, SNES, "Chrono Trigger (USA).sfc", b"chrono".to_vec());
    catalog.add_rom(11, 1, SNES, "EarthBound (USA).sfc", b"earthbound".to_vec());
    catalog.add_rom(12, 1, SNES, "Super Metroid (JU).sfc", b"metroid".to_vec());
    catalog.add_rom(20, 2, "Game Boy", "Tetris (World).gb", b"tetris".to_vec());
    catalog
}

async fn start_server(catalog: MemoryCatalog) -> TestServer {
    start_server_with(catalog, |_| {}).await
}

async fn start_server_with(catalog: MemoryCatalog, tweak: impl FnOnce(&mut Config)) -> TestServer {
    let roms = TempDir::new().unwrap();
    let catalog = Arc::new(catalog);
    let mut config = test_config(roms.path());
    tweak(&mut config);
    let state = AppState::new(config, catalog.clone(), LocalInventory::in_memory());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Server::new(state, "127.0.0.1", port);
    let state = server.state();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        client: Client::new(),
        catalog,
        state,
        roms,
        shutdown: Some(tx),
    }
}

// =============================================================================
// Health and configuration
// =============================================================================

#[tokio::test]
async fn test_health_reports_romm_reachability() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["romm_status"], "ok");
    assert_eq!(body["scan_in_progress"], false);
    assert!(body.get("version").is_some());

    server.catalog.set_offline(true);
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["romm_status"], "unavailable");
}

#[tokio::test]
async fn test_config_masks_password() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server.get("/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["romm"]["url"], "http://romm.test");
    assert_eq!(body["romm"]["username"], "admin");
    assert_eq!(body["romm"]["password"], "...");
    assert!(!body.to_string().contains("hunter2"));
    assert_eq!(body["platform_mapping"][SNES], "snes");
    assert_eq!(body["max_concurrent_downloads"], 2);
}

// =============================================================================
// Browsing and reconciliation
// =============================================================================

#[tokio::test]
async fn test_platforms_include_local_stats() {
    let server = start_server(seeded_catalog()).await;
    server.write_rom("snes", "Chrono Trigger (USA).sfc", b"chrono");

    let (status, _) = server.post("/api/scan", json!({ "platforms": ["snes"] })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    server.state.scans.wait_idle().await;

    let (status, body) = server.get("/api/platforms").await;
    assert_eq!(status, StatusCode::OK);
    let platforms = body.as_array().unwrap();
    assert_eq!(platforms.len(), 2);

    let snes = platforms.iter().find(|p| p["id"] == 1).unwrap();
    assert_eq!(snes["name"], SNES);
    assert_eq!(snes["rom_count"], 3);
    assert_eq!(snes["local_folder"], "snes");
    assert_eq!(snes["local_stats"]["file_count"], 1);

    let gb = platforms.iter().find(|p| p["id"] == 2).unwrap();
    assert_eq!(gb["local_stats"]["file_count"], 0);
}

#[tokio::test]
async fn test_rom_views_follow_local_inventory() {
    let server = start_server(seeded_catalog()).await;
    // Case and directory differences still match.
    server.write_rom("snes", "chrono trigger (usa).SFC", b"chrono");
    server.write_rom("snes", "Super Metroid (JU).sfc", b"metroid");
    server.write_rom("snes", "notes.txt", b"not a rom");

    let (status, body) = server.post("/api/scan", json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["in_progress"], true);
    let job = server.state.scans.wait_idle().await;
    assert!(job.last_error.is_none());

    let (status, body) = server.get("/api/platforms/1/roms").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["view"], "all");
    assert_eq!(body["count"], 3);

    let (_, body) = server.get("/api/platforms/1/roms?view=downloaded").await;
    assert_eq!(body["count"], 2);
    let ids: Vec<u64> = body["roms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![10, 12]);
    assert!(body["roms"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["local_available"] == true && r["local_folder"] == "snes"));

    let (_, body) = server.get("/api/platforms/1/roms?view=available").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["roms"][0]["id"], 11);
    assert_eq!(body["roms"][0]["local_available"], false);

    let (status, body) = server.get("/api/platforms/1/roms?view=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["error_type"], "invalid_request");
}

#[tokio::test]
async fn test_rom_details_and_missing_rom() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server.get("/api/roms/20").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platform_name"], "Game Boy");
    assert_eq!(body["local_available"], false);
    assert_eq!(body["local_folder"], "gb");

    let (status, body) = server.get("/api/roms/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["error_type"], "not_found");
}

#[tokio::test]
async fn test_remote_outage_is_a_gateway_error() {
    let server = start_server(seeded_catalog()).await;
    server.catalog.set_offline(true);

    let (status, _) = server.get("/api/platforms").await;
    assert!(status.is_server_error(), "got {}", status);

    let (status, body) = server.get("/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["remote"].is_null());
}

// =============================================================================
// Scanning
// =============================================================================

#[tokio::test]
async fn test_scan_status_and_reset() {
    let server = start_server(seeded_catalog()).await;
    server.write_rom("gb", "Tetris (World).gb", b"tetris");

    server.post("/api/scan", json!({ "platforms": ["gb"] })).await;
    server.state.scans.wait_idle().await;

    let (status, body) = server.get("/api/scan/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["in_progress"], false);
    assert_eq!(body["job"]["files_found"], 1);
    assert_eq!(body["inventory"]["total_roms"], 1);
    assert_eq!(body["inventory"]["last_scan"]["platform"], "gb");

    let (status, body) = server.post("/api/scan/reset", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["in_progress"], false);
}

// =============================================================================
// Downloads and the queue
// =============================================================================

#[tokio::test]
async fn test_download_lands_in_mapped_folder() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server
        .post("/api/download", json!({ "rom_id": 11, "platform": SNES }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["id"], 11);
    assert_eq!(body["platform"], "snes");
    assert_eq!(body["file_name"], "EarthBound (USA).sfc");

    server.wait_for_status(11, QueueStatus::Completed).await;
    let dest = server.roms.path().join("snes").join("EarthBound (USA).sfc");
    assert_eq!(std::fs::read(&dest).unwrap(), b"earthbound");

    for _ in 0..100 {
        if server.state.inventory.is_present("snes", "EarthBound (USA).sfc") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (_, body) = server.get("/api/platforms/1/roms?view=downloaded").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["roms"][0]["id"], 11);

    let (_, body) = server.get("/api/queue").await;
    assert_eq!(body["counts"]["completed"], 1);
    assert_eq!(body["entries"][0]["progress"], 100);
}

#[tokio::test]
async fn test_download_accepts_folder_name() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server
        .post("/api/download", json!({ "rom_id": 20, "platform": "gb" }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["platform"], "gb");
}

#[tokio::test]
async fn test_download_rejections() {
    let catalog = seeded_catalog();
    catalog.add_platform(3, "Sega Saturn", "saturn");
    catalog.add_rom(30, 3, "Sega Saturn", "Nights.cue", b"nights".to_vec());
    let server = start_server(catalog).await;

    let (status, body) = server
        .post("/api/download", json!({ "rom_id": 30, "platform": "Sega Saturn" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["error_type"], "configuration");

    let (status, body) = server
        .post("/api/download", json!({ "rom_id": 999, "platform": SNES }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["error_type"], "not_found");

    let (_, body) = server.get("/api/queue").await;
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_download_queues_in_background() {
    let server = start_server(seeded_catalog()).await;

    let (status, body) = server
        .post("/api/download/batch", json!({ "rom_ids": [10, 999, 12], "platform": SNES }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 3);
    assert_eq!(body["platform"], "snes");

    server.wait_for_status(10, QueueStatus::Completed).await;
    server.wait_for_status(12, QueueStatus::Completed).await;
    assert!(server.state.downloads.get(999).is_none());

    let (status, body) = server
        .post("/api/download/batch", json!({ "rom_ids": [], "platform": SNES }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "rom_ids");

    let (status, body) = server
        .post("/api/download/batch", json!({ "rom_ids": [20], "platform": "Sega Saturn" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["error_type"], "configuration");
}

#[tokio::test]
async fn test_batch_response_does_not_wait_for_every_item() {
    let server = start_server_with(seeded_catalog(), |config| {
        config.downloads.batch_delay_ms = 500;
    })
    .await;

    let started = std::time::Instant::now();
    let (status, _) = server
        .post("/api/download/batch", json!({ "rom_ids": [10, 11, 12], "platform": SNES }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    // Enqueueing all three inline would take at least a second.
    assert!(started.elapsed() < Duration::from_millis(900));

    // The batch keeps going after the response.
    server.wait_for_status(12, QueueStatus::Completed).await;
    assert!(server.state.downloads.get(10).is_some());
    assert!(server.state.downloads.get(11).is_some());
}

#[tokio::test]
async fn test_failed_download_can_be_dismissed_and_cleared() {
    let catalog = seeded_catalog();
    catalog.fail_download(10, "disk full");
    catalog.fail_download(11, "connection reset");
    let server = start_server(catalog).await;

    server
        .post("/api/download", json!({ "rom_id": 10, "platform": SNES }))
        .await;
    server
        .post("/api/download", json!({ "rom_id": 11, "platform": SNES }))
        .await;
    server.wait_for_status(10, QueueStatus::Error).await;
    server.wait_for_status(11, QueueStatus::Error).await;

    let (_, body) = server.get("/api/queue").await;
    assert_eq!(body["counts"]["error"], 2);
    let entry = &body["entries"][0];
    assert_eq!(entry["status"], "error");
    assert!(entry["error"].as_str().unwrap().contains("disk full"));

    let (status, body) = server.delete("/api/queue/10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 10);
    let (status, _) = server.delete("/api/queue/10").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server.delete("/api/queue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (_, body) = server.get("/api/queue").await;
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_downloading_entry_cannot_be_dismissed() {
    let catalog = seeded_catalog_gated();
    let server = start_server(catalog).await;

    let (_, body) = server
        .post("/api/download", json!({ "rom_id": 10, "platform": SNES }))
        .await;
    assert_eq!(body["status"], "downloading");

    let (status, body) = server.delete("/api/queue/10").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["error_type"], "conflict");

    server.catalog.release(1);
    server.wait_for_status(10, QueueStatus::Completed).await;
}

fn seeded_catalog_gated() -> MemoryCatalog {
    let catalog = MemoryCatalog::gated();
    catalog.add_platform(1, SNES, "snes");
    catalog.add_rom(10, 1, SNES, "Chrono Trigger (USA).sfc", b"chrono".to_vec());
    catalog
}

// =============================================================================
// Stats and mappings
// =============================================================================

#[tokio::test]
async fn test_stats_combine_local_remote_and_queue() {
    let server = start_server(seeded_catalog()).await;
    server.write_rom("snes", "Chrono Trigger (USA).sfc", b"chrono");
    server.post("/api/scan", json!({ "platforms": ["snes"] })).await;
    server.state.scans.wait_idle().await;

    let (status, body) = server.get("/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["local"]["total_roms"], 1);
    assert_eq!(body["local"]["by_platform"][0]["platform"], "snes");
    assert_eq!(body["remote"]["total_platforms"], 2);
    assert_eq!(body["queue"]["queued"], 0);
}

#[tokio::test]
async fn test_mapping_suggestions() {
    let catalog = seeded_catalog();
    catalog.add_platform(3, "Sega - Mega Drive", "");
    catalog.add_platform(4, "Some Computer", "");
    let server = start_server(catalog).await;

    let (status, body) = server.get("/api/mappings/suggest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suggested"]["Sega - Mega Drive"], "genesis");
    assert_eq!(body["suggested"]["Some Computer"], "somecomputer");
    assert_eq!(body["suggested"]["Game Boy"], "gb");
    assert_eq!(body["current"][SNES], "snes");
}
