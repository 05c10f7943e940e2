//! Two-phase presigned-URL cloud upload of a persisted run directory
//! (spec.md §4.B.1). Network failures degrade to `None`; nothing here is
//! ever raised to the caller.

use crate::manifest::ArtifactManifest;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinSet;

const INIT_TIMEOUT: Duration = Duration::from_secs(30);
const PUT_TIMEOUT: Duration = Duration::from_secs(60);
const INDEX_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct Artifact {
    name: String,
    size_bytes: u64,
    content_type: String,
    local_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct InitArtifact {
    name: String,
    size_bytes: u64,
    content_type: String,
}

#[derive(Debug, Serialize)]
struct InitRequest {
    run_id: String,
    artifacts: Vec<InitArtifact>,
}

#[derive(Debug, Deserialize)]
struct UploadUrlEntry {
    name: String,
    upload_url: String,
    storage_key: String,
}

#[derive(Debug, Deserialize)]
struct IndexUpload {
    upload_url: String,
    storage_key: String,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    upload_urls: Vec<UploadUrlEntry>,
    artifact_index_upload: IndexUpload,
}

#[derive(Debug, Serialize)]
struct IndexArtifact {
    name: String,
    storage_key: String,
    content_type: String,
}

#[derive(Debug, Serialize)]
struct ArtifactIndex {
    run_id: String,
    created_at_ms: u64,
    artifacts: Vec<IndexArtifact>,
}

#[derive(Debug, Default, Serialize)]
struct CompleteStats {
    manifest_size_bytes: u64,
    snapshot_size_bytes: u64,
    diagnostics_size_bytes: u64,
    steps_size_bytes: u64,
    clip_size_bytes: u64,
    frames_total_size_bytes: u64,
    frames_count: u64,
    total_artifact_size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct CompleteRequest {
    run_id: String,
    artifact_index_key: String,
    stats: CompleteStats,
}

/// Locates the most recently persisted run directory matching `run_id`,
/// reads `manifest.json`, uploads every referenced artifact, and returns
/// the artifact index storage key on success.
pub async fn upload_to_cloud(
    api_key: &str,
    api_url: &str,
    output_dir: &Path,
    run_id: &str,
    persisted_dir: Option<PathBuf>,
) -> Option<String> {
    let run_dir = match persisted_dir {
        Some(dir) => dir,
        None => find_latest_run_dir(output_dir, run_id)?,
    };

    let manifest_path = run_dir.join("manifest.json");
    let manifest_bytes = tokio::fs::read(&manifest_path).await.ok()?;
    let manifest: ArtifactManifest = serde_json::from_slice(&manifest_bytes).ok()?;

    let artifacts = collect_artifacts(&run_dir, &manifest, &manifest_bytes)?;

    let client = reqwest::Client::new();

    let init_body = InitRequest {
        run_id: run_id.to_string(),
        artifacts: artifacts
            .iter()
            .map(|a| InitArtifact {
                name: a.name.clone(),
                size_bytes: a.size_bytes,
                content_type: a.content_type.clone(),
            })
            .collect(),
    };

    let init_response: InitResponse = client
        .post(format!("{api_url}/v1/traces/artifacts/init"))
        .bearer_auth(api_key)
        .json(&init_body)
        .timeout(INIT_TIMEOUT)
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;

    let mut uploaded: Vec<(String, String, String)> = Vec::new();
    let mut join_set: JoinSet<Option<(String, String, String)>> = JoinSet::new();

    for entry in &init_response.upload_urls {
        let Some(artifact) = artifacts.iter().find(|a| a.name == entry.name) else {
            continue;
        };
        let client = client.clone();
        let artifact = artifact.clone();
        let upload_url = entry.upload_url.clone();
        let storage_key = entry.storage_key.clone();

        join_set.spawn(async move {
            let bytes = tokio::fs::read(&artifact.local_path).await.ok()?;
            let response = client
                .put(&upload_url)
                .header("Content-Type", artifact.content_type.clone())
                .timeout(PUT_TIMEOUT)
                .body(bytes)
                .send()
                .await
                .ok()?;
            if response.status().as_u16() == 200 {
                Some((artifact.name.clone(), storage_key, artifact.content_type.clone()))
            } else {
                None
            }
        });
    }

    while let Some(result) = join_set.join_next().await {
        if let Ok(Some(entry)) = result {
            uploaded.push(entry);
        }
    }

    let created_at_ms = manifest.created_at_ms;
    let index = ArtifactIndex {
        run_id: run_id.to_string(),
        created_at_ms,
        artifacts: uploaded
            .iter()
            .map(|(name, storage_key, content_type)| IndexArtifact {
                name: name.clone(),
                storage_key: storage_key.clone(),
                content_type: content_type.clone(),
            })
            .collect(),
    };
    let index_json = serde_json::to_vec(&index).ok()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&index_json).ok()?;
    let gzipped = encoder.finish().ok()?;

    let put_result = client
        .put(&init_response.artifact_index_upload.upload_url)
        .header("Content-Encoding", "gzip")
        .timeout(INDEX_UPLOAD_TIMEOUT)
        .body(gzipped)
        .send()
        .await
        .ok()?;
    if put_result.status().as_u16() != 200 {
        return None;
    }

    let artifact_index_key = init_response.artifact_index_upload.storage_key;

    let stats = build_stats(&artifacts, &manifest);
    let complete_body = CompleteRequest {
        run_id: run_id.to_string(),
        artifact_index_key: artifact_index_key.clone(),
        stats,
    };
    let _ = client
        .post(format!("{api_url}/v1/traces/artifacts/complete"))
        .bearer_auth(api_key)
        .json(&complete_body)
        .timeout(COMPLETE_TIMEOUT)
        .send()
        .await;

    Some(artifact_index_key)
}

fn find_latest_run_dir(output_dir: &Path, run_id: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(output_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(run_id))
        })
        .max_by_key(|e| e.metadata().and_then(|m| m.modified()).ok())
        .map(|e| e.path())
}

fn collect_artifacts(run_dir: &Path, manifest: &ArtifactManifest, manifest_bytes: &[u8]) -> Option<Vec<Artifact>> {
    let mut artifacts = vec![Artifact {
        name: "manifest.json".to_string(),
        size_bytes: manifest_bytes.len() as u64,
        content_type: "application/json".to_string(),
        local_path: run_dir.join("manifest.json"),
    }];

    let steps_path = run_dir.join("steps.json");
    if let Ok(meta) = std::fs::metadata(&steps_path) {
        artifacts.push(Artifact {
            name: "steps.json".to_string(),
            size_bytes: meta.len(),
            content_type: "application/json".to_string(),
            local_path: steps_path,
        });
    }

    if manifest.snapshot.is_some() {
        push_if_exists(&mut artifacts, run_dir, "snapshot.json", "application/json");
    }
    if manifest.diagnostics.is_some() {
        push_if_exists(&mut artifacts, run_dir, "diagnostics.json", "application/json");
    }
    if manifest.clip.is_some() {
        push_if_exists(&mut artifacts, run_dir, "failure.mp4", "video/mp4");
    }

    let frames_dir = run_dir.join("frames");
    if let Ok(entries) = std::fs::read_dir(&frames_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let content_type = match ext {
                "png" => "image/png",
                "jpeg" | "jpg" => "image/jpeg",
                _ => continue,
            };
            let Ok(meta) = entry.metadata() else { continue };
            let name = format!("frames/{}", path.file_name().and_then(|n| n.to_str()).unwrap_or_default());
            artifacts.push(Artifact { name, size_bytes: meta.len(), content_type: content_type.to_string(), local_path: path });
        }
    }

    Some(artifacts)
}

fn push_if_exists(artifacts: &mut Vec<Artifact>, run_dir: &Path, name: &str, content_type: &str) {
    let path = run_dir.join(name);
    if let Ok(meta) = std::fs::metadata(&path) {
        artifacts.push(Artifact {
            name: name.to_string(),
            size_bytes: meta.len(),
            content_type: content_type.to_string(),
            local_path: path,
        });
    }
}

fn build_stats(artifacts: &[Artifact], manifest: &ArtifactManifest) -> CompleteStats {
    let mut stats = CompleteStats::default();
    let mut total = 0u64;
    for artifact in artifacts {
        total += artifact.size_bytes;
        match artifact.name.as_str() {
            "manifest.json" => stats.manifest_size_bytes = artifact.size_bytes,
            "snapshot.json" => stats.snapshot_size_bytes = artifact.size_bytes,
            "diagnostics.json" => stats.diagnostics_size_bytes = artifact.size_bytes,
            "steps.json" => stats.steps_size_bytes = artifact.size_bytes,
            "failure.mp4" => stats.clip_size_bytes = artifact.size_bytes,
            name if name.starts_with("frames/") => {
                stats.frames_total_size_bytes += artifact.size_bytes;
                stats.frames_count += 1;
            }
            _ => {}
        }
    }
    stats.total_artifact_size_bytes = total;
    if stats.frames_count != manifest.frame_count as u64 {
        tracing::warn!(
            manifest_frame_count = manifest.frame_count,
            collected_frame_count = stats.frames_count,
            "frame count on disk does not match manifest.json"
        );
    }
    stats
}
