//! Clip synthesis: stitches surviving frames into `failure.mp4` via an
//! external `ffmpeg` invocation over a concat-demuxer list (spec.md §4.B.3).

use crate::config::ClipMode;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Returns `Some(path)` on a successful synthesis, `None` on anything else
/// (tool absent, non-zero exit, I/O error) — clip synthesis never fails
/// the persist call.
pub async fn synthesize_clip(frames_dir: &Path, out_path: &Path, fps: u32, mode: ClipMode) -> Option<PathBuf> {
    if mode == ClipMode::Off {
        return None;
    }

    let ffmpeg = match which::which("ffmpeg") {
        Ok(path) => path,
        Err(_) => {
            if mode == ClipMode::On {
                tracing::warn!("ffmpeg not found on PATH; skipping failure clip synthesis");
            }
            return None;
        }
    };

    let mut frame_files: Vec<PathBuf> = match std::fs::read_dir(frames_dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return None,
    };
    frame_files.sort();
    if frame_files.is_empty() {
        return None;
    }

    let concat_list = match build_concat_list(frames_dir, &frame_files) {
        Ok(path) => path,
        Err(_) => return None,
    };

    let out_path = out_path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        Command::new(ffmpeg)
            .args([
                "-y",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
            ])
            .arg(&concat_list)
            .args(["-vsync", "vfr", "-r", &fps.to_string()])
            .arg(&out_path)
            .output()
    })
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => Some(out_path),
        _ => None,
    }
}

fn build_concat_list(frames_dir: &Path, frame_files: &[PathBuf]) -> std::io::Result<PathBuf> {
    let list_path = frames_dir.join("concat.txt");
    let mut file = std::fs::File::create(&list_path)?;
    for frame in frame_files {
        let name = frame.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        writeln!(file, "file '{name}'")?;
    }
    Ok(list_path)
}
