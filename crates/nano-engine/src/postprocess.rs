use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{EngineError, Result};
use crate::providers::truncate_text;

pub const DEFAULT_FUZZ: &str = "6%";
const IMAGEMAGICK_BINARIES: [&str; 2] = ["magick", "convert"];
const INSTALL_HINT: &str = "ImageMagick not installed: install via Homebrew (brew install imagemagick) or apt (sudo apt-get install -y imagemagick)";

/// ImageMagick 7 `magick`, else ImageMagick 6 `convert`.
pub fn find_imagemagick() -> Option<PathBuf> {
    IMAGEMAGICK_BINARIES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Flood-fills the white region touching the border with transparency.
/// The result replaces `path` in place.
pub fn make_background_transparent(path: &Path, fuzz: &str) -> Result<()> {
    let program = find_imagemagick().ok_or_else(|| EngineError::PostProcess(INSTALL_HINT.to_string()))?;
    run_transparency(&program, path, fuzz)
}

fn run_transparency(program: &Path, path: &Path, fuzz: &str) -> Result<()> {
    if matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("jpg" | "jpeg")
    ) {
        tracing::warn!(path = %path.display(), "JPEG output cannot hold transparency; alpha will be flattened");
    }
    let tmp = temp_path(path);
    let fuzz = if fuzz.trim().is_empty() {
        DEFAULT_FUZZ
    } else {
        fuzz.trim()
    };
    tracing::debug!(program = %program.display(), fuzz, path = %path.display(), "running transparency post-process");

    let output = Command::new(program)
        .args(transparency_args(path, &tmp, fuzz))
        .output()
        .map_err(|err| {
            EngineError::PostProcess(format!("failed to run {}: {err}", program.display()))
        })?;
    if !output.status.success() {
        let _ = fs::remove_file(&tmp);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::PostProcess(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            truncate_text(stderr.trim(), 512)
        )));
    }

    if fs::rename(&tmp, path).is_err() {
        let copied = fs::copy(&tmp, path);
        let _ = fs::remove_file(&tmp);
        copied.map_err(|err| EngineError::write(path, err))?;
    }
    Ok(())
}

fn transparency_args(input: &Path, output: &Path, fuzz: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![input.as_os_str().to_os_string()];
    args.extend(
        [
            "-colorspace",
            "sRGB",
            "-alpha",
            "set",
            "-bordercolor",
            "white",
            "-border",
            "1",
            "-fuzz",
            fuzz,
            "-fill",
            "none",
            "-draw",
            "color 1,1 floodfill",
            "-shave",
            "1x1",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_os_string());
    args
}

fn temp_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    path.with_file_name(format!("{stem}__tmp_transparent.{ext}"))
}
