use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use nano_contracts::conversation::{ImagePart, IMAGE_EXTENSIONS};

use crate::error::{EngineError, Result};

pub const DEFAULT_OUTPUT: &str = "output.png";
const SNAPSHOT_DIR: &str = "outputs";

/// Falls back to `output.png`; appends `.png` when the name lacks a known
/// image extension.
pub fn resolve_output_path(raw: Option<&Path>) -> PathBuf {
    let path = raw
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(DEFAULT_OUTPUT));
    if has_image_extension(path) {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(".png");
    PathBuf::from(name)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                EngineError::io(format!("failed to create output dir {}", parent.display()), err)
            })?;
        }
    }
    Ok(())
}

/// Writes `image` to `path` in the format its extension names. Bytes that
/// are already in that format, or that cannot be decoded, are written as-is.
pub fn write_output_image(path: &Path, image: &ImagePart) -> Result<()> {
    ensure_parent_dir(path)?;
    let target = ImageFormat::from_path(path).ok();
    let detected = image::guess_format(&image.bytes).ok();
    match (target, detected) {
        (Some(target), Some(detected)) if target != detected => {
            match image::load_from_memory_with_format(&image.bytes, detected) {
                Ok(decoded) => {
                    tracing::debug!(
                        from = ?detected,
                        to = ?target,
                        path = %path.display(),
                        "transcoding output image"
                    );
                    encodable_for(decoded, target)
                        .save_with_format(path, target)
                        .map_err(|source| EngineError::Image {
                            context: format!("failed to encode {}", path.display()),
                            source,
                        })
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "image bytes could not be decoded; writing them unchanged"
                    );
                    write_raw(path, &image.bytes)
                }
            }
        }
        _ => write_raw(path, &image.bytes),
    }
}

/// `outputs/<stem>_improved_<i>.<ext>` beside the output.
pub fn snapshot_path(output: &Path, iteration: u32) -> PathBuf {
    let dir = output
        .parent()
        .map(|parent| parent.join(SNAPSHOT_DIR))
        .unwrap_or_else(|| PathBuf::from(SNAPSHOT_DIR));
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = output
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    dir.join(format!("{stem}_improved_{iteration}.{ext}"))
}

/// Copies the current output to its iteration snapshot.
pub fn write_snapshot(output: &Path, iteration: u32) -> Result<PathBuf> {
    let snapshot = snapshot_path(output, iteration);
    ensure_parent_dir(&snapshot)?;
    fs::copy(output, &snapshot).map_err(|err| {
        EngineError::io(
            format!(
                "failed to copy {} to {}",
                output.display(),
                snapshot.display()
            ),
            err,
        )
    })?;
    Ok(snapshot)
}

fn encodable_for(image: DynamicImage, format: ImageFormat) -> DynamicImage {
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    }
}

fn write_raw(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|err| EngineError::write(path, err))
}
