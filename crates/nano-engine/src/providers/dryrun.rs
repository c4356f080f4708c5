use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use nano_contracts::conversation::{ImagePart, Message, Role};
use nano_contracts::parsing::GenerationResult;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{ConversationProvider, Modality, ProviderRequest};
use crate::error::{EngineError, Result};

const DRYRUN_SIZE: u32 = 256;

/// Offline provider: solid-colour PNGs derived from the prompt and a canned
/// critique. No network access.
pub struct DryrunProvider {
    model: String,
}

impl DryrunProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl ConversationProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<GenerationResult> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role() == Role::User)
            .map(Message::text)
            .unwrap_or_default();
        match request.modality {
            Modality::Image => {
                let turn = request.messages.len() as u64;
                let bytes = render_png(&prompt, turn)?;
                Ok(GenerationResult {
                    image: Some(ImagePart::new("image/png", bytes)),
                    text: format!("dryrun image for turn {turn}"),
                })
            }
            Modality::Text => Ok(GenerationResult {
                image: None,
                text: canned_critique(),
            }),
        }
    }
}

fn render_png(prompt: &str, seed: u64) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let mut image = RgbImage::new(DRYRUN_SIZE, DRYRUN_SIZE);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|source| EngineError::Image {
            context: "failed to encode dryrun image".to_string(),
            source,
        })?;
    Ok(out.into_inner())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn canned_critique() -> String {
    json!({
        "keep_notes": ["overall composition"],
        "summary_keep": ["subject placement"],
        "summary_change": ["increase detail"],
        "edits": [{
            "id": "e1",
            "target": {"type": "global", "label": "whole image", "bbox": null, "points": null},
            "priority": "MINOR",
            "instruction": "Add fine texture detail.",
            "rationale": "Solid fills read as flat.",
            "done_when": "Surface texture is visible."
        }]
    })
    .to_string()
}
