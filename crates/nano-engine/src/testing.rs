//! Provider doubles shared by the engine's unit tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::{ImageFormat, Rgb, RgbImage};
use nano_contracts::conversation::{ImagePart, Message};
use nano_contracts::parsing::GenerationResult;

use crate::error::{EngineError, Result};
use crate::providers::{ConversationProvider, Modality, ProviderRequest};

pub(crate) fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 8, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

pub(crate) fn image_reply(color: [u8; 3]) -> GenerationResult {
    GenerationResult {
        image: Some(ImagePart::new("image/png", png_bytes(color))),
        text: String::new(),
    }
}

pub(crate) fn text_reply(text: &str) -> GenerationResult {
    GenerationResult {
        image: None,
        text: text.to_string(),
    }
}

pub(crate) fn provider_failure(message: &str) -> EngineError {
    EngineError::Provider {
        provider: "scripted".to_string(),
        status: Some(500),
        message: message.to_string(),
    }
}

/// Replays queued replies, then falls back to a fresh PNG for image calls
/// and a fixed critique for text calls. Records every request.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<GenerationResult>>>,
    image_calls: AtomicUsize,
    text_calls: AtomicUsize,
    seen: Mutex<Vec<(Modality, Vec<Message>)>>,
    fallback: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_fallback() -> Self {
        Self {
            fallback: true,
            ..Self::default()
        }
    }

    pub fn push(&self, reply: Result<GenerationResult>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.image_calls() + self.text_calls()
    }

    pub fn seen(&self) -> Vec<(Modality, Vec<Message>)> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl ConversationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "models/scripted"
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<GenerationResult> {
        let counter = match request.modality {
            Modality::Image => &self.image_calls,
            Modality::Text => &self.text_calls,
        };
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .expect("seen lock")
            .push((request.modality, request.messages.to_vec()));
        if let Some(reply) = self.replies.lock().expect("replies lock").pop_front() {
            return reply;
        }
        Ok(match request.modality {
            Modality::Image => image_reply([(call as u8).wrapping_mul(40), 90, 160]),
            Modality::Text => text_reply(&format!("critique {call}: sharpen the edges")),
        })
    }

    fn retries_without_images(&self) -> bool {
        self.fallback
    }
}
