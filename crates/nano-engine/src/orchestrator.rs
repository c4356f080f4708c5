//! Generate, critique and improve: the run loop behind every subcommand.
//!
//! A run seeds one [`ConversationThread`], generates the first image, then for
//! each critique round asks the model for a critique of the latest image and
//! feeds it back as the next user turn. The output file is overwritten every
//! round and a numbered snapshot is kept beside it.

use std::fs;
use std::path::{Path, PathBuf};

use nano_contracts::conversation::{ImagePart, Message, Part, IMAGE_EXTENSIONS};
use nano_contracts::events::{EventWriter, RunEvent};
use nano_contracts::prompts::{
    critique_instruction, escalate_unresolved, improvement_prompt, with_transparent_hint,
};

use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};
use crate::output::{resolve_output_path, write_output_image, write_snapshot};
use crate::postprocess::make_background_transparent;
use crate::providers::{truncate_text, ConversationProvider, ProviderRequest};
use crate::thread::ConversationThread;

const NO_IMAGE_TEXT_LIMIT: usize = 512;
/// Image-carrying attempts made before a text-only retry.
const ATTEMPTS_WITH_IMAGES: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    pub images: Vec<PathBuf>,
    pub fragments: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    /// Signed so a negative count from the command line is rejected here
    /// rather than wrapped.
    pub critique_loops: i64,
    pub transparent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CritiqueRequest {
    pub image: PathBuf,
    pub prompt: String,
    pub fragments: Vec<PathBuf>,
    pub references: Vec<PathBuf>,
    pub previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub output: PathBuf,
    pub snapshots: Vec<PathBuf>,
    pub critiques: Vec<String>,
}

/// Progress callbacks for user-facing output. Every method defaults to a
/// no-op.
pub trait RunObserver {
    fn image_saved(&self, _path: &Path, _iteration: u32) {}

    fn transparency_applied(&self, _path: &Path) {}

    fn round_started(&self, _iteration: u32, _total: u32) {}

    fn critique_received(&self, _iteration: u32, _critique: &str) {}

    fn snapshot_saved(&self, _path: &Path, _iteration: u32) {}
}

struct SilentObserver;

impl RunObserver for SilentObserver {}

pub struct CritiqueLoop<'a> {
    config: &'a RuntimeConfig,
    provider: &'a dyn ConversationProvider,
    events: Option<EventWriter>,
    observer: &'a dyn RunObserver,
}

impl<'a> CritiqueLoop<'a> {
    pub fn new(config: &'a RuntimeConfig, provider: &'a dyn ConversationProvider) -> Self {
        Self {
            config,
            provider,
            events: None,
            observer: &SilentObserver,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Generates the first image then runs `critique_loops` critique and
    /// improvement rounds on one conversation thread.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let rounds = self.validate(request, true)?;
        let output = resolve_output_path(request.output.as_deref());
        self.emit(&RunEvent::RunStarted {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            critique_loops: rounds,
            output: output.display().to_string(),
        });
        let outcome = self.run_rounds(request, rounds, output);
        self.finish(&outcome, |outcome| RunEvent::RunFinished {
            output: outcome.output.display().to_string(),
            iterations: outcome.snapshots.len() as u32,
        });
        outcome
    }

    fn run_rounds(&self, request: &RunRequest, rounds: u32, output: PathBuf) -> Result<RunOutcome> {
        let fragments = load_fragments(&request.fragments)?;
        let prompt = seed_prompt(request);

        let mut thread = ConversationThread::new(self.provider);
        thread.seed(&prompt, &fragments, &request.images)?;
        let first = thread.generate()?;
        let image = require_image(first.image, &first.text)?;
        self.save_output(&output, &image, 0, request.transparent)?;

        let mut snapshots = Vec::with_capacity(rounds as usize);
        let mut critiques = Vec::with_capacity(rounds as usize);
        for iteration in 1..=rounds {
            self.observer.round_started(iteration, rounds);
            let latest = read_image(&output)?;
            let critique = self.request_critique(
                latest,
                &request.prompt,
                &fragments,
                thread.references(),
            )?;
            tracing::info!(iteration, chars = critique.len(), "critique received");
            self.observer.critique_received(iteration, &critique);
            self.emit(&RunEvent::CritiqueReceived {
                iteration,
                chars: critique.chars().count(),
            });

            let turn = improvement_prompt(&request.prompt, &critique);
            critiques.push(critique);
            let improved = thread.add_user_turn_and_generate(&turn, Some(&output))?;
            let image = require_image(improved.image, &improved.text)?;
            self.save_output(&output, &image, iteration, request.transparent)?;

            let snapshot = write_snapshot(&output, iteration)?;
            self.observer.snapshot_saved(&snapshot, iteration);
            self.emit(&RunEvent::ImageSaved {
                path: snapshot.display().to_string(),
                iteration,
                snapshot: true,
            });
            snapshots.push(snapshot);
        }

        Ok(RunOutcome {
            output,
            snapshots,
            critiques,
        })
    }

    /// Single-shot generation without critique rounds. Providers that opt in
    /// get two attempts with the input images and a final text-only attempt.
    pub fn generate_once(&self, request: &RunRequest) -> Result<PathBuf> {
        self.validate(request, false)?;
        let output = resolve_output_path(request.output.as_deref());
        self.emit(&RunEvent::RunStarted {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            critique_loops: 0,
            output: output.display().to_string(),
        });
        let outcome = self.generate_with_fallback(request).and_then(|image| {
            self.save_output(&output, &image, 0, request.transparent)?;
            Ok(output)
        });
        self.finish(&outcome, |output| RunEvent::RunFinished {
            output: output.display().to_string(),
            iterations: 0,
        });
        outcome
    }

    fn generate_with_fallback(&self, request: &RunRequest) -> Result<ImagePart> {
        let fragments = load_fragments(&request.fragments)?;
        let prompt = seed_prompt(request);
        let fallback = self.provider.retries_without_images() && !request.images.is_empty();
        let attempts: Vec<&[PathBuf]> = if fallback {
            let mut plan = vec![request.images.as_slice(); ATTEMPTS_WITH_IMAGES];
            plan.push(&[]);
            plan
        } else {
            vec![request.images.as_slice()]
        };

        let total = attempts.len();
        let mut last_err = None;
        for (index, images) in attempts.into_iter().enumerate() {
            let attempt = index + 1;
            let mut thread = ConversationThread::new(self.provider);
            let result = thread
                .seed(&prompt, &fragments, images)
                .and_then(|_| thread.generate())
                .and_then(|reply| require_image(reply.image, &reply.text));
            match result {
                Ok(image) => return Ok(image),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        total,
                        with_images = !images.is_empty(),
                        error = %err,
                        "image generation attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(EngineError::NoResult))
    }

    /// Standalone critique of an existing image. A previous critique is
    /// merged in with escalation so unresolved items come first.
    pub fn critique_image(&self, request: &CritiqueRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(EngineError::Config("--prompt is required".to_string()));
        }
        if !request.image.is_file() {
            return Err(EngineError::Config(format!(
                "image not found: {}",
                request.image.display()
            )));
        }
        check_inputs(&request.references, &request.fragments)?;
        self.config.require_credentials()?;

        let fragments = load_fragments(&request.fragments)?;
        let image = read_image(&request.image)?;
        let references = request
            .references
            .iter()
            .map(|path| read_image(path))
            .collect::<Result<Vec<_>>>()?;
        let current = self.request_critique(image, &request.prompt, &fragments, &references)?;
        Ok(match request.previous.as_deref() {
            Some(previous) if !previous.trim().is_empty() => {
                escalate_unresolved(previous, &current)
            }
            _ => current,
        })
    }

    fn request_critique(
        &self,
        latest: ImagePart,
        original_prompt: &str,
        fragments: &[String],
        references: &[ImagePart],
    ) -> Result<String> {
        let mut parts = vec![Part::text(critique_instruction())];
        if !original_prompt.trim().is_empty() {
            parts.push(Part::text(format!(
                "Original prompt:\n{}",
                original_prompt.trim()
            )));
        }
        parts.push(Part::Image(latest));
        if !references.is_empty() {
            parts.push(Part::text("Original input images for reference:"));
            parts.extend(references.iter().cloned().map(Part::Image));
        }
        parts.extend(fragments.iter().map(Part::text));
        let message = Message::user(parts)
            .ok_or_else(|| EngineError::Config("critique request is empty".to_string()))?;

        let result = self
            .provider
            .complete(&ProviderRequest::text(std::slice::from_ref(&message)))?;
        let critique = result.text.trim();
        if critique.is_empty() {
            return Err(EngineError::NoResult);
        }
        Ok(critique.to_string())
    }

    /// Checks everything that can be checked before the first provider call.
    fn validate(&self, request: &RunRequest, with_rounds: bool) -> Result<u32> {
        if request.prompt.trim().is_empty() {
            return Err(EngineError::Config("--prompt is required".to_string()));
        }
        let rounds = if with_rounds {
            critique_rounds(request.critique_loops)?
        } else {
            0
        };
        check_inputs(&request.images, &request.fragments)?;
        self.config.require_credentials()?;
        Ok(rounds)
    }

    fn save_output(
        &self,
        output: &Path,
        image: &ImagePart,
        iteration: u32,
        transparent: bool,
    ) -> Result<()> {
        write_output_image(output, image)?;
        tracing::info!(path = %output.display(), iteration, "image saved");
        self.observer.image_saved(output, iteration);
        if transparent {
            make_background_transparent(output, &self.config.background_fuzz)?;
            self.observer.transparency_applied(output);
        }
        self.emit(&RunEvent::ImageSaved {
            path: output.display().to_string(),
            iteration,
            snapshot: false,
        });
        Ok(())
    }

    fn finish<T>(&self, outcome: &Result<T>, finished: impl FnOnce(&T) -> RunEvent) {
        match outcome {
            Ok(value) => self.emit(&finished(value)),
            Err(err) => {
                tracing::error!(error = %err, "run failed");
                self.emit(&RunEvent::RunFailed {
                    error: err.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: &RunEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event) {
            tracing::warn!(
                path = %events.path().display(),
                run_id = events.run_id(),
                event = event.kind(),
                error = %format!("{err:#}"),
                "failed to append run event"
            );
        }
    }
}

/// Reads every fragment file as UTF-8, trimmed.
pub fn load_fragments(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            fs::read_to_string(path)
                .map(|text| text.trim().to_string())
                .map_err(|err| EngineError::read(path, err))
        })
        .collect()
}

fn check_inputs(images: &[PathBuf], fragments: &[PathBuf]) -> Result<()> {
    for fragment in fragments {
        if is_image_path(fragment) {
            return Err(EngineError::Config(format!(
                "--fragment expects text files; got image file: {}",
                fragment.display()
            )));
        }
        if !fragment.is_file() {
            return Err(EngineError::Config(format!(
                "fragment not found: {}",
                fragment.display()
            )));
        }
    }
    for image in images {
        if !image.is_file() {
            return Err(EngineError::Config(format!(
                "image not found: {}",
                image.display()
            )));
        }
    }
    Ok(())
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn seed_prompt(request: &RunRequest) -> String {
    if request.transparent {
        with_transparent_hint(&request.prompt)
    } else {
        request.prompt.clone()
    }
}

fn critique_rounds(loops: i64) -> Result<u32> {
    if loops < 0 {
        return Err(EngineError::Config(format!(
            "--critique-loops must be >= 0 (got {loops})"
        )));
    }
    u32::try_from(loops).map_err(|_| {
        EngineError::Config(format!(
            "--critique-loops is too large (got {loops}, max {})",
            u32::MAX
        ))
    })
}

fn require_image(image: Option<ImagePart>, text: &str) -> Result<ImagePart> {
    image.filter(|image| !image.is_empty()).ok_or_else(|| EngineError::NoImage {
        text: truncate_text(text.trim(), NO_IMAGE_TEXT_LIMIT),
    })
}

fn read_image(path: &Path) -> Result<ImagePart> {
    ImagePart::from_path(path).map_err(|err| EngineError::read(path, err))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use nano_contracts::conversation::Role;
    use nano_contracts::events::EventWriter;
    use serde_json::Value;

    use super::*;
    use crate::config::{ConfigOverrides, RuntimeConfig};
    use crate::providers::Modality;
    use crate::testing::{image_reply, png_bytes, provider_failure, text_reply, ScriptedProvider};

    fn dryrun_config() -> anyhow::Result<RuntimeConfig> {
        let overrides = ConfigOverrides {
            model: None,
            provider: Some("dryrun".to_string()),
        };
        Ok(RuntimeConfig::from_sources(
            None,
            false,
            &HashMap::new(),
            &overrides,
        )?)
    }

    fn request_in(dir: &Path, loops: i64) -> RunRequest {
        RunRequest {
            prompt: "a red fox in snow".to_string(),
            output: Some(dir.join("fox.png")),
            critique_loops: loops,
            ..RunRequest::default()
        }
    }

    #[test]
    fn two_rounds_make_three_image_calls_and_two_snapshots() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let runner = CritiqueLoop::new(&config, &provider);

        let outcome = runner.run(&request_in(temp.path(), 2))?;

        assert_eq!(provider.image_calls(), 3);
        assert_eq!(provider.text_calls(), 2);
        assert_eq!(outcome.output, temp.path().join("fox.png"));
        assert_eq!(
            outcome.snapshots,
            vec![
                temp.path().join("outputs").join("fox_improved_1.png"),
                temp.path().join("outputs").join("fox_improved_2.png"),
            ]
        );
        assert_eq!(outcome.critiques.len(), 2);
        let latest = fs::read(&outcome.output)?;
        assert_eq!(fs::read(&outcome.snapshots[1])?, latest);
        assert_ne!(fs::read(&outcome.snapshots[0])?, latest);
        Ok(())
    }

    #[test]
    fn zero_rounds_generate_once_without_critique() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let outcome = CritiqueLoop::new(&config, &provider).run(&request_in(temp.path(), 0))?;

        assert_eq!(provider.image_calls(), 1);
        assert_eq!(provider.text_calls(), 0);
        assert!(outcome.snapshots.is_empty());
        assert!(!temp.path().join("outputs").exists());
        Ok(())
    }

    #[test]
    fn negative_rounds_fail_before_any_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let err = CritiqueLoop::new(&config, &provider)
            .run(&request_in(temp.path(), -1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(provider.calls(), 0);
        Ok(())
    }

    #[test]
    fn oversized_rounds_are_reported_as_too_large() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let loops = i64::from(u32::MAX) + 1;
        match CritiqueLoop::new(&config, &provider).run(&request_in(temp.path(), loops)) {
            Err(EngineError::Config(message)) => {
                assert!(message.contains("too large"), "{message}");
                assert!(!message.contains(">= 0"), "{message}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
        assert_eq!(provider.calls(), 0);
        Ok(())
    }

    #[test]
    fn zero_byte_image_fails_without_writing_output() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Ok(nano_contracts::parsing::GenerationResult {
            image: Some(ImagePart::new("image/png", Vec::new())),
            text: String::new(),
        }));

        let err = CritiqueLoop::new(&config, &provider)
            .run(&request_in(temp.path(), 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::NoResult), "{err}");
        assert!(!temp.path().join("fox.png").exists());
        Ok(())
    }

    #[test]
    fn missing_credentials_fail_before_any_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config =
            RuntimeConfig::from_sources(None, false, &HashMap::new(), &ConfigOverrides::default())?;
        let provider = ScriptedProvider::new();
        let err = CritiqueLoop::new(&config, &provider)
            .run(&request_in(temp.path(), 1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Credential(_)));
        assert_eq!(provider.calls(), 0);
        Ok(())
    }

    #[test]
    fn image_fragments_and_blank_prompts_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let runner = CritiqueLoop::new(&config, &provider);

        let mut request = request_in(temp.path(), 0);
        request.fragments = vec![PathBuf::from("style.PNG")];
        let err = runner.run(&request).unwrap_err();
        assert!(err.to_string().contains("--fragment expects text files"));

        let mut request = request_in(temp.path(), 0);
        request.prompt = "   ".to_string();
        assert!(matches!(runner.run(&request), Err(EngineError::Config(_))));

        let mut request = request_in(temp.path(), 0);
        request.images = vec![temp.path().join("missing.png")];
        assert!(matches!(runner.run(&request), Err(EngineError::Config(_))));
        assert_eq!(provider.calls(), 0);
        Ok(())
    }

    #[test]
    fn text_only_first_reply_is_no_image_with_truncated_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Ok(text_reply(&"x".repeat(600))));

        let err = CritiqueLoop::new(&config, &provider)
            .run(&request_in(temp.path(), 1))
            .unwrap_err();
        match err {
            EngineError::NoImage { text } => assert_eq!(text.chars().count(), 513),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!temp.path().join("fox.png").exists());
        Ok(())
    }

    #[test]
    fn provider_failure_mid_run_keeps_previous_output() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Ok(image_reply([1, 1, 1])));
        provider.push(Ok(text_reply("make it brighter")));
        provider.push(Err(provider_failure("quota exceeded")));

        let err = CritiqueLoop::new(&config, &provider)
            .run(&request_in(temp.path(), 2))
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(fs::read(temp.path().join("fox.png"))?, png_bytes([1, 1, 1]));
        assert!(!temp.path().join("outputs").join("fox_improved_1.png").exists());
        Ok(())
    }

    #[test]
    fn critique_call_carries_instruction_prompt_image_references_and_fragments(
    ) -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let reference = temp.path().join("ref.jpg");
        let fragment = temp.path().join("style.txt");
        fs::write(&reference, b"reference")?;
        fs::write(&fragment, "  watercolor palette \n")?;

        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let mut request = request_in(temp.path(), 1);
        request.images = vec![reference];
        request.fragments = vec![fragment];
        CritiqueLoop::new(&config, &provider).run(&request)?;

        let seen = provider.seen();
        let (modality, messages) = &seen[1];
        assert_eq!(*modality, Modality::Text);
        assert_eq!(messages.len(), 1);
        let critique = &messages[0];
        assert_eq!(critique.role(), Role::User);
        let parts = critique.parts();
        assert_eq!(parts[0], Part::text(critique_instruction()));
        assert_eq!(parts[1], Part::text("Original prompt:\na red fox in snow"));
        assert!(matches!(parts[2], Part::Image(ref image) if image.mime_type == "image/png"));
        assert_eq!(parts[3], Part::text("Original input images for reference:"));
        assert!(matches!(parts[4], Part::Image(ref image) if image.mime_type == "image/jpeg"));
        assert_eq!(parts[5], Part::text("watercolor palette"));

        let (_, improve) = &seen[2];
        let turn = &improve[2];
        let text = turn.text();
        assert!(text.starts_with("Critique of the latest image:"));
        assert!(text.contains("a red fox in snow"));
        assert_eq!(turn.images().count(), 2);
        Ok(())
    }

    #[test]
    fn transparent_runs_hint_the_seed_but_not_the_critique() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        let mut request = request_in(temp.path(), 0);
        request.transparent = true;
        // Post-processing needs ImageMagick; only the prompt is checked here.
        let _ = CritiqueLoop::new(&config, &provider).run(&request);

        let seen = provider.seen();
        let seed_text = seen[0].1[0].text();
        assert!(seed_text.starts_with("a red fox in snow\n\nPlease render the subject"));
        Ok(())
    }

    #[test]
    fn fallback_tries_twice_with_images_then_text_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("base.png");
        fs::write(&input, png_bytes([3, 3, 3]))?;

        let config = dryrun_config()?;
        let provider = ScriptedProvider::with_image_fallback();
        provider.push(Err(provider_failure("image too large")));
        provider.push(Ok(text_reply("cannot edit")));
        provider.push(Err(provider_failure("still failing")));

        let mut request = request_in(temp.path(), 0);
        request.images = vec![input];
        let err = CritiqueLoop::new(&config, &provider)
            .generate_once(&request)
            .unwrap_err();
        assert!(err.to_string().contains("still failing"));
        assert_eq!(provider.image_calls(), 3);

        let seen = provider.seen();
        assert_eq!(seen[0].1[0].images().count(), 1);
        assert_eq!(seen[1].1[0].images().count(), 1);
        assert_eq!(seen[2].1[0].images().count(), 0);
        Ok(())
    }

    #[test]
    fn generate_once_without_fallback_makes_one_attempt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("base.png");
        fs::write(&input, png_bytes([3, 3, 3]))?;

        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Err(provider_failure("nope")));
        let mut request = request_in(temp.path(), 0);
        request.images = vec![input.clone()];
        assert!(CritiqueLoop::new(&config, &provider)
            .generate_once(&request)
            .is_err());
        assert_eq!(provider.image_calls(), 1);

        let path = CritiqueLoop::new(&config, &provider).generate_once(&request)?;
        assert_eq!(path, temp.path().join("fox.png"));
        assert!(path.is_file());
        Ok(())
    }

    #[test]
    fn standalone_critique_escalates_previous_items() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("fox.png");
        fs::write(&image, png_bytes([5, 5, 5]))?;

        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Ok(text_reply("tail still blurry")));
        let runner = CritiqueLoop::new(&config, &provider);
        let request = CritiqueRequest {
            image: image.clone(),
            prompt: "a red fox".to_string(),
            previous: Some("- [ ] sharpen tail".to_string()),
            ..CritiqueRequest::default()
        };
        let critique = runner.critique_image(&request)?;
        assert!(critique.starts_with("[CRITICAL — persisted]"));
        assert!(critique.ends_with("- [ ] sharpen tail\n\ntail still blurry"));

        let plain = runner.critique_image(&CritiqueRequest {
            previous: None,
            ..request
        })?;
        assert!(plain.starts_with("critique 2"));
        Ok(())
    }

    #[test]
    fn events_record_the_run_lifecycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        CritiqueLoop::new(&config, &provider)
            .with_events(EventWriter::new(&events_path, "run-1"))
            .run(&request_in(temp.path(), 1))?;

        let raw = fs::read_to_string(&events_path)?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "run_started",
                "image_saved",
                "critique_received",
                "image_saved",
                "image_saved",
                "run_finished",
            ]
        );
        Ok(())
    }

    #[test]
    fn failed_runs_emit_run_failed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let config = dryrun_config()?;
        let provider = ScriptedProvider::new();
        provider.push(Err(provider_failure("boom")));
        let _ = CritiqueLoop::new(&config, &provider)
            .with_events(EventWriter::new(&events_path, "run-2"))
            .run(&request_in(temp.path(), 0));

        let raw = fs::read_to_string(&events_path)?;
        let last: Value = serde_json::from_str(raw.lines().last().unwrap_or("{}"))?;
        assert_eq!(last["type"], "run_failed");
        assert_eq!(last["run_id"], "run-2");
        Ok(())
    }
}
