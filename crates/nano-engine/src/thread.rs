use std::path::{Path, PathBuf};

use nano_contracts::conversation::{ImagePart, Message, Part, Role};
use nano_contracts::parsing::GenerationResult;
use nano_contracts::prompts::build_effective_prompt;

use crate::error::{EngineError, Result};
use crate::providers::{ConversationProvider, ProviderRequest};

/// Where a thread stands, derived from its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Empty,
    /// Only the seed turn, not yet answered.
    Seeded,
    /// A later user turn is waiting for its reply.
    AwaitingReply,
    HasReply,
}

/// Role-tagged history for one generate/improve session.
///
/// The reference images given at seed time are re-attached to every later
/// user turn so the model keeps seeing them.
pub struct ConversationThread<'p> {
    provider: &'p dyn ConversationProvider,
    history: Vec<Message>,
    references: Vec<ImagePart>,
}

impl<'p> ConversationThread<'p> {
    pub fn new(provider: &'p dyn ConversationProvider) -> Self {
        Self {
            provider,
            history: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn state(&self) -> ThreadState {
        match self.history.last().map(Message::role) {
            None => ThreadState::Empty,
            Some(Role::Assistant) => ThreadState::HasReply,
            Some(Role::User) if self.history.len() == 1 => ThreadState::Seeded,
            Some(Role::User) => ThreadState::AwaitingReply,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn references(&self) -> &[ImagePart] {
        &self.references
    }

    /// Records the first user turn: the effective prompt, then every input
    /// image in the order given.
    pub fn seed<S: AsRef<str>>(
        &mut self,
        prompt: &str,
        fragments: &[S],
        image_paths: &[PathBuf],
    ) -> Result<()> {
        if self.state() != ThreadState::Empty {
            return Err(EngineError::InvalidState(
                "seed is only allowed on an empty thread".to_string(),
            ));
        }
        let images = image_paths
            .iter()
            .map(|path| read_image(path))
            .collect::<Result<Vec<_>>>()?;
        let effective = build_effective_prompt(prompt, fragments);

        let mut parts = Vec::with_capacity(1 + images.len());
        parts.push(Part::Text(effective));
        parts.extend(images.iter().cloned().map(Part::Image));
        let message = Message::user(parts).ok_or_else(|| {
            EngineError::Config("nothing to send: prompt and input images are empty".to_string())
        })?;

        self.references = images.into_iter().filter(|image| !image.is_empty()).collect();
        tracing::debug!(
            references = self.references.len(),
            "conversation thread seeded"
        );
        self.history.push(message);
        Ok(())
    }

    /// Sends the whole history asking for an image. A reply with an image or
    /// text is appended; failures leave the history as it was.
    pub fn generate(&mut self) -> Result<GenerationResult> {
        if self.state() == ThreadState::Empty {
            return Err(EngineError::InvalidState(
                "generate called before the thread was seeded".to_string(),
            ));
        }
        let mut result = self
            .provider
            .complete(&ProviderRequest::image(&self.history))?;
        result.image = result.image.filter(|image| !image.is_empty());

        let mut parts = Vec::with_capacity(2);
        let text = result.text.trim();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        if let Some(image) = result.image.clone() {
            parts.push(Part::Image(image));
        }
        let reply = Message::assistant(parts).ok_or(EngineError::NoResult)?;
        self.history.push(reply);
        tracing::debug!(
            turns = self.history.len(),
            has_image = result.has_image(),
            "assistant reply recorded"
        );
        Ok(result)
    }

    /// Appends a user turn (text, then the current image, then the seed's
    /// reference images) and generates the reply.
    pub fn add_user_turn_and_generate(
        &mut self,
        text: &str,
        image_path: Option<&Path>,
    ) -> Result<GenerationResult> {
        if self.state() != ThreadState::HasReply {
            return Err(EngineError::InvalidState(format!(
                "a user turn needs a prior assistant reply (state: {:?})",
                self.state()
            )));
        }
        let current = image_path.map(read_image).transpose()?;

        let mut parts = Vec::with_capacity(2 + self.references.len());
        parts.push(Part::text(text));
        parts.extend(current.map(Part::Image));
        parts.extend(self.references.iter().cloned().map(Part::Image));
        let message = Message::user(parts).ok_or_else(|| {
            EngineError::Config("user turn has neither text nor images".to_string())
        })?;
        self.history.push(message);
        self.generate()
    }
}

fn read_image(path: &Path) -> Result<ImagePart> {
    ImagePart::from_path(path).map_err(|err| EngineError::read(path, err))
}
