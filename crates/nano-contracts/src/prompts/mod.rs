mod critique;
mod improve;

pub use critique::{critique_instruction, escalate_unresolved};
pub use improve::{
    build_effective_prompt, improvement_prompt, with_transparent_hint, TRANSPARENT_BACKGROUND_HINT,
};
