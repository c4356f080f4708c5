pub mod conversation;
pub mod events;
pub mod models;
pub mod parsing;
pub mod prompts;
