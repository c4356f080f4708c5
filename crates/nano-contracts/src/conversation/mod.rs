mod media;
mod message;

pub use media::{mime_for_path, ImagePart, IMAGE_EXTENSIONS};
pub use message::{Message, Part, Role};
