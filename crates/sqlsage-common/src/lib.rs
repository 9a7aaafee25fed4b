pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{ConversationMessage, MessageRole};
pub use types::CollectionSelector;
