pub mod config;
pub mod error;
pub mod message;
pub mod store;
pub mod transcript;

// Re-export common types
pub use config::{MailConfig, PigeonConfig};
pub use error::{PigeonError, Result};
pub use message::{Message, MessageRole};
pub use store::TranscriptStore;
pub use transcript::Transcript;
