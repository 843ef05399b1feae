pub mod emitter;
pub mod orchestrator;
pub mod prompt;

pub use emitter::TurnEmitter;
pub use orchestrator::{TurnConfig, TurnOrchestrator};
pub use prompt::PromptSet;
