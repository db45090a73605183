// Re-export needed modules for testing
pub mod client;
pub mod engine;
pub mod state;

// Re-export main types for convenience
pub use client::{ChatClient, ChatCommand, ChatResponse, ClientError, ServerEnvelope};
pub use engine::{ChatEngine, EngineConfig, EngineError};
pub use state::{ChatStore, ConversationKey};
