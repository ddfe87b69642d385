//! Model gateway for KarryTask.
//!
//! Pure HTTP client plus ordered backend fallback; knows nothing about tasks or notes.

mod error;
mod gateway;
mod gemini;
mod types;

pub use error::{LlmError, Result};
pub use gateway::{GatewayProfiles, ModelBackend, ModelGateway};
pub use gemini::{GEMINI_DEFAULT_BASE_URL, GeminiBackend};
pub use types::{
    ChatMessage, GatewayResult, GenerateRequest, GenerationConfig, RequestProfile, Role, ToolCall,
    ToolDefinition,
};
