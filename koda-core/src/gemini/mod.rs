//! Wire types for the native generative-language API.
//!
//! These records are the internal lingua franca of the agent: every backend,
//! whatever its own wire shape, produces and consumes them. The OpenAI-compatible
//! router constructs them explicitly rather than casting foreign payloads.

pub mod function_calling;
pub mod models;

pub use function_calling::{FunctionCall, FunctionCallingConfig, FunctionResponse};
pub use models::{
    Blob, Candidate, Content, CountTokensRequest, CountTokensResponse, FinishReason,
    FunctionDeclaration, GenerateContentRequest, GenerateContentResponse, Part, SystemInstruction,
    Tool, ToolConfig, UsageMetadata,
};
