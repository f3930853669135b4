pub mod code_assist;
pub mod gemini;
pub mod openrouter;

pub use code_assist::{CodeAssistProvider, OauthCredentials, TokenStore};
pub use gemini::{GeminiEndpoint, GeminiProvider};
pub use openrouter::OpenRouterProvider;
