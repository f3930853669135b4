//! LLM backend abstraction: one trait, three upstreams.

pub mod factory;
pub mod provider;
pub mod providers;
pub mod sse;

pub use factory::{create_generator, resolve_auth_kind};
pub use provider::{
    AuthKind, ContentGenerator, ProviderError, ProviderStream, UserTier, estimate_tokens,
};
