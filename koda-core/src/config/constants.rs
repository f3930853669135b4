//! Centralized constants: endpoints, model ids, tool names, env vars.

pub mod urls {
    pub const GENERATIVE_LANGUAGE_BASE: &str =
        "https://generativelanguage.googleapis.com/v1beta";
    pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
    pub const ROUTER_REFERER: &str = "https://github.com/koda-sh/koda";
    pub const ROUTER_TITLE: &str = "koda";
    pub const OAUTH_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
    pub const OAUTH_CLIENT_ID: &str =
        "764086051850-3l1d8u7jv5kqe8c0tmk9hhtg3v0q0f0a.apps.googleusercontent.com";
    pub const OAUTH_CLIENT_SECRET: &str = "d-FL95Q19q7MQmFpd7hHD0Ty";
    pub const EMBEDDING_MODEL: &str = "gemini-embedding-001";
}

pub mod models {
    pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
    /// Fallback offered when the primary model hits its quota.
    pub const FLASH_FALLBACK_MODEL: &str = "gemini-2.5-flash";
    pub const DEFAULT_ROUTER_MODEL: &str = "qwen/qwen3-coder";
    /// Context window assumed when the backend does not report one.
    pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u64 = 1_048_576;
}

pub mod tools {
    pub const READ_FILE: &str = "read_file";
    pub const WRITE_FILE: &str = "write_file";
    pub const REPLACE: &str = "replace";
    pub const SHELL: &str = "run_shell_command";
    pub const GREP: &str = "search_file_content";
    pub const MEMORY: &str = "save_memory";

    /// Tools that mutate files and therefore snapshot a checkpoint before
    /// running.
    pub const RESTORABLE: &[&str] = &[WRITE_FILE, REPLACE];
}

pub mod env_vars {
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
    pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
    pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
    pub const GOOGLE_CLOUD_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
    pub const OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
    pub const DEFAULT_AUTH_TYPE: &str = "KODA_DEFAULT_AUTH_TYPE";
    pub const LOG_SYSTEM_PROMPT: &str = "KODA_LOG_SYSTEM_PROMPT";
}

pub mod defaults {
    /// Negative means unlimited.
    pub const MAX_SESSION_TURNS: i32 = -1;
    pub const MCP_TOOL_TIMEOUT_MS: u64 = 600_000;
    /// Streaming buffer length past which the orchestrator looks for a safe
    /// markdown split point.
    pub const STREAM_SPLIT_THRESHOLD: usize = 4_000;
    /// Fraction of the context window that triggers history compression.
    pub const COMPRESSION_TOKEN_THRESHOLD: f64 = 0.7;
    /// Fraction of recent history preserved verbatim by compression.
    pub const COMPRESSION_PRESERVE_FRACTION: f64 = 0.3;
}

pub const APP_DIR_NAME: &str = ".koda";
pub const CONFIG_FILE_NAME: &str = "koda.toml";
pub const PROJECT_IGNORE_FILE: &str = ".kodaignore";
