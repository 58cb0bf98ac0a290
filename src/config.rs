//! Configuration helpers for the reference HTTP transport.
//!
//! These helpers configure [`crate::transport::http::OpenAiCompatibleTransport`]
//! only — the engine itself takes any [`crate::transport::ModelTransport`]
//! implementor and has no configuration of its own.
//!
//! ## Supported Providers
//!
//! - **LM Studio**: Popular local model server with GUI
//! - **Ollama**: Command-line focused local model server
//! - **llama.cpp**: C++ inference engine with server mode
//! - **vLLM**: High-performance inference server
//!
//! ## Environment Variables
//!
//! - `OPEN_AGENT_BASE_URL`: Override base URL for any provider
//! - `OPEN_AGENT_MODEL`: Override model name (when `prefer_env` is true)

use std::env;
use std::str::FromStr;

/// Supported local LLM server providers, each with a default base URL.
///
/// | Provider | Default URL |
/// |----------|-------------|
/// | LMStudio | http://localhost:1234/v1 |
/// | Ollama | http://localhost:11434/v1 |
/// | LlamaCpp | http://localhost:8080/v1 |
/// | VLLM | http://localhost:8000/v1 |
///
/// All providers implement the OpenAI-compatible chat-completions API,
/// making them interchangeable from the transport's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

impl Provider {
    /// The standard localhost URL this provider's server runs on by default.
    ///
    /// ```rust
    /// use agentic_loop::config::Provider;
    ///
    /// assert_eq!(Provider::Ollama.default_url(), "http://localhost:11434/v1");
    /// ```
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Case-insensitive, accepting dash/underscore/dot variants
    /// (`"lm-studio"`, `"lm_studio"`, `"llama.cpp"`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(Provider::LMStudio),
            "ollama" => Ok(Provider::Ollama),
            "llamacpp" | "llama-cpp" | "llama_cpp" | "llama.cpp" => Ok(Provider::LlamaCpp),
            "vllm" => Ok(Provider::VLLM),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Resolve the base URL to use: env var, then provider default, then
/// `fallback`, then LM Studio's default as a last resort.
///
/// ```rust
/// use agentic_loop::config::{get_base_url, Provider};
///
/// let url = get_base_url(Some(Provider::Ollama), None);
/// assert_eq!(url, "http://localhost:11434/v1");
/// ```
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("OPEN_AGENT_BASE_URL") {
        return url;
    }

    if let Some(p) = provider {
        return p.default_url().to_string();
    }

    fallback
        .unwrap_or(Provider::LMStudio.default_url())
        .to_string()
}

/// Resolve the model name: env var (if `prefer_env`), then `fallback`.
///
/// ```rust
/// use agentic_loop::config::get_model;
///
/// let model = get_model(Some("qwen2.5-32b"), false);
/// assert_eq!(model.as_deref(), Some("qwen2.5-32b"));
/// ```
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var("OPEN_AGENT_MODEL") {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_default_urls() {
        assert_eq!(Provider::LMStudio.default_url(), "http://localhost:1234/v1");
        assert_eq!(Provider::Ollama.default_url(), "http://localhost:11434/v1");
        assert_eq!(Provider::LlamaCpp.default_url(), "http://localhost:8080/v1");
        assert_eq!(Provider::VLLM.default_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("lmstudio".parse::<Provider>(), Ok(Provider::LMStudio));
        assert_eq!("LM-Studio".parse::<Provider>(), Ok(Provider::LMStudio));
        assert_eq!("ollama".parse::<Provider>(), Ok(Provider::Ollama));
        assert_eq!("llama.cpp".parse::<Provider>(), Ok(Provider::LlamaCpp));
        assert_eq!("vllm".parse::<Provider>(), Ok(Provider::VLLM));
        assert!("unknown".parse::<Provider>().is_err());
    }

    #[test]
    fn test_get_base_url_with_fallback() {
        unsafe {
            env::remove_var("OPEN_AGENT_BASE_URL");
        }
        let url = get_base_url(None, Some("http://custom:8080/v1"));
        assert_eq!(url, "http://custom:8080/v1");
    }

    #[test]
    fn test_get_model_env_disabled() {
        let model = get_model(Some("llama3:8b"), false);
        assert_eq!(model.as_deref(), Some("llama3:8b"));
    }
}
