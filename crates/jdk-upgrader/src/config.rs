use std::time::Duration;

/// Default Azure `api-version` when only the key is Azure-style.
pub const DEFAULT_AZURE_API_VERSION: &str = "2025-04-01-preview";

/// Chat-completions endpoint configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Base URL, e.g. `http://localhost:8080/v1` or an Azure resource URL.
    pub url: String,
    pub api_key: Option<String>,
    /// Model name, or deployment name for Azure.
    pub model: String,
    /// Set for Azure OpenAI: the key goes in `api-key` and the deployment
    /// URL carries `api-version`.
    pub azure_api_version: Option<String>,
    /// Appended to every fix prompt.
    pub extra_prompt: Option<String>,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl EndpointConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            url: non_empty("JDK_UPGRADER_LLM_URL")
                .unwrap_or_else(|| "http://localhost:8080/v1".into()),
            api_key: non_empty("JDK_UPGRADER_LLM_API_KEY"),
            model: non_empty("JDK_UPGRADER_LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            azure_api_version: non_empty("JDK_UPGRADER_AZURE_API_VERSION"),
            extra_prompt: non_empty("JDK_UPGRADER_EXTRA_PROMPT"),
            temperature: 0.1,
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn is_azure(&self) -> bool {
        self.azure_api_version.is_some()
    }

    /// Full URL of the chat-completions call.
    pub fn completions_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match &self.azure_api_version {
            Some(version) => format!(
                "{base}/openai/deployments/{}/chat/completions?api-version={version}",
                self.model
            ),
            None => format!("{base}/chat/completions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::from_lookup(lookup(&[]));
        assert_eq!(config.url, "http://localhost:8080/v1");
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.api_key.is_none());
        assert!(!config.is_azure());
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_azure_url() {
        let config = EndpointConfig::from_lookup(lookup(&[
            ("JDK_UPGRADER_LLM_URL", "https://example.openai.azure.com/"),
            ("JDK_UPGRADER_LLM_MODEL", "gpt4o"),
            ("JDK_UPGRADER_AZURE_API_VERSION", DEFAULT_AZURE_API_VERSION),
            ("JDK_UPGRADER_LLM_API_KEY", "k"),
        ]));
        assert!(config.is_azure());
        assert_eq!(
            config.completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2025-04-01-preview"
        );
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = EndpointConfig::from_lookup(lookup(&[
            ("JDK_UPGRADER_LLM_API_KEY", "  "),
            ("JDK_UPGRADER_EXTRA_PROMPT", "Use jakarta.* imports."),
        ]));
        assert!(config.api_key.is_none());
        assert_eq!(config.extra_prompt.as_deref(), Some("Use jakarta.* imports."));
    }
}
