//! Provider registry.
//!
//! The fixed set of external AI/service providers the tool holds
//! credentials for, with the per-provider constants the rest of the
//! subsystem keys off: environment variable names, token shapes, and how a
//! candidate credential is validated.

use serde::{Deserialize, Serialize};

/// Known credential providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Cloudflare,
    Github,
    Npm,
    Ollama,
}

/// How a candidate credential for a provider is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationClass {
    /// Regular expression over the token shape; no network call.
    Pattern,
    /// One bounded HTTP call to a low-cost authenticated endpoint.
    NetworkProbe,
    /// The credential is a local endpoint URL; probe a well-known path.
    LocalEndpoint,
}

impl Provider {
    /// All providers, in display order.
    pub const ALL: &'static [Provider] = &[
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::Cloudflare,
        Self::Github,
        Self::Npm,
        Self::Ollama,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google AI",
            Self::Cloudflare => "Cloudflare",
            Self::Github => "GitHub",
            Self::Npm => "npm registry",
            Self::Ollama => "Ollama",
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Cloudflare => "cloudflare",
            Self::Github => "github",
            Self::Npm => "npm",
            Self::Ollama => "ollama",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" | "gemini" => Some(Self::Google),
            "cloudflare" => Some(Self::Cloudflare),
            "github" => Some(Self::Github),
            "npm" => Some(Self::Npm),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Environment variable the provider's credential is read from.
    pub fn env_var_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Cloudflare => "CLOUDFLARE_API_TOKEN",
            Self::Github => "GITHUB_TOKEN",
            Self::Npm => "NPM_TOKEN",
            Self::Ollama => "OLLAMA_HOST",
        }
    }

    /// Expected token shape (anchored regex), if the provider issues
    /// fixed-format tokens. Ollama credentials are endpoint URLs, not
    /// tokens, so there is no pattern.
    pub fn token_pattern(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some(r"^sk-[A-Za-z0-9]{48}$"),
            Self::Anthropic => Some(r"^sk-ant-[A-Za-z0-9_-]{32,}$"),
            Self::Google => Some(r"^AIza[A-Za-z0-9_-]{35}$"),
            Self::Cloudflare => Some(r"^[A-Za-z0-9_-]{40}$"),
            Self::Github => Some(r"^(gh[pousr]_[A-Za-z0-9]{36,}|github_pat_[A-Za-z0-9_]{22,})$"),
            Self::Npm => Some(r"^npm_[A-Za-z0-9]{36}$"),
            Self::Ollama => None,
        }
    }

    /// Token shape usable for searching inside free-form text. Only
    /// providers with a distinctive prefix are scannable; a bare
    /// length-only shape like Cloudflare's would match arbitrary runs of
    /// text.
    pub fn scan_pattern(&self) -> Option<&'static str> {
        match self {
            Self::Cloudflare | Self::Ollama => None,
            other => other.token_pattern(),
        }
    }

    /// Whether `value` matches the provider's token shape. Providers
    /// without a pattern accept any non-empty value.
    pub fn matches_token(&self, value: &str) -> bool {
        match self.token_pattern() {
            Some(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
            None => !value.trim().is_empty(),
        }
    }

    pub fn validation_class(&self) -> ValidationClass {
        match self {
            Self::OpenAi | Self::Anthropic | Self::Github | Self::Npm => {
                ValidationClass::NetworkProbe
            }
            Self::Google | Self::Cloudflare => ValidationClass::Pattern,
            Self::Ollama => ValidationClass::LocalEndpoint,
        }
    }

    /// OS keychain service name for this provider, if one is registered.
    /// Ollama has no keychain entry; its credential is a host URL.
    pub fn keychain_service(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("keywarden-openai"),
            Self::Anthropic => Some("keywarden-anthropic"),
            Self::Google => Some("keywarden-google"),
            Self::Cloudflare => Some("keywarden-cloudflare"),
            Self::Github => Some("keywarden-github"),
            Self::Npm => Some("keywarden-npm"),
            Self::Ollama => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}
