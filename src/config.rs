use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How filtered posts are acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Hide filtered posts behind a placeholder.
    #[default]
    Default,
    /// Walk the timeline and use the host's "not interested" action.
    Agent,
}

/// Chat-completion backends a capability can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[default]
    Openai,
    Claude,
    Kimi,
    Custom,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Openai => "openai",
            ProviderId::Claude => "claude",
            ProviderId::Kimi => "kimi",
            ProviderId::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderId::Openai),
            "claude" => Ok(ProviderId::Claude),
            "kimi" => Ok(ProviderId::Kimi),
            "custom" => Ok(ProviderId::Custom),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomProviderConfig {
    pub base_url: String,
    pub vision_model: String,
    pub text_model: String,
}

/// Read-only settings snapshot. Components receive an `Arc<Settings>` and
/// never mutate it; a settings change swaps in a whole new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled: bool,
    pub mode: Mode,
    pub lock_in_mode: bool,
    pub enable_image_filter: bool,
    pub use_free_image_moderation: bool,
    pub enable_keyword_filter: bool,
    pub enable_credibility_filter: bool,
    pub credibility_threshold: u32,
    pub account_allowlist: Vec<String>,
    pub account_blacklist: Vec<String>,
    pub allowlist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Milliseconds.
    pub scroll_delay: u64,
    /// Milliseconds.
    pub click_delay: u64,
    /// Milliseconds.
    pub pause_duration: u64,
    pub image_provider: ProviderId,
    pub crypto_provider: ProviderId,
    pub api_keys: HashMap<ProviderId, String>,
    /// Pre-multi-provider key, used as the OpenAI credential when `api_keys` has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub custom_provider_config: CustomProviderConfig,
    pub sexual_threshold: f64,
    /// Permit clicking the first menu item when its text only loosely
    /// resembles "not interested". Low confidence; off unless asked for.
    pub allow_menu_guess: bool,
    /// How far outside the viewport a post may be and still count as visible.
    pub viewport_margin_px: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: Mode::Default,
            lock_in_mode: false,
            enable_image_filter: true,
            use_free_image_moderation: true,
            enable_keyword_filter: true,
            enable_credibility_filter: false,
            credibility_threshold: 1000,
            account_allowlist: Vec::new(),
            account_blacklist: Vec::new(),
            allowlist: Vec::new(),
            blacklist: Vec::new(),
            scroll_delay: 2000,
            click_delay: 3000,
            pause_duration: 5000,
            image_provider: ProviderId::Openai,
            crypto_provider: ProviderId::Openai,
            api_keys: HashMap::new(),
            api_key: None,
            custom_provider_config: CustomProviderConfig::default(),
            sexual_threshold: 0.3,
            allow_menu_guess: false,
            viewport_margin_px: 100,
        }
    }
}

impl Settings {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {path}"))?;
        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing settings file {path}"))?;
        Ok(settings.normalized())
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).with_context(|| format!("writing settings file {path}"))?;
        Ok(())
    }

    /// Zero delays in stored settings mean "unset", as they did in the
    /// extension's storage loader.
    pub fn normalized(mut self) -> Self {
        let defaults = Settings::default();
        if self.scroll_delay == 0 {
            self.scroll_delay = defaults.scroll_delay;
        }
        if self.click_delay == 0 {
            self.click_delay = defaults.click_delay;
        }
        if self.pause_duration == 0 {
            self.pause_duration = defaults.pause_duration;
        }
        self.account_allowlist = normalize_handles(&self.account_allowlist);
        self.account_blacklist = normalize_handles(&self.account_blacklist);
        self
    }

    /// Credential for a provider, with the legacy single key as OpenAI fallback.
    pub fn api_key_for(&self, provider: ProviderId) -> Option<&str> {
        let key = self
            .api_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty());
        match (key, provider) {
            (Some(key), _) => Some(key),
            (None, ProviderId::Openai) => self.api_key.as_deref().filter(|k| !k.trim().is_empty()),
            (None, _) => None,
        }
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay)
    }

    pub fn click_delay(&self) -> Duration {
        Duration::from_millis(self.click_delay)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_millis(self.pause_duration)
    }

    /// Agent tick period.
    pub fn agent_period(&self) -> Duration {
        self.click_delay() + Duration::from_millis(500)
    }
}

/// Account lists are compared against lower-cased handles without the `@`.
fn normalize_handles(handles: &[String]) -> Vec<String> {
    handles
        .iter()
        .map(|h| h.trim().trim_start_matches('@').to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}
