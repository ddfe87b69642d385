//! KarryTask configuration loader.
//!
//! Every section is optional; a file with only `[llm] api_key = ".."` is a
//! complete configuration.

use kt_llm::{GatewayProfiles, GenerationConfig};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KarryTaskConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    /// Replaces the built-in preamble when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            system_prompt: None,
        }
    }
}

fn default_assistant_name() -> String {
    "HussainAI".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Backend models in priority order.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_attempt_timeout_seconds")]
    pub attempt_timeout_seconds: u64,
    /// Budget for one whole gateway resolution; must leave room under
    /// `server.http_timeout_seconds` for the offline tiers.
    #[serde(default = "default_resolve_deadline_seconds")]
    pub resolve_deadline_seconds: u64,
    #[serde(
        default = "default_full_profile",
        deserialize_with = "deserialize_full_profile"
    )]
    pub full: ProfileConfig,
    #[serde(
        default = "default_degraded_profile",
        deserialize_with = "deserialize_degraded_profile"
    )]
    pub degraded: ProfileConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            models: default_models(),
            attempt_timeout_seconds: default_attempt_timeout_seconds(),
            resolve_deadline_seconds: default_resolve_deadline_seconds(),
            full: default_full_profile(),
            degraded: default_degraded_profile(),
        }
    }
}

fn default_base_url() -> String {
    kt_llm::GEMINI_DEFAULT_BASE_URL.to_string()
}

fn default_models() -> Vec<String> {
    vec!["gemini-1.5-flash".to_string(), "gemini-1.5-pro".to_string()]
}

fn default_attempt_timeout_seconds() -> u64 {
    30
}

fn default_resolve_deadline_seconds() -> u64 {
    45
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    /// Advertise only the core task/note tools in this profile.
    pub core_tools_only: bool,
}

/// A `[llm.full]` / `[llm.degraded]` table; omitted keys keep that
/// profile's own defaults.
#[derive(Debug, Default, Deserialize)]
struct ProfileOverrides {
    temperature: Option<f32>,
    top_k: Option<u32>,
    top_p: Option<f32>,
    max_output_tokens: Option<u32>,
    core_tools_only: Option<bool>,
}

impl ProfileOverrides {
    fn over(self, base: ProfileConfig) -> ProfileConfig {
        ProfileConfig {
            temperature: self.temperature.unwrap_or(base.temperature),
            top_k: self.top_k.unwrap_or(base.top_k),
            top_p: self.top_p.unwrap_or(base.top_p),
            max_output_tokens: self.max_output_tokens.unwrap_or(base.max_output_tokens),
            core_tools_only: self.core_tools_only.unwrap_or(base.core_tools_only),
        }
    }
}

fn deserialize_full_profile<'de, D: Deserializer<'de>>(d: D) -> Result<ProfileConfig, D::Error> {
    Ok(ProfileOverrides::deserialize(d)?.over(default_full_profile()))
}

fn deserialize_degraded_profile<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<ProfileConfig, D::Error> {
    Ok(ProfileOverrides::deserialize(d)?.over(default_degraded_profile()))
}

impl ProfileConfig {
    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

fn default_full_profile() -> ProfileConfig {
    ProfileConfig {
        temperature: 0.3,
        top_k: 40,
        top_p: 0.95,
        max_output_tokens: 512,
        core_tools_only: false,
    }
}

fn default_degraded_profile() -> ProfileConfig {
    ProfileConfig {
        temperature: 0.1,
        top_k: 20,
        top_p: 0.9,
        max_output_tokens: 256,
        core_tools_only: true,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_port() -> u16 {
    8787
}

fn default_http_timeout_seconds() -> u64 {
    60
}

fn default_http_max_in_flight() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.karrytask/data/karrytask.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Utterances of at most this many words become a task when nothing else fires.
    #[serde(default = "default_quick_capture_max_words")]
    pub quick_capture_max_words: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            quick_capture_max_words: default_quick_capture_max_words(),
        }
    }
}

fn default_quick_capture_max_words() -> usize {
    6
}

impl KarryTaskConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// Missing file at the default location means built-in defaults; a
    /// missing explicit path is an error.
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.is_some();
        let path = match path {
            Some(p) => p,
            None => default_config_path()?,
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    config_path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("GEMINI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("KARRYTASK_MODELS") {
            self.llm.models = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(v) = lookup("PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid PORT"),
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.llm.models.is_empty() {
            return Err(anyhow::anyhow!("llm.models must name at least one model"));
        }
        if self.llm.models.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow::anyhow!("llm.models must not contain blank names"));
        }
        if self.llm.attempt_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("llm.attempt_timeout_seconds must be > 0"));
        }
        if self.llm.resolve_deadline_seconds == 0 {
            return Err(anyhow::anyhow!("llm.resolve_deadline_seconds must be > 0"));
        }
        if self.llm.resolve_deadline_seconds >= self.server.http_timeout_seconds {
            return Err(anyhow::anyhow!(
                "llm.resolve_deadline_seconds ({}) must be below server.http_timeout_seconds ({})",
                self.llm.resolve_deadline_seconds,
                self.server.http_timeout_seconds
            ));
        }
        for (name, profile) in [("full", &self.llm.full), ("degraded", &self.llm.degraded)] {
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(anyhow::anyhow!(
                    "llm.{name}.temperature must be within [0, 2]"
                ));
            }
            if profile.max_output_tokens == 0 {
                return Err(anyhow::anyhow!("llm.{name}.max_output_tokens must be > 0"));
            }
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.resolver.quick_capture_max_words == 0 {
            return Err(anyhow::anyhow!("resolver.quick_capture_max_words must be > 0"));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn gateway_profiles(&self) -> GatewayProfiles {
        GatewayProfiles {
            full: self.llm.full.generation(),
            degraded: self.llm.degraded.generation(),
            degraded_tools: self
                .llm
                .degraded
                .core_tools_only
                .then(kt_tools::core_tool_names),
        }
    }

    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.store.path)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".karrytask").join("config.toml"))
}

pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim();
    let Some(rest) = trimmed.strip_prefix("~/") else {
        return Ok(PathBuf::from(trimmed));
    };
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = KarryTaskConfig::parse("").expect("parse empty");
        assert_eq!(cfg.general.assistant_name, "HussainAI");
        assert_eq!(cfg.llm.models, vec!["gemini-1.5-flash", "gemini-1.5-pro"]);
        assert_eq!(cfg.llm.full.max_output_tokens, 512);
        assert_eq!(cfg.llm.degraded.max_output_tokens, 256);
        assert!(cfg.llm.degraded.core_tools_only);
        assert_eq!(cfg.server.port, 8787);
        assert_eq!(cfg.resolver.quick_capture_max_words, 6);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = KarryTaskConfig::parse(
            r#"
[llm]
api_key = "abc"
models = ["gemini-1.5-pro"]

[llm.degraded]
temperature = 0.0
top_k = 10
top_p = 0.5
max_output_tokens = 128
core_tools_only = false
"#,
        )
        .expect("parse");
        assert_eq!(cfg.api_key(), Some("abc"));
        assert_eq!(cfg.llm.models, vec!["gemini-1.5-pro"]);
        assert_eq!(cfg.llm.full.top_k, 40);
        assert_eq!(cfg.llm.degraded.max_output_tokens, 128);
        assert!(!cfg.llm.degraded.core_tools_only);
        assert!(cfg.gateway_profiles().degraded_tools.is_none());
    }

    #[test]
    fn partial_profile_table_keeps_that_profiles_defaults() {
        let cfg = KarryTaskConfig::parse(
            r#"
[llm.full]
temperature = 0.5

[llm.degraded]
max_output_tokens = 200
"#,
        )
        .expect("parse");
        assert_eq!(cfg.llm.full.temperature, 0.5);
        assert_eq!(cfg.llm.full.top_k, 40);
        assert_eq!(cfg.llm.full.max_output_tokens, 512);
        assert!(!cfg.llm.full.core_tools_only);
        assert_eq!(cfg.llm.degraded.max_output_tokens, 200);
        assert_eq!(cfg.llm.degraded.temperature, 0.1);
        assert!(cfg.llm.degraded.core_tools_only);
    }

    #[test]
    fn gateway_deadline_must_fit_under_http_timeout() {
        let cfg = KarryTaskConfig::default();
        assert!(cfg.llm.resolve_deadline_seconds < cfg.server.http_timeout_seconds);

        let mut cfg = KarryTaskConfig::default();
        cfg.llm.resolve_deadline_seconds = cfg.server.http_timeout_seconds;
        let err = cfg.validate().expect_err("deadline too long");
        assert!(err.to_string().contains("llm.resolve_deadline_seconds"));
    }

    #[test]
    fn env_overrides_replace_key_models_and_port() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEMINI_API_KEY", "from-env"),
            ("KARRYTASK_MODELS", " a , ,b "),
            ("PORT", "9000"),
        ]);
        let mut cfg = KarryTaskConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.api_key(), Some("from-env"));
        assert_eq!(cfg.llm.models, vec!["a", "b"]);
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut cfg = KarryTaskConfig::default();
        cfg.llm.api_key = Some("   ".to_string());
        assert!(cfg.api_key().is_none());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = KarryTaskConfig::default();
        cfg.llm.models.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = KarryTaskConfig::default();
        cfg.llm.full.temperature = 3.5;
        let err = cfg.validate().expect_err("temperature out of range");
        assert!(err.to_string().contains("llm.full.temperature"));

        let mut cfg = KarryTaskConfig::default();
        cfg.resolver.quick_capture_max_words = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn core_tools_only_restricts_degraded_profile() {
        let profiles = KarryTaskConfig::default().gateway_profiles();
        let allowed = profiles.degraded_tools.expect("allowlist");
        assert_eq!(allowed, kt_tools::core_tool_names());
        assert_eq!(profiles.degraded.temperature, 0.1);
    }

    #[tokio::test]
    async fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = KarryTaskConfig::load(Some(dir.path().join("nope.toml")))
            .await
            .expect_err("explicit path must exist");
        assert!(err.to_string().contains("read config"));
    }

    #[tokio::test]
    async fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[resolver]\nquick_capture_max_words = 3\n").expect("write");
        let (cfg, loaded_from) = KarryTaskConfig::load_with_path(Some(path.clone()))
            .await
            .expect("load");
        assert_eq!(cfg.resolver.quick_capture_max_words, 3);
        assert_eq!(loaded_from, path);
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home(" /var/lib/kt.db ").expect("expand"),
            PathBuf::from("/var/lib/kt.db")
        );
    }
}
