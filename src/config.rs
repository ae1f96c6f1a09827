//! settings for both subsystems. everything is defaulted so a partial json file
//! (or none at all) is enough; the chat side also seeds itself from the same
//! env vars the demo apps use.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use bevy::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::chat::content::SYSTEM_PROMPT;
use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4";

/// completion service settings.
///
/// `api_key` is the single switch between the live path and the offline
/// fallback: `None` (or an empty string) is a supported configuration, not an
/// error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 500,
            temperature: 0.7,
            stream: true,
            timeout_secs: 30,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

// keep the key out of logs
impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("key_present", &self.has_credential())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl ChatConfig {
    /// defaults overridden by `OPENAI_API_KEY`, `LLM_BASE_URL` and `LLM_MODEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_var("OPENAI_API_KEY"),
            base_url: env_var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: env_var("LLM_MODEL").unwrap_or(defaults.model),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// the trimmed key, if one is actually set.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// provider base url with the `/v1/` suffix the openai backend expects.
    pub fn provider_base_url(&self) -> String {
        format!("{}/", normalize_oai_base(&self.base_url))
    }
}

// exported-but-empty counts as unset
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// users paste the base with or without `/v1`; the provider needs it.
pub fn normalize_oai_base(base: &str) -> String {
    let b = base.trim().trim_end_matches('/');
    if b.ends_with("/v1") {
        b.to_string()
    } else {
        format!("{b}/v1")
    }
}

/// closed interval a random draw is taken from. a degenerate span
/// (`max <= min`) always yields `min`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub min: f32,
    pub max: f32,
}

impl Span {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// symmetric span around zero.
    pub const fn centered(half_width: f32) -> Self {
        Self { min: -half_width, max: half_width }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f32 {
        if self.max > self.min {
            rng.random_range(self.min..self.max)
        } else {
            self.min
        }
    }

    pub fn contains(&self, v: f32) -> bool {
        v >= self.min && v <= self.max
    }
}

/// particle field constants. defaults reproduce the site's intro: a 400
/// bubble pool filled at 20 per second, spread three viewports wide.
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleConfig {
    pub capacity: usize,
    pub spawn_interval_ms: u64,
    pub spawn_x: Span,
    pub spawn_y: Span,
    pub spawn_z: Span,
    pub size: Span,
    pub ascent_speed: Span,
    /// per-axis angular velocity, radians per frame.
    pub spin: Span,
    /// bottom of the visible volume; recycled bubbles restart just under it.
    pub lower_bound: f32,
    /// a bubble above this is recycled.
    pub upper_bound: f32,
    pub drift_amplitude: f32,
    pub drift_frequency_x: f32,
    pub drift_frequency_z: f32,
    pub seed: u64,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            capacity: 400,
            spawn_interval_ms: 50,
            spawn_x: Span::centered(30.0),
            spawn_y: Span::new(-35.0, -25.0),
            spawn_z: Span::centered(15.0),
            size: Span::new(0.2, 1.0),
            ascent_speed: Span::new(0.5, 2.0),
            spin: Span::centered(0.01),
            lower_bound: -15.0,
            upper_bound: 15.0,
            drift_amplitude: 0.2,
            drift_frequency_x: 0.5,
            drift_frequency_z: 0.3,
            seed: 0x6c69_6e65_7461_6273,
        }
    }
}

impl BubbleConfig {
    pub fn spawn_interval(&self) -> Duration {
        Duration::from_millis(self.spawn_interval_ms.max(1))
    }

    /// spread the pool across a viewport of the given width, matching the
    /// intro's `width * 3` horizontal envelope.
    pub fn with_viewport_width(mut self, width: f32) -> Self {
        self.spawn_x = Span::centered(width.abs() * 1.5);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::Write;

    #[test]
    fn empty_key_counts_as_absent() {
        let cfg = ChatConfig { api_key: Some("   ".into()), ..ChatConfig::default() };
        assert!(!cfg.has_credential());
        assert!(ChatConfig::default().with_api_key("sk-test").has_credential());
    }

    #[test]
    fn debug_hides_the_key() {
        let cfg = ChatConfig::default().with_api_key("sk-secret");
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("key_present: true"));
    }

    #[test]
    fn base_url_gets_v1_once() {
        assert_eq!(normalize_oai_base("https://api.openai.com"), "https://api.openai.com/v1");
        assert_eq!(normalize_oai_base("https://api.openai.com/v1/"), "https://api.openai.com/v1");
        let cfg = ChatConfig { base_url: "http://localhost:8080/".into(), ..ChatConfig::default() };
        assert_eq!(cfg.provider_base_url(), "http://localhost:8080/v1/");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ChatConfig::from_json_str(r#"{ "model": "gpt-4o-mini", "timeout_secs": 5 }"#).unwrap();
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_tokens, 500);
        assert!(cfg.stream);
        assert!(!cfg.has_credential());
        assert_eq!(cfg.system_prompt, SYSTEM_PROMPT);
    }

    #[test]
    fn config_file_roundtrip_through_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{ "api_key": "sk-file", "temperature": 0.2 }}"#).unwrap();
        let cfg = ChatConfig::from_json_file(f.path()).unwrap();
        assert_eq!(cfg.credential(), Some("sk-file"));
        assert!((cfg.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err = ChatConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        let err = ChatConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn span_sampling_stays_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        let span = Span::new(0.5, 2.0);
        for _ in 0..1000 {
            assert!(span.contains(span.sample(&mut rng)));
        }
        assert_eq!(Span::new(3.0, 3.0).sample(&mut rng), 3.0);
    }

    #[test]
    fn bubble_defaults_and_overrides() {
        let cfg = BubbleConfig::default().with_viewport_width(10.0);
        assert_eq!(cfg.spawn_x, Span::centered(15.0));
        assert_eq!(cfg.spawn_interval(), Duration::from_millis(50));
        let cfg = BubbleConfig::from_json_str(r#"{ "capacity": 12 }"#).unwrap();
        assert_eq!(cfg.capacity, 12);
        assert_eq!(cfg.upper_bound, 15.0);
    }
}
