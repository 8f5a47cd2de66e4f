//! Configuration for the chatterbox voice client
//!
//! All recognized options and their defaults are enumerated here; business
//! logic never reads the process environment directly. A partial TOML file
//! can overlay the defaults, and secrets can be supplied by the CLI.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Chat gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL (chat completions are POSTed to `/v1/chat/completions`)
    pub url: String,

    /// Bearer token for the gateway
    pub token: String,

    /// Agent identifier sent in the `x-agent-id` header
    pub agent_id: String,

    /// Model identifier for chat completions
    pub model: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:18789".to_string(),
            token: String::new(),
            agent_id: "main".to_string(),
            model: "default".to_string(),
        }
    }
}

/// Transcription (speech-to-text) configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Transcription endpoint URL
    pub url: String,

    /// API key for the transcription service
    pub api_key: String,

    /// STT model identifier
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: "https://api.groq.com/openai/v1/audio/transcriptions".to_string(),
            api_key: String::new(),
            model: "whisper-large-v3".to_string(),
        }
    }
}

/// Speech synthesis (text-to-speech) configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Synthesis endpoint base URL (voice id is appended as a path segment)
    pub url: String,

    /// API key sent in the `xi-api-key` header
    pub api_key: String,

    /// Voice identity for synthesis
    pub voice_id: String,

    /// TTS model identifier
    pub model_id: String,

    /// Voice stability setting
    pub stability: f32,

    /// Voice similarity boost setting
    pub similarity_boost: f32,

    /// Maximum characters sent to the synthesis endpoint
    pub max_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: "https://api.elevenlabs.io/v1/text-to-speech".to_string(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            max_chars: 5000,
        }
    }
}

/// Control channel configuration
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// WebSocket URL of the control endpoint
    pub url: String,

    /// Auth token for the handshake
    pub token: String,

    /// Delay between reconnect attempts, in milliseconds
    pub reconnect_delay_ms: u64,

    /// Minimum protocol version declared in the handshake
    pub min_protocol: u32,

    /// Maximum protocol version declared in the handshake
    pub max_protocol: u32,

    /// Client identity declared in the handshake
    pub client_id: String,

    /// Requested role
    pub role: String,

    /// Requested permission scopes
    pub scopes: Vec<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:18789".to_string(),
            token: String::new(),
            reconnect_delay_ms: 3000,
            min_protocol: 3,
            max_protocol: 3,
            client_id: "chatterbox".to_string(),
            role: "operator".to_string(),
            scopes: vec!["operator.read".to_string(), "operator.write".to_string()],
        }
    }
}

/// Corner of the screen the floating panel attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Bottom-right corner (default)
    #[default]
    BottomRight,
    /// Bottom-left corner
    BottomLeft,
    /// Top-right corner
    TopRight,
    /// Top-left corner
    TopLeft,
}

/// Visual theme for the embedding renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    /// Dark theme (default)
    #[default]
    Dark,
    /// Light theme
    Light,
}

/// Presentation hints, carried for the renderer; unused by core logic
#[derive(Debug, Clone, Copy, Default)]
pub struct UiConfig {
    /// Panel placement
    pub placement: Placement,

    /// Visual theme
    pub theme: Theme,
}

/// Top-level client configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Chat gateway
    pub gateway: GatewayConfig,

    /// Speech-to-text
    pub transcription: TranscriptionConfig,

    /// Text-to-speech
    pub synthesis: SynthesisConfig,

    /// Control channel
    pub control: ControlConfig,

    /// Presentation hints
    pub ui: UiConfig,
}

impl Config {
    /// Load configuration: defaults, overlaid by the TOML file at `path`
    /// (or the default config location when `path` is `None`, if it exists).
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given file is missing or malformed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", p.display()))
                })?;
                Some(toml::from_str::<ConfigFile>(&text)?)
            }
            None => match default_config_path() {
                Some(p) if p.exists() => {
                    let text = std::fs::read_to_string(&p)?;
                    Some(toml::from_str::<ConfigFile>(&text)?)
                }
                _ => None,
            },
        };

        if let Some(file) = file {
            config.apply(file);
        }

        Ok(config)
    }

    /// Overlay a partial config file onto the current values
    fn apply(&mut self, file: ConfigFile) {
        let ConfigFile {
            gateway,
            transcription,
            synthesis,
            control,
            ui,
        } = file;

        merge(&mut self.gateway.url, gateway.url);
        merge(&mut self.gateway.token, gateway.token);
        merge(&mut self.gateway.agent_id, gateway.agent_id);
        merge(&mut self.gateway.model, gateway.model);

        merge(&mut self.transcription.url, transcription.url);
        merge(&mut self.transcription.api_key, transcription.api_key);
        merge(&mut self.transcription.model, transcription.model);

        merge(&mut self.synthesis.url, synthesis.url);
        merge(&mut self.synthesis.api_key, synthesis.api_key);
        merge(&mut self.synthesis.voice_id, synthesis.voice_id);
        merge(&mut self.synthesis.model_id, synthesis.model_id);
        merge(&mut self.synthesis.stability, synthesis.stability);
        merge(
            &mut self.synthesis.similarity_boost,
            synthesis.similarity_boost,
        );
        merge(&mut self.synthesis.max_chars, synthesis.max_chars);

        merge(&mut self.control.url, control.url);
        merge(&mut self.control.token, control.token);
        merge(
            &mut self.control.reconnect_delay_ms,
            control.reconnect_delay_ms,
        );

        merge(&mut self.ui.placement, ui.placement);
        merge(&mut self.ui.theme, ui.theme);
    }
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

/// Default persistent config location (`~/.config/chatterbox/config.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "chatterbox", "chatterbox")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Top-level TOML configuration file schema
///
/// All fields are optional; the file is a partial overlay on top of defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    gateway: GatewayFile,

    #[serde(default)]
    transcription: TranscriptionFile,

    #[serde(default)]
    synthesis: SynthesisFile,

    #[serde(default)]
    control: ControlFile,

    #[serde(default)]
    ui: UiFile,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayFile {
    url: Option<String>,
    token: Option<String>,
    agent_id: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptionFile {
    url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SynthesisFile {
    url: Option<String>,
    api_key: Option<String>,
    voice_id: Option<String>,
    model_id: Option<String>,
    stability: Option<f32>,
    similarity_boost: Option<f32>,
    max_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ControlFile {
    url: Option<String>,
    token: Option<String>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct UiFile {
    placement: Option<Placement>,
    theme: Option<Theme>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.control.reconnect_delay_ms, 3000);
        assert_eq!(config.control.min_protocol, 3);
        assert_eq!(config.synthesis.max_chars, 5000);
        assert_eq!(config.ui.placement, Placement::BottomRight);
        assert_eq!(config.ui.theme, Theme::Dark);
    }

    #[test]
    fn overlay_is_partial() {
        let file: ConfigFile = toml::from_str(
            r#"
            [gateway]
            url = "https://gw.example.com"

            [ui]
            placement = "top-left"
            theme = "light"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply(file);

        assert_eq!(config.gateway.url, "https://gw.example.com");
        // Untouched fields keep defaults
        assert_eq!(config.gateway.agent_id, "main");
        assert_eq!(config.transcription.model, "whisper-large-v3");
        assert_eq!(config.ui.placement, Placement::TopLeft);
        assert_eq!(config.ui.theme, Theme::Light);
    }
}
