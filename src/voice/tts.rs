//! Text-to-speech over the remote synthesis API

use crate::config::SynthesisConfig;
use crate::{Error, Result};

#[derive(serde::Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(serde::Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// Synthesizes speech from sanitized assistant text
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl SpeechSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key or voice identity is missing
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("synthesis API key required".to_string()));
        }
        if config.voice_id.is_empty() {
            return Err(Error::Config("synthesis voice id required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    /// Synthesize text to audio bytes (MP3)
    ///
    /// Callers are expected to have already sanitized and truncated the text
    /// (see [`super::sanitize::sanitize_for_speech`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] on a non-success response
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), "starting synthesis");

        let url = format!("{}/{}", self.config.url, self.config.voice_id);
        let request = SynthesisRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "synthesis API error");
            return Err(Error::Synthesis(format!(
                "synthesis API error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}
