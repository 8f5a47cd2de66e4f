//! Speech-to-text over the remote transcription API

use crate::config::TranscriptionConfig;
use crate::{Error, Result};

/// Response from the transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcribes captured utterances to text
pub struct Transcriber {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

impl Transcriber {
    /// Create a new transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(
                "transcription API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    /// Transcribe WAV audio bytes to text
    ///
    /// The returned transcript may be empty when no speech was present;
    /// callers decide how to treat that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transcription`] on a non-success response
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.config.model.clone());

        let response = self
            .client
            .post(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transcription(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Transcription(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("malformed response: {e}")))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
