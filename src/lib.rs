//! Chatterbox - Voice conversation client for AI assistant gateways
//!
//! This library provides the core functionality of the chatterbox client:
//! - Push-to-talk voice capture and speaker playback
//! - Remote speech-to-text and text-to-speech
//! - Multi-turn conversation sessions against a chat-completion gateway
//! - A persistent, auto-reconnecting WebSocket control channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  User interaction                    │
//! │        toggle  │  interrupt  │  reset               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │           VoiceSessionOrchestrator                   │
//! │  capture → STT → exchange → sanitize → TTS → play   │
//! └───────┬──────────────┬──────────────┬───────────────┘
//!         │              │              │
//! ┌───────▼─────┐ ┌──────▼──────┐ ┌─────▼───────────────┐
//! │ Transcriber │ │ Conversation│ │ SpeechSynthesizer   │
//! │  (remote)   │ │  Session    │ │  (remote)           │
//! └─────────────┘ └──────┬──────┘ └─────────────────────┘
//!                        │
//!              ┌─────────▼─────────┐
//!              │   Chat gateway    │◄── ControlChannel (ws)
//!              └───────────────────┘
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod voice;

pub use config::Config;
pub use control::{ControlChannel, ControlState};
pub use error::{Error, Result};
pub use orchestrator::{PipelineError, Snapshot, VoiceSessionOrchestrator, VoiceState};
pub use session::{ConversationSession, Message, Role};
pub use voice::{AudioCapture, AudioPlayer, MicCapture, SpeakerPlayer};
