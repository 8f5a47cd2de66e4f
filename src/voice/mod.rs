//! Voice platform capabilities and external speech services
//!
//! Capture and playback are platform capabilities behind small traits so the
//! orchestrator stays hardware-independent and testable with fakes.

mod capture;
mod playback;
pub mod sanitize;
pub mod stt;
pub mod tts;

pub use capture::{MicCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::SpeakerPlayer;

use crate::Result;

/// Exclusive handle on the audio capture device
///
/// At most one utterance is being captured at a time; `start` while already
/// capturing and `stop` while idle are both no-ops at the orchestrator level.
pub trait AudioCapture {
    /// Acquire the capture device and begin buffering samples
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] if the device cannot be acquired
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the underlying hardware resource
    fn stop(&mut self);

    /// Take the samples buffered since `start`, clearing the buffer
    fn take_samples(&mut self) -> Vec<f32>;

    /// Whether the device is currently held
    fn is_capturing(&self) -> bool;
}

/// Exclusive handle on the audio playback device
///
/// At most one playback instance exists; `play` replaces any prior playback.
pub trait AudioPlayer: Send {
    /// Decode and start playing the audio bytes, replacing any prior playback
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Playback`] if decoding or device setup fails
    fn play(&mut self, audio: &[u8]) -> Result<()>;

    /// Stop and release the current playback, if any
    fn stop(&mut self);

    /// Whether playback is still in progress
    fn is_playing(&self) -> bool;
}
