//! Voice session orchestration state machine
//!
//! One linear pipeline per utterance: capture → transcription → exchange →
//! synthesis → playback. Transitions are driven by stage completions and
//! guarded by the current state plus a generation counter, so a completion
//! that lands after the user has interrupted or reset is ignored rather than
//! applied. At most one pipeline is in flight at any instant.
//!
//! The orchestrator owns the capture and playback devices exclusively and
//! releases them on every exit path. State changes are published through a
//! watch channel so any renderer can subscribe without coupling the state
//! machine to a presentation technology.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::session::ConversationSession;
use crate::voice::sanitize::sanitize_for_speech;
use crate::voice::stt::Transcriber;
use crate::voice::tts::SpeechSynthesizer;
use crate::Result;
use crate::voice::{AudioCapture, AudioPlayer, SAMPLE_RATE, samples_to_wav};

/// Pipeline stage the session is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Nothing in flight
    Idle,
    /// Microphone held, buffering the utterance
    Listening,
    /// Captured audio sent to the transcription endpoint
    Transcribing,
    /// Transcript sent to the chat gateway
    Exchanging,
    /// Assistant reply sent to the synthesis endpoint
    Synthesizing,
    /// Synthesized audio playing
    Speaking,
}

/// Pipeline failure recorded for inline display
///
/// `NoSpeechDetected` is an expected outcome of an empty transcript, not an
/// exceptional condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Capture device could not be acquired; a permission hint should show
    PermissionDenied(String),
    /// Transcript was empty or whitespace-only
    NoSpeechDetected,
    /// Transcription endpoint failed
    Transcription(String),
    /// Chat gateway failed; the user turn stays recorded
    Gateway(String),
    /// Synthesis endpoint failed
    Synthesis(String),
    /// Playback could not start or aborted
    Playback(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied(msg) => write!(f, "microphone unavailable: {msg}"),
            Self::NoSpeechDetected => write!(f, "no speech detected"),
            Self::Transcription(msg) => write!(f, "transcription failed: {msg}"),
            Self::Gateway(msg) => write!(f, "gateway error: {msg}"),
            Self::Synthesis(msg) => write!(f, "synthesis failed: {msg}"),
            Self::Playback(msg) => write!(f, "playback failed: {msg}"),
        }
    }
}

/// Observable snapshot of the orchestrator
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Current pipeline stage
    pub state: VoiceState,
    /// Last pipeline failure, cleared by the next `start`
    pub last_error: Option<PipelineError>,
    /// Transcript of the utterance currently flowing through the pipeline
    pub transcript: Option<String>,
}

struct Inner {
    state: VoiceState,
    last_error: Option<PipelineError>,
    transcript: Option<String>,
    generation: u64,
    player: Box<dyn AudioPlayer>,
    notify: watch::Sender<Snapshot>,
}

impl Inner {
    fn publish(&self) {
        let _ = self.notify.send(Snapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            transcript: self.transcript.clone(),
        });
    }

    fn enter(&mut self, state: VoiceState) {
        tracing::debug!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.publish();
    }

    fn fail(&mut self, error: PipelineError) {
        tracing::warn!(error = %error, "pipeline failed");
        self.last_error = Some(error);
        self.enter(VoiceState::Idle);
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Apply `f` only if the pipeline is still in `expected` state for the same
/// generation; a stale completion after interrupt/reset is dropped.
fn apply_if(
    inner: &Mutex<Inner>,
    generation: u64,
    expected: VoiceState,
    f: impl FnOnce(&mut Inner),
) -> bool {
    let mut guard = lock(inner);
    if guard.generation != generation || guard.state != expected {
        tracing::debug!(
            expected = ?expected,
            actual = ?guard.state,
            "stale pipeline completion ignored"
        );
        return false;
    }
    f(&mut guard);
    true
}

/// The voice session state machine
///
/// All user-facing actions take `&mut self` and must be called from one
/// logical thread of control (capture streams are not `Send`); pipeline
/// stages run in a spawned task and re-check state before applying results.
pub struct VoiceSessionOrchestrator {
    capture: Box<dyn AudioCapture>,
    inner: Arc<Mutex<Inner>>,
    session: Arc<ConversationSession>,
    transcriber: Arc<Transcriber>,
    synthesizer: Arc<SpeechSynthesizer>,
    max_speech_chars: usize,
    snapshot_rx: watch::Receiver<Snapshot>,
}

impl VoiceSessionOrchestrator {
    /// Create an idle orchestrator from its capability and service handles
    pub fn new(
        capture: Box<dyn AudioCapture>,
        player: Box<dyn AudioPlayer>,
        session: Arc<ConversationSession>,
        transcriber: Transcriber,
        synthesizer: SpeechSynthesizer,
        max_speech_chars: usize,
    ) -> Self {
        let (notify, snapshot_rx) = watch::channel(Snapshot {
            state: VoiceState::Idle,
            last_error: None,
            transcript: None,
        });

        Self {
            capture,
            inner: Arc::new(Mutex::new(Inner {
                state: VoiceState::Idle,
                last_error: None,
                transcript: None,
                generation: 0,
                player,
                notify,
            })),
            session,
            transcriber: Arc::new(transcriber),
            synthesizer: Arc::new(synthesizer),
            max_speech_chars,
            snapshot_rx,
        }
    }

    /// Subscribe to state change notifications
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Current pipeline stage
    #[must_use]
    pub fn state(&self) -> VoiceState {
        lock(&self.inner).state
    }

    /// Last pipeline failure, if any
    #[must_use]
    pub fn last_error(&self) -> Option<PipelineError> {
        lock(&self.inner).last_error.clone()
    }

    /// Transcript of the utterance currently in flight, if any
    #[must_use]
    pub fn transcript(&self) -> Option<String> {
        lock(&self.inner).transcript.clone()
    }

    /// The conversation session backing this orchestrator
    #[must_use]
    pub fn session(&self) -> &Arc<ConversationSession> {
        &self.session
    }

    /// Begin capturing an utterance
    ///
    /// A no-op while any pipeline stage is active; a second `start` never
    /// begins a parallel pipeline. Clears the previous error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when the capture device cannot be
    /// acquired; the error is also recorded as `last_error`
    pub fn start(&mut self) -> Result<()> {
        {
            let guard = lock(&self.inner);
            if guard.state != VoiceState::Idle {
                tracing::debug!(state = ?guard.state, "start ignored, pipeline active");
                return Ok(());
            }
        }

        match self.capture.start() {
            Ok(()) => {
                let mut guard = lock(&self.inner);
                guard.last_error = None;
                guard.transcript = None;
                guard.enter(VoiceState::Listening);
                Ok(())
            }
            Err(e) => {
                let mut guard = lock(&self.inner);
                guard.fail(PipelineError::PermissionDenied(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop capturing and run the utterance through the pipeline
    ///
    /// A no-op when not listening (guards re-entrant stop calls). The
    /// microphone is released before any network call is made; stage
    /// completions are applied by a spawned task.
    pub fn stop(&mut self) {
        {
            let guard = lock(&self.inner);
            if guard.state != VoiceState::Listening {
                return;
            }
        }

        if !self.capture.is_capturing() {
            // Device dropped out from under a Listening state; recover to
            // Idle rather than leaving the machine stuck
            tracing::warn!("capture lost while listening");
            lock(&self.inner).enter(VoiceState::Idle);
            return;
        }

        self.capture.stop();
        let samples = self.capture.take_samples();

        let generation = {
            let mut guard = lock(&self.inner);
            guard.enter(VoiceState::Transcribing);
            guard.generation
        };

        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(&self.session);
        let transcriber = Arc::clone(&self.transcriber);
        let synthesizer = Arc::clone(&self.synthesizer);
        let max_chars = self.max_speech_chars;

        tokio::spawn(async move {
            run_pipeline(
                &inner,
                &session,
                &transcriber,
                &synthesizer,
                samples,
                max_chars,
                generation,
            )
            .await;
        });
    }

    /// Abort whatever is in flight and return to `Idle`
    ///
    /// Releases the capture and playback devices immediately. Network calls
    /// already in flight are not cancelled; their completions are dropped by
    /// the generation guard.
    pub fn interrupt(&mut self) {
        self.capture.stop();

        let mut guard = lock(&self.inner);
        if guard.state == VoiceState::Idle {
            return;
        }
        guard.generation += 1;
        guard.player.stop();
        guard.enter(VoiceState::Idle);
    }

    /// Single user-facing toggle action
    ///
    /// Idle starts listening, Listening finishes the utterance, Speaking
    /// interrupts playback; the busy stages in between ignore the toggle.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::PermissionDenied`] from `start`
    pub fn toggle(&mut self) -> Result<()> {
        match self.state() {
            VoiceState::Idle => self.start(),
            VoiceState::Listening => {
                self.stop();
                Ok(())
            }
            VoiceState::Speaking => {
                self.interrupt();
                Ok(())
            }
            VoiceState::Transcribing | VoiceState::Exchanging | VoiceState::Synthesizing => Ok(()),
        }
    }

    /// Abort the pipeline and start the conversation over
    ///
    /// Clears transcript and error, empties the history, and assigns a new
    /// session identity.
    pub fn reset(&mut self) {
        self.interrupt();
        self.session.reset();

        let mut guard = lock(&self.inner);
        guard.transcript = None;
        guard.last_error = None;
        guard.publish();
        tracing::info!("voice session reset");
    }

    /// Apply the Speaking → Idle transition once playback has ended
    ///
    /// Playback end is reported by the player; drive this from a periodic
    /// tick (or after the player's completion signal) to release the device.
    pub fn poll_playback(&mut self) {
        let mut guard = lock(&self.inner);
        if guard.state == VoiceState::Speaking && !guard.player.is_playing() {
            guard.player.stop();
            guard.enter(VoiceState::Idle);
        }
    }
}

/// Run the post-capture stages of one utterance
async fn run_pipeline(
    inner: &Mutex<Inner>,
    session: &ConversationSession,
    transcriber: &Transcriber,
    synthesizer: &SpeechSynthesizer,
    samples: Vec<f32>,
    max_chars: usize,
    generation: u64,
) {
    // The raw buffer lives only until transcription completes
    let wav = match samples_to_wav(&samples, SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            apply_if(inner, generation, VoiceState::Transcribing, |i| {
                i.fail(PipelineError::Transcription(e.to_string()));
            });
            return;
        }
    };
    drop(samples);

    let transcript = match transcriber.transcribe(wav).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            apply_if(inner, generation, VoiceState::Transcribing, |i| {
                i.fail(PipelineError::Transcription(e.to_string()));
            });
            return;
        }
    };

    if transcript.is_empty() {
        // Expected outcome: nothing reaches the gateway or the synthesizer
        apply_if(inner, generation, VoiceState::Transcribing, |i| {
            i.fail(PipelineError::NoSpeechDetected);
        });
        return;
    }

    if !apply_if(inner, generation, VoiceState::Transcribing, |i| {
        i.transcript = Some(transcript.clone());
        i.enter(VoiceState::Exchanging);
    }) {
        return;
    }

    let reply = match session.exchange(&transcript).await {
        Ok(reply) => reply,
        Err(e) => {
            apply_if(inner, generation, VoiceState::Exchanging, |i| {
                i.fail(PipelineError::Gateway(e.to_string()));
            });
            return;
        }
    };

    if !apply_if(inner, generation, VoiceState::Exchanging, |i| {
        i.enter(VoiceState::Synthesizing);
    }) {
        return;
    }

    let speech_text = sanitize_for_speech(&reply, max_chars);
    if speech_text.is_empty() {
        // Nothing to speak; skip the synthesis call entirely
        apply_if(inner, generation, VoiceState::Synthesizing, |i| {
            i.enter(VoiceState::Idle);
        });
        return;
    }

    let audio = match synthesizer.synthesize(&speech_text).await {
        Ok(audio) => audio,
        Err(e) => {
            apply_if(inner, generation, VoiceState::Synthesizing, |i| {
                i.fail(PipelineError::Synthesis(e.to_string()));
            });
            return;
        }
    };

    apply_if(inner, generation, VoiceState::Synthesizing, |i| {
        match i.player.play(&audio) {
            Ok(()) => i.enter(VoiceState::Speaking),
            Err(e) => i.fail(PipelineError::Playback(e.to_string())),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::config::{GatewayConfig, SynthesisConfig, TranscriptionConfig};

    struct FakeCapture {
        capturing: bool,
        fail_start: bool,
        report_stopped: bool,
        samples: Vec<f32>,
    }

    impl FakeCapture {
        fn new() -> Self {
            Self {
                capturing: false,
                fail_start: false,
                report_stopped: false,
                samples: vec![0.1; 1600],
            }
        }
    }

    impl AudioCapture for FakeCapture {
        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(Error::PermissionDenied("denied".to_string()));
            }
            self.capturing = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.capturing = false;
        }

        fn take_samples(&mut self) -> Vec<f32> {
            std::mem::take(&mut self.samples)
        }

        fn is_capturing(&self) -> bool {
            self.capturing && !self.report_stopped
        }
    }

    struct FakePlayer {
        playing: bool,
    }

    impl AudioPlayer for FakePlayer {
        fn play(&mut self, _audio: &[u8]) -> Result<()> {
            self.playing = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.playing = false;
        }

        fn is_playing(&self) -> bool {
            self.playing
        }
    }

    fn test_orchestrator(capture: FakeCapture) -> VoiceSessionOrchestrator {
        let transcription = TranscriptionConfig {
            api_key: "test-key".to_string(),
            ..TranscriptionConfig::default()
        };
        let synthesis = SynthesisConfig {
            api_key: "test-key".to_string(),
            voice_id: "test-voice".to_string(),
            ..SynthesisConfig::default()
        };
        VoiceSessionOrchestrator::new(
            Box::new(capture),
            Box::new(FakePlayer { playing: false }),
            Arc::new(ConversationSession::new(GatewayConfig::default())),
            Transcriber::new(transcription).unwrap(),
            SpeechSynthesizer::new(synthesis).unwrap(),
            5000,
        )
    }

    #[tokio::test]
    async fn start_transitions_to_listening() {
        let mut orch = test_orchestrator(FakeCapture::new());
        assert_eq!(orch.state(), VoiceState::Idle);

        orch.start().unwrap();
        assert_eq!(orch.state(), VoiceState::Listening);
    }

    #[tokio::test]
    async fn start_while_listening_is_rejected() {
        let mut orch = test_orchestrator(FakeCapture::new());
        orch.start().unwrap();

        // Second start neither errors nor restarts the pipeline
        orch.start().unwrap();
        assert_eq!(orch.state(), VoiceState::Listening);
    }

    #[tokio::test]
    async fn start_clears_previous_error() {
        let mut capture = FakeCapture::new();
        capture.fail_start = true;
        let mut orch = test_orchestrator(capture);

        assert!(orch.start().is_err());
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(matches!(
            orch.last_error(),
            Some(PipelineError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn permission_denied_terminates_to_idle() {
        let mut capture = FakeCapture::new();
        capture.fail_start = true;
        let mut orch = test_orchestrator(capture);

        let err = orch.start().expect_err("start must fail");
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(orch.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn stop_recovers_when_capture_is_lost() {
        let mut capture = FakeCapture::new();
        capture.report_stopped = true;
        let mut orch = test_orchestrator(capture);

        orch.start().unwrap();
        assert_eq!(orch.state(), VoiceState::Listening);

        // Device vanished between start and stop; the machine must not
        // stay stuck in Listening
        orch.stop();
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(orch.last_error().is_none());
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_noop() {
        let mut orch = test_orchestrator(FakeCapture::new());
        orch.stop();
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(orch.last_error().is_none());
    }

    #[tokio::test]
    async fn interrupt_while_idle_is_a_noop() {
        let mut orch = test_orchestrator(FakeCapture::new());
        orch.interrupt();
        assert_eq!(orch.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn interrupt_stops_speaking() {
        let mut orch = test_orchestrator(FakeCapture::new());
        {
            let mut guard = lock(&orch.inner);
            guard.player.play(&[0u8; 4]).unwrap();
            guard.enter(VoiceState::Speaking);
        }

        orch.interrupt();
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(!lock(&orch.inner).player.is_playing());
    }

    #[tokio::test]
    async fn toggle_maps_states() {
        let mut orch = test_orchestrator(FakeCapture::new());

        orch.toggle().unwrap();
        assert_eq!(orch.state(), VoiceState::Listening);

        // Busy stages ignore the toggle
        {
            let mut guard = lock(&orch.inner);
            guard.enter(VoiceState::Exchanging);
        }
        orch.toggle().unwrap();
        assert_eq!(orch.state(), VoiceState::Exchanging);

        {
            let mut guard = lock(&orch.inner);
            guard.player.play(&[0u8; 4]).unwrap();
            guard.enter(VoiceState::Speaking);
        }
        orch.toggle().unwrap();
        assert_eq!(orch.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn poll_playback_returns_to_idle() {
        let mut orch = test_orchestrator(FakeCapture::new());
        {
            let mut guard = lock(&orch.inner);
            guard.player.play(&[0u8; 4]).unwrap();
            guard.enter(VoiceState::Speaking);
        }

        // Still playing: no transition
        orch.poll_playback();
        assert_eq!(orch.state(), VoiceState::Speaking);

        lock(&orch.inner).player.stop();
        orch.poll_playback();
        assert_eq!(orch.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn stale_completion_is_ignored() {
        let orch = test_orchestrator(FakeCapture::new());
        let generation = lock(&orch.inner).generation;

        {
            let mut guard = lock(&orch.inner);
            guard.enter(VoiceState::Transcribing);
            // User resets while the call is in flight
            guard.generation += 1;
            guard.enter(VoiceState::Idle);
        }

        let applied = apply_if(&orch.inner, generation, VoiceState::Transcribing, |i| {
            i.enter(VoiceState::Exchanging);
        });
        assert!(!applied);
        assert_eq!(orch.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn reset_clears_session_and_state() {
        let mut orch = test_orchestrator(FakeCapture::new());
        let before = orch.session().session_id();

        orch.start().unwrap();
        orch.reset();

        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(orch.transcript().is_none());
        assert!(orch.last_error().is_none());
        assert!(orch.session().messages().is_empty());
        assert_ne!(orch.session().session_id(), before);
    }

    #[tokio::test]
    async fn subscribe_observes_transitions() {
        let mut orch = test_orchestrator(FakeCapture::new());
        let rx = orch.subscribe();
        assert_eq!(rx.borrow().state, VoiceState::Idle);

        orch.start().unwrap();
        assert_eq!(rx.borrow().state, VoiceState::Listening);
    }
}
