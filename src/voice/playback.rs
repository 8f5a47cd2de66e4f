//! Speaker playback via cpal
//!
//! Playback runs on a dedicated thread because cpal streams are not `Send`;
//! the handle held by the orchestrator is. The handle owns at most one live
//! playback and releases it on every exit path.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::AudioPlayer;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

struct PlaybackHandle {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    fn release(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Plays synthesized audio to the default output device
pub struct SpeakerPlayer {
    current: Option<PlaybackHandle>,
}

impl SpeakerPlayer {
    /// Create an idle player; the device is acquired per playback
    #[must_use]
    pub fn new() -> Self {
        Self { current: None }
    }
}

impl Default for SpeakerPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerPlayer {
    /// Play raw f32 samples at the playback sample rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] when the output device cannot be opened
    pub fn play_samples(&mut self, samples: Vec<f32>) -> Result<()> {
        // Release any prior playback before starting a new one
        self.stop();

        if samples.is_empty() {
            return Err(Error::Playback("audio is empty".to_string()));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let (setup_tx, setup_rx) = mpsc::channel::<Result<()>>();

        let thread_cancel = Arc::clone(&cancel);
        let thread_done = Arc::clone(&done);
        let thread = std::thread::spawn(move || {
            playback_thread(samples, &thread_cancel, &thread_done, &setup_tx);
        });

        // Wait for the thread to report device setup
        match setup_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.current = Some(PlaybackHandle {
                    cancel,
                    done,
                    thread: Some(thread),
                });
                tracing::debug!("playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                let _ = thread.join();
                Err(Error::Playback("playback device setup timed out".to_string()))
            }
        }
    }
}

impl AudioPlayer for SpeakerPlayer {
    fn play(&mut self, audio: &[u8]) -> Result<()> {
        let samples = decode_mp3(audio)?;
        if samples.is_empty() {
            return Err(Error::Playback("decoded audio is empty".to_string()));
        }
        self.play_samples(samples)
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.current.take() {
            handle.release();
            tracing::debug!("playback stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|h| !h.done.load(Ordering::SeqCst))
    }
}

impl Drop for SpeakerPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the cpal output stream for one playback
fn playback_thread(
    samples: Vec<f32>,
    cancel: &AtomicBool,
    done: &Arc<AtomicBool>,
    setup_tx: &mpsc::Sender<Result<()>>,
) {
    let result = open_output_stream(samples, done);
    let stream = match result {
        Ok((stream, duration)) => {
            let _ = setup_tx.send(Ok(()));
            let deadline = std::time::Instant::now() + duration + Duration::from_millis(500);
            while !done.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
                if std::time::Instant::now() > deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            stream
        }
        Err(e) => {
            done.store(true, Ordering::SeqCst);
            let _ = setup_tx.send(Err(e));
            return;
        }
    };

    drop(stream);
    done.store(true, Ordering::SeqCst);
    tracing::debug!("playback complete");
}

type OpenedStream = (cpal::Stream, Duration);

fn open_output_stream(samples: Vec<f32>, done: &Arc<AtomicBool>) -> Result<OpenedStream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = config.channels as usize;

    let sample_count = samples.len();
    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);

    let source = Arc::new(Mutex::new((samples, 0usize)));
    let stream_done = Arc::clone(done);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut guard) = source.lock() else {
                    return;
                };
                let (samples, pos) = &mut *guard;

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        let s = samples[*pos];
                        *pos += 1;
                        s
                    } else {
                        stream_done.store(true, Ordering::SeqCst);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "playback stream error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    tracing::debug!(samples = sample_count, duration_ms, "playback stream open");
    Ok((stream, Duration::from_millis(duration_ms)))
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Stereo is averaged down to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        // Not an MP3 stream at all
        let result = decode_mp3(&[0x00, 0x01, 0x02, 0x03]);
        // minimp3 either skips to EOF (empty) or errors; both are handled by play()
        if let Ok(samples) = result {
            assert!(samples.is_empty());
        }
    }
}
