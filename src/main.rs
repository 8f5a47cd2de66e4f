use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use chatterbox::voice::stt::Transcriber;
use chatterbox::voice::tts::SpeechSynthesizer;
use chatterbox::voice::{AudioCapture, AudioPlayer, MicCapture, SpeakerPlayer};
use chatterbox::{
    Config, ControlChannel, ConversationSession, VoiceSessionOrchestrator, VoiceState,
};

/// Chatterbox - voice conversation client for AI assistant gateways
#[derive(Parser)]
#[command(name = "chatterbox", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to the user config location)
    #[arg(short, long, env = "CHATTERBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway auth token (overrides the config file)
    #[arg(long, env = "CHATTERBOX_TOKEN")]
    token: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,chatterbox=info",
        1 => "info,chatterbox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(token) = cli.token {
        config.gateway.token.clone_from(&token);
        config.control.token = token;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    run_interactive(config).await
}

/// Push-to-talk loop on stdin
///
/// An empty line toggles the pipeline (start listening / finish the
/// utterance / interrupt speech), `reset` starts the conversation over,
/// `quit` or Ctrl-C exits.
#[allow(clippy::future_not_send)]
async fn run_interactive(config: Config) -> anyhow::Result<()> {
    let session = Arc::new(ConversationSession::new(config.gateway.clone()));
    let transcriber = Transcriber::new(config.transcription.clone())?;
    let synthesizer = SpeechSynthesizer::new(config.synthesis.clone())?;

    let mut orchestrator = VoiceSessionOrchestrator::new(
        Box::new(MicCapture::new()),
        Box::new(SpeakerPlayer::new()),
        Arc::clone(&session),
        transcriber,
        synthesizer,
        config.synthesis.max_chars,
    );

    let control = ControlChannel::new(config.control.clone());
    if config.control.token.is_empty() {
        tracing::info!("no control token configured, control channel disabled");
    } else {
        control.connect();
    }

    println!("chatterbox ready");
    println!("  [enter]  start / stop listening (interrupts speech)");
    println!("  reset    start the conversation over");
    println!("  quit     exit");

    let mut snapshots = orchestrator.subscribe();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {
                        if let Err(e) = orchestrator.toggle() {
                            eprintln!("error: {e}");
                        }
                    }
                    "reset" => {
                        orchestrator.reset();
                        println!("conversation reset");
                    }
                    "quit" | "exit" => break,
                    other => println!("unrecognized input: {other:?}"),
                }
            }
            _ = tick.tick() => {
                orchestrator.poll_playback();
            }
            result = snapshots.changed() => {
                if result.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    report(&snapshot, &session);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    orchestrator.interrupt();
    control.disconnect();
    println!("bye");
    Ok(())
}

/// Print a state change for the terminal user
fn report(snapshot: &chatterbox::Snapshot, session: &ConversationSession) {
    match snapshot.state {
        VoiceState::Listening => println!("listening... press enter to finish"),
        VoiceState::Transcribing => println!("transcribing..."),
        VoiceState::Exchanging => {
            if let Some(transcript) = &snapshot.transcript {
                println!("you: {transcript}");
            }
        }
        VoiceState::Synthesizing => {
            if let Some(reply) = session
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == chatterbox::Role::Assistant)
            {
                println!("assistant: {}", reply.content);
            }
        }
        VoiceState::Speaking => println!("speaking (press enter to interrupt)"),
        VoiceState::Idle => {
            if let Some(error) = &snapshot.last_error {
                println!("({error})");
            }
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicCapture::new();
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_samples();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000.0_f32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate * 2.0) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let mut player = SpeakerPlayer::new();
    player.play_samples(samples)?;
    while player.is_playing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    player.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    Ok(())
}

/// Test TTS output against the configured synthesis endpoint
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = SpeechSynthesizer::new(config.synthesis.clone())?;

    println!("Synthesizing speech...");
    let mp3_data = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let mut player = SpeakerPlayer::new();
    player.play(&mp3_data)?;
    while player.is_playing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    player.stop();

    println!("\n---");
    println!("If you heard the speech, TTS is working!");
    Ok(())
}
