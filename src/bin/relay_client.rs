//! Command-line client for the relay.
//!
//! ```text
//! relay-client <ws-url> <token> <input.wav> [--output reply.wav]   # audio session
//! relay-client <ws-url> <token> --chat                             # chat session, queries from stdin
//! ```
//!
//! In audio mode the input file is cut into fixed-duration chunks and streamed in real
//! time as `audio_in` envelopes. Binary frames coming back are played through the
//! playback scheduler and recorded into `--output`. Transcripts, chat replies and
//! errors are printed as they arrive.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay_backend::audio::capture::AudioCapture;
use voice_relay_backend::audio::codec::{self, AudioEncoding};
use voice_relay_backend::audio::playback::{PlaybackScheduler, RecordingOutput, WavDecoder};
use voice_relay_backend::config::AppConfig;
use voice_relay_backend::relay::envelope::Envelope;
use voice_relay_backend::relay::frame::{CloseFrame, Frame, FrameSink};
use voice_relay_backend::relay::upstream::{open_socket, relay_url, UpstreamEvent};

/// How long to keep listening after the last outbound frame when nothing arrives.
const REPLY_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "relay-client", version, about = "Stream audio or chat queries through the voice relay")]
struct Args {
    /// Relay websocket URL, e.g. ws://localhost:8080/ws
    url: String,

    /// Identity token sent as the `token` query parameter
    token: String,

    /// WAV file to stream in audio mode
    #[arg(required_unless_present = "chat", conflicts_with = "chat")]
    input: Option<PathBuf>,

    /// Where to write the reply audio
    #[arg(long, default_value = "reply.wav")]
    output: PathBuf,

    /// Chat session, one query per stdin line
    #[arg(long)]
    chat: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_client=info,voice_relay_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let (outbound_tx, outbound) = mpsc::unbounded_channel::<Frame>();

    let recording = match &args.input {
        Some(input) => {
            let bytes = std::fs::read(input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let audio = codec::decode_wav(&bytes)?;

            let mut audio_config = AppConfig::load()?.audio;
            audio_config.sample_rate = audio.sample_rate;
            audio_config.channels = audio.channels;
            start_audio_capture(AudioCapture::new(&audio_config), audio.samples, outbound_tx);

            Some(RecordingOutput::new())
        }
        None => {
            start_stdin_queries(outbound_tx);
            None
        }
    };

    let mut player = recording
        .clone()
        .map(|output| PlaybackScheduler::spawn(WavDecoder::default(), output));

    info!(url = %args.url, "Connecting to relay");
    let url = relay_url(&args.url, &args.token)?;
    let (mut relay, reader) = open_socket(url.to_string()).await?;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    reader.spawn(move |event| {
        let _ = events_tx.send(event);
    });

    relay_loop(&mut relay, outbound, &mut events, player.as_mut()).await?;
    relay.close(CloseFrame::client_disconnected());

    if let (Some(mut player), Some(recording)) = (player, recording) {
        let output = &args.output;
        player.wait_idle().await;
        let stats = player.shutdown().await;
        recording.write_wav(output)?;
        info!(
            played = stats.played,
            dropped = stats.dropped,
            samples = recording.sample_count(),
            path = %output.display(),
            "Saved reply audio"
        );
    }

    Ok(())
}

fn start_audio_capture(capture: AudioCapture, samples: Vec<i16>, outbound: mpsc::UnboundedSender<Frame>) {
    let (envelopes_tx, mut envelopes) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        match capture.stream(samples, envelopes_tx, true).await {
            Ok(chunks) => info!(chunks, "Finished streaming audio"),
            Err(err) => warn!(error = %err, "Audio capture failed"),
        }
    });

    tokio::spawn(async move {
        while let Some(envelope) = envelopes.recv().await {
            match envelope.into_frame() {
                Ok(frame) => {
                    if outbound.send(frame).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "Failed to encode audio envelope"),
            }
        }
    });
}

fn start_stdin_queries(outbound: mpsc::UnboundedSender<Frame>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if outbound.send(Frame::Text(line)).is_err() {
                break;
            }
        }
    });
}

async fn relay_loop(
    relay: &mut impl FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: &mut mpsc::UnboundedReceiver<UpstreamEvent>,
    mut player: Option<&mut PlaybackScheduler>,
) -> Result<()> {
    let mut sending = true;

    loop {
        tokio::select! {
            frame = outbound.recv(), if sending => match frame {
                Some(frame) => relay.send(frame)?,
                None => sending = false,
            },
            event = events.recv() => match event {
                Some(UpstreamEvent::Frame(Frame::Text(text))) => print_reply(&text),
                Some(UpstreamEvent::Frame(Frame::Binary(data))) => {
                    let encoding = if data.starts_with(b"RIFF") {
                        AudioEncoding::Wav
                    } else {
                        AudioEncoding::Pcm16
                    };
                    match player.as_deref_mut() {
                        Some(player) => player.enqueue(data, encoding),
                        None => debug!(bytes = data.len(), "Ignoring audio in chat mode"),
                    }
                }
                Some(UpstreamEvent::Closed) | None => {
                    info!("Relay closed the connection");
                    return Ok(());
                }
                Some(UpstreamEvent::Failed(err)) => return Err(err.into()),
            },
            _ = tokio::time::sleep(REPLY_IDLE_TIMEOUT), if !sending => {
                info!("No more replies, disconnecting");
                return Ok(());
            }
        }
    }
}

fn print_reply(text: &str) {
    match Envelope::parse(text) {
        Some(Envelope::Transcript(transcript)) => println!("[transcript] {}", transcript),
        Some(Envelope::GptResponse(answer)) => println!("[assistant] {}", answer),
        Some(Envelope::PartnerSearchResults(partners)) => {
            if partners.is_empty() {
                println!("[partners] no matching partners");
            }
            for partner in partners {
                println!("[partners] {} ({})", partner.name, partner.expertise);
            }
        }
        Some(Envelope::Error(message)) => eprintln!("[error] {}", message),
        Some(Envelope::AudioIn(_)) => debug!("Ignoring echoed audio_in envelope"),
        None => debug!(text, "Upstream event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_args_default_output() {
        let args = Args::try_parse_from(["relay-client", "ws://h/ws", "tok", "in.wav"]).unwrap();
        assert_eq!(args.input, Some(PathBuf::from("in.wav")));
        assert_eq!(args.output, PathBuf::from("reply.wav"));
        assert!(!args.chat);
    }

    #[test]
    fn test_chat_args() {
        let args = Args::try_parse_from(["relay-client", "ws://h/ws/chat", "tok", "--chat"]).unwrap();
        assert!(args.chat);
        assert!(args.input.is_none());
    }

    #[test]
    fn test_input_or_chat_required() {
        assert!(Args::try_parse_from(["relay-client", "ws://h/ws", "tok"]).is_err());
        assert!(Args::try_parse_from(["relay-client", "ws://h/ws", "tok", "in.wav", "--chat"]).is_err());
    }
}
