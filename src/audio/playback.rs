//! # Playback Scheduler
//!
//! Plays received audio segments strictly in arrival order, one at a time.
//!
//! ## How it works:
//! - `enqueue` pushes the segment onto an unbounded FIFO channel and returns at once
//! - A single player task owns the receiving end: it takes one segment, decodes it,
//!   plays it to completion, then takes the next
//! - When the channel is empty the player simply waits in `recv()`, which is the idle
//!   state; the next `enqueue` wakes it up again
//! - A segment that fails to decode (or to play) is logged and dropped, and the
//!   player moves on to the next one
//!
//! Because there is exactly one consumer and it awaits each playback before
//! receiving again, two segments can never overlap.

use crate::audio::codec::{self, AudioChunk, AudioEncoding, DecodedAudio};
use crate::error::{CodecError, PlaybackError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Turns segment bytes into playable samples.
#[async_trait]
pub trait AudioDecoder: Send + Sync + 'static {
    async fn decode(&self, segment: &AudioChunk) -> Result<DecodedAudio, CodecError>;
}

/// Plays decoded audio; returns once playback of this segment has finished.
#[async_trait]
pub trait AudioOutput: Send + Sync + 'static {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError>;
}

/// Decodes WAV segments, and headerless PCM16 at a fixed format.
pub struct WavDecoder {
    pub pcm_sample_rate: u32,
    pub pcm_channels: u16,
}

impl Default for WavDecoder {
    fn default() -> Self {
        Self {
            pcm_sample_rate: 24000,
            pcm_channels: 1,
        }
    }
}

#[async_trait]
impl AudioDecoder for WavDecoder {
    async fn decode(&self, segment: &AudioChunk) -> Result<DecodedAudio, CodecError> {
        match segment.encoding {
            AudioEncoding::Wav => codec::decode_wav(&segment.payload),
            AudioEncoding::Pcm16 => Ok(DecodedAudio {
                sample_rate: self.pcm_sample_rate,
                channels: self.pcm_channels,
                samples: codec::pcm16_from_bytes(&segment.payload)?,
            }),
        }
    }
}

#[derive(Debug, Default)]
struct PlaybackCounters {
    played: AtomicU64,
    dropped: AtomicU64,
}

/// Totals reported by [`PlaybackScheduler::shutdown`] and [`PlaybackScheduler::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    pub dropped: u64,
}

pub struct PlaybackScheduler {
    queue: mpsc::UnboundedSender<AudioChunk>,
    pending: Arc<watch::Sender<usize>>,
    pending_rx: watch::Receiver<usize>,
    counters: Arc<PlaybackCounters>,
    next_position: u64,
    player: JoinHandle<()>,
}

impl PlaybackScheduler {
    /// Start the player task. Must be called inside a tokio runtime.
    pub fn spawn<D: AudioDecoder, O: AudioOutput>(decoder: D, output: O) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (pending, pending_rx) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let counters = Arc::new(PlaybackCounters::default());

        let player = tokio::spawn(run_player(
            rx,
            decoder,
            output,
            pending.clone(),
            counters.clone(),
        ));

        Self {
            queue,
            pending,
            pending_rx,
            counters,
            next_position: 0,
            player,
        }
    }

    /// Append a received segment to the queue. Never blocks.
    pub fn enqueue(&mut self, payload: Vec<u8>, encoding: AudioEncoding) {
        let segment = AudioChunk {
            position: self.next_position,
            payload,
            encoding,
        };
        self.next_position += 1;

        self.pending.send_modify(|pending| *pending += 1);
        if self.queue.send(segment).is_err() {
            warn!("Playback task has stopped, segment discarded");
            self.pending.send_modify(|pending| *pending = pending.saturating_sub(1));
        }
    }

    /// Segments waiting or currently playing.
    pub fn pending(&self) -> usize {
        *self.pending_rx.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Wait until every queued segment has been played or dropped.
    pub async fn wait_idle(&mut self) {
        // Only fails if the sender is gone, and the scheduler holds it
        let _ = self.pending_rx.wait_for(|pending| *pending == 0).await;
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            played: self.counters.played.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
        }
    }

    /// Finish everything already queued, then stop the player.
    pub async fn shutdown(self) -> PlaybackStats {
        let counters = self.counters.clone();
        drop(self.queue);
        if let Err(err) = self.player.await {
            warn!(error = %err, "Playback task ended abnormally");
        }
        PlaybackStats {
            played: counters.played.load(Ordering::SeqCst),
            dropped: counters.dropped.load(Ordering::SeqCst),
        }
    }
}

async fn run_player<D: AudioDecoder, O: AudioOutput>(
    mut rx: mpsc::UnboundedReceiver<AudioChunk>,
    decoder: D,
    output: O,
    pending: Arc<watch::Sender<usize>>,
    counters: Arc<PlaybackCounters>,
) {
    while let Some(segment) = rx.recv().await {
        let position = segment.position;

        let result = match decoder.decode(&segment).await {
            Ok(audio) => output.play(audio).await,
            Err(err) => Err(PlaybackError::Decode(err)),
        };

        match result {
            Ok(()) => {
                debug!(position, "Segment played");
                counters.played.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(position, error = %err, "Dropping audio segment");
                counters.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }

        pending.send_modify(|pending| *pending = pending.saturating_sub(1));
    }

    debug!("Playback queue closed");
}

/// Output that "plays" in real time by waiting for the segment's duration and
/// records the samples, so they can be written to a WAV file afterwards.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    recorded: Arc<Mutex<Recorded>>,
}

#[derive(Default)]
struct Recorded {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.recorded.lock().map(|r| r.samples.len()).unwrap_or(0)
    }

    /// Write everything played so far as one WAV file.
    pub fn write_wav(&self, path: &Path) -> anyhow::Result<()> {
        let recorded = self
            .recorded
            .lock()
            .map_err(|_| anyhow::anyhow!("recording lock poisoned"))?;
        let sample_rate = if recorded.sample_rate == 0 { 24000 } else { recorded.sample_rate };
        let channels = recorded.channels.max(1);
        let bytes = codec::encode_wav(&recorded.samples, sample_rate, channels)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError> {
        let duration = audio.duration();
        {
            let mut recorded = self
                .recorded
                .lock()
                .map_err(|_| PlaybackError::Output("recording lock poisoned".to_string()))?;
            if recorded.sample_rate == 0 {
                recorded.sample_rate = audio.sample_rate;
                recorded.channels = audio.channels;
            } else if recorded.sample_rate != audio.sample_rate || recorded.channels != audio.channels {
                return Err(PlaybackError::Output(format!(
                    "segment is {} Hz / {} channels, recording is {} Hz / {} channels",
                    audio.sample_rate, audio.channels, recorded.sample_rate, recorded.channels
                )));
            }
            recorded.samples.extend_from_slice(&audio.samples);
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
