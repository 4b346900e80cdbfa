//! # Chunked Capture
//!
//! Cuts a stream of 16-bit samples into fixed-duration chunks (500 ms by default),
//! encodes each one independently and hands it to the transmit queue.
//!
//! Handing off is a non-blocking channel send: encoding chunk N+1 never waits for
//! chunk N to be written to the socket. Order is still preserved because chunks are
//! produced and queued one after another on a single task.

use crate::audio::codec::{self, AudioChunk, AudioEncoding};
use crate::config::AudioConfig;
use crate::error::CodecError;
use crate::relay::envelope::Envelope;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct AudioCapture {
    chunk_duration: Duration,
    sample_rate: u32,
    channels: u16,
    next_position: u64,
}

impl AudioCapture {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            chunk_duration: Duration::from_millis(config.chunk_duration_ms as u64),
            sample_rate: config.sample_rate,
            channels: config.channels,
            next_position: 0,
        }
    }

    /// Interleaved samples in one chunk (always at least one frame).
    pub fn samples_per_chunk(&self) -> usize {
        let frames = (self.sample_rate as u128 * self.chunk_duration.as_millis()) / 1000;
        (frames as usize).max(1) * self.channels.max(1) as usize
    }

    /// Encode one slice of samples as the next chunk.
    pub fn encode_chunk(&mut self, samples: &[i16]) -> Result<AudioChunk, CodecError> {
        let payload = codec::encode_wav(samples, self.sample_rate, self.channels)?;
        let chunk = AudioChunk {
            position: self.next_position,
            payload,
            encoding: AudioEncoding::Wav,
        };
        self.next_position += 1;
        Ok(chunk)
    }

    /// Split a whole recording into encoded chunks. The last chunk may be shorter.
    pub fn split(&mut self, samples: &[i16]) -> Result<Vec<AudioChunk>, CodecError> {
        let size = self.samples_per_chunk();
        samples
            .chunks(size)
            .map(|slice| self.encode_chunk(slice))
            .collect()
    }

    /// Feed a recording into `outbound` as `audio_in` envelopes.
    ///
    /// With `realtime` set, chunks are released at the pace a microphone would
    /// produce them. Stops early when the receiving side has gone away. Returns the
    /// number of chunks queued.
    pub async fn stream(
        mut self,
        samples: Vec<i16>,
        outbound: mpsc::UnboundedSender<Envelope>,
        realtime: bool,
    ) -> Result<usize, CodecError> {
        let size = self.samples_per_chunk();
        let mut queued = 0;

        for slice in samples.chunks(size) {
            let chunk = self.encode_chunk(slice)?;
            debug!(position = chunk.position, bytes = chunk.payload.len(), "Captured audio chunk");

            if outbound.send(chunk.to_envelope()).is_err() {
                warn!("Transmit queue closed, stopping capture");
                break;
            }
            queued += 1;

            if realtime {
                tokio::time::sleep(self.chunk_duration).await;
            }
        }

        Ok(queued)
    }
}
