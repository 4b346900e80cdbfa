//! # Audio Framing Codec
//!
//! Converts captured audio into something that can travel inside a JSON text frame
//! and back again.
//!
//! ## Layers:
//! 1. **Container**: Each chunk is a complete little WAV file (16-bit PCM), so every
//!    chunk can be decoded on its own without any state from earlier chunks.
//! 2. **Transport encoding**: The WAV bytes are base64 encoded (standard alphabet,
//!    padded) and placed in an `audio_in` envelope.
//!
//! No sequence number is added anywhere: chunk order is the order of the frames on
//! the connection.

use crate::error::CodecError;
use crate::relay::envelope::Envelope;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::time::Duration;

/// How the bytes of an [`AudioChunk`] are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Self-contained WAV file
    Wav,
    /// Headerless 16-bit little-endian PCM
    Pcm16,
}

/// One captured or received unit of audio.
///
/// `position` is local bookkeeping only (arrival order); it is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub position: u64,
    pub payload: Vec<u8>,
    pub encoding: AudioEncoding,
}

impl AudioChunk {
    /// Wrap the chunk for transmission.
    pub fn to_envelope(&self) -> Envelope {
        Envelope::AudioIn(encode_payload(&self.payload))
    }
}

/// Decoded, playable audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 16-bit samples
    pub samples: Vec<i16>,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }
}

/// Base64 encode bytes for a text envelope.
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode the base64 payload of an `audio_in` envelope.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(payload.trim())?)
}

/// Write interleaved 16-bit samples as a complete WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CodecError> {
    if channels == 0 || sample_rate == 0 {
        return Err(CodecError::Unsupported(format!(
            "{} Hz / {} channels",
            sample_rate, channels
        )));
    }

    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, channels, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Parse a WAV file into 16-bit samples, converting other PCM depths.
///
/// Rejects headers without a rate or channel count, and data chunks that do not
/// hold a whole number of sample frames.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor)?;

    if header.channel_count == 0 || header.sampling_rate == 0 {
        return Err(CodecError::Unsupported(format!(
            "{} Hz / {} channels",
            header.sampling_rate, header.channel_count
        )));
    }

    let frame_bytes = (header.bits_per_sample as usize).div_ceil(8) * header.channel_count as usize;
    if let Some(len) = data_chunk_len(bytes) {
        if frame_bytes > 0 && len % frame_bytes != 0 {
            return Err(CodecError::Unsupported(format!(
                "data chunk of {} bytes is not a whole number of {}-byte frames",
                len, frame_bytes
            )));
        }
    }

    let samples: Vec<i16> = match data {
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| ((s as i16) - 128) << 8)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        wav::BitDepth::Empty => {
            return Err(CodecError::Unsupported("empty wav data".to_string()));
        }
    };

    if samples.len() % header.channel_count as usize != 0 {
        return Err(CodecError::Unsupported(format!(
            "{} samples do not split into {} channels",
            samples.len(),
            header.channel_count
        )));
    }

    Ok(DecodedAudio {
        sample_rate: header.sampling_rate,
        channels: header.channel_count,
        samples,
    })
}

/// Declared size of the `data` chunk of a RIFF/WAVE file.
fn data_chunk_len(bytes: &[u8]) -> Option<usize> {
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(12);

    loop {
        let mut id = [0u8; 4];
        cursor.read_exact(&mut id).ok()?;
        let size = cursor.read_u32::<LittleEndian>().ok()? as u64;
        if &id == b"data" {
            return Some(size as usize);
        }
        // Chunks are padded to even length
        cursor.set_position(cursor.position() + size + (size & 1));
    }
}

/// Interpret headerless little-endian 16-bit PCM.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::Unsupported(
            "PCM16 data length must be even".to_string(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

#[cfg(test)]
pub(crate) mod test_support {
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Hand-built RIFF/WAVE bytes, so headers `encode_wav` refuses can be written.
    pub fn raw_wav(channels: u16, sample_rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.write_u32::<LittleEndian>(4 + 24 + 8 + data.len() as u32).unwrap();
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.write_u32::<LittleEndian>(16).unwrap();
        bytes.write_u16::<LittleEndian>(1).unwrap();
        bytes.write_u16::<LittleEndian>(channels).unwrap();
        bytes.write_u32::<LittleEndian>(sample_rate).unwrap();
        bytes.write_u32::<LittleEndian>(sample_rate * block_align as u32).unwrap();
        bytes.write_u16::<LittleEndian>(block_align).unwrap();
        bytes.write_u16::<LittleEndian>(bits).unwrap();
        bytes.extend_from_slice(b"data");
        bytes.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        bytes.extend_from_slice(data);
        if data.len() % 2 == 1 {
            bytes.push(0);
        }
        bytes
    }
}
