//! # Audio Module
//!
//! Client-side audio handling used by the `relay-client` binary and by the relay when
//! `audio_in` payloads are validated.
//!
//! ## Components:
//! - **codec**: base64 payloads, WAV containers and raw 16-bit PCM
//! - **capture**: cuts a sample stream into fixed-duration `audio_in` chunks
//! - **playback**: plays received chunks one at a time, in arrival order
//!
//! ## Audio Format:
//! - **Bit Depth**: 16-bit signed PCM, little-endian
//! - **Sample Rate / Channels**: taken from `[audio]` config (16 kHz mono by default)

pub mod capture;
pub mod codec;
pub mod playback;
