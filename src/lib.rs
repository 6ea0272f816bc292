//! Real-time speech recognition engine core.
//!
//! A one-way dataflow pipeline with a small control plane: raw S16LE mono
//! PCM enters a capture ring, a calibrated voice-activity gate passes only
//! detected speech into an utterance buffer, and the current member of a
//! decoder set turns each utterance into ranked candidate word sequences
//! that are dispatched upstream.
//!
//! The decoder library itself is consumed through the narrow
//! [`decoder::DecoderEngine`] trait; hosts inject a [`decoder::DecoderFactory`]
//! and an [`dispatch::UtteranceSink`] when constructing the
//! [`engine::SpeechEngine`].

pub mod audio;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod postprocessor;
pub mod vad;

#[cfg(test)]
mod testutil;

pub use config::{DecoderSpec, EngineConfig};
pub use dispatch::{ConsumeAllSink, FnSink, UtteranceSink};
pub use engine::{SpeechEngine, StreamAttrs};
pub use error::EngineError;
pub use postprocessor::{Candidate, Utterance, Word};
