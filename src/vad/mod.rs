pub mod energy;

pub use energy::{EnergyVad, EnergyVadConfig};

/// Pull-style provider of aligned S16LE samples. Implemented by the capture
/// ring; the VAD drains it instead of being handed buffers.
pub trait SampleSource {
    /// Number of whole samples currently available.
    fn available(&self) -> usize;

    /// Drain up to `dst.len()` samples into `dst`, returning the count.
    fn pull_samples(&mut self, dst: &mut [i16]) -> usize;
}

/// Outcome of a calibration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    /// Thresholds established; steady-state filtering may begin.
    Done,
    /// Not enough ambient audio buffered yet.
    NeedMoreData,
    /// The window was unusable (too loud or unstable); retry with fresh audio.
    Failed,
}

/// Voice-activity gate with one-time ambient calibration.
///
/// `read` consumes audio from the source in whole frames, advances the read
/// timestamp for every frame consumed, and yields only the samples judged to
/// be speech.
pub trait VadEngine: Send {
    /// Samples of ambient audio needed for one calibration attempt.
    fn required_samples(&self) -> usize;

    /// Attempt calibration against buffered ambient audio.
    fn calibrate(&mut self, source: &mut dyn SampleSource) -> Calibration;

    /// Drain detected-speech samples into `dst`. Returns the number written;
    /// zero means no speech was found in the currently buffered audio.
    fn read(&mut self, source: &mut dyn SampleSource, dst: &mut [i16]) -> usize;

    /// Samples consumed since calibration. Non-decreasing.
    fn read_timestamp(&self) -> u64;

    /// Drop transient speech state (gate, debounce) after an utterance ends.
    /// Calibration and the read timestamp are retained.
    fn reset(&mut self);
}
