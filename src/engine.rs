use tracing::{debug, error, info, trace, warn};

use crate::audio::{CaptureBuffer, UtteranceBuffer};
use crate::config::{DecoderSpec, EngineConfig};
use crate::decoder::{DecoderFactory, DecoderSet};
use crate::dispatch::UtteranceSink;
use crate::error::EngineError;
use crate::postprocessor;
use crate::vad::{Calibration, EnergyVad, EnergyVadConfig, VadEngine};

/// Source buffer attributes, all in bytes. `None` picks a computed default,
/// mirroring how a session audio server treats unset buffer attributes.
#[derive(Debug, Clone, Default)]
pub struct StreamAttrs {
    /// Hard capacity of the utterance buffer.
    pub max_length: Option<usize>,
    /// Target buffered length of the source stream.
    pub target_length: Option<usize>,
    /// Minimum request size of the source stream.
    pub min_request: Option<usize>,
    /// Speech window backing the high-water mark.
    pub window: Option<usize>,
}

/// The speech pipeline: capture ring, calibrated voice-activity gate,
/// utterance accumulation, decoding and hypothesis dispatch, plus the small
/// control plane the host drives.
///
/// Single-threaded by design; the host owns the engine and feeds it from its
/// event loop via [`SpeechEngine::push_audio`].
pub struct SpeechEngine {
    capture: CaptureBuffer,
    vad: Box<dyn VadEngine>,
    utterance: UtteranceBuffer,
    decoders: DecoderSet,
    sink: Box<dyn UtteranceSink>,
    config: EngineConfig,
    /// VAD frame length in samples.
    frame_len: usize,
    active: bool,
    corked: bool,
    connected: bool,
    calib_attempts: u32,
    calib_retry_limit: Option<u32>,
    cork_hook: Option<Box<dyn FnMut(bool) + Send>>,
}

impl SpeechEngine {
    /// Create an engine with the default energy-based voice-activity gate.
    pub fn new(
        config: EngineConfig,
        factory: &dyn DecoderFactory,
        sink: Box<dyn UtteranceSink>,
    ) -> Result<Self, EngineError> {
        Self::build(config, factory, sink, None)
    }

    /// Create an engine with a caller-supplied voice-activity gate.
    pub fn with_vad(
        config: EngineConfig,
        factory: &dyn DecoderFactory,
        sink: Box<dyn UtteranceSink>,
        vad: Box<dyn VadEngine>,
    ) -> Result<Self, EngineError> {
        Self::build(config, factory, sink, Some(vad))
    }

    fn build(
        config: EngineConfig,
        factory: &dyn DecoderFactory,
        sink: Box<dyn UtteranceSink>,
        vad: Option<Box<dyn VadEngine>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        config.log_summary();

        let decoders = DecoderSet::new(factory, &config)?;

        let fps = decoders.current().engine().frame_rate();
        if fps == 0 {
            return Err(EngineError::InvalidConfig(
                "decoder reports a zero frame rate".to_string(),
            ));
        }
        // Rounded to nearest: the rate is rarely an exact multiple of fps.
        let frame_len = (config.sample_rate as f64 / fps as f64).round() as usize;
        debug!(frame_len, fps, "frame length");

        let vad = vad
            .unwrap_or_else(|| Box::new(EnergyVad::new(EnergyVadConfig::for_frame(frame_len))));
        let utterance = UtteranceBuffer::new(frame_len, config.record_path.as_deref());

        Ok(Self {
            capture: CaptureBuffer::new(),
            vad,
            utterance,
            decoders,
            sink,
            config,
            frame_len,
            active: true,
            corked: false,
            connected: false,
            calib_attempts: 0,
            calib_retry_limit: None,
            cork_hook: None,
        })
    }

    /// Size the pipeline buffers once the source stream is up and its buffer
    /// attributes are known.
    pub fn connect_stream(&mut self, attrs: StreamAttrs) {
        let rate = self.config.sample_rate as usize;
        let ms_to_bytes = |ms: usize| rate * ms / 1000 * 2;

        let min_bytes = attrs.min_request.unwrap_or_else(|| ms_to_bytes(100));
        let target = attrs
            .target_length
            .unwrap_or_else(|| ms_to_bytes(1000))
            .max(3 * min_bytes);
        let window = attrs.window.unwrap_or_else(|| ms_to_bytes(30_000));

        let calib_bytes = self.vad.required_samples() * 2;
        debug!(
            samples = calib_bytes / 2,
            "calibration window requirement"
        );

        let silen_samples = self.config.silence_window_samples();
        let hwm_bytes = window.max(calib_bytes);
        let extra = (2 * min_bytes).max(silen_samples as usize * 2) + min_bytes;
        let max_bytes = attrs.max_length.unwrap_or(hwm_bytes + extra);

        self.utterance
            .configure(max_bytes / 2, hwm_bytes / 2, silen_samples);
        self.capture
            .configure(target.max(calib_bytes) + 3 * min_bytes, min_bytes);

        self.connected = true;
        info!("source stream connected");
    }

    /// The source stream went away; buffered state is kept for a reconnect.
    pub fn disconnect_stream(&mut self) {
        self.connected = false;
        info!("source stream disconnected");
    }

    /// Bound the number of calibration retries that are attempted silently.
    pub fn set_calibration_retry_limit(&mut self, limit: Option<u32>) {
        self.calib_retry_limit = limit;
    }

    /// Hook invoked when the cork state changes, used to propagate the cork
    /// to the source stream.
    pub fn set_cork_hook(&mut self, hook: Box<dyn FnMut(bool) + Send>) {
        self.cork_hook = Some(hook);
    }

    /// Source read callback: accept a burst of raw S16LE mono PCM.
    pub fn push_audio(&mut self, data: &[u8]) {
        if !self.connected {
            trace!("no stream connected, dropping {} bytes", data.len());
            return;
        }

        self.capture.push(data);

        // Inactive or corked: captured audio stops at the VAD input
        // boundary; the ring's overflow policy ages out the oldest bytes.
        if !self.active {
            trace!("engine inactive, {} bytes held at the gate", data.len());
            return;
        }
        if self.corked {
            return;
        }
        self.process_capture();
    }

    fn process_capture(&mut self) {
        let min_request = if self.capture.calibrated() {
            self.capture.min_request()
        } else {
            self.vad.required_samples() * 2
        };
        if self.capture.len() < min_request {
            return;
        }

        trace!("processing {} byte input data", self.capture.len());

        if !self.capture.calibrated() && !self.try_calibrate() {
            return;
        }

        self.drain_vad();
    }

    fn try_calibrate(&mut self) -> bool {
        match self.vad.calibrate(&mut self.capture) {
            Calibration::Done => {
                self.capture.set_calibrated(true);
                self.utterance.set_ts(self.vad.read_timestamp());
                self.utterance.purge(-1);
                self.calib_attempts = 0;
                info!("successfully calibrated @ {}", self.vad.read_timestamp());
                true
            }
            Calibration::NeedMoreData => false,
            Calibration::Failed => {
                // Speech during the ambient window is the usual cause; throw
                // the window away and retry with fresh audio.
                self.calib_attempts += 1;
                error!("failed to calibrate (attempt {})", self.calib_attempts);
                self.capture.reset();
                if self.calib_retry_limit == Some(self.calib_attempts) {
                    error!(
                        "calibration failed {} times, engine remains uncalibrated",
                        self.calib_attempts
                    );
                }
                false
            }
        }
    }

    fn drain_vad(&mut self) {
        let mut got = 0usize;
        {
            let Self {
                capture,
                vad,
                utterance,
                ..
            } = self;

            loop {
                let spare = utterance.spare();
                if spare.is_empty() {
                    break;
                }
                let n = vad.read(capture, spare);
                if n == 0 {
                    break;
                }
                utterance.commit(n);
                got += n;
            }
        }

        if got > 0 {
            self.utterance.set_ts(self.vad.read_timestamp());
            debug!(
                "got {} samples to utterance buffer (total {})",
                got,
                self.utterance.len()
            );

            if let Err(err) = self.decoders.current_mut().start_utterance() {
                error!("failed to start utterance: {err}");
                return;
            }

            if self.utterance.unflushed() >= self.utterance.hwm() {
                self.flush_current(false);
            }

            let room = self.utterance.max().saturating_sub(self.utterance.len());
            if room < self.frame_len {
                warn!("utterance buffer full, forcing end of utterance");
                self.finish_open_utterance();
            }
        } else if self.decoders.current().in_utterance() {
            let elapsed = self
                .vad
                .read_timestamp()
                .saturating_sub(self.utterance.ts());
            if elapsed > self.utterance.silence_window() {
                self.finish_open_utterance();
            }
        }
    }

    /// Hand pending samples to the current decoder. On a processing error
    /// the open utterance is abandoned.
    fn flush_current(&mut self, full_utterance: bool) {
        let samples = self.utterance.unflushed();
        let dec = self.decoders.current_mut();
        if let Err(err) = self.utterance.flush(dec.engine_mut(), full_utterance) {
            error!("failed to process {samples} samples: {err}");
            self.abandon_utterance();
        }
    }

    /// Close the engine-side utterance without dispatching a result.
    fn abandon_utterance(&mut self) {
        if let Err(err) = self.decoders.current_mut().end_utterance() {
            error!("failed to end abandoned utterance: {err}");
        }
        self.vad.reset();
        self.utterance.purge(-1);
    }

    /// Final flush, engine end, postprocess, dispatch, purge.
    fn finish_open_utterance(&mut self) {
        if !self.decoders.current().in_utterance() {
            return;
        }

        self.flush_current(true);
        self.vad.reset();

        let frame_len = self.frame_len;
        let dec = self.decoders.current_mut();
        match dec.end_utterance() {
            Ok(true) => {}
            Ok(false) => return, // abandoned during the final flush
            Err(err) => {
                error!("failed to end utterance: {err}");
                self.utterance.purge(-1);
                return;
            }
        }

        let utt = postprocessor::process_utterance(dec.kind(), dec.engine(), frame_len);
        postprocessor::log_utterance(&utt);

        let purge = self.sink.on_utterance(&utt);
        let purge = self.clamp_purge(purge);
        self.utterance.purge(purge);
    }

    fn clamp_purge(&self, purge: i32) -> i64 {
        let len = self.utterance.len();
        if purge == -1 {
            -1
        } else if purge < 0 {
            warn!("sink returned invalid purge length {purge}, keeping all samples");
            0
        } else if purge as usize > len {
            warn!("sink returned purge length {purge} beyond buffer ({len}), clamping");
            len as i64
        } else {
            purge as i64
        }
    }

    // --- control plane -----------------------------------------------------

    pub fn activate(&mut self) {
        info!("activating speech engine");
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        info!("deactivating speech engine");
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Cork or uncork the source stream. While corked, pushes are accepted
    /// but not processed.
    pub fn cork(&mut self, corked: bool) {
        if self.corked == corked {
            return;
        }
        self.corked = corked;
        debug!(corked, "cork state changed");

        if self.connected {
            if let Some(hook) = self.cork_hook.as_mut() {
                hook(corked);
            }
        } else {
            debug!("cork request with no stream connected");
        }
    }

    pub fn is_corked(&self) -> bool {
        self.corked
    }

    /// Drop buffered samples. Only a range covering the whole utterance
    /// buffer is honored; the engine does not index by absolute position.
    pub fn flush(&mut self, start: u32, end: u32) {
        debug!("flushing buffered samples ({start} - {end})");
        let len = self.utterance.len() as u32;
        if start == 0 && end >= len {
            self.utterance.clear();
        } else if len > 0 {
            warn!("partial flush ({start} - {end}) not supported, ignoring");
        }
    }

    /// Reserved for future replay support.
    pub fn rescan(&mut self, start: u32, end: u32) {
        debug!("scheduling buffer rescan ({start} - {end})");
    }

    /// Duplicate buffered samples for the host (`None` on a bad range).
    pub fn dup(&self, start: i64, end: i64) -> Option<Vec<i16>> {
        debug!("duplicating samples ({start} - {end})");
        self.utterance.dup(start, end)
    }

    /// Register an additional decoder at runtime.
    pub fn add_decoder(
        &mut self,
        factory: &dyn DecoderFactory,
        spec: &DecoderSpec,
    ) -> Result<(), EngineError> {
        self.decoders.add(factory, spec, &self.config)
    }

    pub fn check_decoder(&self, name: &str) -> bool {
        self.decoders.contains(name)
    }

    /// Switch the current decoder. An open utterance on the previous
    /// selection is closed first.
    pub fn select_decoder(&mut self, name: &str) -> Result<(), EngineError> {
        if self.decoders.current().in_utterance() {
            warn!(
                "decoder switch with an open utterance on '{}', closing it",
                self.decoders.current_name()
            );
            self.finish_open_utterance();
        }
        self.decoders.select(name)
    }

    pub fn current_decoder(&self) -> &str {
        self.decoders.current_name()
    }

    /// Close any open utterance, e.g. on host shutdown.
    pub fn finish(&mut self) {
        self.finish_open_utterance();
    }

    // --- diagnostics -------------------------------------------------------

    pub fn is_calibrated(&self) -> bool {
        self.capture.calibrated()
    }

    pub fn capture_buffered_bytes(&self) -> usize {
        self.capture.len()
    }

    pub fn utterance_buffered_samples(&self) -> usize {
        self.utterance.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}
