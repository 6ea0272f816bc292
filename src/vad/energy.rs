use tracing::{debug, info, trace};

use super::{Calibration, SampleSource, VadEngine};

/// Tuning for the energy-based voice-activity gate.
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// Analysis frame length in samples.
    pub frame_samples: usize,
    /// Frames of ambient audio consumed by one calibration attempt.
    pub calib_frames: usize,
    /// Speech threshold distance above the noise floor, in dB.
    pub onset_margin_db: f32,
    /// Consecutive above-threshold frames required to open the gate.
    pub onset_frames: usize,
    /// Trailing frames kept after the signal drops below the threshold.
    pub hangover_frames: usize,
    /// Calibration fails when the measured floor is louder than this.
    pub max_floor_db: f32,
    /// EMA coefficient for tracking the noise floor during silence.
    pub ema_alpha: f32,
}

impl EnergyVadConfig {
    pub fn for_frame(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            calib_frames: 32,
            onset_margin_db: 10.0,
            onset_frames: 3,
            hangover_frames: 8,
            max_floor_db: -20.0,
            ema_alpha: 0.05,
        }
    }
}

/// Frame-energy voice-activity gate.
///
/// Calibration measures the ambient noise floor over a fixed window and sets
/// the speech threshold a margin above it. In steady state each frame is
/// classified by dBFS energy; an onset debounce suppresses clicks and a
/// hangover window keeps trailing context once the gate is open. The floor
/// keeps adapting slowly while the gate is closed.
pub struct EnergyVad {
    config: EnergyVadConfig,
    noise_floor_db: f32,
    threshold_db: f32,
    read_ts: u64,
    in_speech: bool,
    onset_run: usize,
    hangover_left: usize,
    /// Frames buffered during onset debounce, released when the gate opens.
    pending: Vec<i16>,
    frame: Vec<i16>,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        let frame = vec![0i16; config.frame_samples];
        Self {
            config,
            noise_floor_db: 0.0,
            threshold_db: 0.0,
            read_ts: 0,
            in_speech: false,
            onset_run: 0,
            hangover_left: 0,
            pending: Vec::new(),
            frame,
        }
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }

    fn classify(&mut self, db: f32) -> bool {
        let speech = db >= self.threshold_db;
        if !speech && !self.in_speech {
            // Track slow drift of the ambient level.
            let alpha = self.config.ema_alpha;
            self.noise_floor_db = self.noise_floor_db * (1.0 - alpha) + db * alpha;
            self.threshold_db = self.noise_floor_db + self.config.onset_margin_db;
        }
        speech
    }
}

/// Mean frame energy in dB relative to full scale.
fn frame_dbfs(frame: &[i16]) -> f32 {
    let sum: f64 = frame
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    let mean = sum / frame.len().max(1) as f64;
    (10.0 * (mean + 1e-10).log10()) as f32
}

impl VadEngine for EnergyVad {
    fn required_samples(&self) -> usize {
        self.config.calib_frames * self.config.frame_samples
    }

    fn calibrate(&mut self, source: &mut dyn SampleSource) -> Calibration {
        let needed = self.required_samples();
        if source.available() < needed {
            return Calibration::NeedMoreData;
        }

        let mut sum_db = 0.0f64;
        let mut max_db = f32::MIN;
        for _ in 0..self.config.calib_frames {
            let n = source.pull_samples(&mut self.frame);
            if n < self.config.frame_samples {
                return Calibration::NeedMoreData;
            }
            let db = frame_dbfs(&self.frame);
            sum_db += db as f64;
            max_db = max_db.max(db);
        }

        let floor = (sum_db / self.config.calib_frames as f64) as f32;
        if floor > self.config.max_floor_db {
            debug!(floor, "calibration window too loud");
            return Calibration::Failed;
        }

        self.noise_floor_db = floor;
        self.threshold_db = floor + self.config.onset_margin_db;
        self.read_ts = 0;
        self.in_speech = false;
        self.onset_run = 0;
        self.hangover_left = 0;
        self.pending.clear();

        info!(
            floor = self.noise_floor_db,
            threshold = self.threshold_db,
            peak = max_db,
            "voice activity calibrated"
        );
        Calibration::Done
    }

    fn read(&mut self, source: &mut dyn SampleSource, dst: &mut [i16]) -> usize {
        let frlen = self.config.frame_samples;
        let mut written = 0usize;

        loop {
            // Room for the worst case: everything pending plus this frame.
            if written + self.pending.len() + frlen > dst.len() {
                break;
            }
            if source.available() < frlen {
                break;
            }

            source.pull_samples(&mut self.frame);
            self.read_ts += frlen as u64;

            let db = frame_dbfs(&self.frame);
            let speech = self.classify(db);

            if self.in_speech {
                if speech {
                    self.hangover_left = self.config.hangover_frames;
                } else if self.hangover_left > 0 {
                    self.hangover_left -= 1;
                } else {
                    self.in_speech = false;
                    self.onset_run = 0;
                    trace!(ts = self.read_ts, "gate closed");
                    continue;
                }
                dst[written..written + frlen].copy_from_slice(&self.frame);
                written += frlen;
            } else if speech {
                self.onset_run += 1;
                self.pending.extend_from_slice(&self.frame);
                if self.onset_run >= self.config.onset_frames {
                    self.in_speech = true;
                    self.hangover_left = self.config.hangover_frames;
                    dst[written..written + self.pending.len()]
                        .copy_from_slice(&self.pending);
                    written += self.pending.len();
                    self.pending.clear();
                    trace!(ts = self.read_ts, db, "gate opened");
                }
            } else {
                self.onset_run = 0;
                self.pending.clear();
            }
        }

        written
    }

    fn read_timestamp(&self) -> u64 {
        self.read_ts
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.onset_run = 0;
        self.hangover_left = 0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 160;

    struct VecSource(Vec<i16>);

    impl SampleSource for VecSource {
        fn available(&self) -> usize {
            self.0.len()
        }
        fn pull_samples(&mut self, dst: &mut [i16]) -> usize {
            let n = dst.len().min(self.0.len());
            dst[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            n
        }
    }

    fn vad() -> EnergyVad {
        EnergyVad::new(EnergyVadConfig::for_frame(FRAME))
    }

    fn sine(samples: usize, amplitude: f32) -> Vec<i16> {
        (0..samples)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0;
                (phase.sin() * amplitude) as i16
            })
            .collect()
    }

    #[test]
    fn test_calibrate_needs_full_window() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 100]);
        assert_eq!(vad.calibrate(&mut source), Calibration::NeedMoreData);
    }

    #[test]
    fn test_calibrate_on_silence() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 32 * FRAME]);
        assert_eq!(vad.calibrate(&mut source), Calibration::Done);
        assert!(vad.noise_floor_db() < -60.0);
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn test_calibrate_fails_on_loud_window() {
        let mut vad = vad();
        let mut source = VecSource(sine(32 * FRAME, 20000.0));
        assert_eq!(vad.calibrate(&mut source), Calibration::Failed);
    }

    #[test]
    fn test_silence_yields_nothing_but_advances_timestamp() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 32 * FRAME]);
        vad.calibrate(&mut source);

        let mut source = VecSource(vec![0i16; 10 * FRAME]);
        let mut dst = vec![0i16; 20 * FRAME];
        let n = vad.read(&mut source, &mut dst);
        assert_eq!(n, 0);
        assert_eq!(vad.read_timestamp(), 10 * FRAME as u64);
    }

    #[test]
    fn test_speech_passes_after_onset() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 32 * FRAME]);
        vad.calibrate(&mut source);

        let mut source = VecSource(sine(20 * FRAME, 8000.0));
        let mut dst = vec![0i16; 40 * FRAME];
        let n = vad.read(&mut source, &mut dst);

        // Every speech frame survives once the onset debounce opens the gate.
        assert_eq!(n, 20 * FRAME);
        assert_eq!(vad.read_timestamp(), 20 * FRAME as u64);
    }

    #[test]
    fn test_timestamps_monotonic_across_mixed_audio() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 32 * FRAME]);
        vad.calibrate(&mut source);

        let mut ts = vad.read_timestamp();
        let mut dst = vec![0i16; 64 * FRAME];
        for chunk in [
            vec![0i16; 5 * FRAME],
            sine(10 * FRAME, 8000.0),
            vec![0i16; 15 * FRAME],
        ] {
            let mut source = VecSource(chunk);
            vad.read(&mut source, &mut dst);
            assert!(vad.read_timestamp() >= ts);
            ts = vad.read_timestamp();
        }
    }

    #[test]
    fn test_reset_keeps_timestamp_and_calibration() {
        let mut vad = vad();
        let mut source = VecSource(vec![0i16; 32 * FRAME]);
        vad.calibrate(&mut source);

        let mut source = VecSource(sine(10 * FRAME, 8000.0));
        let mut dst = vec![0i16; 20 * FRAME];
        vad.read(&mut source, &mut dst);
        let ts = vad.read_timestamp();

        vad.reset();
        assert_eq!(vad.read_timestamp(), ts);

        // Still calibrated: silence stays silent after the reset.
        let mut source = VecSource(vec![0i16; 4 * FRAME]);
        assert_eq!(vad.read(&mut source, &mut dst), 0);
    }
}
