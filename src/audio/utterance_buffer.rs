use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::decoder::{DecodeError, DecoderEngine};

/// Zero-valued frames injected ahead of preserved audio after a purge, giving
/// the decoder leading context for the continuation.
pub const INJECTED_SILENCE_FRAMES: usize = 10;

/// Sample-aligned accumulator for detected speech.
///
/// The VAD appends into the tail; once the unflushed region reaches the
/// high-water mark it is handed to the decoder with `full = false` to bound
/// latency, and the remainder goes out with `full = true` when the utterance
/// closes. Flushing never discards samples; `purge`, driven by the
/// dispatcher's verdict, owns clearing.
pub struct UtteranceBuffer {
    buf: Vec<i16>,
    /// Hard capacity in samples, a multiple of the frame length.
    max: usize,
    /// High-water mark in samples, a multiple of the frame length.
    hwm: usize,
    len: usize,
    /// Watermark of samples already handed to the decoder.
    flushed: usize,
    /// Frame length in samples.
    frlen: usize,
    /// Silence window in samples before an utterance is closed.
    silen: u64,
    /// Read timestamp at the last append.
    ts: u64,
    /// Diagnostic tap receiving raw flushed PCM.
    record: Option<File>,
}

impl UtteranceBuffer {
    pub fn new(frlen: usize, record_path: Option<&Path>) -> Self {
        Self {
            buf: Vec::new(),
            max: 0,
            hwm: 0,
            len: 0,
            flushed: 0,
            frlen,
            silen: 0,
            ts: 0,
            record: record_path.and_then(open_record_file),
        }
    }

    /// Reshape the buffer once the stream geometry is known. Sizes are
    /// rounded up to whole frames.
    pub fn configure(&mut self, max_samples: usize, hwm_samples: usize, silen_samples: u64) {
        let frlen = self.frlen;
        let round_up = |n: usize| (n + frlen - 1) / frlen * frlen;
        self.max = round_up(max_samples);
        self.hwm = round_up(hwm_samples).min(self.max);
        self.silen = silen_samples;
        self.buf = vec![0i16; self.max + INJECTED_SILENCE_FRAMES * frlen];
        self.len = 0;
        self.flushed = 0;
        debug!(
            frame = frlen,
            max = self.max,
            hwm = self.hwm,
            silence_window = self.silen,
            "utterance buffer configured"
        );
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn hwm(&self) -> usize {
        self.hwm
    }

    pub fn frame_len(&self) -> usize {
        self.frlen
    }

    pub fn silence_window(&self) -> u64 {
        self.silen
    }

    pub fn ts(&self) -> u64 {
        self.ts
    }

    pub fn set_ts(&mut self, ts: u64) {
        self.ts = ts;
    }

    /// Samples accumulated but not yet handed to the decoder.
    pub fn unflushed(&self) -> usize {
        self.len - self.flushed
    }

    /// Writable tail for the VAD to fill. Empty once the buffer has grown to
    /// capacity (a purge-preserved tail may briefly sit past `max`).
    pub fn spare(&mut self) -> &mut [i16] {
        let end = self.max.max(self.len);
        &mut self.buf[self.len..end]
    }

    /// Account for samples the VAD wrote into the spare region.
    pub fn commit(&mut self, n: usize) {
        self.len += n;
        debug_assert!(self.len <= self.buf.len());
    }

    /// Hand the unflushed region to the decoder. A final flush is delivered
    /// even when empty so the engine sees the end of the observation
    /// sequence. Data is retained either way.
    pub fn flush(
        &mut self,
        engine: &mut dyn DecoderEngine,
        full_utterance: bool,
    ) -> Result<(), DecodeError> {
        let region = self.flushed..self.len;
        debug!(
            samples = region.len(),
            full = full_utterance,
            "flushing utterance data"
        );

        if region.is_empty() && !full_utterance {
            return Ok(());
        }

        if !region.is_empty() {
            self.write_record(region.clone());
        }

        self.flushed = self.len;
        engine.process_raw(&self.buf[region], false, full_utterance)
    }

    fn write_record(&mut self, region: std::ops::Range<usize>) {
        if let Some(file) = self.record.as_mut() {
            let mut bytes = Vec::with_capacity(region.len() * 2);
            for &sample in &self.buf[region] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            // write_all retries interrupted writes; anything else is logged
            // and the flush proceeds.
            if let Err(err) = file.write_all(&bytes) {
                error!("failed to record samples: {err}");
            }
        }
    }

    /// Discard the first `length` samples as consumed. Negative values (or
    /// lengths beyond the buffer) discard everything. When a tail is
    /// preserved it is shifted behind freshly zeroed padding so the decoder
    /// gets leading context on the next utterance.
    pub fn purge(&mut self, length: i64) {
        let silence = INJECTED_SILENCE_FRAMES * self.frlen;

        let discard = if length < 0 || length as usize >= self.len {
            self.len
        } else {
            length as usize
        };

        if discard == 0 {
            return;
        }

        if discard == self.len {
            debug!("purging buffer, nothing preserved");
            self.len = 0;
        } else {
            let tail = self.len - discard;
            debug!(
                preserved = tail + silence,
                original = self.len,
                "purging buffer"
            );
            self.buf.copy_within(discard..self.len, silence);
            self.buf[..silence].fill(0);
            self.len = tail + silence;
        }
        self.flushed = 0;
    }

    /// Drop everything, padding included.
    pub fn clear(&mut self) {
        self.len = 0;
        self.flushed = 0;
    }

    /// Copy of the samples in `[start, end)`, clamped to the buffered length.
    pub fn dup(&self, start: i64, end: i64) -> Option<Vec<i16>> {
        if start < 0 || end < 0 || start >= end || start as usize >= self.len {
            return None;
        }
        let start = start as usize;
        let end = (end as usize).min(self.len);
        Some(self.buf[start..end].to_vec())
    }

    #[cfg(test)]
    pub fn data(&self) -> &[i16] {
        &self.buf[..self.len]
    }
}

fn open_record_file(path: &Path) -> Option<File> {
    match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        Ok(file) => {
            info!("recording flushed audio to '{}'", path.display());
            Some(file)
        }
        Err(err) => {
            warn!("can't open record file '{}': {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Hypothesis, Lattice, NbestHyp};
    use std::io::Read;

    struct CountingEngine {
        processed: Vec<(usize, bool)>,
    }

    impl CountingEngine {
        fn new() -> Self {
            Self { processed: Vec::new() }
        }
    }

    impl DecoderEngine for CountingEngine {
        fn process_raw(
            &mut self,
            samples: &[i16],
            _search_start: bool,
            full_utterance: bool,
        ) -> Result<(), DecodeError> {
            self.processed.push((samples.len(), full_utterance));
            Ok(())
        }
        fn begin_utterance(&mut self, _id: &str) -> Result<(), DecodeError> {
            Ok(())
        }
        fn end_utterance(&mut self) -> Result<(), DecodeError> {
            Ok(())
        }
        fn hypothesis(&self) -> Option<Hypothesis> {
            None
        }
        fn nbest(&self, _limit: usize) -> Vec<NbestHyp> {
            Vec::new()
        }
        fn lattice(&self) -> Option<Lattice> {
            None
        }
        fn exp_score(&self, _score: i32) -> f64 {
            0.0
        }
        fn frame_rate(&self) -> u32 {
            100
        }
        fn grammar_names(&self) -> Vec<String> {
            Vec::new()
        }
    }

    const FRLEN: usize = 160;
    const SILENCE: usize = INJECTED_SILENCE_FRAMES * FRLEN;

    fn buffer() -> UtteranceBuffer {
        let mut buf = UtteranceBuffer::new(FRLEN, None);
        buf.configure(32000, 16000, 8000);
        buf
    }

    fn fill(buf: &mut UtteranceBuffer, samples: &[i16]) {
        buf.spare()[..samples.len()].copy_from_slice(samples);
        buf.commit(samples.len());
    }

    #[test]
    fn test_configure_rounds_to_frames() {
        let mut buf = UtteranceBuffer::new(FRLEN, None);
        buf.configure(16001, 8001, 4000);
        assert_eq!(buf.max() % FRLEN, 0);
        assert_eq!(buf.hwm() % FRLEN, 0);
        assert!(buf.max() >= 16001);
    }

    #[test]
    fn test_purge_everything() {
        let mut buf = buffer();
        let samples: Vec<i16> = (0..1000).map(|i| i as i16).collect();
        fill(&mut buf, &samples);

        buf.purge(1000);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_purge_negative_drops_all() {
        let mut buf = buffer();
        fill(&mut buf, &[5i16; 640]);
        buf.purge(-1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_purge_zero_keeps_all() {
        let mut buf = buffer();
        fill(&mut buf, &[5i16; 640]);
        buf.purge(0);
        assert_eq!(buf.len(), 640);
    }

    #[test]
    fn test_purge_preserves_tail_behind_padding() {
        let mut buf = buffer();
        let n = 2000usize;
        let samples: Vec<i16> = (0..2 * n).map(|i| (i % 3000) as i16 + 1).collect();
        fill(&mut buf, &samples);

        buf.purge(n as i64);

        assert_eq!(buf.len(), n + SILENCE);
        assert!(buf.data()[..SILENCE].iter().all(|&s| s == 0));
        assert_eq!(&buf.data()[SILENCE..], &samples[n..]);
    }

    #[test]
    fn test_purge_beyond_length_clears() {
        let mut buf = buffer();
        fill(&mut buf, &[1i16; 500]);
        buf.purge(100000);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_flush_tracks_watermark() {
        let mut buf = buffer();
        let mut engine = CountingEngine::new();

        fill(&mut buf, &[7i16; 1600]);
        buf.flush(&mut engine, false).unwrap();
        assert_eq!(buf.unflushed(), 0);
        assert_eq!(buf.len(), 1600);

        fill(&mut buf, &[8i16; 800]);
        buf.flush(&mut engine, true).unwrap();

        assert_eq!(engine.processed, vec![(1600, false), (800, true)]);
    }

    #[test]
    fn test_final_flush_delivered_even_when_empty() {
        let mut buf = buffer();
        let mut engine = CountingEngine::new();

        fill(&mut buf, &[7i16; 1600]);
        buf.flush(&mut engine, false).unwrap();
        buf.flush(&mut engine, true).unwrap();

        assert_eq!(engine.processed, vec![(1600, false), (0, true)]);
    }

    #[test]
    fn test_purge_resets_watermark() {
        let mut buf = buffer();
        let mut engine = CountingEngine::new();

        fill(&mut buf, &[7i16; 1600]);
        buf.flush(&mut engine, true).unwrap();
        buf.purge(800);

        // The preserved tail plus its padding is un-decoded again.
        assert_eq!(buf.unflushed(), buf.len());
    }

    #[test]
    fn test_dup_clamps_and_validates() {
        let mut buf = buffer();
        let samples: Vec<i16> = (0..100).collect();
        fill(&mut buf, &samples);

        assert_eq!(buf.dup(10, 20).unwrap(), &samples[10..20]);
        assert_eq!(buf.dup(50, 100000).unwrap(), &samples[50..]);
        assert!(buf.dup(-1, 10).is_none());
        assert!(buf.dup(20, 10).is_none());
        assert!(buf.dup(100, 200).is_none());
    }

    #[test]
    fn test_record_tap_receives_flushed_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.raw");

        let mut buf = UtteranceBuffer::new(FRLEN, Some(&path));
        buf.configure(32000, 16000, 8000);
        let mut engine = CountingEngine::new();

        fill(&mut buf, &[0x0102i16; 4]);
        buf.flush(&mut engine, true).unwrap();
        drop(buf);

        let mut bytes = Vec::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x02, 0x01, 0x02, 0x01, 0x02, 0x01]);
    }
}
