use tracing::{debug, error, warn};

use crate::vad::SampleSource;

/// Fixed-capacity byte ring between the audio source and the VAD.
///
/// Bursts from the source are appended with `push`; the VAD drains aligned
/// samples through the [`SampleSource`] impl. Under overload the oldest bytes
/// are dropped so the buffer always holds the most recent audio.
pub struct CaptureBuffer {
    buf: Vec<u8>,
    len: usize,
    min_request: usize,
    calibrated: bool,
    /// Trailing odd byte of a sample that straddled two pushes.
    carry: Option<u8>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            len: 0,
            min_request: 0,
            calibrated: false,
            carry: None,
        }
    }

    /// Size the ring once the source's buffer attributes are known.
    /// Capacity is rounded down to sample alignment.
    pub fn configure(&mut self, capacity_bytes: usize, min_request_bytes: usize) {
        let capacity_bytes = capacity_bytes - (capacity_bytes % 2);
        self.buf = vec![0u8; capacity_bytes];
        self.len = 0;
        self.min_request = min_request_bytes;
        self.carry = None;
        debug!(
            capacity = capacity_bytes,
            min_request = min_request_bytes,
            "capture buffer configured"
        );
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn min_request(&self) -> usize {
        self.min_request
    }

    pub fn calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn set_calibrated(&mut self, calibrated: bool) {
        self.calibrated = calibrated;
    }

    /// Discard all buffered data.
    pub fn reset(&mut self) {
        self.len = 0;
        self.carry = None;
    }

    /// Append raw PCM. Never fails; on overload the oldest bytes are dropped
    /// so the most recent audio survives.
    pub fn push(&mut self, data: &[u8]) {
        let cap = self.buf.len();
        if cap == 0 {
            warn!("capture buffer not configured, dropping {} bytes", data.len());
            return;
        }

        // Re-join a sample that straddled the previous push.
        let mut joined: Vec<u8>;
        let mut data = data;
        if let Some(byte) = self.carry.take() {
            joined = Vec::with_capacity(data.len() + 1);
            joined.push(byte);
            joined.extend_from_slice(data);
            data = &joined[..];
        }
        if data.len() % 2 != 0 {
            let (aligned, rest) = data.split_at(data.len() - 1);
            self.carry = Some(rest[0]);
            data = aligned;
        }

        if data.len() + self.len > cap {
            let extra = data.len() + self.len - cap;
            error!("capture buffer overflow ({extra} bytes), throwing away oldest data");

            if extra > cap {
                // Even an empty ring cannot hold it all; keep only the newest
                // tail of the incoming burst.
                let skip = data.len() - (data.len() % cap);
                let skip = skip - (skip % 2);
                data = &data[skip..];
            }

            let total = self.len + data.len();
            if total > cap {
                let drop = total - cap;
                self.buf.copy_within(drop..self.len, 0);
                self.len -= drop;
            }
        }

        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Drain up to `dst.len()` bytes, rounded down to sample alignment.
    /// Returns the number of bytes delivered; residue stays buffered.
    pub fn pull(&mut self, dst: &mut [u8]) -> usize {
        self.check_alignment();
        let n = dst.len().min(self.len);
        let n = n - (n % 2);
        if n > 0 {
            dst[..n].copy_from_slice(&self.buf[..n]);
            self.buf.copy_within(n..self.len, 0);
            self.len -= n;
        }
        n
    }

    fn check_alignment(&mut self) {
        if self.len % 2 != 0 {
            // Cannot happen through push/pull; report as fatal and re-align.
            error!("odd capture buffer length {}", self.len);
            self.len -= 1;
        }
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for CaptureBuffer {
    fn available(&self) -> usize {
        self.len / 2
    }

    fn pull_samples(&mut self, dst: &mut [i16]) -> usize {
        self.check_alignment();
        let n = dst.len().min(self.len / 2);
        for (i, sample) in dst[..n].iter_mut().enumerate() {
            *sample = i16::from_le_bytes([self.buf[2 * i], self.buf[2 * i + 1]]);
        }
        let consumed = n * 2;
        if consumed > 0 {
            self.buf.copy_within(consumed..self.len, 0);
            self.len -= consumed;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(cap: usize) -> CaptureBuffer {
        let mut buf = CaptureBuffer::new();
        buf.configure(cap, 4);
        buf
    }

    #[test]
    fn test_push_pull_roundtrip() {
        let mut buf = configured(64);
        buf.push(&[1, 2, 3, 4]);
        assert_eq!(buf.len(), 4);

        let mut out = [0u8; 8];
        let n = buf.pull(&mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pull_is_sample_aligned() {
        let mut buf = configured(64);
        buf.push(&[1, 2, 3, 4]);

        let mut out = [0u8; 3];
        let n = buf.pull(&mut out);
        assert_eq!(n, 2);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_length_stays_even_for_odd_pushes() {
        let mut buf = configured(64);
        buf.push(&[1, 2, 3]);
        assert_eq!(buf.len() % 2, 0);
        assert_eq!(buf.len(), 2);

        // Second half of the straddling sample arrives.
        buf.push(&[4]);
        assert_eq!(buf.len(), 4);

        let mut out = [0u8; 4];
        buf.pull(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buf = configured(8);
        buf.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.push(&[9, 10]);
        assert_eq!(buf.len(), 8);

        let mut out = [0u8; 8];
        buf.pull(&mut out);
        assert_eq!(out, [3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_overflow_never_exceeds_capacity() {
        let mut buf = configured(8);
        let burst: Vec<u8> = (0..100).collect();
        buf.push(&burst);
        assert!(buf.len() <= buf.capacity());
        assert_eq!(buf.len() % 2, 0);

        // Only the newest tail of the burst survives.
        let mut out = [0u8; 8];
        let n = buf.pull(&mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[96, 97, 98, 99]);
    }

    #[test]
    fn test_pull_samples_le_decoding() {
        let mut buf = configured(64);
        // -2 and 513 in little-endian.
        buf.push(&[0xfe, 0xff, 0x01, 0x02]);

        let mut samples = [0i16; 2];
        let n = buf.pull_samples(&mut samples);
        assert_eq!(n, 2);
        assert_eq!(samples, [-2, 513]);
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut buf = configured(64);
        buf.push(&[1, 2, 3, 4]);
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(SampleSource::available(&buf), 0);
    }

    #[test]
    fn test_calibrated_flag() {
        let mut buf = configured(64);
        assert!(!buf.calibrated());
        buf.set_calibrated(true);
        assert!(buf.calibrated());
    }
}
