use tracing::{debug, info};

use super::engine::{
    DecodeError, DecoderEngine, DecoderFactory, EngineSettings, Hypothesis, Lattice, NbestHyp,
};

/// Placeholder decoder used by the CLI until a real engine backend is wired
/// in. Digests samples and reports empty hypotheses, so the capture and
/// segmentation stages can be exercised end to end.
pub struct NullEngine {
    samples: usize,
}

impl DecoderEngine for NullEngine {
    fn process_raw(
        &mut self,
        samples: &[i16],
        _search_start: bool,
        full_utterance: bool,
    ) -> Result<(), DecodeError> {
        self.samples += samples.len();
        debug!(
            samples = samples.len(),
            total = self.samples,
            full = full_utterance,
            "null engine digested samples"
        );
        Ok(())
    }

    fn begin_utterance(&mut self, id: &str) -> Result<(), DecodeError> {
        self.samples = 0;
        info!("utterance '{id}' started");
        Ok(())
    }

    fn end_utterance(&mut self) -> Result<(), DecodeError> {
        info!(samples = self.samples, "utterance ended");
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

/// Factory producing [`NullEngine`] instances.
pub struct NullFactory;

impl DecoderFactory for NullFactory {
    fn create(&self, settings: &EngineSettings) -> Result<Box<dyn DecoderEngine>, DecodeError> {
        info!(
            hmm = %settings.hmm.display(),
            lm = %settings.lm.display(),
            "creating null decoder engine"
        );
        Ok(Box::new(NullEngine { samples: 0 }))
    }
}
