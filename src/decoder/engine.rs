use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a decoder engine implementation.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("engine initialization failed: {0}")]
    Init(String),

    #[error("raw processing failed: {0}")]
    Process(String),

    #[error("no grammar models loaded")]
    NoGrammar,

    #[error("utterance state error: {0}")]
    Utterance(String),
}

/// Settings handed to a [`DecoderFactory`] when a decoder is added.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Acoustic model directory.
    pub hmm: PathBuf,
    /// Language model file.
    pub lm: PathBuf,
    /// Pronunciation dictionary.
    pub dict: PathBuf,
    /// Optional finite-state grammar file.
    pub fsg: Option<PathBuf>,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// N-best breadth.
    pub topn: u32,
}

/// Global best hypothesis for the last utterance.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub text: String,
    /// Log-domain score; convert with [`DecoderEngine::exp_score`].
    pub score: i32,
    /// Utterance id echoed back by the engine, when available.
    pub id: Option<String>,
}

/// One word of an N-best hypothesis with its frame range.
#[derive(Debug, Clone)]
pub struct WordSegment {
    pub word: String,
    pub start_frame: i32,
    pub end_frame: i32,
}

/// One ranked alternative hypothesis.
#[derive(Debug, Clone)]
pub struct NbestHyp {
    /// Log-domain score of this alternative.
    pub score: i32,
    /// Word sequence including sentence markers (`<s>`, `</s>`, `<sil>`).
    pub segments: Vec<WordSegment>,
}

/// A node of the word-hypothesis lattice.
#[derive(Debug, Clone)]
pub struct LatticeNode {
    pub word: String,
    pub start_frame: i32,
    pub first_exit_frame: i32,
    pub last_exit_frame: i32,
}

/// A directed lattice edge between two word hypotheses.
#[derive(Debug, Clone)]
pub struct LatticeEdge {
    pub src: LatticeNode,
    pub dst: LatticeNode,
}

/// Word lattice of the last utterance, edges in topological order.
#[derive(Debug, Clone)]
pub struct Lattice {
    pub n_frames: i32,
    pub edges: Vec<LatticeEdge>,
}

/// Narrow interface the pipeline consumes from a speech decoder library.
///
/// Between `begin_utterance` and `end_utterance` every `process_raw` call
/// appends samples to the engine's internal observation sequence; hypotheses,
/// N-best alternatives and the lattice become valid after `end_utterance`.
pub trait DecoderEngine: Send {
    fn process_raw(
        &mut self,
        samples: &[i16],
        search_start: bool,
        full_utterance: bool,
    ) -> Result<(), DecodeError>;

    fn begin_utterance(&mut self, id: &str) -> Result<(), DecodeError>;

    fn end_utterance(&mut self) -> Result<(), DecodeError>;

    fn hypothesis(&self) -> Option<Hypothesis>;

    /// Up to `limit` ranked alternatives for the last utterance.
    fn nbest(&self, limit: usize) -> Vec<NbestHyp>;

    fn lattice(&self) -> Option<Lattice>;

    /// Map a log-domain score to a linear probability.
    fn exp_score(&self, score: i32) -> f64;

    /// Analysis frame rate in frames per second.
    fn frame_rate(&self) -> u32;

    /// Names of the grammar models loaded from the configured `fsg` file;
    /// empty for a plain acoustic/language-model engine.
    fn grammar_names(&self) -> Vec<String>;
}

/// Builds decoder engines from settings. Injected by the host so the
/// pipeline stays independent of any particular decoder library.
pub trait DecoderFactory {
    fn create(&self, settings: &EngineSettings) -> Result<Box<dyn DecoderEngine>, DecodeError>;
}
