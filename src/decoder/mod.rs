pub mod engine;
pub mod null;
pub mod set;

pub use engine::{
    DecodeError, DecoderEngine, DecoderFactory, EngineSettings, Hypothesis, Lattice, LatticeEdge,
    LatticeNode, NbestHyp, WordSegment,
};
pub use null::{NullEngine, NullFactory};
pub use set::{Decoder, DecoderSet, ProcessorKind};
