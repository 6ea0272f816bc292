use tracing::{debug, info, warn};

use super::engine::{DecoderEngine, DecoderFactory, EngineSettings};
use crate::config::{DecoderSpec, EngineConfig};
use crate::error::EngineError;

/// Which postprocessing path a decoder's results take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Free-form recognition against an acoustic + language model.
    Acoustic,
    /// Constrained recognition against a finite-state grammar.
    Fsg,
}

/// One named decoder configuration and its live engine.
pub struct Decoder {
    name: String,
    engine: Box<dyn DecoderEngine>,
    /// Grammar model names, for diagnostics. Empty on acoustic decoders.
    grammars: Vec<String>,
    kind: ProcessorKind,
    /// Rolling utterance-id counter.
    utid: u32,
    in_utterance: bool,
}

impl Decoder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProcessorKind {
        self.kind
    }

    pub fn in_utterance(&self) -> bool {
        self.in_utterance
    }

    pub fn engine(&self) -> &dyn DecoderEngine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn DecoderEngine {
        self.engine.as_mut()
    }

    /// Open an utterance on the engine. A no-op while one is already open.
    pub fn start_utterance(&mut self) -> Result<(), EngineError> {
        if !self.in_utterance {
            let id = format!("{:07}-{}", self.utid, self.name);
            self.utid = self.utid.wrapping_add(1);
            debug!(id = %id, "starting utterance");
            self.engine.begin_utterance(&id)?;
            self.in_utterance = true;
        }
        Ok(())
    }

    /// Close the open utterance, if any. Returns whether one was open.
    pub fn end_utterance(&mut self) -> Result<bool, EngineError> {
        if !self.in_utterance {
            return Ok(false);
        }
        self.in_utterance = false;
        self.engine.end_utterance()?;
        Ok(true)
    }
}

/// Insertion-ordered registry of decoders with one current selection.
pub struct DecoderSet {
    decs: Vec<Decoder>,
    current: usize,
}

impl DecoderSet {
    /// Build the set from the configured declarations. The first declaration
    /// is the "default" decoder; its failure fails engine creation.
    pub fn new(factory: &dyn DecoderFactory, config: &EngineConfig) -> Result<Self, EngineError> {
        let mut set = Self {
            decs: Vec::with_capacity(config.decoders.len()),
            current: 0,
        };

        for spec in &config.decoders {
            set.add(factory, spec, config)?;
        }

        Ok(set)
    }

    /// Create a decoder from `spec` and append it. On error the set is left
    /// unchanged.
    pub fn add(
        &mut self,
        factory: &dyn DecoderFactory,
        spec: &DecoderSpec,
        config: &EngineConfig,
    ) -> Result<(), EngineError> {
        // Fall back to the default decoder's acoustic model.
        let hmm = spec
            .hmm
            .clone()
            .or_else(|| config.decoders[0].hmm.clone())
            .ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "decoder '{}' has no acoustic model directory",
                    spec.name
                ))
            })?;

        let settings = EngineSettings {
            hmm,
            lm: spec.lm.clone(),
            dict: spec.dict.clone(),
            fsg: spec.fsg.clone(),
            sample_rate: config.sample_rate,
            topn: config.topn,
        };

        let engine = factory.create(&settings).map_err(|source| {
            EngineError::DecoderInit {
                name: spec.name.clone(),
                source,
            }
        })?;

        let grammars = if spec.fsg.is_some() {
            let grammars = engine.grammar_names();
            if grammars.is_empty() {
                warn!("decoder '{}': no grammar models found", spec.name);
                return Err(EngineError::DecoderInit {
                    name: spec.name.clone(),
                    source: super::engine::DecodeError::NoGrammar,
                });
            }
            for name in &grammars {
                info!("decoder '{}': grammar model '{name}'", spec.name);
            }
            grammars
        } else {
            Vec::new()
        };

        let kind = if grammars.is_empty() {
            ProcessorKind::Acoustic
        } else {
            ProcessorKind::Fsg
        };

        self.decs.push(Decoder {
            name: spec.name.clone(),
            engine,
            grammars,
            kind,
            utid: 1,
            in_utterance: false,
        });

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.decs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decs.iter().any(|d| d.name == name)
    }

    /// Make `name` the current decoder. The caller is responsible for
    /// closing any open utterance on the previous selection first.
    pub fn select(&mut self, name: &str) -> Result<(), EngineError> {
        match self.decs.iter().position(|d| d.name == name) {
            Some(idx) => {
                debug!("switching to decoder '{name}'");
                self.current = idx;
                Ok(())
            }
            None => {
                warn!("unable to select decoder '{name}': not found");
                Err(EngineError::UnknownDecoder(name.to_string()))
            }
        }
    }

    pub fn current(&self) -> &Decoder {
        &self.decs[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Decoder {
        &mut self.decs[self.current]
    }

    pub fn current_name(&self) -> &str {
        &self.decs[self.current].name
    }

    /// Grammar names of a member, for diagnostics.
    pub fn grammars(&self, name: &str) -> Option<&[String]> {
        self.decs
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.grammars.as_slice())
    }
}
