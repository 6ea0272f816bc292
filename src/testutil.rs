//! Deterministic doubles for pipeline tests: a scripted decoder engine, a
//! signal-triggered VAD, and a recording sink.

use std::sync::{Arc, Mutex};

use crate::decoder::{
    DecodeError, DecoderEngine, DecoderFactory, EngineSettings, Hypothesis, Lattice, NbestHyp,
};
use crate::dispatch::UtteranceSink;
use crate::postprocessor::Utterance;
use crate::vad::{Calibration, SampleSource, VadEngine};

/// Observable decoder calls, shared across the factory's engines.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Begin(String),
    Process { samples: usize, full: bool },
    End,
}

pub type EventLog = Arc<Mutex<Vec<EngineEvent>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Canned results a scripted engine serves after each utterance.
#[derive(Clone, Default)]
pub struct EngineScript {
    pub hypothesis: Option<Hypothesis>,
    pub nbest: Vec<NbestHyp>,
    pub lattice: Option<Lattice>,
    pub grammars: Vec<String>,
    pub fail_process: bool,
}

pub struct ScriptedEngine {
    script: EngineScript,
    log: EventLog,
}

impl DecoderEngine for ScriptedEngine {
    fn process_raw(
        &mut self,
        samples: &[i16],
        _search_start: bool,
        full_utterance: bool,
    ) -> Result<(), DecodeError> {
        self.log.lock().unwrap().push(EngineEvent::Process {
            samples: samples.len(),
            full: full_utterance,
        });
        if self.script.fail_process {
            return Err(DecodeError::Process("scripted failure".to_string()));
        }
        Ok(())
    }

    fn begin_utterance(&mut self, id: &str) -> Result<(), DecodeError> {
        self.log
            .lock()
            .unwrap()
            .push(EngineEvent::Begin(id.to_string()));
        Ok(())
    }

    fn end_utterance(&mut self) -> Result<(), DecodeError> {
        self.log.lock().unwrap().push(EngineEvent::End);
        Ok(())
    }

    fn hypothesis(&self) -> Option<Hypothesis> {
        self.script.hypothesis.clone()
    }

    fn nbest(&self, limit: usize) -> Vec<NbestHyp> {
        self.script.nbest.iter().take(limit).cloned().collect()
    }

    fn lattice(&self) -> Option<Lattice> {
        self.script.lattice.clone()
    }

    /// Linear probability encoded directly in the score, in millionths.
    fn exp_score(&self, score: i32) -> f64 {
        score as f64 / 1_000_000.0
    }

    fn frame_rate(&self) -> u32 {
        100
    }

    fn grammar_names(&self) -> Vec<String> {
        self.script.grammars.clone()
    }
}

/// Factory serving one script for plain decoders and another for decoders
/// declared with a grammar file.
pub struct ScriptedFactory {
    pub acoustic: EngineScript,
    pub fsg: EngineScript,
    pub log: EventLog,
}

impl ScriptedFactory {
    pub fn new(acoustic: EngineScript) -> Self {
        Self {
            acoustic,
            fsg: EngineScript::default(),
            log: new_event_log(),
        }
    }
}

impl DecoderFactory for ScriptedFactory {
    fn create(&self, settings: &EngineSettings) -> Result<Box<dyn DecoderEngine>, DecodeError> {
        let script = if settings.fsg.is_some() {
            self.fsg.clone()
        } else {
            self.acoustic.clone()
        };
        Ok(Box::new(ScriptedEngine {
            script,
            log: self.log.clone(),
        }))
    }
}

/// VAD double with exact accounting: any frame containing a non-zero sample
/// passes through verbatim, zero frames are consumed silently. Calibration
/// consumes exactly its window.
pub struct PassthroughVad {
    frame_samples: usize,
    calib_samples: usize,
    read_ts: u64,
    frame: Vec<i16>,
}

impl PassthroughVad {
    pub fn new(frame_samples: usize, calib_samples: usize) -> Self {
        Self {
            frame_samples,
            calib_samples,
            read_ts: 0,
            frame: vec![0i16; frame_samples],
        }
    }
}

impl VadEngine for PassthroughVad {
    fn required_samples(&self) -> usize {
        self.calib_samples
    }

    fn calibrate(&mut self, source: &mut dyn SampleSource) -> Calibration {
        if source.available() < self.calib_samples {
            return Calibration::NeedMoreData;
        }
        let mut remaining = self.calib_samples;
        while remaining > 0 {
            let take = remaining.min(self.frame_samples);
            source.pull_samples(&mut self.frame[..take]);
            remaining -= take;
        }
        self.read_ts = 0;
        Calibration::Done
    }

    fn read(&mut self, source: &mut dyn SampleSource, dst: &mut [i16]) -> usize {
        let frlen = self.frame_samples;
        let mut written = 0;
        while source.available() >= frlen && written + frlen <= dst.len() {
            source.pull_samples(&mut self.frame);
            self.read_ts += frlen as u64;
            if self.frame.iter().any(|&s| s != 0) {
                dst[written..written + frlen].copy_from_slice(&self.frame);
                written += frlen;
            }
        }
        written
    }

    fn read_timestamp(&self) -> u64 {
        self.read_ts
    }

    fn reset(&mut self) {}
}

/// Sink that records dispatched utterances and answers with a fixed rule.
pub struct RecordingSink {
    pub utterances: Arc<Mutex<Vec<Utterance>>>,
    pub purge: PurgeRule,
}

#[derive(Debug, Clone, Copy)]
pub enum PurgeRule {
    ConsumeAll,
    Fixed(i32),
}

impl RecordingSink {
    pub fn new(purge: PurgeRule) -> (Self, Arc<Mutex<Vec<Utterance>>>) {
        let utterances = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                utterances: utterances.clone(),
                purge,
            },
            utterances,
        )
    }
}

impl UtteranceSink for RecordingSink {
    fn on_utterance(&mut self, utterance: &Utterance) -> i32 {
        self.utterances.lock().unwrap().push(utterance.clone());
        match self.purge {
            PurgeRule::ConsumeAll => {
                if utterance.length > 0 {
                    utterance.length
                } else {
                    -1
                }
            }
            PurgeRule::Fixed(value) => value,
        }
    }
}
