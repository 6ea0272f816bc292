use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::EngineError;

/// Prefix recognized on the flat key=value configuration surface.
pub const KEY_PREFIX: &str = "engine.";

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
pub const DEFAULT_TOPN: u32 = 12;

/// Paths describing one decoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderSpec {
    pub name: String,
    /// Acoustic model directory. `None` falls back to the default decoder's.
    pub hmm: Option<PathBuf>,
    /// Language model file.
    pub lm: PathBuf,
    /// Pronunciation dictionary.
    pub dict: PathBuf,
    /// Optional finite-state grammar file.
    pub fsg: Option<PathBuf>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Decoder declarations; index 0 is always the "default" decoder.
    pub decoders: Vec<DecoderSpec>,
    /// Named audio source to connect to (`None` = default source).
    pub source_name: Option<String>,
    /// File that receives raw flushed PCM for diagnostics.
    pub record_path: Option<PathBuf>,
    /// N-best breadth, 1..=100.
    pub topn: u32,
    /// Source sample rate in Hz, 8000..=48000.
    pub sample_rate: u32,
    /// Silence window in seconds before an utterance is closed.
    pub silence_window_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let models = default_model_dir();
        Self {
            decoders: vec![DecoderSpec {
                name: "default".to_string(),
                hmm: Some(models.join("en-us")),
                lm: models.join("en-us.lm.bin"),
                dict: models.join("cmudict-en-us.dict"),
                fsg: None,
            }],
            source_name: None,
            record_path: None,
            topn: DEFAULT_TOPN,
            sample_rate: DEFAULT_SAMPLE_RATE,
            silence_window_secs: 1.0,
        }
    }
}

/// Default location for acoustic/language model files.
pub fn default_model_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".speech-engine").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

impl EngineConfig {
    /// Load configuration from a JSON file, or fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Apply a flat list of `engine.*` key/value pairs on top of the current
    /// configuration. Keys without the prefix are ignored. `decoder = NAME`
    /// declares an additional decoder whose paths come from `NAME.hmm`,
    /// `NAME.lm`, `NAME.dict` and `NAME.fsg` sub-keys in the same list.
    pub fn apply_pairs(&mut self, pairs: &[(String, String)]) -> Result<(), EngineError> {
        if self.decoders.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no decoder declarations".to_string(),
            ));
        }

        for (full_key, value) in pairs {
            let key = match full_key.strip_prefix(KEY_PREFIX) {
                Some(key) => key,
                None => continue,
            };

            match key {
                "hmm" => self.decoders[0].hmm = Some(PathBuf::from(value)),
                "lm" => self.decoders[0].lm = PathBuf::from(value),
                "dict" => self.decoders[0].dict = PathBuf::from(value),
                "fsg" => self.decoders[0].fsg = Some(PathBuf::from(value)),
                "pulsesrc" => self.source_name = Some(value.clone()),
                "record" => self.record_path = Some(PathBuf::from(value)),
                "samplerate" => {
                    self.sample_rate = value.parse().map_err(|_| {
                        EngineError::InvalidConfig(format!(
                            "invalid value '{value}' for samplerate"
                        ))
                    })?;
                }
                "topn" => {
                    self.topn = value.parse().map_err(|_| {
                        EngineError::InvalidConfig(format!("invalid value '{value}' for topn"))
                    })?;
                }
                "decoder" => {
                    let spec = collect_decoder(pairs, value)?;
                    self.decoders.push(spec);
                }
                _ => {}
            }
        }

        self.validate()
    }

    /// Check value ranges. Called by the engine before construction.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(8000..=48000).contains(&self.sample_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "sample rate {} Hz out of range (8000..48000)",
                self.sample_rate
            )));
        }
        if !(1..=100).contains(&self.topn) {
            return Err(EngineError::InvalidConfig(format!(
                "topn {} out of range (1..100)",
                self.topn
            )));
        }
        if self.decoders.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no decoder declarations".to_string(),
            ));
        }
        if self.silence_window_secs <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "silence window {} not positive",
                self.silence_window_secs
            )));
        }
        Ok(())
    }

    /// Silence window in samples at the configured rate.
    pub fn silence_window_samples(&self) -> u64 {
        (self.silence_window_secs * self.sample_rate as f64) as u64
    }

    /// Log a summary of the parsed configuration.
    pub fn log_summary(&self) {
        info!(
            topn = self.topn,
            sample_rate = self.sample_rate,
            source = self.source_name.as_deref().unwrap_or("<default-source>"),
            record = ?self.record_path,
            "engine configuration"
        );
        for dec in &self.decoders {
            info!(
                name = %dec.name,
                hmm = ?dec.hmm,
                lm = %dec.lm.display(),
                dict = %dec.dict.display(),
                model = %dec
                    .fsg
                    .as_ref()
                    .map(|f| format!("fsg - {}", f.display()))
                    .unwrap_or_else(|| "acoustic".to_string()),
                "decoder"
            );
        }
    }
}

/// Gather the sub-keys of one `decoder = NAME` declaration.
fn collect_decoder(pairs: &[(String, String)], name: &str) -> Result<DecoderSpec, EngineError> {
    let prefix = format!("{KEY_PREFIX}{name}.");
    let mut hmm = None;
    let mut lm = None;
    let mut dict = None;
    let mut fsg = None;

    for (key, value) in pairs {
        if let Some(sub) = key.strip_prefix(&prefix) {
            match sub {
                "hmm" => hmm = Some(PathBuf::from(value)),
                "lm" => lm = Some(PathBuf::from(value)),
                "dict" => dict = Some(PathBuf::from(value)),
                "fsg" => fsg = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    match (lm, dict) {
        (Some(lm), Some(dict)) => Ok(DecoderSpec {
            name: name.to_string(),
            hmm,
            lm,
            dict,
            fsg,
        }),
        _ => Err(EngineError::InvalidConfig(format!(
            "decoder '{name}' declared without both lm and dict"
        ))),
    }
}
