//! # voicecast
//!
//! Voice-cloning speech synthesis behind one uniform engine contract.
//!
//! ## Features
//!
//! - **Engine registry**: engines are registered once at start-up and resolved by id
//! - **Parameter validation**: per-request overrides are checked against the engine's schema
//! - **Single-flight background generation**: one dedicated worker per orchestrator; the
//!   caller gets a [`TaskHandle`] back immediately
//! - **Output routing**: results are persisted as WAV and/or played back
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voicecast::{Config, EngineRegistry, GenerationOrchestrator, GenerationRequest, OrchestratorOptions};
//!
//! let config = Config::default();
//! let registry = EngineRegistry::with_default_engines(&config);
//! let orchestrator = GenerationOrchestrator::new(
//!     &registry,
//!     "expressive-fast",
//!     "voices/reference.wav",
//!     OrchestratorOptions::from_config(&config),
//! )?;
//!
//! let request = GenerationRequest::builder()
//!     .text("Well [laugh] that went better than expected.")
//!     .persist(true)
//!     .build()?;
//! let outcome = orchestrator.generate(request)?.wait()?;
//! println!("Saved to {:?}", outcome.saved_to);
//! # Ok::<(), voicecast::Error>(())
//! ```

pub mod config;
pub mod engines;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod params;
pub mod registry;
pub mod task;

pub use config::Config;
pub use engines::expressive::{TagPolicy, Variant};
pub use error::{
    ConfigurationError, DependencyError, EngineError, Error, ErrorCategory, ResourceError, Result,
    ValidationError,
};
pub use orchestrator::{
    GenerationOrchestrator, GenerationOutcome, GenerationRequest, GenerationRequestBuilder,
    GenerationResult, OrchestratorOptions,
};
pub use output::{effective_playback_rate, OutputSink, PlaybackDevice};
pub use params::{Constraint, ParamKind, ParamValue, ParamValues, ParameterSchema, ParameterSpec};
pub use registry::{EngineDescriptor, EngineRegistry, EngineSpec};
pub use task::{TaskHandle, TaskRunner, TaskState};

use std::fmt;
use std::io::{BufReader, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 mono audio samples and the sample rate of the output audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| ResourceError::io(path, e))?;
        self.write_wav_to(std::io::BufWriter::new(file))
            .map_err(|e| wav_error(path, e))
    }

    /// Encode the audio as a 32-bit float mono WAV stream.
    pub fn write_wav_to<W: Write + Seek>(&self, writer: W) -> std::result::Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(writer, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Read a WAV file (integer or float samples), down-mixing to mono.
    pub fn read_wav(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ResourceError::io(path, e))?;
        let mut reader =
            hound::WavReader::new(BufReader::new(file)).map_err(|e| wav_error(path, e))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| wav_error(path, e))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| wav_error(path, e))?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn wav_error(path: &Path, e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(source) => ResourceError::io(path, source).into(),
        other => ResourceError::InvalidAudio {
            path: path.to_path_buf(),
            message: other.to_string(),
        }
        .into(),
    }
}

/// Compute device an engine runs its model on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// `Cuda` when an NVIDIA driver is present, `Cpu` otherwise.
    pub fn detect() -> Self {
        if Path::new("/proc/driver/nvidia/version").exists() {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }

    /// Lowercase name as used in config files and runtime requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an engine's text check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextVerdict {
    pub valid: bool,
    pub message: String,
}

impl TextVerdict {
    /// Text that passed the check.
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: "OK".to_string(),
        }
    }

    /// Text that failed the check, with a message for the user.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Static description of what an engine accepts.
///
/// Cheap to clone so the foreground can validate requests without touching the
/// engine instance, which lives on the background worker.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCapabilities {
    pub name: String,
    pub languages: Vec<String>,
    pub parameters: ParameterSchema,
    pub tags: TagPolicy,
}

impl EngineCapabilities {
    /// Capabilities of an engine that does not check text for tags.
    pub fn new(name: impl Into<String>, languages: &[&str], parameters: ParameterSchema) -> Self {
        Self {
            name: name.into(),
            languages: languages.iter().map(|l| l.to_string()).collect(),
            parameters,
            tags: TagPolicy::Unchecked,
        }
    }

    /// Replace the tag policy.
    pub fn with_tags(mut self, tags: TagPolicy) -> Self {
        self.tags = tags;
        self
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }

    /// `None` when the engine does not check its input text.
    pub fn validate_text(&self, text: &str) -> Option<TextVerdict> {
        self.tags.validate(text)
    }
}

/// Common interface for speech synthesis engines.
///
/// Engines are constructed through the [`EngineRegistry`] and driven from a
/// single background worker, so `generate` takes `&mut self` and implementations
/// are free to cache a model handle without interior locking.
pub trait SpeechEngine: Send {
    fn capabilities(&self) -> &EngineCapabilities;

    /// Human-readable engine name.
    fn name(&self) -> &str {
        &self.capabilities().name
    }

    fn supported_languages(&self) -> &[String] {
        &self.capabilities().languages
    }

    fn supported_parameters(&self) -> &ParameterSchema {
        &self.capabilities().parameters
    }

    fn supports_tag(&self, tag: &str) -> bool {
        self.capabilities().tags.allows(tag)
    }

    /// Check text for this engine. `None` if the engine accepts any text.
    fn validate_text(&self, text: &str) -> Option<TextVerdict> {
        self.capabilities().validate_text(text)
    }

    /// Synthesize speech. `params` is the complete, already validated parameter set.
    fn generate(&mut self, text: &str, language: &str, params: &ParamValues) -> Result<SynthesisResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_keeps_rate_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let original = SynthesisResult {
            samples: (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect(),
            sample_rate: 24000,
        };
        original.write_wav(&path).unwrap();

        let decoded = SynthesisResult::read_wav(&path).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples.len(), 480);
        assert!((decoded.duration_secs() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn stereo_int_wav_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = SynthesisResult::read_wav(&path).unwrap();
        assert_eq!(decoded.samples.len(), 100);
        assert!((decoded.samples[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn reading_garbage_is_invalid_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        std::fs::write(&path, b"not a wav file").unwrap();
        assert!(matches!(
            SynthesisResult::read_wav(&path),
            Err(Error::Resource(ResourceError::InvalidAudio { .. }))
        ));
    }
}
