//! The generation façade.
//!
//! A [`GenerationOrchestrator`] owns one engine instance, bound to one
//! reference recording. [`generate`](GenerationOrchestrator::generate) checks a
//! request synchronously (text, parameters, language, speed) and then hands it
//! to the background worker, returning a [`TaskHandle`] right away. Inference,
//! persistence and playback all happen on the worker.

use std::fmt;
use std::path::{Path, PathBuf};

use derive_builder::Builder;

use crate::config::Config;
use crate::engines::ensure_reference;
use crate::error::{ConfigurationError, Result, ValidationError};
use crate::output::{default_playback, OutputSink, PlaybackDevice};
use crate::params::{ParamValue, ParamValues};
use crate::registry::EngineRegistry;
use crate::task::{TaskHandle, TaskRunner};
use crate::{Device, EngineCapabilities, SpeechEngine, SynthesisResult};

/// One synthesis request.
///
/// ```
/// use voicecast::GenerationRequest;
///
/// let request = GenerationRequest::builder()
///     .text("Hola, ¿qué tal?")
///     .language("es")
///     .parameter("temperature", 0.6)
///     .output_path("out/hola.wav")
///     .persist(true)
///     .build()
///     .unwrap();
/// assert_eq!(request.speed, 1.0);
/// assert!(!request.play);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(build_fn(error = "crate::Error"))]
pub struct GenerationRequest {
    #[builder(setter(into))]
    pub text: String,
    #[builder(setter(into), default = "\"en\".to_string()")]
    pub language: String,
    /// Engine the caller expects to run; checked against the active engine when set.
    #[builder(setter(into, strip_option), default)]
    pub engine_id: Option<String>,
    #[builder(default)]
    pub parameter_overrides: ParamValues,
    /// Where to save the audio. When unset and `persist` is on, a
    /// timestamped name in the output directory is used.
    #[builder(setter(into, strip_option), default)]
    pub output_path: Option<PathBuf>,
    #[builder(default)]
    pub persist: bool,
    #[builder(default)]
    pub play: bool,
    /// Playback speed multiplier (see [`crate::output`] for how it is applied).
    #[builder(default = "1.0")]
    pub speed: f32,
}

impl GenerationRequest {
    /// Start a request. Only `text` is required.
    pub fn builder() -> GenerationRequestBuilder {
        GenerationRequestBuilder::default()
    }
}

impl GenerationRequestBuilder {
    /// Add one parameter override.
    pub fn parameter(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.parameter_overrides
            .get_or_insert_with(ParamValues::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Audio produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub engine_name: String,
}

/// What a completed task delivers.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub task_id: u64,
    pub result: GenerationResult,
    pub saved_to: Option<PathBuf>,
    /// Rate the audio was played at, when it was played.
    pub playback_rate: Option<u32>,
}

/// Construction options for [`GenerationOrchestrator`].
pub struct OrchestratorOptions {
    pub device: Device,
    /// Engine construction parameters, merged over the descriptor defaults.
    pub engine_params: ParamValues,
    /// Directory for generated files without an explicit path.
    pub output_dir: PathBuf,
    pub playback: Option<Box<dyn PlaybackDevice>>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            device: Device::detect(),
            engine_params: ParamValues::new(),
            output_dir: PathBuf::from("."),
            playback: default_playback(),
        }
    }
}

impl fmt::Debug for OrchestratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorOptions")
            .field("device", &self.device)
            .field("engine_params", &self.engine_params)
            .field("output_dir", &self.output_dir)
            .field("playback", &self.playback.is_some())
            .finish()
    }
}

impl OrchestratorOptions {
    /// Device and output directory from `config`, default playback device.
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.device(),
            output_dir: config.output.dir.clone(),
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Device used for `play` requests. `None` makes them fail on the worker.
    pub fn with_playback(mut self, device: Option<Box<dyn PlaybackDevice>>) -> Self {
        self.playback = device;
        self
    }

    /// Override a construction parameter. The key must be one the engine's
    /// descriptor declares, or construction fails with `UnknownParameter`.
    pub fn with_engine_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.engine_params.insert(name.into(), value.into());
        self
    }
}

struct Worker {
    engine: Box<dyn SpeechEngine>,
    sink: OutputSink,
}

/// Owns one engine on a background worker and runs generation requests
/// against it, one at a time.
pub struct GenerationOrchestrator {
    engine_id: String,
    capabilities: EngineCapabilities,
    output_dir: PathBuf,
    runner: TaskRunner<Worker, GenerationOutcome>,
}

impl GenerationOrchestrator {
    /// Build engine `engine_id` for `reference` and start its worker.
    ///
    /// A missing reference file fails before the registry constructs anything.
    pub fn new(
        registry: &EngineRegistry,
        engine_id: &str,
        reference: impl AsRef<Path>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let reference = reference.as_ref();
        ensure_reference(reference)?;

        let engine = registry.create(engine_id, reference, options.device, &options.engine_params)?;
        let capabilities = engine.capabilities().clone();
        log::info!("Using engine '{engine_id}' ({})", capabilities.name);

        let runner = TaskRunner::new(
            format!("voicecast-{engine_id}"),
            Worker {
                engine,
                sink: OutputSink::new(options.playback),
            },
        )?;

        Ok(Self {
            engine_id: engine_id.to_string(),
            capabilities,
            output_dir: options.output_dir,
            runner,
        })
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    /// Display name of the active engine.
    pub fn engine_name(&self) -> &str {
        &self.capabilities.name
    }

    /// Generation parameters the active engine accepts.
    pub fn engine_parameters(&self) -> &crate::ParameterSchema {
        &self.capabilities.parameters
    }

    pub fn supported_languages(&self) -> &[String] {
        &self.capabilities.languages
    }

    pub fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    /// `true` while a generation is pending or running.
    pub fn is_busy(&self) -> bool {
        self.runner.is_busy()
    }

    /// Validate `request` and start generating it in the background.
    ///
    /// Configuration and validation problems are returned here, before any
    /// work is scheduled. [`crate::Error::TaskInProgress`] is returned while
    /// another generation is pending or running. Everything that goes wrong
    /// on the worker arrives through the handle.
    pub fn generate(&self, request: GenerationRequest) -> Result<TaskHandle<GenerationOutcome>> {
        if let Some(requested) = &request.engine_id {
            if *requested != self.engine_id {
                return Err(ConfigurationError::EngineMismatch {
                    requested: requested.clone(),
                    active: self.engine_id.clone(),
                }
                .into());
            }
        }

        let text = request.text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        if let Some(verdict) = self.capabilities.validate_text(text) {
            if !verdict.valid {
                return Err(ValidationError::TextRejected(verdict.message).into());
            }
        }

        let mut params = self.capabilities.parameters.validate(&request.parameter_overrides)?;

        let language = match request.parameter_overrides.get("language").and_then(ParamValue::as_str) {
            Some(language) => language.to_string(),
            None => request.language.clone(),
        };
        if !self.capabilities.supports_language(&language) {
            return Err(ValidationError::UnsupportedLanguage {
                language,
                supported: self.capabilities.languages.clone(),
            }
            .into());
        }
        if self.capabilities.parameters.contains("language") {
            params.insert("language".to_string(), ParamValue::Text(language.clone()));
        }

        if !(request.speed.is_finite() && request.speed > 0.0) {
            return Err(ConfigurationError::InvalidSpeed(request.speed).into());
        }

        let target = request
            .persist
            .then(|| request.output_path.clone().unwrap_or_else(|| self.auto_output_path()));

        let text = text.to_string();
        let play = request.play;
        let speed = request.speed;
        let handle = self.runner.submit(move |worker: &mut Worker, task_id| {
            let engine_name = worker.engine.name().to_string();
            log::info!("Generating with {engine_name} [{language}]");

            let audio = worker.engine.generate(&text, &language, &params)?;
            log::info!(
                "Generated {:.2}s of audio at {} Hz",
                audio.duration_secs(),
                audio.sample_rate
            );

            if let Some(path) = &target {
                worker.sink.persist(&audio, path)?;
            }
            let playback_rate = if play {
                Some(worker.sink.play(&audio, speed)?)
            } else {
                None
            };

            let SynthesisResult { samples, sample_rate } = audio;
            Ok(GenerationOutcome {
                task_id,
                result: GenerationResult {
                    samples,
                    sample_rate,
                    engine_name,
                },
                saved_to: target,
                playback_rate,
            })
        })?;

        log::info!("Task {} accepted by '{}'", handle.id(), self.engine_id);
        Ok(handle)
    }

    fn auto_output_path(&self) -> PathBuf {
        self.output_dir.join(auto_file_name(chrono::Local::now()))
    }
}

/// `generated_audio_<YYYYmmdd_HHMMSS>.wav`
pub fn auto_file_name<Tz>(now: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: fmt::Display,
{
    format!("generated_audio_{}.wav", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn auto_file_name_uses_timestamp() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(auto_file_name(at), "generated_audio_20240309_070501.wav");
    }

    #[test]
    fn builder_requires_text() {
        let err = GenerationRequest::builder().persist(true).build().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Configuration(ConfigurationError::MissingField(ref field)) if field == "text"
        ));
    }

    #[test]
    fn builder_defaults() {
        let request = GenerationRequest::builder().text("hi").build().unwrap();
        assert_eq!(request.language, "en");
        assert_eq!(request.engine_id, None);
        assert!(request.parameter_overrides.is_empty());
        assert!(!request.persist);
        assert!(!request.play);
        assert_eq!(request.speed, 1.0);
    }

    #[test]
    fn builder_collects_parameters() {
        let request = GenerationRequest::builder()
            .text("hi")
            .parameter("cfg_weight", 0.3)
            .parameter("gpt_cond_len", 64)
            .build()
            .unwrap();
        assert_eq!(request.parameter_overrides["cfg_weight"], ParamValue::Float(0.3));
        assert_eq!(request.parameter_overrides["gpt_cond_len"], ParamValue::Int(64));
    }
}
