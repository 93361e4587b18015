//! Multilingual voice-cloning engine.
//!
//! Broad language coverage, no paralinguistic tags. Text is passed to the
//! model verbatim.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engines::ensure_reference;
use crate::engines::runtime::{InferenceRuntime, ModelSlot, ModelStatus, SynthesisRequest};
use crate::error::Result;
use crate::params::{ParamValues, ParameterSchema};
use crate::registry::EngineSpec;
use crate::{Device, EngineCapabilities, SpeechEngine, SynthesisResult};

/// Name shown in engine listings.
pub const DISPLAY_NAME: &str = "Multilingual (XTTS v2)";

/// Model name passed to the runtime.
pub const MODEL: &str = "xtts_v2";

/// Language codes the model was trained on.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh", "ja", "hu", "ko",
];

/// Generation parameters: `language`, `temperature` and `gpt_cond_len`.
pub fn parameter_schema() -> ParameterSchema {
    ParameterSchema::new()
        .choice("language", "en", SUPPORTED_LANGUAGES, "Target language code")
        .float(
            "temperature",
            0.7,
            0.1,
            1.0,
            "Sampling temperature. Higher values vary more.",
        )
        .int(
            "gpt_cond_len",
            128,
            32,
            256,
            "Length of the reference audio used for conditioning",
        )
}

/// One multilingual voice-cloning engine bound to a reference recording.
///
/// The model is loaded on the first `generate` call. Text is not checked for tags.
pub struct MultilingualEngine {
    reference: PathBuf,
    model: ModelSlot,
    capabilities: EngineCapabilities,
}

impl MultilingualEngine {
    /// Build an engine for `reference`. Fails if the reference file does not exist.
    pub fn new(
        reference: impl Into<PathBuf>,
        device: Device,
        runtime: Arc<dyn InferenceRuntime>,
    ) -> Result<Self> {
        let reference = reference.into();
        ensure_reference(&reference)?;

        Ok(Self {
            reference,
            model: ModelSlot::new(runtime, MODEL, device),
            capabilities: EngineCapabilities::new(DISPLAY_NAME, SUPPORTED_LANGUAGES, parameter_schema()),
        })
    }

    /// Registry constructor. The engine declares no construction parameters.
    pub fn from_spec(spec: EngineSpec, runtime: Arc<dyn InferenceRuntime>) -> Result<Self> {
        Self::new(spec.reference, spec.device, runtime)
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    pub fn model_status(&self) -> ModelStatus {
        self.model.status()
    }
}

impl SpeechEngine for MultilingualEngine {
    fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    fn generate(&mut self, text: &str, language: &str, params: &ParamValues) -> Result<SynthesisResult> {
        ensure_reference(&self.reference)?;

        log::debug!("{DISPLAY_NAME}: generating {} chars [{language}]", text.chars().count());
        let model = self.model.get_or_load()?;
        model.synthesize(&SynthesisRequest {
            text,
            language,
            reference: &self.reference,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::runtime::LoadedModel;
    use crate::params::ParamValue;
    use std::sync::Mutex;

    /// Records what each synthesize call was given.
    #[derive(Default)]
    struct RecordingRuntime {
        seen: Arc<Mutex<Vec<(String, String, ParamValues)>>>,
    }

    struct RecordingModel {
        seen: Arc<Mutex<Vec<(String, String, ParamValues)>>>,
    }

    impl InferenceRuntime for RecordingRuntime {
        fn name(&self) -> &str {
            "recording"
        }

        fn probe(&self) -> Result<()> {
            Ok(())
        }

        fn load(&self, model: &str, _device: Device) -> Result<Box<dyn LoadedModel>> {
            assert_eq!(model, MODEL);
            Ok(Box::new(RecordingModel {
                seen: self.seen.clone(),
            }))
        }
    }

    impl LoadedModel for RecordingModel {
        fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<SynthesisResult> {
            self.seen.lock().unwrap().push((
                request.text.to_string(),
                request.language.to_string(),
                request.params.clone(),
            ));
            Ok(SynthesisResult {
                samples: vec![0.1; 240],
                sample_rate: 24000,
            })
        }
    }

    #[test]
    fn capabilities_match_the_model() {
        let reference = tempfile::NamedTempFile::new().unwrap();
        let engine =
            MultilingualEngine::new(reference.path(), Device::Cpu, Arc::new(RecordingRuntime::default())).unwrap();

        assert_eq!(engine.name(), DISPLAY_NAME);
        assert_eq!(engine.supported_languages().len(), 16);
        assert!(engine.capabilities().supports_language("ko"));
        assert!(!engine.supports_tag("laugh"));
        assert_eq!(engine.validate_text("hi [laugh]"), None);

        let defaults = engine.supported_parameters().defaults();
        assert_eq!(defaults["language"], ParamValue::from("en"));
        assert_eq!(defaults["temperature"], ParamValue::Float(0.7));
        assert_eq!(defaults["gpt_cond_len"], ParamValue::Int(128));
    }

    #[test]
    fn generate_forwards_request_and_loads_once() {
        let reference = tempfile::NamedTempFile::new().unwrap();
        let runtime = RecordingRuntime::default();
        let seen = runtime.seen.clone();
        let mut engine = MultilingualEngine::new(reference.path(), Device::Cpu, Arc::new(runtime)).unwrap();
        assert_eq!(engine.model_status(), ModelStatus::Unloaded);

        let params = engine.supported_parameters().defaults();
        let first = engine.generate("Bonjour", "fr", &params).unwrap();
        engine.generate("Salut", "fr", &params).unwrap();

        assert_eq!(first.sample_rate, 24000);
        assert_eq!(engine.model_status(), ModelStatus::Ready);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "Bonjour");
        assert_eq!(seen[0].1, "fr");
        assert_eq!(seen[0].2, params);
    }

    #[test]
    fn reference_removed_after_construction_fails_generation() {
        let reference = tempfile::NamedTempFile::new().unwrap();
        let path = reference.path().to_path_buf();
        let mut engine =
            MultilingualEngine::new(&path, Device::Cpu, Arc::new(RecordingRuntime::default())).unwrap();
        drop(reference);

        let params = engine.supported_parameters().defaults();
        assert!(matches!(
            engine.generate("hello", "en", &params),
            Err(crate::Error::Resource(crate::ResourceError::MissingReference(_)))
        ));
    }
}
