use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::tags::{TagPolicy, PARALINGUISTIC_TAGS};
use crate::engines::ensure_reference;
use crate::engines::runtime::{InferenceRuntime, ModelSlot, ModelStatus, SynthesisRequest};
use crate::error::{ConfigurationError, Result};
use crate::params::{ParamValues, ParameterSchema};
use crate::registry::EngineSpec;
use crate::{Device, EngineCapabilities, SpeechEngine, SynthesisResult};

/// Languages covered by the expressive model family.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en"];

/// Speed/quality trade-off of the expressive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// Smaller model; supports paralinguistic tags.
    #[default]
    Fast,
    /// Larger model; no tag support.
    Quality,
}

impl Variant {
    /// Every variant, in registration order.
    pub const ALL: [Variant; 2] = [Variant::Fast, Variant::Quality];

    /// Value of the `variant` construction parameter; also the engine id suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Fast => "fast",
            Variant::Quality => "quality",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Variant::Fast => "Expressive Fast (350M)",
            Variant::Quality => "Expressive Quality (500M)",
        }
    }

    /// Whether paralinguistic tags such as `[laugh]` may appear in text.
    pub fn supports_tags(&self) -> bool {
        matches!(self, Variant::Fast)
    }

    fn tag_policy(&self) -> TagPolicy {
        if self.supports_tags() {
            TagPolicy::allowed(PARALINGUISTIC_TAGS)
        } else {
            TagPolicy::Rejected
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Variant::Fast),
            "quality" => Ok(Variant::Quality),
            other => Err(ConfigurationError::InvalidOption {
                key: "variant".to_string(),
                value: other.to_string(),
                allowed: Variant::ALL.iter().map(|v| v.as_str().to_string()).collect(),
            }),
        }
    }
}

/// Parameters every expressive variant accepts.
pub fn parameter_schema() -> ParameterSchema {
    ParameterSchema::new()
        .float(
            "cfg_weight",
            0.5,
            0.0,
            1.0,
            "Adherence to the text (0.0-1.0). Lower values pace fast speakers better.",
        )
        .float(
            "exaggeration",
            0.5,
            0.0,
            1.5,
            "Expressiveness (0.0-1.5). Higher is more dramatic.",
        )
}

/// Expressive voice-cloning engine.
///
/// The model is loaded on the first [`generate`](SpeechEngine::generate) call
/// and kept for the engine's lifetime.
pub struct ExpressiveEngine {
    reference: PathBuf,
    variant: Variant,
    model: ModelSlot,
    capabilities: EngineCapabilities,
}

impl ExpressiveEngine {
    /// Build an engine for `reference`. Fails if the reference file does not exist.
    pub fn new(
        reference: impl Into<PathBuf>,
        device: Device,
        variant: Variant,
        runtime: Arc<dyn InferenceRuntime>,
    ) -> Result<Self> {
        let reference = reference.into();
        ensure_reference(&reference)?;

        let capabilities = EngineCapabilities::new(
            variant.display_name(),
            SUPPORTED_LANGUAGES,
            parameter_schema(),
        )
        .with_tags(variant.tag_policy());

        Ok(Self {
            reference,
            variant,
            model: ModelSlot::new(runtime, variant.as_str(), device),
            capabilities,
        })
    }

    /// Build from registry construction parameters; `variant` defaults to fast.
    pub fn from_spec(spec: EngineSpec, runtime: Arc<dyn InferenceRuntime>) -> Result<Self> {
        let variant = match spec.params.get("variant") {
            Some(value) => value
                .as_str()
                .ok_or_else(|| ConfigurationError::InvalidParameterType {
                    key: "variant".to_string(),
                    expected: "text",
                })?
                .parse()?,
            None => Variant::default(),
        };
        Self::new(spec.reference, spec.device, variant, runtime)
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Lifecycle state of the underlying model.
    pub fn model_status(&self) -> ModelStatus {
        self.model.status()
    }

    /// Tags accepted in text; empty for the quality variant.
    pub fn paralinguistic_tags(&self) -> &[String] {
        self.capabilities.tags.allowed_tags()
    }
}

impl SpeechEngine for ExpressiveEngine {
    fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    fn generate(&mut self, text: &str, language: &str, params: &ParamValues) -> Result<SynthesisResult> {
        ensure_reference(&self.reference)?;

        log::debug!(
            "{}: generating {} chars [{language}]",
            self.capabilities.name,
            text.chars().count()
        );
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
    use crate::engines::runtime::CommandRuntime;
    use crate::error::{DependencyError, ResourceError};
    use crate::params::ParamValue;

    fn runtime() -> Arc<dyn InferenceRuntime> {
        Arc::new(CommandRuntime::new("expressive", "/nonexistent/voicecast-expressive"))
    }

    fn reference() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".wav").tempfile().unwrap()
    }

    #[test]
    fn missing_reference_fails_construction() {
        let err = ExpressiveEngine::new("/nonexistent/ref.wav", Device::Cpu, Variant::Fast, runtime())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::Error::Resource(ResourceError::MissingReference(_))
        ));
    }

    #[test]
    fn variants_differ_in_tag_support() {
        let r = reference();
        let fast = ExpressiveEngine::new(r.path(), Device::Cpu, Variant::Fast, runtime()).unwrap();
        let quality = ExpressiveEngine::new(r.path(), Device::Cpu, Variant::Quality, runtime()).unwrap();

        assert!(fast.supports_tag("laugh"));
        assert!(!fast.supports_tag("foo"));
        assert!(!quality.supports_tag("laugh"));
        assert_eq!(fast.paralinguistic_tags().len(), PARALINGUISTIC_TAGS.len());
        assert!(quality.paralinguistic_tags().is_empty());

        assert!(fast.validate_text("plain text").unwrap().valid);
        assert!(quality.validate_text("plain text").unwrap().valid);
        assert!(fast.validate_text("hi [laugh]").unwrap().valid);
        assert!(!quality.validate_text("hi [laugh]").unwrap().valid);

        let verdict = fast.validate_text("hi [foo]").unwrap();
        assert!(!verdict.valid);
        assert!(verdict.message.contains("\"foo\""));
    }

    #[test]
    fn from_spec_reads_variant() {
        let r = reference();
        let mut params = ParamValues::new();
        params.insert("variant".into(), ParamValue::from("quality"));
        let spec = EngineSpec {
            reference: r.path().to_path_buf(),
            device: Device::Cpu,
            params,
        };
        let engine = ExpressiveEngine::from_spec(spec, runtime()).unwrap();
        assert_eq!(engine.variant(), Variant::Quality);
        assert_eq!(engine.name(), "Expressive Quality (500M)");
        assert_eq!(engine.supported_languages(), ["en".to_string()]);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!(matches!(
            "turbo".parse::<Variant>(),
            Err(ConfigurationError::InvalidOption { .. })
        ));
    }

    #[test]
    fn generate_without_runtime_is_dependency_error_and_stays_unloaded() {
        let r = reference();
        let mut engine = ExpressiveEngine::new(r.path(), Device::Cpu, Variant::Fast, runtime()).unwrap();
        let params = engine.supported_parameters().defaults();
        let err = engine.generate("hello", "en", &params).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Dependency(DependencyError::RuntimeUnavailable { .. })
        ));
        assert_eq!(engine.model_status(), ModelStatus::Unloaded);
    }
}
