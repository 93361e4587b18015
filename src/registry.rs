//! Engine registry: maps engine ids to constructors, defaults and probes.
//!
//! The registry is an ordinary value built once at start-up and passed by
//! reference to whoever needs to construct engines. Every known engine is
//! registered whether or not its runtime is installed; [`EngineRegistry::is_available`]
//! tells the two apart.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::engines::expressive::{ExpressiveEngine, Variant};
use crate::engines::multilingual::{self, MultilingualEngine};
use crate::engines::runtime::{CommandRuntime, InferenceRuntime};
use crate::error::{ConfigurationError, Result};
use crate::params::{ParamValue, ParamValues};
use crate::{Device, SpeechEngine};

/// Id of the engine used when none is chosen.
pub const DEFAULT_ENGINE: &str = "multilingual";

/// Everything a constructor needs to build one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSpec {
    pub reference: PathBuf,
    pub device: Device,
    /// Descriptor defaults with the caller's overrides applied.
    pub params: ParamValues,
}

/// Builds an engine from a merged [`EngineSpec`].
pub type EngineConstructor = Arc<dyn Fn(EngineSpec) -> Result<Box<dyn SpeechEngine>> + Send + Sync>;
/// Cheap check that an engine's runtime is installed.
pub type AvailabilityProbe = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Registration record for one engine.
#[derive(Clone)]
pub struct EngineDescriptor {
    pub id: String,
    pub display_name: String,
    pub default_params: ParamValues,
    constructor: EngineConstructor,
    probe: Option<AvailabilityProbe>,
}

impl EngineDescriptor {
    /// Descriptor with no default parameters and no availability probe.
    pub fn new<F>(id: impl Into<String>, display_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(EngineSpec) -> Result<Box<dyn SpeechEngine>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            default_params: ParamValues::new(),
            constructor: Arc::new(constructor),
            probe: None,
        }
    }

    /// Construction parameters passed to the constructor unless overridden.
    /// Their keys are also the only overrides [`EngineRegistry::create`] accepts.
    pub fn with_default_params(mut self, params: ParamValues) -> Self {
        self.default_params = params;
        self
    }

    /// Check run by [`EngineRegistry::is_available`]. Without one the engine
    /// is always reported available.
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.probe = Some(Arc::new(probe));
        self
    }
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("default_params", &self.default_params)
            .field("probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}

/// Ordered set of engine descriptors, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct EngineRegistry {
    descriptors: Vec<EngineDescriptor>,
}

impl EngineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in engine, backed by the runtimes named in `config`.
    pub fn with_default_engines(config: &Config) -> Self {
        let multilingual_runtime: Arc<dyn InferenceRuntime> =
            Arc::new(CommandRuntime::new("multilingual", &config.runtimes.multilingual));
        let expressive_runtime: Arc<dyn InferenceRuntime> =
            Arc::new(CommandRuntime::new("expressive", &config.runtimes.expressive));

        let mut registry = Self::new();

        let runtime = multilingual_runtime.clone();
        let probe_runtime = multilingual_runtime;
        registry.register(
            EngineDescriptor::new(DEFAULT_ENGINE, multilingual::DISPLAY_NAME, move |spec| {
                Ok(Box::new(MultilingualEngine::from_spec(spec, runtime.clone())?) as Box<dyn SpeechEngine>)
            })
            .with_probe(move || probe_runtime.probe()),
        );

        for variant in Variant::ALL {
            let runtime = expressive_runtime.clone();
            let probe_runtime = expressive_runtime.clone();
            let mut defaults = ParamValues::new();
            defaults.insert("variant".to_string(), ParamValue::from(variant.as_str()));

            registry.register(
                EngineDescriptor::new(format!("expressive-{variant}"), variant.display_name(), move |spec| {
                    Ok(Box::new(ExpressiveEngine::from_spec(spec, runtime.clone())?) as Box<dyn SpeechEngine>)
                })
                .with_default_params(defaults)
                .with_probe(move || probe_runtime.probe()),
            );
        }

        registry
    }

    /// Register an engine. Re-registering an id replaces the earlier
    /// descriptor in place, keeping its position.
    pub fn register(&mut self, descriptor: EngineDescriptor) {
        match self.descriptors.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => {
                log::debug!("Replacing engine registration '{}'", descriptor.id);
                *existing = descriptor;
            }
            None => {
                log::debug!("Registered engine '{}' ({})", descriptor.id, descriptor.display_name);
                self.descriptors.push(descriptor);
            }
        }
    }

    /// Construct an instance of engine `id`.
    ///
    /// `overrides` may only name parameters the descriptor declares in its
    /// defaults; any other key is [`ConfigurationError::UnknownParameter`] and
    /// the constructor is not called.
    pub fn create(
        &self,
        id: &str,
        reference: &Path,
        device: Device,
        overrides: &ParamValues,
    ) -> Result<Box<dyn SpeechEngine>> {
        let descriptor = self.descriptor(id).ok_or_else(|| self.unknown(id))?;

        if let Some(key) = overrides.keys().find(|k| !descriptor.default_params.contains_key(*k)) {
            return Err(ConfigurationError::UnknownParameter { key: key.clone() }.into());
        }

        let mut params = descriptor.default_params.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        log::info!("Creating engine '{id}' on {device}");
        (descriptor.constructor)(EngineSpec {
            reference: reference.to_path_buf(),
            device,
            params,
        })
    }

    /// Whether the engine's runtime can be used. Never fails: an unknown id,
    /// a failing probe or a panicking probe all yield `false`.
    pub fn is_available(&self, id: &str) -> bool {
        let Some(descriptor) = self.descriptor(id) else {
            return false;
        };
        let Some(probe) = &descriptor.probe else {
            return true;
        };

        match catch_unwind(AssertUnwindSafe(|| probe())) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::debug!("Engine '{id}' unavailable: {e}");
                false
            }
            Err(_) => {
                log::warn!("Availability probe for engine '{id}' panicked");
                false
            }
        }
    }

    /// Registered ids in registration order.
    pub fn available_engines(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }

    /// The descriptor registered under `id`, if any.
    pub fn descriptor(&self, id: &str) -> Option<&EngineDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Human-readable name of engine `id`.
    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.descriptor(id).map(|d| d.display_name.as_str())
    }

    /// `(id, display name)` pairs in registration order.
    pub fn engine_info(&self) -> Vec<(String, String)> {
        self.descriptors
            .iter()
            .map(|d| (d.id.clone(), d.display_name.clone()))
            .collect()
    }

    /// Whether `id` is registered. Says nothing about availability.
    pub fn contains(&self, id: &str) -> bool {
        self.descriptor(id).is_some()
    }

    /// Number of registered engines.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn unknown(&self, id: &str) -> crate::Error {
        ConfigurationError::UnknownEngine {
            id: id.to_string(),
            available: self.available_engines(),
        }
        .into()
    }
}
