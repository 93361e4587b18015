//! Expressive voice-cloning engine with optional paralinguistic tags.
//!
//! Two variants share one model family:
//!
//! | Variant | Engine id | Tags |
//! |---|---|---|
//! | [`Variant::Fast`] | `expressive-fast` | `[laugh]`, `[chuckle]`, `[cough]`, `[sigh]`, `[gasp]`, `[yawn]` |
//! | [`Variant::Quality`] | `expressive-quality` | none |
//!
//! Text containing a `[tag]` token is rejected by the quality variant; the fast
//! variant rejects tags outside its set and names them in the message.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voicecast::engines::expressive::{ExpressiveEngine, Variant};
//! use voicecast::engines::runtime::CommandRuntime;
//! use voicecast::{Device, SpeechEngine};
//!
//! let runtime = Arc::new(CommandRuntime::new("expressive", "voicecast-expressive"));
//! let mut engine = ExpressiveEngine::new("voices/ref.wav", Device::Cpu, Variant::Fast, runtime)?;
//! assert!(engine.validate_text("So [chuckle] anyway").unwrap().valid);
//!
//! let params = engine.supported_parameters().defaults();
//! let result = engine.generate("So [chuckle] anyway", "en", &params)?;
//! println!("{} samples at {} Hz", result.samples.len(), result.sample_rate);
//! # Ok::<(), voicecast::Error>(())
//! ```

pub mod engine;
pub mod tags;

pub use engine::{ExpressiveEngine, Variant};
pub use tags::{scan_tags, TagPolicy, PARALINGUISTIC_TAGS};
