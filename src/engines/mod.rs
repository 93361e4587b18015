//! Speech synthesis engines.
//!
//! Engines validate their input and hand inference to a runtime (see [`runtime`]).
//!
//! # Available Engines
//!
//! - `multilingual` - broad language coverage, no paralinguistic tags
//! - `expressive` - English, fast/quality variants, tags on the fast variant

pub mod expressive;
pub mod multilingual;
pub mod runtime;

use std::path::Path;

use crate::error::{ResourceError, Result};

/// Reference audio must exist when an engine is built and when it generates.
pub(crate) fn ensure_reference(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ResourceError::MissingReference(path.to_path_buf()).into())
    }
}
