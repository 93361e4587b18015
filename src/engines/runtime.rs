//! Boundary to the inference runtimes that actually run the neural models.
//!
//! The engines in this crate do not run inference themselves. They hand the
//! work to an [`InferenceRuntime`], which loads a model once and returns a
//! [`LoadedModel`] handle that is reused for every request.
//!
//! [`CommandRuntime`] is the stock implementation: it drives a runtime program
//! over newline-delimited JSON on stdin/stdout.
//!
//! # Runtime program protocol
//!
//! ```text
//! <program> --version                              exit 0 when the runtime is usable
//! <program> serve --model <model> --device <dev>   long-lived; one model per process
//!
//! runtime -> host   {"sample_rate": 24000}         once the model is loaded
//! host -> runtime   {"text": "...", "language": "en", "reference": "/voice.wav",
//!                    "params": {...}, "output": "/tmp/.tmpXXXX.wav"}
//! runtime -> host   {"status": "ok"} | {"status": "error", "message": "..."}
//! ```
//!
//! The runtime writes the audio for each request to `output` as a WAV file.
//! Those scratch files are owned by the host and removed after decoding, on
//! success and failure alike.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DependencyError, EngineError, ResourceError, Result};
use crate::params::ParamValues;
use crate::{Device, SynthesisResult};

/// Everything a loaded model needs for one synthesis call.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub reference: &'a Path,
    pub params: &'a ParamValues,
}

/// A runtime capable of loading models.
pub trait InferenceRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Check that the runtime can be used, without loading a model.
    fn probe(&self) -> Result<()>;

    /// Load `model` on `device`. Called at most once per successful engine lifetime.
    fn load(&self, model: &str, device: Device) -> Result<Box<dyn LoadedModel>>;
}

/// A model handle that stays resident between requests.
pub trait LoadedModel: Send {
    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<SynthesisResult>;
}

/// Observable lifecycle state of a [`ModelSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
}

enum ModelState {
    Unloaded,
    Loading,
    Ready(Box<dyn LoadedModel>),
}

/// Lazily loaded model handle with an explicit lifecycle.
///
/// `Unloaded -> Loading -> Ready`. A failed load drops back to `Unloaded` so a
/// later request can retry once the runtime is installed. The slot is owned by
/// one engine and only ever touched from the worker thread.
pub struct ModelSlot {
    runtime: Arc<dyn InferenceRuntime>,
    model: String,
    device: Device,
    state: ModelState,
}

impl ModelSlot {
    /// An unloaded slot. Nothing touches the runtime until [`get_or_load`](Self::get_or_load).
    pub fn new(runtime: Arc<dyn InferenceRuntime>, model: impl Into<String>, device: Device) -> Self {
        Self {
            runtime,
            model: model.into(),
            device,
            state: ModelState::Unloaded,
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.state {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
        }
    }

    /// The loaded model, loading it first if needed.
    pub fn get_or_load(&mut self) -> Result<&mut dyn LoadedModel> {
        if matches!(self.state, ModelState::Unloaded) {
            log::info!(
                "Loading model '{}' on {} via runtime '{}'",
                self.model,
                self.device,
                self.runtime.name()
            );
            self.state = ModelState::Loading;
            match self.runtime.load(&self.model, self.device) {
                Ok(handle) => {
                    log::info!("Model '{}' loaded", self.model);
                    self.state = ModelState::Ready(handle);
                }
                Err(e) => {
                    log::error!("Loading model '{}' failed: {e}", self.model);
                    self.state = ModelState::Unloaded;
                    return Err(e);
                }
            }
        }

        match &mut self.state {
            ModelState::Ready(handle) => Ok(handle.as_mut()),
            _ => Err(EngineError::GenerationFailed(format!("model '{}' is not ready", self.model)).into()),
        }
    }
}

/// Runtime implemented by an external program (see module docs for the protocol).
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    name: String,
    program: PathBuf,
}

impl CommandRuntime {
    /// `name` appears in errors; `program` is started once per loaded model.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }

    fn unavailable(&self, message: impl Into<String>) -> crate::Error {
        DependencyError::RuntimeUnavailable {
            runtime: self.name.clone(),
            message: message.into(),
        }
        .into()
    }

    fn load_failed(&self, message: impl Into<String>) -> crate::Error {
        DependencyError::LoadFailed {
            runtime: self.name.clone(),
            message: message.into(),
        }
        .into()
    }
}

impl InferenceRuntime for CommandRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.unavailable(format!("cannot run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            return Err(self.unavailable(format!(
                "{} --version exited with code {:?}",
                self.program.display(),
                output.status.code()
            )));
        }
        Ok(())
    }

    fn load(&self, model: &str, device: Device) -> Result<Box<dyn LoadedModel>> {
        let mut child = Command::new(&self.program)
            .args(["serve", "--model", model, "--device", device.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.unavailable(format!("cannot run {}: {e}", self.program.display())))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(self.load_failed("runtime stdio was not captured"));
        };
        let mut stdout = BufReader::new(stdout);

        let ready: ReadyLine = match read_json_line(&mut stdout) {
            Ok(Some(line)) => line,
            Ok(None) => {
                reap(&mut child);
                return Err(self.load_failed("runtime exited before reporting ready"));
            }
            Err(message) => {
                reap(&mut child);
                return Err(self.load_failed(message));
            }
        };
        if ready.sample_rate == 0 {
            reap(&mut child);
            return Err(self.load_failed("runtime reported a sample rate of 0"));
        }

        log::debug!(
            "Runtime '{}' ready with model '{model}' at {} Hz",
            self.name,
            ready.sample_rate
        );

        Ok(Box::new(CommandModel {
            runtime: self.name.clone(),
            child,
            stdin: Some(stdin),
            stdout,
        }))
    }
}

#[derive(Deserialize)]
struct ReadyLine {
    sample_rate: u32,
}

#[derive(Serialize)]
struct RequestLine<'a> {
    #[serde(flatten)]
    request: &'a SynthesisRequest<'a>,
    output: &'a Path,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ReplyLine {
    Ok,
    Error { message: String },
}

struct CommandModel {
    runtime: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl CommandModel {
    fn failed(&self, message: impl std::fmt::Display) -> crate::Error {
        EngineError::GenerationFailed(format!("runtime '{}': {message}", self.runtime)).into()
    }
}

impl LoadedModel for CommandModel {
    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<SynthesisResult> {
        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("voicecast-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| ResourceError::io(std::env::temp_dir(), e))?;

        let line = serde_json::to_string(&RequestLine {
            request,
            output: scratch.path(),
        })
        .map_err(|e| self.failed(e))?;

        let stdin = match self.stdin.as_mut() {
            Some(stdin) => stdin,
            None => return Err(self.failed("runtime input is closed")),
        };
        if let Err(e) = writeln!(stdin, "{line}").and_then(|_| stdin.flush()) {
            return Err(self.failed(format!("cannot send request: {e}")));
        }

        match read_json_line::<ReplyLine>(&mut self.stdout) {
            Ok(Some(ReplyLine::Ok)) => {}
            Ok(Some(ReplyLine::Error { message })) => return Err(self.failed(message)),
            Ok(None) => return Err(self.failed("runtime exited during generation")),
            Err(message) => return Err(self.failed(message)),
        }

        SynthesisResult::read_wav(scratch.path())
    }
}

impl Drop for CommandModel {
    fn drop(&mut self) {
        // Closing stdin lets a well-behaved runtime exit on its own.
        self.stdin.take();
        reap(&mut self.child);
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("Runtime process already exited: {e}");
    }
    let _ = child.wait();
}

/// Read one JSON line. `Ok(None)` on EOF.
fn read_json_line<T: DeserializeOwned>(reader: &mut impl BufRead) -> std::result::Result<Option<T>, String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| format!("cannot read runtime output: {e}"))?;
        if n == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }
    serde_json::from_str(line.trim())
        .map(Some)
        .map_err(|e| format!("malformed runtime output {:?}: {e}", line.trim()))
}
