//! Routing of generated audio to storage and playback.
//!
//! # Playback speed
//!
//! Speed is applied by playing the samples at `sample_rate * speed` without
//! resampling. A speed of 2.0 halves the duration and raises the pitch by an
//! octave. This is the long-standing behavior of the tool and is kept as is;
//! true time-stretching would need a resampler.

use std::io::BufWriter;
use std::path::Path;

use crate::error::{ConfigurationError, DependencyError, ResourceError, Result};
use crate::SynthesisResult;

/// An audio output that can play a buffer to completion.
pub trait PlaybackDevice: Send {
    /// Play mono `samples` at `sample_rate`, blocking until the device is done.
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Rate at which samples are handed to the device for a given speed.
///
/// `None` when the result is not a positive rate that fits in a `u32`, e.g. a
/// speed so small that the rate truncates to 0 Hz.
pub fn effective_playback_rate(sample_rate: u32, speed: f32) -> Option<u32> {
    let rate = (sample_rate as f64 * speed as f64).trunc();
    if rate.is_finite() && rate >= 1.0 && rate <= u32::MAX as f64 {
        Some(rate as u32)
    } else {
        None
    }
}

/// The device used when none is supplied: the default sound card when built
/// with the `playback` feature, nothing otherwise.
pub fn default_playback() -> Option<Box<dyn PlaybackDevice>> {
    #[cfg(feature = "playback")]
    {
        Some(Box::new(cpal_device::CpalPlayback::new()))
    }
    #[cfg(not(feature = "playback"))]
    {
        None
    }
}

/// Persists and plays generated audio. Owned by the synthesis worker.
pub struct OutputSink {
    device: Option<Box<dyn PlaybackDevice>>,
}

impl OutputSink {
    /// A sink playing through `device`, if any.
    pub fn new(device: Option<Box<dyn PlaybackDevice>>) -> Self {
        Self { device }
    }

    pub fn without_playback() -> Self {
        Self { device: None }
    }

    pub fn has_playback(&self) -> bool {
        self.device.is_some()
    }

    /// Write `audio` to `path` as a 32-bit float WAV, creating parent directories.
    ///
    /// The file is written next to its destination and renamed into place, so
    /// `path` either keeps its previous content or holds the complete new file.
    /// The scratch file is removed on every failure path.
    pub fn persist(&self, audio: &SynthesisResult, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| ResourceError::io(parent, e))?;

        let mut scratch = tempfile::Builder::new()
            .prefix(".voicecast-")
            .suffix(".wav.part")
            .tempfile_in(parent)
            .map_err(|e| ResourceError::io(parent, e))?;

        audio
            .write_wav_to(BufWriter::new(scratch.as_file_mut()))
            .map_err(|e| match e {
                hound::Error::IoError(source) => ResourceError::io(path, source),
                other => ResourceError::io(path, std::io::Error::other(other.to_string())),
            })?;

        scratch
            .persist(path)
            .map_err(|e| ResourceError::io(path, e.error))?;

        log::info!(
            "Saved {:.2}s of audio to {}",
            audio.duration_secs(),
            path.display()
        );
        Ok(())
    }

    /// Play `audio` at `speed`, returning the rate it was played at.
    ///
    /// Fails with [`ConfigurationError::InvalidSpeed`] before touching the
    /// device when `speed` does not give a usable rate for this audio.
    pub fn play(&mut self, audio: &SynthesisResult, speed: f32) -> Result<u32> {
        let device = self.device.as_mut().ok_or_else(|| {
            DependencyError::PlaybackUnavailable("no playback device configured".to_string())
        })?;

        let rate = effective_playback_rate(audio.sample_rate, speed)
            .ok_or(ConfigurationError::InvalidSpeed(speed))?;
        log::info!(
            "Playing at {rate} Hz ({} Hz x {speed})",
            audio.sample_rate
        );
        device.play(&audio.samples, rate)?;
        Ok(rate)
    }
}

#[cfg(feature = "playback")]
pub use cpal_device::CpalPlayback;

#[cfg(feature = "playback")]
mod cpal_device {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::PlaybackDevice;
    use crate::error::{DependencyError, Result};

    /// Plays through the host's default output device.
    #[derive(Debug, Default)]
    pub struct CpalPlayback;

    impl CpalPlayback {
        pub fn new() -> Self {
            Self
        }
    }

    fn unavailable(message: impl std::fmt::Display) -> crate::Error {
        DependencyError::PlaybackUnavailable(message.to_string()).into()
    }

    impl PlaybackDevice for CpalPlayback {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
            if samples.is_empty() {
                return Ok(());
            }

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| unavailable("no audio output device"))?;

            // The rate must be honored exactly; it carries the speed setting.
            let config = device
                .supported_output_configs()
                .map_err(unavailable)?
                .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
                .find(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
                .map(|c| c.with_sample_rate(cpal::SampleRate(sample_rate)))
                .ok_or_else(|| unavailable(format!("output device cannot play at {sample_rate} Hz")))?;

            let channels = config.channels().max(1) as usize;
            let samples: Arc<Vec<f32>> = Arc::new(samples.to_vec());
            let position = Arc::new(AtomicUsize::new(0));
            let finished = Arc::new(AtomicBool::new(false));

            let stream = {
                let samples = Arc::clone(&samples);
                let position = Arc::clone(&position);
                let finished = Arc::clone(&finished);
                device
                    .build_output_stream(
                        &config.into(),
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            for frame in data.chunks_mut(channels) {
                                let pos = position.load(Ordering::Relaxed);
                                let sample = match samples.get(pos) {
                                    Some(&s) => {
                                        position.store(pos + 1, Ordering::Relaxed);
                                        s
                                    }
                                    None => {
                                        finished.store(true, Ordering::Release);
                                        0.0
                                    }
                                };
                                frame.fill(sample);
                            }
                        },
                        |err| log::error!("Audio playback error: {err}"),
                        None,
                    )
                    .map_err(unavailable)?
            };
            stream.play().map_err(unavailable)?;

            let deadline = Instant::now()
                + Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
                + Duration::from_millis(500);
            while !finished.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            // Let the device drain its last buffer.
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingDevice {
        played: Arc<Mutex<Vec<(usize, u32)>>>,
    }

    impl PlaybackDevice for RecordingDevice {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
            self.played.lock().unwrap().push((samples.len(), sample_rate));
            Ok(())
        }
    }

    fn tone() -> SynthesisResult {
        SynthesisResult {
            samples: (0..2205).map(|i| (i as f32 * 0.01).sin()).collect(),
            sample_rate: 22050,
        }
    }

    #[test]
    fn double_speed_doubles_the_rate() {
        assert_eq!(effective_playback_rate(24000, 2.0), Some(48000));
        assert_eq!(effective_playback_rate(22050, 1.0), Some(22050));
        assert_eq!(effective_playback_rate(24000, 0.5), Some(12000));
    }

    #[test]
    fn rates_outside_u32_are_rejected() {
        assert_eq!(effective_playback_rate(16000, 1e-5), None);
        assert_eq!(effective_playback_rate(16000, 0.0), None);
        assert_eq!(effective_playback_rate(u32::MAX, 2.0), None);
        assert_eq!(effective_playback_rate(16000, f32::INFINITY), None);
        assert_eq!(effective_playback_rate(16000, 1.0 / 16000.0), Some(1));
    }

    #[test]
    fn unusable_speed_never_reaches_the_device() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let mut sink = OutputSink::new(Some(Box::new(RecordingDevice {
            played: played.clone(),
        })));

        let err = sink.play(&tone(), 1e-5).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Configuration(ConfigurationError::InvalidSpeed(_))
        ));
        assert!(played.lock().unwrap().is_empty());
    }

    #[test]
    fn persist_creates_directories_and_keeps_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.wav");
        let audio = tone();

        OutputSink::without_playback().persist(&audio, &path).unwrap();

        let decoded = SynthesisResult::read_wav(&path).unwrap();
        assert_eq!(decoded.sample_rate, audio.sample_rate);
        assert_eq!(decoded.samples.len(), audio.samples.len());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("out.wav")]);
    }

    #[test]
    fn persist_into_a_file_path_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let err = OutputSink::without_playback()
            .persist(&tone(), &blocker.join("out.wav"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Resource(ResourceError::IoFailure { .. })
        ));
    }

    #[test]
    fn failed_rename_removes_the_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken.wav");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = OutputSink::without_playback()
            .persist(&tone(), &target)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Resource(ResourceError::IoFailure { .. })
        ));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["taken.wav".to_string()]);
        assert!(target.join("keep").is_file());
    }

    #[test]
    fn play_uses_the_effective_rate() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let mut sink = OutputSink::new(Some(Box::new(RecordingDevice {
            played: played.clone(),
        })));
        assert!(sink.has_playback());

        let rate = sink.play(&tone(), 2.0).unwrap();
        assert_eq!(rate, 44100);
        assert_eq!(*played.lock().unwrap(), vec![(2205, 44100)]);
    }

    #[test]
    fn play_without_device_is_dependency_error() {
        let err = OutputSink::without_playback().play(&tone(), 1.0).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Dependency(DependencyError::PlaybackUnavailable(_))
        ));
    }
}
