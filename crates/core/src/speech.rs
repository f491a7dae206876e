//! Speech in and out: microphone capture, remote transcription, remote
//! synthesis and local playback.
//!
//! Every scratch file lives in a [`NamedTempFile`], so it is removed when the
//! owning value drops, whichever way the call exits.

use crate::session::PlaybackSpeed;
use crate::voice::Voice;
use anyhow::{Context, Result};
use async_trait::async_trait;
use eikaiwa_native_utils::audio::{PcmAudio, SPEECH_PCM16_SAMPLE_RATE, pcm16_from_le_bytes, time_stretch};
use eikaiwa_native_utils::wav::{read_wav, write_wav};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Remote speech services.
#[async_trait]
pub trait SpeechApi: Send + Sync {
    /// Transcribes an English WAV file.
    async fn transcribe(&self, audio: &Path) -> Result<String>;
    /// Synthesizes `text`, returning raw 24 kHz little-endian PCM16.
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>>;
}

/// Local audio hardware.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Records one utterance. `None` when the learner recorded nothing.
    async fn capture(&self) -> Result<Option<PcmAudio>>;
    /// Plays `audio` to completion.
    async fn play(&self, audio: PcmAudio) -> Result<()>;
}

#[async_trait]
pub trait SpeechBridge: Send + Sync {
    /// `None` means the capture was empty and the activation should stop.
    async fn record(&self) -> Result<Option<AudioClip>>;
    /// Consumes the clip; its scratch file is gone once this returns.
    async fn transcribe(&self, clip: AudioClip) -> Result<String>;
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<PcmAudio>;
    async fn playback(&self, audio: PcmAudio, speed: PlaybackSpeed) -> Result<()>;
}

/// A recorded utterance in the input scratch directory.
#[derive(Debug)]
pub struct AudioClip {
    file: NamedTempFile,
}

impl AudioClip {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug, Clone)]
pub struct ScratchDirs {
    input: PathBuf,
    output: PathBuf,
}

impl ScratchDirs {
    /// Creates both directories if they do not exist yet.
    pub fn create(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Result<Self> {
        let dirs = Self {
            input: input.into(),
            output: output.into(),
        };
        for dir in [&dirs.input, &dirs.output] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create scratch directory: {}", dir.display()))?;
        }
        Ok(dirs)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn input_file(&self) -> Result<NamedTempFile> {
        Self::wav_in(&self.input, "audio_input_")
    }

    pub fn output_file(&self) -> Result<NamedTempFile> {
        Self::wav_in(&self.output, "audio_output_")
    }

    fn wav_in(dir: &Path, prefix: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".wav")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create scratch file in {}", dir.display()))
    }
}

pub struct LocalSpeechBridge {
    api: Arc<dyn SpeechApi>,
    device: Arc<dyn AudioDevice>,
    scratch: ScratchDirs,
}

impl LocalSpeechBridge {
    pub fn new(api: Arc<dyn SpeechApi>, device: Arc<dyn AudioDevice>, scratch: ScratchDirs) -> Self {
        Self {
            api,
            device,
            scratch,
        }
    }
}

#[async_trait]
impl SpeechBridge for LocalSpeechBridge {
    async fn record(&self) -> Result<Option<AudioClip>> {
        let Some(audio) = self.device.capture().await? else {
            return Ok(None);
        };
        if audio.is_empty() {
            return Ok(None);
        }
        let file = self.scratch.input_file()?;
        write_wav(file.path(), &audio)?;
        tracing::debug!(
            "Recorded {} ms into {}",
            audio.duration_ms(),
            file.path().display()
        );
        Ok(Some(AudioClip::new(file)))
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let result = self.api.transcribe(clip.path()).await;
        drop(clip);
        let text = result.context("Transcription failed")?;
        Ok(text.trim().to_string())
    }

    async fn synthesize(&self, text: &str, voice: Voice) -> Result<PcmAudio> {
        let bytes = self
            .api
            .synthesize(text, voice)
            .await
            .context("Speech synthesis failed")?;
        tracing::debug!("Synthesized {} bytes with voice {}", bytes.len(), voice.as_str());
        Ok(PcmAudio::new(
            pcm16_from_le_bytes(&bytes),
            SPEECH_PCM16_SAMPLE_RATE,
        ))
    }

    async fn playback(&self, audio: PcmAudio, speed: PlaybackSpeed) -> Result<()> {
        let artifact = self.scratch.output_file()?;
        write_wav(artifact.path(), &audio)?;

        if !speed.is_nominal() {
            let stored = read_wav(artifact.path())?;
            let stretched = time_stretch(&stored.samples, stored.sample_rate, speed.value())?;
            write_wav(
                artifact.path(),
                &PcmAudio::new(stretched, stored.sample_rate),
            )?;
        }

        let clip = read_wav(artifact.path())?;
        self.device.play(clip).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeApi {
        fail: bool,
    }

    #[async_trait]
    impl SpeechApi for FakeApi {
        async fn transcribe(&self, audio: &Path) -> Result<String> {
            anyhow::ensure!(audio.exists(), "clip was removed before upload");
            if self.fail {
                anyhow::bail!("transcription service unavailable");
            }
            Ok("  I'd like a coffee.  ".to_string())
        }

        async fn synthesize(&self, _text: &str, _voice: Voice) -> Result<Vec<u8>> {
            Ok(vec![0x00, 0x40].repeat(24_000))
        }
    }

    #[derive(Default)]
    struct FakeDevice {
        recording: Option<PcmAudio>,
        played: Mutex<Vec<PcmAudio>>,
    }

    #[async_trait]
    impl AudioDevice for FakeDevice {
        async fn capture(&self) -> Result<Option<PcmAudio>> {
            Ok(self.recording.clone())
        }

        async fn play(&self, audio: PcmAudio) -> Result<()> {
            self.played.lock().unwrap().push(audio);
            Ok(())
        }
    }

    /// Output device that is gone by the time playback starts.
    struct FailingDevice;

    #[async_trait]
    impl AudioDevice for FailingDevice {
        async fn capture(&self) -> Result<Option<PcmAudio>> {
            Ok(None)
        }

        async fn play(&self, _audio: PcmAudio) -> Result<()> {
            anyhow::bail!("output device disconnected")
        }
    }

    fn file_count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    fn bridge(api: FakeApi, device: Arc<FakeDevice>, scratch: &ScratchDirs) -> LocalSpeechBridge {
        LocalSpeechBridge::new(Arc::new(api), device, scratch.clone())
    }

    #[tokio::test]
    async fn test_transcribe_deletes_clip_on_success() -> Result<()> {
        // Arrange
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("in"), root.path().join("out"))?;
        let device = Arc::new(FakeDevice {
            recording: Some(PcmAudio::new(vec![0.1; 1600], 16_000)),
            ..Default::default()
        });
        let bridge = bridge(FakeApi::default(), device, &scratch);

        // Act
        let clip = bridge.record().await?.expect("a clip");
        assert_eq!(file_count(scratch.input()), 1);
        let text = bridge.transcribe(clip).await?;

        // Assert
        assert_eq!(text, "I'd like a coffee.");
        assert_eq!(file_count(scratch.input()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_transcribe_deletes_clip_on_failure() -> Result<()> {
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("in"), root.path().join("out"))?;
        let device = Arc::new(FakeDevice {
            recording: Some(PcmAudio::new(vec![0.1; 1600], 16_000)),
            ..Default::default()
        });
        let api = FakeApi { fail: true };
        let bridge = bridge(api, device, &scratch);

        let clip = bridge.record().await?.expect("a clip");
        let result = bridge.transcribe(clip).await;

        assert!(result.is_err());
        assert_eq!(file_count(scratch.input()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_capture_records_nothing() -> Result<()> {
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("in"), root.path().join("out"))?;
        let silent = Arc::new(FakeDevice {
            recording: Some(PcmAudio::new(Vec::new(), 16_000)),
            ..Default::default()
        });
        let absent = Arc::new(FakeDevice::default());

        assert!(bridge(FakeApi::default(), silent, &scratch).record().await?.is_none());
        assert!(bridge(FakeApi::default(), absent, &scratch).record().await?.is_none());
        assert_eq!(file_count(scratch.input()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_playback_stretches_and_removes_artifact() -> Result<()> {
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("in"), root.path().join("out"))?;
        let device = Arc::new(FakeDevice::default());
        let bridge = bridge(FakeApi::default(), device.clone(), &scratch);

        let audio = bridge.synthesize("Hello!", Voice::Shimmer).await?;
        assert_eq!(audio.samples.len(), 24_000);
        bridge.playback(audio.clone(), PlaybackSpeed::new(2.0)?).await?;
        bridge.playback(audio, PlaybackSpeed::default()).await?;

        let played = device.played.lock().unwrap();
        assert_eq!(played[0].samples.len(), 12_000);
        assert_eq!(played[0].sample_rate, SPEECH_PCM16_SAMPLE_RATE);
        assert_eq!(played[1].samples.len(), 24_000);
        assert_eq!(file_count(scratch.output()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_playback_removes_artifact_when_device_fails() -> Result<()> {
        // Arrange
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("in"), root.path().join("out"))?;
        let bridge = LocalSpeechBridge::new(
            Arc::new(FakeApi::default()),
            Arc::new(FailingDevice),
            scratch.clone(),
        );
        let audio = bridge.synthesize("Nice to meet you.", Voice::Alloy).await?;

        // Act
        let stretched = bridge.playback(audio.clone(), PlaybackSpeed::new(1.5)?).await;
        let nominal = bridge.playback(audio, PlaybackSpeed::default()).await;

        // Assert
        assert!(stretched.is_err());
        assert!(nominal.is_err());
        assert_eq!(file_count(scratch.output()), 0);
        Ok(())
    }

    #[test]
    fn test_scratch_dirs_are_created() -> Result<()> {
        let root = tempdir()?;
        let scratch = ScratchDirs::create(root.path().join("a/input"), root.path().join("a/output"))?;

        assert!(scratch.input().is_dir());
        assert!(scratch.output().is_dir());
        let file = scratch.input_file()?;
        let name = file.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("audio_input_") && name.ends_with(".wav"));
        Ok(())
    }
}
