use crate::config::MIN_CAPTURE_MS;
use crate::console::ConsoleReader;
use anyhow::Result;
use async_trait::async_trait;
use eikaiwa_core::speech::AudioDevice;
use eikaiwa_native_utils::audio::PcmAudio;
use eikaiwa_native_utils::{capture, device, playback};
use std::sync::Arc;
use tracing::{debug, info};

/// Microphone and speaker access through cpal.
///
/// Recording runs until the learner presses Enter on the console.
pub struct CpalAudioDevice {
    input_device: Option<String>,
    output_device: Option<String>,
    console: Arc<ConsoleReader>,
}

impl CpalAudioDevice {
    pub fn new(
        input_device: Option<String>,
        output_device: Option<String>,
        console: Arc<ConsoleReader>,
    ) -> Self {
        Self {
            input_device,
            output_device,
            console,
        }
    }
}

/// `None` when the clip is too short to hold speech.
fn keep_if_long_enough(audio: PcmAudio) -> Option<PcmAudio> {
    if audio.duration_ms() < MIN_CAPTURE_MS {
        None
    } else {
        Some(audio)
    }
}

/// Text typed to stop a recording is not run as a command; say so.
fn stop_line_notice(line: Option<&str>) -> Option<String> {
    match line.map(str::trim) {
        Some(text) if !text.is_empty() => Some(format!(
            "「{text}」は録音の停止に使われました。必要ならもう一度入力してください。"
        )),
        _ => None,
    }
}

#[async_trait]
impl AudioDevice for CpalAudioDevice {
    async fn capture(&self) -> Result<Option<PcmAudio>> {
        let input = device::get_or_default_input(self.input_device.clone())?;
        let handle = capture::start_capture(input)?;
        println!("● 録音中... Enter で停止");

        // Any line, including end of input, ends the recording.
        let line = self.console.read_line().await?;
        debug!("Recording stopped by console line {:?}", line);
        if let Some(notice) = stop_line_notice(line.as_deref()) {
            println!("{notice}");
        }
        let audio = tokio::task::spawn_blocking(move || handle.stop()).await??;
        debug!("Captured {} ms of audio", audio.duration_ms());

        let kept = keep_if_long_enough(audio);
        if kept.is_none() {
            info!("Capture shorter than {} ms, treating it as empty", MIN_CAPTURE_MS);
        }
        Ok(kept)
    }

    async fn play(&self, audio: PcmAudio) -> Result<()> {
        let output_device = self.output_device.clone();
        tokio::task::spawn_blocking(move || {
            let output = device::get_or_default_output(output_device)?;
            playback::play_blocking(&output, &audio)
        })
        .await?
    }
}
