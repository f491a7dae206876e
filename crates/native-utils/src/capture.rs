use crate::audio::{PcmAudio, downmix};
use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

/// A microphone recording in progress.
///
/// The cpal stream lives on its own thread because streams are not `Send` on
/// every host. Dropping the handle without calling [`CaptureHandle::stop`]
/// ends the recording and discards the samples.
pub struct CaptureHandle {
    stop_tx: mpsc::Sender<()>,
    worker: JoinHandle<Result<PcmAudio>>,
}

impl CaptureHandle {
    /// Stops the stream and returns everything recorded, downmixed to mono.
    pub fn stop(self) -> Result<PcmAudio> {
        // The worker also stops when the sender is dropped.
        let _ = self.stop_tx.send(());
        self.worker
            .join()
            .map_err(|_| anyhow!("Audio capture thread panicked"))?
    }
}

/// Starts recording from `device` with its default input config.
pub fn start_capture(device: cpal::Device) -> Result<CaptureHandle> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let worker = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || -> Result<PcmAudio> {
            let recorded = Arc::new(Mutex::new(Vec::<f32>::new()));
            let (stream, sample_rate) = match open_stream(&device, recorded.clone()) {
                Ok(opened) => {
                    let _ = ready_tx.send(Ok(()));
                    opened
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return Err(anyhow!("Input stream failed to start"));
                }
            };

            let _ = stop_rx.recv();
            drop(stream);

            let samples = std::mem::take(
                &mut *recorded
                    .lock()
                    .map_err(|_| anyhow!("Capture buffer lock poisoned"))?,
            );
            tracing::debug!("Captured {} samples at {} Hz", samples.len(), sample_rate);
            Ok(PcmAudio::new(samples, sample_rate))
        })
        .context("Failed to spawn audio capture thread")?;

    ready_rx
        .recv()
        .context("Audio capture thread exited before starting")??;

    Ok(CaptureHandle { stop_tx, worker })
}

fn open_stream(device: &cpal::Device, sink: Arc<Mutex<Vec<f32>>>) -> Result<(cpal::Stream, u32)> {
    let config = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let sample_rate = config.sample_rate().0;
    tracing::info!(
        "Input stream config: {}ch, {}Hz, {:?}",
        config.channels(),
        sample_rate,
        config.sample_format()
    );

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_input::<f32>(device, &config.into(), sink)?,
        cpal::SampleFormat::I16 => build_input::<i16>(device, &config.into(), sink)?,
        cpal::SampleFormat::U16 => build_input::<u16>(device, &config.into(), sink)?,
        format => return Err(anyhow!("Unsupported input sample format: {:?}", format)),
    };
    stream.play().context("Failed to start input stream")?;
    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
            if let Ok(mut recorded) = sink.lock() {
                recorded.extend(downmix(&samples, channels));
            }
        },
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    Ok(stream)
}
