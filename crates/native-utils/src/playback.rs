use crate::audio::{PcmAudio, resample};
use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use std::sync::mpsc;
use std::time::Duration;

/// Extra time allowed past the clip's duration before playback is abandoned.
const PLAYBACK_GRACE_MS: u64 = 2000;
/// Time left for the device to drain its last buffer after the ring runs dry.
const DRAIN_MS: u64 = 150;

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Plays a mono clip on `device` and blocks until it has been played out.
pub fn play_blocking(device: &cpal::Device, audio: &PcmAudio) -> Result<()> {
    if audio.is_empty() {
        return Ok(());
    }
    let config = device
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_rate = config.sample_rate().0;
    let samples = resample(&audio.samples, audio.sample_rate as f64, output_rate as f64)?;
    tracing::debug!(
        "Playing {} samples ({} Hz) on a {}ch {}Hz stream",
        samples.len(),
        audio.sample_rate,
        config.channels(),
        output_rate
    );

    let (mut producer, consumer) = shared_buffer(samples.len().max(1)).split();
    let pushed = producer.push_slice(&samples);
    if pushed < samples.len() {
        tracing::warn!("Dropped {} samples that did not fit the playback buffer", samples.len() - pushed);
    }

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_output::<f32>(device, &config.into(), consumer, done_tx)?,
        cpal::SampleFormat::I16 => build_output::<i16>(device, &config.into(), consumer, done_tx)?,
        cpal::SampleFormat::U16 => build_output::<u16>(device, &config.into(), consumer, done_tx)?,
        format => return Err(anyhow!("Unsupported output sample format: {:?}", format)),
    };
    stream.play().context("Failed to start output stream")?;

    let timeout = Duration::from_millis(audio.duration_ms() + PLAYBACK_GRACE_MS);
    if done_rx.recv_timeout(timeout).is_err() {
        tracing::warn!("Playback did not finish within {:?}", timeout);
    }
    std::thread::sleep(Duration::from_millis(DRAIN_MS));
    Ok(())
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: impl Consumer<Item = f32> + Send + 'static,
    done_tx: mpsc::Sender<()>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut finished = false;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Every channel of a frame carries the same mono sample.
            for frame in data.chunks_mut(channels) {
                let sample = match consumer.try_pop() {
                    Some(sample) => sample,
                    None => {
                        if !finished {
                            finished = true;
                            let _ = done_tx.send(());
                        }
                        0.0
                    }
                };
                frame.fill(T::from_sample(sample));
            }
        },
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    Ok(stream)
}
