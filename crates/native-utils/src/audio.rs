use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of the raw PCM16 audio returned by the speech synthesis endpoint.
pub const SPEECH_PCM16_SAMPLE_RATE: u32 = 24_000;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Mono f32 samples together with the rate they were recorded or rendered at.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the clip in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits a slice of audio samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Resamples a whole mono clip from `from_rate` to `to_rate`.
///
/// The output holds exactly `len * to_rate / from_rate` samples: the resampler's
/// delay is skipped and the tail is flushed with silence.
pub fn resample(samples: &[f32], from_rate: f64, to_rate: f64) -> anyhow::Result<Vec<f32>> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if !(from_rate > 0.0 && to_rate > 0.0) {
        anyhow::bail!("Invalid sample rates: {} -> {}", from_rate, to_rate);
    }

    let mut resampler = create_resampler(from_rate, to_rate, RESAMPLE_CHUNK_SIZE)?;
    let expected = (samples.len() as f64 * to_rate / from_rate).round() as usize;
    let delay = resampler.output_delay();
    let chunk_size = resampler.input_frames_next();

    let mut out = Vec::with_capacity(expected + delay);
    for chunk in split_for_chunks(samples, chunk_size) {
        let frames = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(frames) = frames.first() {
            out.extend_from_slice(frames);
        }
    }

    let silence = vec![0.0; chunk_size];
    while out.len() < expected + delay {
        let frames = resampler.process(&[silence.as_slice()], None)?;
        match frames.first() {
            Some(frames) if !frames.is_empty() => out.extend_from_slice(frames),
            _ => break,
        }
    }

    tracing::debug!(
        "Resampled {} samples ({} Hz) to {} samples ({} Hz)",
        samples.len(),
        from_rate,
        expected,
        to_rate
    );
    Ok(out.into_iter().skip(delay).take(expected).collect())
}

/// Changes playback speed by reinterpreting the clip at `sample_rate * speed`
/// and resampling it back to `sample_rate`. The output holds `len / speed`
/// samples at the original rate.
pub fn time_stretch(samples: &[f32], sample_rate: u32, speed: f64) -> anyhow::Result<Vec<f32>> {
    if !(speed.is_finite() && speed > 0.0) {
        anyhow::bail!("Playback speed must be positive, got {}", speed);
    }
    let rate = sample_rate as f64;
    resample(samples, rate * speed, rate)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Interprets little-endian PCM16 bytes as normalized f32 samples. A trailing odd byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    let pcm16: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    convert_i16_to_f32(&pcm16)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_time_stretch_double_speed_halves_length() -> anyhow::Result<()> {
        // Arrange
        let samples = tone(24_000, SPEECH_PCM16_SAMPLE_RATE);

        // Act
        let stretched = time_stretch(&samples, SPEECH_PCM16_SAMPLE_RATE, 2.0)?;

        // Assert
        assert_eq!(stretched.len(), 12_000);
        Ok(())
    }

    #[test]
    fn test_time_stretch_slow_speed_lengthens_clip() -> anyhow::Result<()> {
        let samples = tone(12_000, SPEECH_PCM16_SAMPLE_RATE);

        let stretched = time_stretch(&samples, SPEECH_PCM16_SAMPLE_RATE, 0.8)?;

        assert_eq!(stretched.len(), 15_000);
        Ok(())
    }

    #[test]
    fn test_time_stretch_rejects_non_positive_speed() {
        let samples = tone(100, SPEECH_PCM16_SAMPLE_RATE);
        assert!(time_stretch(&samples, SPEECH_PCM16_SAMPLE_RATE, 0.0).is_err());
        assert!(time_stretch(&samples, SPEECH_PCM16_SAMPLE_RATE, f64::NAN).is_err());
    }

    #[test]
    fn test_resample_same_rate_is_identity() -> anyhow::Result<()> {
        let samples = tone(500, 16_000);
        assert_eq!(resample(&samples, 16_000.0, 16_000.0)?, samples);
        Ok(())
    }

    #[test]
    fn test_downmix_averages_stereo_frames() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, -0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5, -0.75]);
    }

    #[test]
    fn test_pcm16_from_le_bytes_drops_trailing_byte() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x7F];
        let samples = pcm16_from_le_bytes(&bytes);
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn test_pcm_audio_duration() {
        let audio = PcmAudio::new(vec![0.0; 12_000], SPEECH_PCM16_SAMPLE_RATE);
        assert_eq!(audio.duration_ms(), 500);
        assert!(!audio.is_empty());
    }
}
