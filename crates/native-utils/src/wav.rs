use crate::audio::{PcmAudio, convert_f32_to_i16, downmix};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Writes mono audio as a 16-bit PCM WAV file, replacing whatever is at `path`.
pub fn write_wav(path: &Path, audio: &PcmAudio) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for sample in convert_f32_to_i16(&audio.samples) {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;
    Ok(())
}

/// Reads a WAV file into mono f32 samples. Multi-channel files are downmixed.
pub fn read_wav(path: &Path) -> Result<PcmAudio> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits) if (8..=32).contains(&bits) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => anyhow::bail!("Unsupported WAV format: {:?} {}-bit", format, bits),
    };

    Ok(PcmAudio::new(
        downmix(&interleaved, spec.channels as usize),
        spec.sample_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_keeps_rate_and_length() -> Result<()> {
        // Arrange
        let dir = tempdir()?;
        let path = dir.path().join("clip.wav");
        let audio = PcmAudio::new(vec![0.0, 0.25, -0.25, 0.5], 16_000);

        // Act
        write_wav(&path, &audio)?;
        let read = read_wav(&path)?;

        // Assert
        assert_eq!(read.sample_rate, 16_000);
        assert_eq!(read.samples.len(), 4);
        assert!((read.samples[1] - 0.25).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_read_stereo_float_is_downmixed() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec)?;
        for sample in [1.0_f32, 0.0, 0.5, 0.5] {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        let read = read_wav(&path)?;

        assert_eq!(read.samples, vec![0.5, 0.5]);
        assert_eq!(read.sample_rate, 48_000);
        Ok(())
    }

    #[test]
    fn test_read_missing_file_fails() {
        assert!(read_wav(Path::new("no_such_clip.wav")).is_err());
    }
}
