use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::AudioError;

/// A mono track of normalized `f32` samples (-1.0 to 1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioTrack {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    /// A silent track of the given length.
    pub fn silence(sample_rate: u32, duration_ms: u64) -> Self {
        let len = samples_for_ms(sample_rate, duration_ms);
        Self::new(sample_rate, vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in whole milliseconds (truncated).
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Decode a WAV file. Multi-channel input is averaged down to mono.
    pub fn from_wav(bytes: &[u8]) -> Result<Self, AudioError> {
        let reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
                .collect::<Result<_, _>>()?,
            (SampleFormat::Int, bits @ (8 | 24 | 32)) => {
                let scale = (1_i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
            (format, bits) => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{:?} {}-bit",
                    format, bits
                )))
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self::new(spec.sample_rate, samples))
    }

    /// Encode as 16-bit mono WAV. Identical tracks encode to identical bytes.
    pub fn to_wav(&self) -> Result<Vec<u8>, AudioError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buf = Vec::with_capacity(44 + self.samples.len() * 2);
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buf), spec)?;
            for s in &self.samples {
                writer.write_sample(quantize(*s))?;
            }
            writer.finalize()?;
        }
        Ok(buf)
    }

    /// Linear-interpolation resample. Returns a clone when the rate already matches.
    pub fn resample(&self, sample_rate: u32) -> AudioTrack {
        if sample_rate == self.sample_rate || self.samples.is_empty() || self.sample_rate == 0 {
            return AudioTrack::new(sample_rate, self.samples.clone());
        }
        let ratio = self.sample_rate as f64 / sample_rate as f64;
        let out_len = (self.samples.len() as u64 * sample_rate as u64 / self.sample_rate as u64) as usize;
        let last = self.samples.len() - 1;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = (pos - idx as f64) as f32;
                self.samples[idx] + (self.samples[next] - self.samples[idx]) * frac
            })
            .collect();
        AudioTrack::new(sample_rate, samples)
    }

    /// Wrap raw little-endian signed 16-bit mono PCM.
    pub fn from_pcm_s16le(sample_rate: u32, bytes: &[u8]) -> Result<Self, AudioError> {
        if bytes.len() % 2 != 0 {
            return Err(AudioError::InvalidPcm(format!(
                "odd byte count {} for 16-bit samples",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect();
        Ok(Self::new(sample_rate, samples))
    }
}

/// Number of samples covering `ms` milliseconds at `sample_rate`.
pub(crate) fn samples_for_ms(sample_rate: u32, ms: u64) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 / len as f32) - 0.5).collect()
    }

    #[test]
    fn test_duration() {
        let track = AudioTrack::new(16_000, vec![0.0; 24_000]);
        assert_eq!(track.duration_ms(), 1500);
        assert_eq!(AudioTrack::silence(8_000, 250).len(), 2_000);
    }

    #[test]
    fn test_wav_encode_decode() {
        let track = AudioTrack::new(8_000, ramp(800));
        let bytes = track.to_wav().unwrap();
        let decoded = AudioTrack::from_wav(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.len(), 800);
        for (a, b) in track.samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_wav_encoding_is_deterministic() {
        let track = AudioTrack::new(8_000, ramp(500));
        assert_eq!(track.to_wav().unwrap(), track.to_wav().unwrap());
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(i16::MAX).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let track = AudioTrack::from_wav(&buf).unwrap();
        assert_eq!(track.len(), 10);
        assert!((track.samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pcm_s16le() {
        let bytes = [0xff, 0x7f, 0x00, 0x00, 0x01, 0x80];
        let track = AudioTrack::from_pcm_s16le(22_050, &bytes).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.samples[0], 1.0);
        assert_eq!(track.samples[1], 0.0);
        assert_eq!(track.samples[2], -1.0);

        assert!(AudioTrack::from_pcm_s16le(22_050, &[0x00]).is_err());
    }

    #[test]
    fn test_resample_keeps_duration() {
        let track = AudioTrack::new(16_000, ramp(16_000));
        let down = track.resample(8_000);
        assert_eq!(down.sample_rate, 8_000);
        assert_eq!(down.len(), 8_000);
        assert_eq!(down.duration_ms(), track.duration_ms());
        assert_eq!(down.samples[10], track.samples[20]);

        let same = track.resample(16_000);
        assert_eq!(same, track);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(AudioTrack::from_wav(b"definitely not a wav file").is_err());
    }
}
