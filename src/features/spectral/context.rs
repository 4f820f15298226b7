//! Per-buffer analysis context
//!
//! Builds every derived artifact the decision core shares: the decimated and trimmed
//! samples, the selected tempo window, its magnitude spectrogram and the
//! harmonic/percussive split. Built once per analysis call and never persisted.
//!
//! # Window selection
//!
//! The tempo window is the loudest contiguous span of the configured length, found with a
//! moving sum over frame RMS energy. Tracks longer than twice the window take the first
//! window without searching; the search dominates latency on multi-minute tracks and the
//! opening minute is rarely unrepresentative. Tracks longer than the window never
//! transform the full track.

use super::hpss::{hpss, transient_split, HpssResult};
use super::stft::{stft_with_retry, Spectrogram};
use crate::config::{AdaptiveParams, AnalysisConfig};
use crate::error::AnalysisError;
use crate::io::audio_buffer::AudioBuffer;
use crate::preprocessing::resample::decimate;
use crate::preprocessing::silence::{frame_rms, trim_lead_in};

/// Location of the tempo analysis window inside the trimmed samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoWindow {
    /// First sample of the window
    pub start: usize,
    /// Window length in samples
    pub len: usize,
    /// The window covers the whole trimmed track
    pub full_track: bool,
}

/// Harmonic/percussive split in whichever domain was available
#[derive(Debug, Clone)]
pub enum Separation {
    /// Median-filter HPSS on the tempo-window spectrogram
    Spectral(HpssResult),
    /// Envelope transient split of the tempo-window samples
    TimeDomain {
        /// Sustained part of the signal
        harmonic: Vec<f32>,
        /// Transient part of the signal
        percussive: Vec<f32>,
    },
}

/// Cached front-end artifacts for one buffer
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    /// Decimated, trimmed mono samples
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Hop length shared by every frame-based feature
    pub hop_size: usize,
    /// Duration-dependent parameters
    pub params: AdaptiveParams,
    /// Selected tempo window
    pub window: TempoWindow,
    /// Magnitude spectrogram of the tempo window (absent when the transform failed)
    pub spectrum: Option<Spectrogram>,
    /// Harmonic/percussive split of the tempo window
    pub separation: Separation,
    /// The full-track transform was skipped because the track is longer than the window
    pub full_transform_skipped: bool,
}

impl AnalysisContext {
    /// Build the context for `buffer`
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` for an empty buffer, a zero sample rate, or a
    /// buffer that is empty once trimmed. The pipeline turns these into a zero-confidence
    /// result.
    pub fn build(buffer: &AudioBuffer, config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        if buffer.is_degenerate() {
            return Err(AnalysisError::InvalidInput(format!(
                "Cannot analyze {} samples at {} Hz",
                buffer.len(),
                buffer.sample_rate()
            )));
        }

        let source = match config.max_analysis_seconds {
            Some(limit) => buffer.truncated(limit),
            None => buffer.clone(),
        };
        let (decimated, sample_rate) = decimate(
            source.samples(),
            source.sample_rate(),
            config.analysis_sample_rate,
        );
        let samples = trim_lead_in(&decimated, sample_rate, config.trim_seconds).to_vec();
        if samples.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "No samples left after trimming".to_string(),
            ));
        }

        let duration = samples.len() as f32 / sample_rate as f32;
        let params = AdaptiveParams::for_duration(duration, config);
        let hop_size = config.hop_size;
        let window_len = ((params.tempo_window_seconds * sample_rate as f32) as usize).max(1);
        let full_transform_skipped = duration > params.tempo_window_seconds;

        let window = select_tempo_window(&samples, window_len, config.frame_size, hop_size);

        log::debug!(
            "Front-end: {:.2}s at {} Hz, tempo window {:.2}s at {:.2}s (full_track={}, skip_full={})",
            duration,
            sample_rate,
            window.len as f32 / sample_rate as f32,
            window.start as f32 / sample_rate as f32,
            window.full_track,
            full_transform_skipped
        );

        let window_samples = &samples[window.start..window.start + window.len];
        let spectrum = stft_with_retry(
            window_samples,
            sample_rate,
            config.frame_size,
            hop_size,
            config.min_frame_size,
        );

        let separation = match spectrum
            .as_ref()
            .map(|spec| hpss(spec, config.hpss_kernel, config.hpss_mask_power))
        {
            Some(Ok(split)) => Separation::Spectral(split),
            Some(Err(e)) => {
                log::warn!("HPSS failed ({}), using time-domain split", e);
                time_domain(window_samples, sample_rate)
            }
            None => {
                log::warn!("No spectrum available, using time-domain split");
                time_domain(window_samples, sample_rate)
            }
        };

        Ok(Self {
            hop_size: spectrum.as_ref().map(|s| s.hop_size).unwrap_or(hop_size),
            samples,
            sample_rate,
            params,
            window,
            spectrum,
            separation,
            full_transform_skipped,
        })
    }

    /// Trimmed track duration in seconds
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Samples of the tempo window
    pub fn window_samples(&self) -> &[f32] {
        &self.samples[self.window.start..self.window.start + self.window.len]
    }

    /// Offset of the tempo window in seconds
    pub fn window_offset_seconds(&self) -> f32 {
        self.window.start as f32 / self.sample_rate as f32
    }

    /// Harmonic magnitude spectrogram, when the spectral split succeeded
    pub fn harmonic_spectrum(&self) -> Option<&Spectrogram> {
        match &self.separation {
            Separation::Spectral(split) => Some(&split.harmonic),
            Separation::TimeDomain { .. } => None,
        }
    }

    /// `(harmonic, percussive)` power of the tempo window
    pub fn component_power(&self) -> (f64, f64) {
        match &self.separation {
            Separation::Spectral(split) => {
                (split.harmonic.total_power(), split.percussive.total_power())
            }
            Separation::TimeDomain {
                harmonic,
                percussive,
            } => {
                let power = |x: &[f32]| x.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>();
                (power(harmonic), power(percussive))
            }
        }
    }
}

fn time_domain(samples: &[f32], sample_rate: u32) -> Separation {
    let (harmonic, percussive) = transient_split(samples, sample_rate);
    Separation::TimeDomain {
        harmonic,
        percussive,
    }
}

/// Pick the tempo window
///
/// # Arguments
///
/// * `samples` - Trimmed samples
/// * `window_len` - Desired window length in samples
/// * `frame_size` - Frame length for the energy curve
/// * `hop_size` - Hop for the energy curve
pub fn select_tempo_window(
    samples: &[f32],
    window_len: usize,
    frame_size: usize,
    hop_size: usize,
) -> TempoWindow {
    if window_len >= samples.len() {
        return TempoWindow {
            start: 0,
            len: samples.len(),
            full_track: true,
        };
    }
    if samples.len() > window_len * 2 {
        log::debug!("Long track: taking the first tempo window without searching");
        return TempoWindow {
            start: 0,
            len: window_len,
            full_track: false,
        };
    }

    let energy: Vec<f32> = frame_rms(samples, frame_size, hop_size)
        .into_iter()
        .map(|r| r * r)
        .collect();
    let window_frames = (window_len / hop_size.max(1)).max(1);
    let start_frame = if energy.len() <= window_frames {
        0
    } else {
        let mut sum: f32 = energy[..window_frames].iter().sum();
        let mut best = (0usize, sum);
        for i in window_frames..energy.len() {
            sum += energy[i] - energy[i - window_frames];
            let start = i + 1 - window_frames;
            if sum > best.1 {
                best = (start, sum);
            }
        }
        best.0
    };

    let start = (start_frame * hop_size).min(samples.len() - window_len);
    TempoWindow {
        start,
        len: window_len,
        full_track: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_window_full_track() {
        let samples = vec![0.1f32; 1000];
        let window = select_tempo_window(&samples, 2000, 256, 64);
        assert!(window.full_track);
        assert_eq!(window.len, 1000);
    }

    #[test]
    fn test_select_window_loudest_span() {
        // Quiet, then a loud block at the end
        let mut samples = vec![0.01f32; 15000];
        for s in samples[11000..15000].iter_mut() {
            *s = 0.8;
        }
        let window = select_tempo_window(&samples, 8000, 256, 64);
        assert!(!window.full_track);
        assert!(window.start >= 6000, "start={}", window.start);
        assert!(window.start + window.len <= samples.len());
    }

    #[test]
    fn test_select_window_long_track_takes_first() {
        let mut samples = vec![0.0f32; 10000];
        for s in samples[8000..].iter_mut() {
            *s = 1.0;
        }
        let window = select_tempo_window(&samples, 3000, 256, 64);
        assert_eq!(window.start, 0);
        assert_eq!(window.len, 3000);
    }

    #[test]
    fn test_build_rejects_degenerate_buffers() {
        let config = AnalysisConfig::default();
        assert!(AnalysisContext::build(&AudioBuffer::new(vec![], 22050), &config).is_err());
        assert!(AnalysisContext::build(&AudioBuffer::new(vec![0.0; 100], 0), &config).is_err());
    }

    #[test]
    fn test_build_short_buffer_uses_time_domain_split() {
        // 0.6 s at 1 kHz sample rate: nothing trimmed; 600 samples < 2048 and < 1024
        let config = AnalysisConfig {
            analysis_sample_rate: 1000,
            ..AnalysisConfig::default()
        };
        let buffer = AudioBuffer::new(vec![0.3f32; 600], 1000);
        let ctx = AnalysisContext::build(&buffer, &config).unwrap();
        assert!(ctx.spectrum.is_none());
        assert!(matches!(ctx.separation, Separation::TimeDomain { .. }));
    }

    #[test]
    fn test_build_tempo_window_for_short_clip() {
        let config = AnalysisConfig::default();
        let buffer = AudioBuffer::new(vec![0.1f32; 22050 * 10], 22050);
        let ctx = AnalysisContext::build(&buffer, &config).unwrap();
        assert!(ctx.params.is_short_clip);
        // 9.5 s after trimming, window = 0.8 x 9.5 s
        let expected = (0.8 * 9.5 * 22050.0) as usize;
        assert!((ctx.window.len as i64 - expected as i64).abs() <= 1);
        assert!(ctx.full_transform_skipped);
        assert!(ctx.spectrum.is_some());
    }
}
