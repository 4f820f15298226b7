//! Chroma extraction modules
//!
//! Pitch-class energy of the harmonic component:
//! - Per-frame spectral-peak chroma
//! - Track profile (frame sum, normalized by its maximum)
//! - Sliding window sums for section-level key votes

pub mod extractor;

use crate::features::spectral::context::AnalysisContext;

/// Per-frame chroma with its frame rate
#[derive(Debug, Clone, Default)]
pub struct ChromaTimeline {
    /// Max-normalized chroma, one entry per frame
    pub frames: Vec<[f32; 12]>,
    /// Frames per second
    pub frame_rate: f32,
}

/// Chroma sum over one sliding window
#[derive(Debug, Clone, Copy)]
pub struct WindowChroma {
    /// Window start in seconds
    pub start_seconds: f32,
    /// Summed chroma of the window
    pub profile: [f32; 12],
    /// Total chroma energy of the window
    pub energy: f32,
}

impl ChromaTimeline {
    /// Chroma of the harmonic component of the tempo window
    ///
    /// Falls back to the mixed spectrum when the spectral split failed, and to an empty
    /// timeline when no transform is available.
    pub fn from_context(ctx: &AnalysisContext) -> Self {
        match ctx.harmonic_spectrum().or(ctx.spectrum.as_ref()) {
            Some(spec) => Self {
                frames: extractor::extract_chroma(spec),
                frame_rate: spec.frames_per_second(),
            },
            None => {
                log::debug!("No spectrum for chroma, key falls back to defaults");
                Self::default()
            }
        }
    }

    /// Track profile: frame sum scaled to a maximum of 1 (all zeros for silence)
    pub fn profile(&self) -> [f32; 12] {
        let mut profile = sum_frames(&self.frames);
        let max = profile.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for p in profile.iter_mut() {
                *p /= max;
            }
        }
        profile
    }

    /// Sliding window sums
    ///
    /// Windows start every `hop_seconds` and the last ones may be shorter than
    /// `window_seconds`. Windows without chroma energy are dropped.
    pub fn windows(&self, window_seconds: f32, hop_seconds: f32) -> Vec<WindowChroma> {
        if self.frames.is_empty() || self.frame_rate <= 0.0 {
            return Vec::new();
        }
        let window = ((window_seconds * self.frame_rate) as usize).max(1);
        let hop = ((hop_seconds * self.frame_rate) as usize).max(1);

        (0..self.frames.len())
            .step_by(hop)
            .filter_map(|start| {
                let end = (start + window).min(self.frames.len());
                let profile = sum_frames(&self.frames[start..end]);
                let energy: f32 = profile.iter().sum();
                (energy > 1e-6).then(|| WindowChroma {
                    start_seconds: start as f32 / self.frame_rate,
                    profile,
                    energy,
                })
            })
            .collect()
    }
}

fn sum_frames(frames: &[[f32; 12]]) -> [f32; 12] {
    frames.iter().fold([0.0f32; 12], |mut acc, frame| {
        for (a, &c) in acc.iter_mut().zip(frame.iter()) {
            *a += c;
        }
        acc
    })
}
