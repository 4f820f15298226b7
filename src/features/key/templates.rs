//! Krumhansl-Kessler key templates
//!
//! Scores a chroma profile against the 24 rotated major/minor probe-tone profiles. The
//! score is the Pearson correlation, so it is invariant to the chroma's scale and offset
//! and lies in [-1, 1].
//!
//! # Reference
//!
//! Krumhansl, C. L., & Kessler, E. J. (1982). Tracing the Dynamic Changes in Perceived
//! Tonal Organization in a Spatial Representation of Musical Keys. *Psychological Review*,
//! 89(4), 334-368.

use super::Mode;
use serde::{Deserialize, Serialize};

/// Major probe-tone profile, tonic first
pub const KRUMHANSL_MAJOR: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Minor probe-tone profile, tonic first
pub const KRUMHANSL_MINOR: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Template score of one root and mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateScore {
    /// Tonic pitch class
    pub root: u32,
    /// Mode
    pub mode: Mode,
    /// Pearson correlation with the rotated profile
    pub score: f32,
}

/// Score `chroma` against all 24 keys
///
/// # Returns
///
/// 24 scores sorted best first (ties keep C-major-first order). A flat or silent chroma
/// scores 0 everywhere.
pub fn score_templates(chroma: &[f32; 12]) -> Vec<TemplateScore> {
    let mut scores = Vec::with_capacity(24);
    for root in 0..12u32 {
        for (mode, profile) in [(Mode::Major, &KRUMHANSL_MAJOR), (Mode::Minor, &KRUMHANSL_MINOR)] {
            let rotated: [f32; 12] =
                std::array::from_fn(|pc| profile[(pc + 12 - root as usize) % 12]);
            scores.push(TemplateScore {
                root,
                mode,
                score: pearson(chroma, &rotated),
            });
        }
    }
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

/// Score of `root`/`mode` in a score list (0 if absent)
pub fn score_of(scores: &[TemplateScore], root: u32, mode: Mode) -> f32 {
    scores
        .iter()
        .find(|s| s.root == root % 12 && s.mode == mode)
        .map_or(0.0, |s| s.score)
}

/// Best-scoring mode for `root`
pub fn best_mode_for(scores: &[TemplateScore], root: u32) -> Mode {
    scores
        .iter()
        .find(|s| s.root == root % 12)
        .map_or(Mode::Major, |s| s.mode)
}

fn pearson(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let mean_a = a.iter().sum::<f32>() / 12.0;
    let mean_b = b.iter().sum::<f32>() / 12.0;
    let (mut num, mut var_a, mut var_b) = (0.0f32, 0.0f32, 0.0f32);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        num += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= 1e-12 {
        0.0
    } else {
        num / denom
    }
}
