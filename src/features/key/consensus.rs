//! Sliding-window key votes
//!
//! Every chroma window votes for its best template key with a weight equal to its chroma
//! energy. The vote table is what several override rules consult as "window support".

use super::templates::score_templates;
use super::Mode;
use crate::features::chroma::WindowChroma;
use serde::{Deserialize, Serialize};

/// Accumulated vote weight of one key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyVote {
    /// Tonic pitch class
    pub root: u32,
    /// Mode
    pub mode: Mode,
    /// Summed window energy
    pub weight: f32,
}

/// Window vote summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConsensus {
    /// Votes sorted by weight, heaviest first
    pub votes: Vec<KeyVote>,
    /// Total weight of all votes
    pub total_weight: f32,
    /// Weight of the runner-up key (0 with a single key)
    pub runner_up_weight: f32,
    /// Best key's share of the total weight
    pub dominance: f32,
    /// `(best - runner_up) / total`
    pub separation: f32,
    /// Number of windows that voted
    pub windows: usize,
}

impl WindowConsensus {
    /// Heaviest vote
    pub fn best(&self) -> KeyVote {
        self.votes[0]
    }

    /// Vote weight per root, summed over both modes
    pub fn root_weights(&self) -> [f32; 12] {
        let mut weights = [0.0f32; 12];
        for vote in &self.votes {
            weights[(vote.root % 12) as usize] += vote.weight;
        }
        weights
    }

    /// `(major, minor)` weight of the votes for `root`
    pub fn mode_breakdown(&self, root: u32) -> (f32, f32) {
        self.votes
            .iter()
            .filter(|v| v.root == root % 12)
            .fold((0.0, 0.0), |(major, minor), v| match v.mode {
                Mode::Major => (major + v.weight, minor),
                Mode::Minor => (major, minor + v.weight),
            })
    }
}

/// Vote over chroma windows
///
/// Returns `None` when no window carries chroma energy.
pub fn window_consensus(windows: &[WindowChroma]) -> Option<WindowConsensus> {
    let mut votes: Vec<KeyVote> = Vec::new();
    let mut total_weight = 0.0f32;
    let mut voting = 0usize;

    for window in windows {
        if window.energy <= 1e-6 {
            continue;
        }
        let best = score_templates(&window.profile)[0];
        match votes
            .iter_mut()
            .find(|v| v.root == best.root && v.mode == best.mode)
        {
            Some(vote) => vote.weight += window.energy,
            None => votes.push(KeyVote {
                root: best.root,
                mode: best.mode,
                weight: window.energy,
            }),
        }
        total_weight += window.energy;
        voting += 1;
    }

    if votes.is_empty() || total_weight <= 0.0 {
        return None;
    }
    votes.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    let best_weight = votes[0].weight;
    let runner_up_weight = votes.get(1).map_or(0.0, |v| v.weight);
    let consensus = WindowConsensus {
        dominance: best_weight / total_weight,
        separation: (best_weight - runner_up_weight) / total_weight,
        votes,
        total_weight,
        runner_up_weight,
        windows: voting,
    };

    log::debug!(
        "Window consensus: {} windows, best {}:{} dominance {:.2}, separation {:.2}",
        consensus.windows,
        consensus.best().root,
        consensus.best().mode.as_str(),
        consensus.dominance,
        consensus.separation
    );
    Some(consensus)
}

/// Share of the strongest root's weight that `root` received (0 without votes)
pub fn root_support(weights: &[f32; 12], root: u32) -> f32 {
    let max = weights.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        0.0
    } else {
        weights[(root % 12) as usize] / max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(root: usize, third: usize, energy: f32) -> WindowChroma {
        let mut profile = [0.0f32; 12];
        profile[root % 12] = 1.0;
        profile[(root + third) % 12] = 0.8;
        profile[(root + 7) % 12] = 0.9;
        WindowChroma {
            start_seconds: 0.0,
            profile,
            energy,
        }
    }

    #[test]
    fn test_dominant_key_wins() {
        let windows = vec![
            window(0, 4, 3.0),
            window(0, 4, 3.0),
            window(0, 4, 2.0),
            window(7, 4, 2.0),
        ];
        let c = window_consensus(&windows).unwrap();
        assert_eq!((c.best().root, c.best().mode), (0, Mode::Major));
        assert!((c.dominance - 0.8).abs() < 1e-6);
        assert!((c.separation - 0.6).abs() < 1e-6);
        assert_eq!(c.windows, 4);

        let weights = c.root_weights();
        assert_eq!(root_support(&weights, 0), 1.0);
        assert!((root_support(&weights, 7) - 0.25).abs() < 1e-6);
        assert_eq!(root_support(&weights, 5), 0.0);
    }

    #[test]
    fn test_mode_breakdown() {
        let windows = vec![window(9, 3, 4.0), window(9, 4, 1.0)];
        let c = window_consensus(&windows).unwrap();
        let (major, minor) = c.mode_breakdown(9);
        assert_eq!(major, 1.0);
        assert_eq!(minor, 4.0);
    }

    #[test]
    fn test_no_energy_no_consensus() {
        assert!(window_consensus(&[]).is_none());
        assert!(window_consensus(&[window(0, 4, 0.0)]).is_none());
    }
}
