//! Integration tests for the fingerprint engine

use fingerprint_dsp::calibration::CalibrationStore;
use fingerprint_dsp::config::CalibrationPaths;
use fingerprint_dsp::{
    analyze_audio_with, AnalysisConfig, AnalysisFlag, AnalysisResult, CalibrationSnapshot, Key,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Noise-burst kick on every beat, tempo switching at `switch_seconds`
fn kick_pattern(
    bpm_before: f32,
    bpm_after: f32,
    switch_seconds: f32,
    seconds: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let n = (seconds * sample_rate as f32) as usize;
    let switch = (switch_seconds * sample_rate as f32) as usize;
    let decay = (0.03 * sample_rate as f32) as usize;
    let mut samples = vec![0.0f32; n];
    let mut seed = 12345u32;
    let mut pos = 0usize;
    while pos < n {
        let bpm = if pos < switch { bpm_before } else { bpm_after };
        for i in 0..decay.min(n - pos) {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let noise = ((seed >> 16) as f32 / 32768.0) - 1.0;
            samples[pos + i] = 0.6 * noise * (1.0 - i as f32 / decay as f32);
        }
        pos += (60.0 / bpm * sample_rate as f32) as usize;
    }
    samples
}

/// Sustained C major triad with the tonic doubled an octave down
fn add_c_major(samples: &mut [f32], sample_rate: u32, level: f32) {
    let partials = [(130.81f32, 0.8f32), (261.63, 1.0), (329.63, 0.7), (392.0, 0.8)];
    for (i, s) in samples.iter_mut().enumerate() {
        let t = i as f32 / sample_rate as f32;
        let chord: f32 = partials
            .iter()
            .map(|(f, a)| a * (2.0 * std::f32::consts::PI * f * t).sin())
            .sum();
        *s += level * chord;
    }
}

fn analyze(samples: &[f32], sample_rate: u32, config: &AnalysisConfig) -> AnalysisResult {
    analyze_audio_with(
        samples,
        sample_rate,
        config,
        Arc::new(CalibrationSnapshot::empty()),
        None,
    )
    .expect("analysis should succeed")
}

fn write_json(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write rule file");
    path
}

#[test]
fn test_preview_128bpm_c_major() {
    init_logging();
    let sample_rate = 96_000;
    let mut samples = kick_pattern(128.0, 128.0, 0.0, 30.0, sample_rate);
    add_c_major(&mut samples, sample_rate, 0.12);

    let result = analyze(&samples, sample_rate, &AnalysisConfig::default());

    assert!(
        (result.bpm - 128.0).abs() <= 3.0,
        "BPM should be close to 128, got {:.2}",
        result.bpm
    );
    assert_eq!(result.key_label, "C major", "key source {}", result.key_source);
    assert!(result.bpm_confidence > 0.5, "bpm confidence {:.3}", result.bpm_confidence);
    assert!(result.key_confidence > 0.5, "key confidence {:.3}", result.key_confidence);
    assert!(result.metadata.is_short_clip);
    assert!(result.has_flag(AnalysisFlag::ShortClip));
    assert!(result.chunks.is_some(), "30 s clears the chunk threshold");
    assert!(result.key.root() < 12);
}

#[test]
fn test_silent_buffer() {
    init_logging();
    let samples = vec![0.0f32; 22050 * 10];
    let result = analyze(&samples, 22050, &AnalysisConfig::default());

    assert_eq!(result.bpm, 0.0);
    assert_eq!(result.bpm_confidence, 0.0);
    assert_eq!(result.key, Key::Major(0));
    assert_eq!(result.key_confidence, 0.0);
    assert!(result.key_details.rules_fired.is_empty());
    assert!(result.tempo_diagnostics.passes_fired.is_empty());
    assert!(result.calibration_applied.is_empty());
    assert!(result.has_flag(AnalysisFlag::SilentInput));
}

#[test]
fn test_tempo_change_follows_window_majority() {
    init_logging();
    let sample_rate = 22050;
    let samples = kick_pattern(128.0, 96.0, 30.0, 240.0, sample_rate);
    let mut config = AnalysisConfig::default();
    // Windows of 11-15 s so single windows still resolve the tempo
    config.chunks.target_beats = 24.0;

    let result = analyze(&samples, sample_rate, &config);
    let chunks = result.chunks.as_ref().expect("long track runs chunk consensus");

    assert!(chunks.windows.len() >= 8);
    // Only the first windows run; the rest of the track is reported as truncated
    assert!(chunks.truncated);
    assert!(chunks.total_possible > chunks.windows.len());
    for pair in chunks.windows.windows(2) {
        assert!(pair[1].start_seconds < pair[0].end_seconds, "windows overlap");
    }
    assert!(
        (result.bpm - 96.0).abs() < (result.bpm - 128.0).abs(),
        "consensus BPM {:.2} should follow the 96 BPM majority",
        result.bpm
    );
    let first_window = &chunks.windows[0];
    assert!(first_window.start_seconds < 1.0);
    assert!(chunks.consensus.as_ref().and_then(|c| c.bpm).is_some());
}

#[test]
fn test_double_tempo_doubles_bpm() {
    init_logging();
    let sample_rate = 22050;
    let config = AnalysisConfig::default();
    for base in [60.0f32, 90.0] {
        let slow = analyze(&kick_pattern(base, base, 0.0, 30.0, sample_rate), sample_rate, &config);
        let fast = analyze(
            &kick_pattern(base * 2.0, base * 2.0, 0.0, 30.0, sample_rate),
            sample_rate,
            &config,
        );
        assert!(slow.chunks.is_some() && fast.chunks.is_some());
        let ratio = fast.bpm / slow.bpm;
        assert!(
            (ratio - 2.0).abs() < 0.04,
            "{} BPM -> {:.2}, {} BPM -> {:.2} (ratio {:.3})",
            base,
            slow.bpm,
            base * 2.0,
            fast.bpm,
            ratio
        );
    }
}

#[test]
fn test_calibration_files_apply_in_order() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let scalers = write_json(
        dir.path(),
        "scalers.json",
        r#"{
            "generated_at": "2026-01-01T00:00:00Z",
            "feature_set_version": "v3",
            "features": {
                "energy": { "slope": 0.5, "intercept": 0.1, "clamp": { "min": 0.0, "max": 1.0 } }
            }
        }"#,
    );
    let rules = write_json(
        dir.path(),
        "bpm_rules.json",
        r#"{
            "version": "7",
            "rules": [
                { "name": "disabled", "priority": 9, "enabled": false,
                  "conditions": {}, "action": { "type": "multiply", "factor": 3.0 } },
                { "name": "halve_fast", "priority": 1,
                  "conditions": { "bpm_range": [110, 130] },
                  "action": { "type": "multiply", "factor": 0.5 } }
            ]
        }"#,
    );

    let sample_rate = 22050;
    let samples = kick_pattern(120.0, 120.0, 0.0, 60.0, sample_rate);
    let config = AnalysisConfig {
        enable_chunks: false,
        ..AnalysisConfig::default()
    };
    let raw = analyze(&samples, sample_rate, &config);
    assert!((raw.bpm - 120.0).abs() < 3.0, "raw BPM {:.2}", raw.bpm);

    let store = CalibrationStore::new(CalibrationPaths {
        scalers: Some(scalers),
        bpm_rules: Some(rules),
        ..CalibrationPaths::default()
    });
    let snapshot = store.snapshot();
    assert!(!snapshot.is_empty());
    let calibrated =
        analyze_audio_with(&samples, sample_rate, &config, snapshot, None).expect("analysis");

    let expected_energy = (raw.descriptors.energy * 0.5 + 0.1).clamp(0.0, 1.0);
    assert!((calibrated.descriptors.energy - expected_energy).abs() < 1e-4);
    assert!((calibrated.bpm - raw.bpm * 0.5).abs() < 1e-3);
    assert_eq!(
        calibrated.calibration_applied,
        vec!["scaler:energy".to_string(), "bpm_rule:halve_fast".to_string()]
    );
    assert!(calibrated.metadata.calibration_version.is_some());
}

#[test]
fn test_missing_and_malformed_files_are_ignored() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let broken = write_json(dir.path(), "ridge.json", "{ not json");
    let store = CalibrationStore::new(CalibrationPaths {
        scalers: Some(dir.path().join("missing.json")),
        ridge: Some(broken),
        ..CalibrationPaths::default()
    });
    assert!(store.snapshot().is_empty());

    let samples = kick_pattern(120.0, 120.0, 0.0, 20.0, 22050);
    let result = analyze_audio_with(&samples, 22050, &AnalysisConfig::default(), store.snapshot(), None)
        .expect("calibration problems never fail the analysis");
    assert!(result.calibration_applied.is_empty());
}

#[test]
fn test_store_hot_reload() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("scalers.json");
    let store = CalibrationStore::new(CalibrationPaths {
        scalers: Some(path.clone()),
        ..CalibrationPaths::default()
    });
    let before = store.snapshot();
    assert!(before.scalers.is_none());
    assert!(!store.refresh());

    fs::write(
        &path,
        r#"{ "features": { "valence": { "slope": 1.0, "intercept": 0.0 } } }"#,
    )
    .expect("write scalers");
    assert!(store.refresh());

    let after = store.snapshot();
    assert!(after.scalers.is_some());
    assert!(after.generation > before.generation);
    // The earlier capture is untouched
    assert!(before.scalers.is_none());
}
