//! Example: fingerprint multiple audio files through the worker pool
//!
//! Usage:
//!   cargo run --release --example analyze_batch -- [--jobs N] [--json] <file1> <file2> ...
//!
//! Notes:
//! - Files are decoded on the calling thread, then analyzed in parallel (one track per worker).
//! - Calibration files are picked up from the `FINGERPRINT_*` environment variables.

use fingerprint_dsp::{AnalysisConfig, AnalysisPool, AudioBuffer, WorkerContext};
use std::env;
use std::fs::File;
use std::time::Instant;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;

/// Decode a file and downmix it to mono
fn decode_audio_file(path: &str) -> Result<AudioBuffer, Box<dyn std::error::Error>> {
    let src = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or("No supported audio tracks found")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = 1usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // Corrupted packets are skipped
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(Box::new(e)),
        }
    }

    Ok(AudioBuffer::from_interleaved(&interleaved, channels, sample_rate))
}

fn default_jobs() -> usize {
    let n = std::thread::available_parallelism().map(|v| v.get()).unwrap_or(1);
    std::cmp::max(1, n.saturating_sub(1))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut json = false;
    let mut jobs: Option<usize> = None;
    let mut paths: Vec<String> = Vec::new();

    while let Some(a) = args.first().cloned() {
        args.remove(0);
        match a.as_str() {
            "--json" => json = true,
            "--jobs" => {
                let v = args
                    .first()
                    .ok_or("--jobs requires a value")?
                    .parse::<usize>()?;
                args.remove(0);
                jobs = Some(std::cmp::max(1, v));
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: analyze_batch [--jobs N] [--json] <file1> <file2> ...\n\
                     \n\
                     --jobs N   Parallel workers (default: CPU-1)\n\
                     --json     Emit one JSON result per line (JSONL)\n"
                );
                return Ok(());
            }
            _ => paths.push(a),
        }
    }

    if paths.is_empty() {
        eprintln!("ERROR: Provide at least one audio file path. Use --help for usage.");
        std::process::exit(2);
    }

    let config = AnalysisConfig {
        workers: jobs.unwrap_or_else(default_jobs),
        ..AnalysisConfig::from_env()
    };
    let pool = AnalysisPool::new(config, WorkerContext::top_level())?;
    eprintln!("Batch: {} files, jobs={}", paths.len(), pool.threads());

    let t0 = Instant::now();
    let mut decoded = Vec::new();
    let mut names = Vec::new();
    for path in &paths {
        match decode_audio_file(path) {
            Ok(buffer) => {
                decoded.push(buffer);
                names.push(path.clone());
            }
            Err(e) => eprintln!("{}: decode failed: {}", path, e),
        }
    }

    let results = pool.analyze_batch(&decoded);
    let mut failures = 0usize;
    for (path, result) in names.iter().zip(results) {
        match result {
            Ok(res) if json => {
                let line = serde_json::json!({ "file": path, "result": res });
                println!("{}", line);
            }
            Ok(res) => println!(
                "{}: {:.2} BPM ({:.2}), {} ({:.2}, {}), energy {:.2}, {:?}, {:.0}ms",
                path,
                res.bpm,
                res.bpm_confidence,
                res.key_label,
                res.key_confidence,
                res.key_source,
                res.descriptors.energy,
                res.descriptors.mood,
                res.metadata.processing_time_ms
            ),
            Err(e) => {
                failures += 1;
                eprintln!("{}: analysis failed: {}", path, e);
            }
        }
    }

    eprintln!(
        "Done: {} analyzed, {} failed, {:.1}s wall",
        names.len() - failures,
        failures,
        t0.elapsed().as_secs_f32()
    );
    Ok(())
}
