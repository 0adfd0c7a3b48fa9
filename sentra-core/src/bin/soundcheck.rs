//! Offline classifier check: run the acoustic rule table over WAV files and
//! report what each analysis window matched. Useful when tuning thresholds
//! against recorded alarms, doorbells, and street noise.

fn main() {
    if let Err(e) = run() {
        eprintln!("soundcheck failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use sentra_core::acoustic::{AcousticConfig, AcousticEventDetector};
    use sentra_core::audio::resample::RateConverter;
    use sentra_core::buffering::chunk::PcmChunk;
    use serde::Serialize;
    use std::path::{Path, PathBuf};

    #[derive(Debug)]
    struct Args {
        inputs: Vec<PathBuf>,
        min_confidence: f32,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct WindowResult {
        file: String,
        window_index: usize,
        start_secs: f32,
        category: Option<String>,
        confidence: Option<f32>,
        severity: Option<String>,
    }

    #[derive(Debug, Serialize)]
    struct Report {
        files: usize,
        windows: usize,
        matched_windows: usize,
        results: Vec<WindowResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut inputs = Vec::new();
        let mut min_confidence = 0.6f32;
        let mut output = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--min-confidence" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --min-confidence".into());
                    };
                    min_confidence = v
                        .parse::<f32>()
                        .map_err(|_| "invalid value for --min-confidence".to_string())?
                        .clamp(0.0, 1.0);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p sentra-core --bin soundcheck -- \\
  <file.wav>... [--min-confidence <0..1>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other if other.starts_with("--") => {
                    return Err(format!("unknown argument: {other}"));
                }
                path => inputs.push(PathBuf::from(path)),
            }
        }

        if inputs.is_empty() {
            return Err("no input WAV files given (see --help)".into());
        }
        Ok(Args {
            inputs,
            min_confidence,
            output,
        })
    }

    fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32), String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max).map_err(|e| e.to_string()))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        if channels == 1 {
            return Ok((interleaved, spec.sample_rate));
        }
        let mut mono = Vec::with_capacity(interleaved.len() / channels);
        for frame in interleaved.chunks(channels) {
            mono.push(frame.iter().copied().sum::<f32>() / channels as f32);
        }
        Ok((mono, spec.sample_rate))
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentra_core=info".into()),
        )
        .init();

    let args = parse_args()?;

    let config = AcousticConfig {
        min_confidence: args.min_confidence,
        // Every window should be reported independently here.
        repeat_cooldown: std::time::Duration::ZERO,
        ..Default::default()
    };
    let analysis_rate = config.sample_rate;
    let window_samples = config.window_samples();

    let mut results = Vec::new();
    let mut windows = 0usize;
    let mut matched = 0usize;

    for path in &args.inputs {
        let (samples, source_rate) = read_wav_mono_f32(path)?;
        let mut converter = RateConverter::new(source_rate, analysis_rate, 960)
            .map_err(|e| e.to_string())?;
        let resampled = converter.process(&samples);

        // Fresh detector per file so cross-file state cannot leak.
        let mut detector = AcousticEventDetector::new(config.clone());
        let file = path.display().to_string();

        for (index, window) in resampled.chunks(window_samples).enumerate() {
            if window.len() < window_samples / 2 {
                break; // ignore a trailing sliver
            }
            windows += 1;
            let chunk = PcmChunk::new(window.to_vec(), analysis_rate);
            let alert = detector.classify(&chunk);
            if alert.is_some() {
                matched += 1;
            }
            let start_secs = index as f32 * window_samples as f32 / analysis_rate as f32;
            println!(
                "{file} [{start_secs:5.1}s] {}",
                alert
                    .as_ref()
                    .map(|a| format!("{} ({:.2}, {:?})", a.category, a.confidence, a.severity))
                    .unwrap_or_else(|| "-".into())
            );
            results.push(WindowResult {
                file: file.clone(),
                window_index: index,
                start_secs,
                category: alert.as_ref().map(|a| a.category.to_string()),
                confidence: alert.as_ref().map(|a| a.confidence),
                severity: alert.as_ref().map(|a| format!("{:?}", a.severity)),
            });
        }
    }

    println!(
        "Done. files={} windows={} matched={}",
        args.inputs.len(),
        windows,
        matched
    );

    if let Some(out) = args.output {
        let report = Report {
            files: args.inputs.len(),
            windows,
            matched_windows: matched,
            results,
        };
        let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote report: {}", out.display());
    }

    Ok(())
}
