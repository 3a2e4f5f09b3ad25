//! Offline runner: denoise a WAV file and report loudness and timing stats.
//!
//! Usage: dfn_process <input.wav> <output.wav> [--model-dir DIR] [--model FILE]
//!                    [--mix X] [--post-filter X] [--bypass] [--stats-json FILE]

use anyhow::{bail, Context, Result};
use dfn_denoise::config::SUPPORTED_SAMPLE_RATE;
use dfn_denoise::{DeepFilterEngine, DfnParams, DfnStats, DfnStream};
use ebur128::{EbuR128, Mode};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Args {
    input: PathBuf,
    output: PathBuf,
    model_dir: Option<PathBuf>,
    model: Option<PathBuf>,
    mix: f32,
    post_filter: f32,
    bypass: bool,
    stats_json: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut it = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut args = Args {
        input: PathBuf::new(),
        output: PathBuf::new(),
        model_dir: None,
        model: None,
        mix: 1.0,
        post_filter: 0.0,
        bypass: false,
        stats_json: None,
    };
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().with_context(|| format!("{} needs a value", flag));
        match arg.as_str() {
            "--model-dir" => args.model_dir = Some(PathBuf::from(value("--model-dir")?)),
            "--model" => args.model = Some(PathBuf::from(value("--model")?)),
            "--mix" => args.mix = value("--mix")?.parse().context("--mix expects a number")?,
            "--post-filter" => {
                args.post_filter = value("--post-filter")?
                    .parse()
                    .context("--post-filter expects a number")?
            }
            "--stats-json" => args.stats_json = Some(PathBuf::from(value("--stats-json")?)),
            "--bypass" => args.bypass = true,
            _ => positional.push(arg),
        }
    }
    if positional.len() != 2 {
        bail!("usage: dfn_process <input.wav> <output.wav> [--model-dir DIR] [--model FILE] [--mix X] [--post-filter X] [--bypass] [--stats-json FILE]");
    }
    args.output = PathBuf::from(positional.pop().unwrap_or_default());
    args.input = PathBuf::from(positional.pop().unwrap_or_default());
    Ok(args)
}

fn read_mono(path: &PathBuf) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 24) | (SampleFormat::Int, 32) => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (fmt, bits) => bail!("unsupported WAV format {:?} / {} bits", fmt, bits),
    };
    let channels = spec.channels.max(1) as usize;
    let mono = samples
        .chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn loudness(samples: &[f32], rate: u32) -> Option<f64> {
    let mut meter = EbuR128::new(1, rate, Mode::I).ok()?;
    meter.add_frames_f32(samples).ok()?;
    meter.loudness_global().ok()
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let (input, rate) = read_mono(&args.input)?;
    if rate as usize != SUPPORTED_SAMPLE_RATE {
        eprintln!(
            "warning: input is {} Hz, only {} Hz is processed; audio will pass through",
            rate, SUPPORTED_SAMPLE_RATE
        );
    }

    let mut params = DfnParams::default();
    params.set_mix(args.mix);
    params.set_post_filter(args.post_filter);
    params.bypass = args.bypass;

    let mut engine =
        DeepFilterEngine::from_model(args.model_dir.as_deref(), args.model.as_deref(), params);
    println!("Backend: {}", engine.backend().name());
    engine.set_sample_rate(rate as usize);

    let reports: Arc<Mutex<Vec<DfnStats>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    engine.set_stats_listener(move |s| {
        if let Ok(mut v) = sink.lock() {
            v.push(*s);
        }
    });

    let mut stream = DfnStream::new(engine);
    let start = Instant::now();
    let mut output = stream.process(&input);
    output.extend(stream.flush());
    let elapsed = start.elapsed();

    let duration = input.len() as f64 / rate as f64;
    let stats = stream.engine().stats();
    println!(
        "Processed {:.2}s in {:.2}s (RTF {:.3})",
        duration,
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() / duration.max(1e-9)
    );
    println!(
        "Hop latency p50 {:.3} ms, p95 {:.3} ms, bypassed {} of {} hops, auto mix {:.3}",
        stats.p50_ms, stats.p95_ms, stats.bypass_count, stats.frames, stats.auto_mix
    );
    match (loudness(&input, rate), loudness(&output, rate)) {
        (Some(a), Some(b)) => println!("Loudness {:.2} LUFS -> {:.2} LUFS", a, b),
        _ => println!("Loudness: not enough audio to measure"),
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&args.output, spec)
        .with_context(|| format!("failed to create '{}'", args.output.display()))?;
    for &s in &output {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;

    if let Some(path) = args.stats_json {
        let reports = reports
            .lock()
            .map_err(|_| anyhow::anyhow!("stats listener poisoned"))?;
        let json = serde_json::to_string_pretty(&*reports)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
    }

    println!("Saved to {}", args.output.display());
    Ok(())
}
