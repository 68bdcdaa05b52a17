fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("convert-file failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use mutavox_core::supervisor::block_frame_size;
    use mutavox_core::{ConverterHandle, RequestDispatcher, SharedSettings, StubConverter};
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        input: PathBuf,
        output: PathBuf,
        chunk_size: u32,
        pass_through: bool,
    }

    fn parse_args() -> Result<Args, String> {
        let mut input: Option<PathBuf> = None;
        let mut output: Option<PathBuf> = None;
        let mut chunk_size: u32 = 192;
        let mut pass_through = false;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--input" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --input".into());
                    };
                    input = Some(PathBuf::from(v));
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--chunk" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --chunk".into());
                    };
                    chunk_size = v
                        .parse::<u32>()
                        .map_err(|_| "invalid value for --chunk".to_string())?
                        .clamp(1, 2048);
                }
                "--pass-through" => {
                    pass_through = true;
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p mutavox-core --bin convert-file -- \\
  --input <in.wav> --output <out.wav> [--chunk <n>] [--pass-through]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        let input = input.ok_or("missing --input")?;
        let output = output.ok_or("missing --output")?;
        Ok(Args {
            input,
            output,
            chunk_size,
            pass_through,
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
            let sum = frame.iter().copied().sum::<f32>();
            mono.push(sum / channels as f32);
        }
        Ok((mono, spec.sample_rate))
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    let args = parse_args()?;
    let (samples, sample_rate) = read_wav_mono_f32(&args.input)?;
    let block_frame = block_frame_size(args.chunk_size, sample_rate) as usize;

    println!(
        "Converting {} ({} samples @ {} Hz, block={} frames)",
        args.input.display(),
        samples.len(),
        sample_rate,
        block_frame
    );

    let settings = SharedSettings::default();
    settings.apply_value(
        mutavox_core::settings::keys::PASS_THROUGH,
        &serde_json::Value::Bool(args.pass_through),
    );
    let dispatcher =
        RequestDispatcher::new(settings, ConverterHandle::with_converter(StubConverter::new()));

    let mut converted = Vec::with_capacity(samples.len());
    let mut latencies_ms = Vec::new();
    let mut faulted_blocks = 0usize;

    for block in samples.chunks(block_frame.max(1)) {
        let started = Instant::now();
        let result = dispatcher.dispatch(block);
        latencies_ms.push(started.elapsed().as_secs_f64() * 1000.0);
        if result.error.is_some() {
            faulted_blocks += 1;
        }
        converted.extend_from_slice(&result.samples);
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec).map_err(|e| e.to_string())?;
    for sample in &converted {
        writer.write_sample(*sample).map_err(|e| e.to_string())?;
    }
    writer.finalize().map_err(|e| e.to_string())?;

    println!(
        "Done. blocks={} p50={:.2}ms p95={:.2}ms faulted={} wrote {}",
        latencies_ms.len(),
        percentile(&latencies_ms, 0.50),
        percentile(&latencies_ms, 0.95),
        faulted_blocks,
        args.output.display()
    );

    Ok(())
}
