use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use voxpipe::cli::{Cli, Commands};
use voxpipe::config::PipelineConfig;
use voxpipe::event::{EventType, PipelineEvent};
use voxpipe::pipeline::{PipelineController, PipelineState, StageSet};
use voxpipe::stages::command::CommandDispatcher;
use voxpipe::stages::intent::PatternInterpreter;
use voxpipe::stages::mock::{MockRecognizer, ScriptedDetector, detected};
use voxpipe::stages::tts::ToneSynthesizer;
use voxpipe::stages::vad::EnergyVad;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            wake,
            transcript,
            realtime,
            pretty,
        } => run_wav(&load_config(cli.config.as_deref())?, &input, &wake, &transcript, realtime, pretty),
        Commands::CheckConfig => check_config(cli.config.as_deref()),
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. ./voxpipe.toml if present
/// 3. Built-in defaults
fn load_config(custom_path: Option<&Path>) -> Result<PipelineConfig> {
    let config = if let Some(path) = custom_path {
        PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        PipelineConfig::load_or_default(&default_config_path())?
    };
    Ok(config)
}

fn default_config_path() -> PathBuf {
    PathBuf::from("voxpipe.toml")
}

/// Validate the configuration and print the effective values.
fn check_config(custom_path: Option<&Path>) -> Result<()> {
    let config = load_config(custom_path)?;
    config.validate()?;
    print!("{}", toml::to_string(&config)?);
    Ok(())
}

/// Drive one WAV file through a demo pipeline and print every event as
/// JSON. The detector stages are real (energy VAD); keyword spotting and
/// recognition use fixed stand-ins so no model files are needed.
fn run_wav(
    config: &PipelineConfig,
    input: &Path,
    wake: &str,
    transcript: &str,
    realtime: bool,
    pretty: bool,
) -> Result<()> {
    let samples = read_wav_mono(input)?;
    let frame_samples = config.frame_samples();

    let stages = StageSet {
        vad: Box::new(EnergyVad::default()),
        kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, wake))),
        recognizer: Box::new(MockRecognizer::new().with_response(transcript)),
        interpreter: Box::new(PatternInterpreter::new()),
        executor: Box::new(CommandDispatcher::new()),
        synthesizer: Box::new(ToneSynthesizer::new(config.audio.sample_rate)),
    };

    let controller = PipelineController::new(config.clone(), stages)?;
    let idle_cycles = Arc::new(AtomicBool::new(false));
    let cycle_done = idle_cycles.clone();
    controller.add_observer(Arc::new(move |event: &PipelineEvent| {
        print_event(event, pretty);
        if matches!(
            event.event_type,
            EventType::ReturnedToListening | EventType::RecognitionEmpty
        ) {
            cycle_done.store(true, Ordering::SeqCst);
        }
    }));

    controller.start()?;

    let frame_duration = Duration::from_millis(u64::from(config.audio.frame_duration_ms));
    for chunk in samples.chunks(frame_samples) {
        controller.feed(chunk)?;
        if realtime {
            std::thread::sleep(frame_duration);
        }
    }
    // Trailing silence so the endpoint detector closes the utterance.
    let silence_frames =
        (config.endpoint.silence_duration_ms / config.audio.frame_duration_ms) + 2;
    for _ in 0..silence_frames {
        controller.feed(&vec![0i16; frame_samples])?;
        if realtime {
            std::thread::sleep(frame_duration);
        }
    }

    // Wait for the cycle to finish (or for the pipeline to settle back
    // into listening if the file never triggered one).
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        if idle_cycles.load(Ordering::SeqCst) {
            break;
        }
        if controller.state() == PipelineState::Listening {
            std::thread::sleep(Duration::from_millis(200));
            if controller.state() == PipelineState::Listening {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    controller.stop()?;
    Ok(())
}

fn print_event(event: &PipelineEvent, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(event)
    } else {
        serde_json::to_string(event)
    };
    match rendered {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("voxpipe: failed to render event: {}", e),
    }
}

/// Read a 16-bit PCM WAV file, taking the first channel if multichannel.
fn read_wav_mono(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!(
            "{}: expected 16-bit integer PCM, got {}-bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    let channels = usize::from(spec.channels.max(1));
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .step_by(channels)
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(samples)
}
