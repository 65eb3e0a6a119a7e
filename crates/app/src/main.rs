use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use freestyle_audio_core::{
    read_wav, write_wav, AppConfig, AudioCoreError, CapturedPcm, ClickVoice, ClockHandle,
    EncoderWorker, Metronome, Mp3Artifact, RenderClock,
};
use tracing_subscriber::EnvFilter;

fn main() -> freestyle_audio_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Click {
            bpm,
            seconds,
            output,
            sample_rate,
            change_at,
            change_bpm,
            wav,
        } => {
            let change = change_at.zip(change_bpm);
            run_click(
                &config,
                ClickRun {
                    bpm,
                    seconds,
                    sample_rate,
                    change,
                },
                &output,
                wav.as_deref(),
            )
        }
        Commands::Encode { input, output } => run_encode(&config, &input, &output),
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

struct ClickRun {
    bpm: f64,
    seconds: f64,
    sample_rate: u32,
    change: Option<(f64, f64)>,
}

fn run_click(
    config: &AppConfig,
    run: ClickRun,
    output: &Path,
    wav: Option<&Path>,
) -> freestyle_audio_core::Result<()> {
    tracing::info!(bpm = run.bpm, seconds = run.seconds, ?output, "recording click track");

    let mut metronome = Metronome::new(
        config.scheduler.clone(),
        ClockHandle::new(|| Ok(RenderClock::new())),
    )?;
    metronome.start(run.bpm)?;
    let started = Instant::now();

    if let Some((at, bpm)) = run.change {
        sleep_until(started, at);
        metronome.set_tempo(bpm)?;
        tracing::info!(at, bpm, "tempo changed");
    }
    sleep_until(started, run.seconds);
    metronome.stop();

    let clock = metronome
        .clock()
        .cloned()
        .ok_or_else(|| AudioCoreError::msg("metronome never created its clock"))?;
    let voice = ClickVoice::new(&config.click);
    let pcm = CapturedPcm::new(
        clock.render(&voice, run.sample_rate, run.seconds),
        run.sample_rate,
    );
    metronome.dispose();

    if let Some(path) = wav {
        write_wav(path, &pcm)?;
        tracing::info!(?path, "wrote rendered click track");
    }

    let artifact = encode(config, pcm)?;
    artifact.write_to(output)?;
    tracing::info!(bytes = artifact.len(), ?output, "wrote click track");
    Ok(())
}

fn run_encode(config: &AppConfig, input: &Path, output: &Path) -> freestyle_audio_core::Result<()> {
    tracing::info!(?input, ?output, "encoding capture");

    let pcm = read_wav(input)?;
    let artifact = encode(config, pcm)?;
    artifact.write_to(output)?;
    tracing::info!(
        bytes = artifact.len(),
        seconds = artifact.duration_secs(),
        mime = artifact.mime(),
        kbps = ?artifact.bitrate_kbps(),
        "wrote mp3"
    );
    Ok(())
}

fn encode(config: &AppConfig, pcm: CapturedPcm) -> freestyle_audio_core::Result<Mp3Artifact> {
    let worker = EncoderWorker::spawn(config.encoder.clone())?;
    let ticket = worker.submit(pcm.samples, pcm.sample_rate);
    tracing::debug!(job = %ticket.id(), "submitted encode job");
    ticket.wait()
}

fn sleep_until(started: Instant, seconds: f64) {
    let target = Duration::from_secs_f64(seconds.max(0.0));
    if let Some(remaining) = target.checked_sub(started.elapsed()) {
        thread::sleep(remaining);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Metronome and freestyle recording audio tools", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live metronome and save what it played as an MP3.
    Click {
        /// Starting tempo in beats per minute.
        #[arg(short, long, default_value_t = 120.0)]
        bpm: f64,
        /// How long to keep the metronome running.
        #[arg(short, long, default_value_t = 4.0)]
        seconds: f64,
        /// Destination MP3 file.
        #[arg(short, long)]
        output: PathBuf,
        /// Sample rate used to render the click track.
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,
        /// Seconds after start at which to switch tempo.
        #[arg(long, requires = "change_bpm")]
        change_at: Option<f64>,
        /// Tempo to switch to at `--change-at`.
        #[arg(long, requires = "change_at")]
        change_bpm: Option<f64>,
        /// Also dump the rendered PCM as a WAV file.
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Encode a captured WAV file to MP3.
    Encode {
        /// WAV capture to encode.
        #[arg(short, long)]
        input: PathBuf,
        /// Destination MP3 file.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the effective configuration as JSON.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_takes_named_input_and_output() {
        let cli = Cli::try_parse_from([
            "freestyle-audio",
            "encode",
            "--input",
            "take.wav",
            "--output",
            "take.mp3",
        ])
        .unwrap();

        match cli.command {
            Commands::Encode { input, output } => {
                assert_eq!(input, PathBuf::from("take.wav"));
                assert_eq!(output, PathBuf::from("take.mp3"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn encode_rejects_positional_paths() {
        assert!(Cli::try_parse_from(["freestyle-audio", "encode", "take.wav", "take.mp3"]).is_err());
    }

    #[test]
    fn tempo_change_needs_both_flags() {
        assert!(Cli::try_parse_from([
            "freestyle-audio",
            "click",
            "--output",
            "click.mp3",
            "--change-at",
            "2.5",
        ])
        .is_err());
    }
}
