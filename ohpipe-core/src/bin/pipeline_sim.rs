//! pipeline-sim: drives the standard pipeline with a synthetic source
//!
//! A producer thread feeds a sine tone into the supply and stalls for a
//! while half way through, the way a network source would. A paced consumer
//! plays the role of the animator: it renders every message, answers drain
//! and halt callbacks, and sleeps for as long as the audio would take to
//! play. Pipeline events are logged from a tokio task.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ohpipe_common::config::PipelineConfig;
use ohpipe_common::events::PipelineEvent;
use ohpipe_common::jiffies::{jiffies_to_seconds, ms_to_jiffies, JIFFIES_PER_SECOND};
use ohpipe_core::clock_puller::ProportionalClockPuller;
use ohpipe_core::element::{ClockPuller, PipelineAnimator};
use ohpipe_core::elements::SupplyHandle;
use ohpipe_core::msg::{
    DecodedStreamInfo, ModeInfo, Msg, MsgTimestamps, PcmFormat, PlayableData,
};
use ohpipe_core::pipeline::Pipeline;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for pipeline-sim
#[derive(Parser, Debug)]
#[command(name = "pipeline-sim")]
#[command(about = "Run the audio pipeline against a synthetic network source")]
#[command(version)]
struct Args {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, env = "OHPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds of tone to play
    #[arg(long, default_value = "3")]
    seconds: u64,

    /// Length of the source stall half way through
    #[arg(long, default_value = "250")]
    stall_ms: u64,

    /// Delay requested through a Delay message
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Sample rate of the tone
    #[arg(long, default_value = "48000")]
    sample_rate: u32,
}

/// Stereo sink with a fixed output latency
struct SimAnimator;

impl PipelineAnimator for SimAnimator {
    fn max_sample_rate_pcm(&self) -> u32 {
        192_000
    }

    fn max_sample_rate_dsd(&self) -> u32 {
        0
    }

    fn max_bit_depth(&self) -> u32 {
        24
    }

    fn max_channels(&self) -> u32 {
        2
    }

    fn delay_jiffies(&self, _info: &DecodedStreamInfo) -> ohpipe_core::Result<u64> {
        Ok(ms_to_jiffies(5))
    }
}

#[derive(Debug, Default)]
struct PlayStats {
    audio_jiffies: u64,
    silence_jiffies: u64,
    drains: u32,
    halts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PipelineConfig::load_or_default(args.config.as_deref())
        .context("Failed to load pipeline configuration")?;

    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ohpipe_core={level},ohpipe_common={level},pipeline_sim={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Simulating {}s of {}Hz tone with a {}ms stall",
        args.seconds, args.sample_rate, args.stall_ms
    );

    let clock_puller = Arc::new(ProportionalClockPuller::from_config(&config));
    let mut pipeline = Pipeline::new(
        &config,
        Arc::new(SimAnimator),
        Some(clock_puller.clone() as Arc<dyn ClockPuller>),
    )
    .context("Failed to build pipeline")?;

    let mut events = pipeline.events().subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::Starving { stream_id, starving, .. }) => {
                    info!("Event: stream {} starving={}", stream_id, starving);
                }
                Ok(event) => debug!("Event: {:?}", event),
                Err(RecvError::Lagged(missed)) => warn!("Event logger lagged, {} missed", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let supply = pipeline.supply().clone();
    let producer_args = (args.seconds, args.stall_ms, args.delay_ms, args.sample_rate);
    let producer = thread::Builder::new()
        .name("sim-producer".to_string())
        .spawn(move || {
            let (seconds, stall_ms, delay_ms, sample_rate) = producer_args;
            produce(&supply, seconds, stall_ms, delay_ms, sample_rate)
        })
        .context("Failed to start producer")?;

    let stats = tokio::task::spawn_blocking(move || {
        let stats = consume(&mut pipeline);
        info!("Pool after run: {:?}", pipeline.factory().stats());
        stats
    })
    .await
    .context("Consumer panicked")?;

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("Producer panicked"))?
        .context("Producer failed")?;

    // the bus closes once the pipeline has been dropped
    let _ = event_logger.await;

    info!(
        "Played {:.3}s of audio and {:.3}s of silence ({} drains, {} halts)",
        jiffies_to_seconds(stats.audio_jiffies),
        jiffies_to_seconds(stats.silence_jiffies),
        stats.drains,
        stats.halts
    );
    info!("Clock correction at exit: {} ppm", clock_puller.correction_ppm());
    Ok(())
}

/// Push a timestamped tone into the supply, stalling half way through
fn produce(
    supply: &SupplyHandle,
    seconds: u64,
    stall_ms: u64,
    delay_ms: u64,
    sample_rate: u32,
) -> Result<()> {
    let format = PcmFormat::new(sample_rate, 24, 2).context("Unsupported sample rate")?;
    let frames_per_chunk = (sample_rate / 100) as usize;
    let chunk_jiffies = format.frames_to_jiffies(frames_per_chunk);
    let chunks = seconds * 100;

    supply.output_mode(
        "sim",
        ModeInfo {
            supports_latency: true,
            ..ModeInfo::default()
        },
    );
    supply.output_delay(ms_to_jiffies(delay_ms));
    let stream_id = supply.next_stream_id();
    let mut info = DecodedStreamInfo::pcm(stream_id, sample_rate, 24, 2);
    info.live = true;
    supply.output_decoded_stream(info);

    let mut phase = 0.0f64;
    let step = 440.0 * std::f64::consts::TAU / sample_rate as f64;
    let mut network = 0u64;
    for chunk in 0..chunks {
        if chunk == chunks / 2 && stall_ms > 0 {
            info!("Source stalling for {}ms", stall_ms);
            thread::sleep(Duration::from_millis(stall_ms));
        }
        let mut samples = Vec::with_capacity(frames_per_chunk * 2);
        for _ in 0..frames_per_chunk {
            let value = (0.25 * phase.sin()) as f32;
            samples.push(value);
            samples.push(value);
            phase = (phase + step) % std::f64::consts::TAU;
        }
        let timestamps = MsgTimestamps {
            network,
            rx: network + ms_to_jiffies(2),
        };
        supply
            .output_pcm_timestamped(samples, format, network, timestamps)
            .context("Failed to queue audio")?;
        network += chunk_jiffies;
    }

    supply.output_halt();
    supply.output_quit();
    Ok(())
}

/// Play the pipeline's output in real time until `Quit`
fn consume(pipeline: &mut Pipeline) -> PlayStats {
    let mut stats = PlayStats::default();
    loop {
        match pipeline.pull_playable() {
            Msg::Playable(playable) => {
                let jiffies = playable.jiffies();
                let silent = match playable.data() {
                    PlayableData::Pcm { samples, .. } => samples.iter().all(|s| *s == 0.0),
                    PlayableData::Dsd { .. } => false,
                };
                if silent {
                    stats.silence_jiffies += jiffies;
                } else {
                    stats.audio_jiffies += jiffies;
                }
                thread::sleep(Duration::from_nanos(
                    jiffies * 1_000_000_000 / JIFFIES_PER_SECOND,
                ));
            }
            Msg::Drain(drain) => {
                stats.drains += 1;
                drain.report_drained();
            }
            Msg::Halt(halt) => {
                stats.halts += 1;
                halt.report_halted();
            }
            Msg::Quit(_) => break,
            msg => debug!("Animator: {}", msg.kind()),
        }
    }
    stats
}
