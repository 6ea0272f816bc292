mod source;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use cpal::traits::DeviceTrait;
use ringbuf::traits::{Consumer as ConsumerTrait, Split};
use ringbuf::{HeapCons, HeapRb};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use speech_engine::decoder::NullFactory;
use speech_engine::dispatch::FnSink;
use speech_engine::{EngineConfig, SpeechEngine, StreamAttrs, Utterance};

use source::{get_device, list_input_devices, select_input_config, AudioSource};

/// Headless driver for the speech recognition engine: captures live audio,
/// runs the VAD-gated pipeline and prints dispatched utterances.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw engine.* configuration key, e.g. -k engine.topn=20 (repeatable)
    #[arg(short = 'k', long = "key", value_name = "KEY=VALUE")]
    keys: Vec<String>,

    /// Input device name (use "default" or run with --list-devices)
    #[arg(short, long, default_value = "default")]
    device: String,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Message from the engine thread.
#[derive(Debug)]
enum EngineMessage {
    Utterance(Utterance),
    Stopped,
}

/// Summary of one capture session.
struct SessionRecord {
    session_id: Uuid,
    device: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    utterances: usize,
    speech_samples: i64,
}

impl SessionRecord {
    fn new(device: String) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device,
            started_at: Utc::now(),
            ended_at: None,
            utterances: 0,
            speech_samples: 0,
        }
    }

    fn add(&mut self, utterance: &Utterance) {
        self.utterances += 1;
        self.speech_samples += utterance.length.max(0) as i64;
    }

    fn finalize(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    if args.list_devices {
        return list_devices_and_exit();
    }

    // Configuration: file (or defaults), then -k overrides.
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let pairs: Vec<(String, String)> = args
        .keys
        .iter()
        .filter_map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    config.apply_pairs(&pairs)?;

    let sample_rate = config.sample_rate;
    info!("Speech engine starting...");

    // Audio device at exactly the configured rate.
    let device_name = if args.device == "default" {
        config.source_name.clone()
    } else {
        Some(args.device.clone())
    };
    let device = get_device(device_name.as_deref())?;
    let device_label = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio device: {}", device_label);

    let selected = select_input_config(&device, sample_rate)?;
    info!(
        "Audio config: {} Hz, {} channels, format {:?}",
        selected.config.sample_rate.0, selected.config.channels, selected.sample_format
    );

    // Ring buffer between the capture callback and the engine thread.
    let capacity = sample_rate as usize * 30;
    let ring = HeapRb::<i16>::new(capacity);
    let (producer, consumer) = ring.split();

    let capture = AudioSource::new(&device, &selected, producer)?;

    // Engine with a result channel back to this task.
    let (tx, mut rx) = mpsc::channel::<EngineMessage>(32);
    let sink_tx = tx.clone();
    let sink = move |utterance: &Utterance| -> i32 {
        let _ = sink_tx.blocking_send(EngineMessage::Utterance(utterance.clone()));
        if utterance.length > 0 {
            utterance.length
        } else {
            -1
        }
    };

    let mut engine = SpeechEngine::new(config, &NullFactory, Box::new(FnSink(sink)))?;
    engine.connect_stream(StreamAttrs::default());
    engine.activate();

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_for_engine = stop_flag.clone();
    let engine_handle = std::thread::spawn(move || {
        run_engine(consumer, engine, stop_for_engine, tx);
    });

    let stop_for_ctrlc = stop_flag.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping...");
        stop_for_ctrlc.store(true, Ordering::SeqCst);
    });

    capture.start()?;
    println!("\nListening... Press Ctrl+C to stop.\n");

    let mut session = SessionRecord::new(device_label);

    while let Some(msg) = rx.recv().await {
        match msg {
            EngineMessage::Utterance(utterance) => {
                print_utterance(&utterance, sample_rate);
                session.add(&utterance);
            }
            EngineMessage::Stopped => {
                info!("Engine stopped");
                break;
            }
        }
    }

    capture.stop()?;
    let _ = engine_handle.join();
    session.finalize();

    println!("\n--- Session {} ---", session.session_id);
    println!("Device: {}", session.device);
    if let Some(ended) = session.ended_at {
        let elapsed = ended.signed_duration_since(session.started_at);
        println!("Duration: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    println!(
        "Utterances: {} ({:.1}s of speech)",
        session.utterances,
        session.speech_samples as f64 / sample_rate as f64
    );

    if capture.overflow_count() > 0 {
        warn!("Audio overflows detected: {}", capture.overflow_count());
    }

    info!("Session complete");
    Ok(())
}

/// Engine thread: drain the ring and feed the pipeline.
fn run_engine(
    mut consumer: HeapCons<i16>,
    mut engine: SpeechEngine,
    stop_flag: Arc<AtomicBool>,
    tx: mpsc::Sender<EngineMessage>,
) {
    let mut chunk = vec![0i16; 1600];
    let mut bytes = Vec::with_capacity(chunk.len() * 2);

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            engine.finish();
            break;
        }

        let n = consumer.pop_slice(&mut chunk);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        bytes.clear();
        for &sample in &chunk[..n] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        engine.push_audio(&bytes);
    }

    let _ = tx.blocking_send(EngineMessage::Stopped);
}

fn print_utterance(utterance: &Utterance, sample_rate: u32) {
    let seconds = utterance.length.max(0) as f64 / sample_rate as f64;
    println!(
        "[{}] {:.2}s, quality {:.4}",
        utterance.id, seconds, utterance.quality
    );
    match utterance.cands.first() {
        Some(best) if !best.words.is_empty() => {
            let text: Vec<&str> = best.words.iter().map(|w| w.word.as_str()).collect();
            println!("  {}", text.join(" "));
        }
        _ => println!("  <no hypothesis>"),
    }
}

fn list_devices_and_exit() -> Result<()> {
    println!("Available input devices:\n");

    match list_input_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("  No input devices found.");
            } else {
                for device in devices {
                    let marker = if device.is_default { " (default)" } else { "" };
                    println!("  - {}{}", device.name, marker);
                }
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("  Error: {}", e);
        }
    }

    Ok(())
}
