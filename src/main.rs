use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use sofia_voice::api::ApiServer;
use sofia_voice::voice::native::{
    AudioPlayback, CpalCapture, MicrophoneStream, RecognizerSettings, RemoteSpeechSynthesizer,
    SegmentingRecognizer, calculate_energy,
};
use sofia_voice::voice::{
    CaptureConstraints, HttpProcessingClient, MediaStream, NoSpeechSynthesis, ProcessingBackend,
    SpeechSynthesisProvider, TopicOpener,
};
use sofia_voice::{
    Assistant, Config, ControllerConfig, IntentRouter, Phase, ProcessReply, Providers,
    TopicCatalog, TopicRecord, VoiceController,
};

/// Sof-IA - voice assistant for a mobile wallet
#[derive(Parser)]
#[command(name = "sofia", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "SOFIA_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice loop on the local microphone and speakers (default)
    Run,
    /// Ask a question in text and print the reply
    Ask {
        /// The question
        text: String,
        /// Send the question to the configured backend instead of answering locally
        #[arg(long)]
        remote: bool,
    },
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the topic catalog
    Topics,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "sofia_voice=info,sofia=info",
        1 => "sofia_voice=debug,sofia=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_voice(&config).await,
        Command::Ask { text, remote } => ask(&config, &text, remote).await,
        Command::Serve { port } => serve(config, port).await,
        Command::Topics => list_topics(&config),
        Command::TestMic { duration } => test_mic(duration).await,
    }
}

fn load_catalog(config: &Config) -> anyhow::Result<Arc<TopicCatalog>> {
    Ok(Arc::new(TopicCatalog::load_or_embedded(
        config.topics_path.as_deref(),
    )?))
}

/// Voice loop: wake phrase, recording, backend, spoken reply
async fn run_voice(config: &Config) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    let backend = Arc::new(HttpProcessingClient::new(
        &config.backend.base_url,
        Duration::from_secs(config.backend.timeout_secs),
    )?);
    tracing::info!(backend = %backend.base_url(), "using processing backend");

    let synthesis: Arc<dyn SpeechSynthesisProvider> = if AudioPlayback::is_available() {
        let voice = config
            .voice
            .preferred_voice
            .clone()
            .unwrap_or_else(|| config.services.tts_voice.clone());
        Arc::new(RemoteSpeechSynthesizer::new(
            backend.clone(),
            &voice,
            &config.voice.language,
        ))
    } else {
        tracing::warn!("no output device, replies will not be spoken");
        Arc::new(NoSpeechSynthesis)
    };

    let providers = Providers {
        recognition: Arc::new(SegmentingRecognizer::new(
            backend.clone(),
            RecognizerSettings::from_config(&config.voice),
        )),
        capture: Arc::new(CpalCapture),
        synthesis,
        backend,
    };

    let opener: TopicOpener = Arc::new(|topic: &TopicRecord| {
        println!("\n── {} ──\n{}\n", topic.title, topic.content);
    });
    let router = IntentRouter::with_opener(catalog, opener);

    let controller =
        VoiceController::new(ControllerConfig::from_config(config), providers, router)?;
    let handle = controller.spawn();
    let mut state = handle.subscribe();

    println!(
        "Sof-IA escuchando. Di \"{}\" o escribe una pregunta (Ctrl-C para salir).",
        config.voice.wake_phrases.first().map_or("sofía", String::as_str)
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut last_phase = Phase::Idle;
    let mut last_reply: Option<String> = None;
    let mut last_error: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                if snapshot.phase != last_phase {
                    tracing::info!(from = %last_phase, to = %snapshot.phase, "phase changed");
                    last_phase = snapshot.phase;
                }
                if snapshot.last_reply_text != last_reply {
                    if let Some(reply) = &snapshot.last_reply_text {
                        println!("Sof-IA: {reply}");
                    }
                    last_reply = snapshot.last_reply_text;
                }
                if snapshot.error != last_error {
                    if let Some(error) = &snapshot.error {
                        println!("! {error}");
                    }
                    last_error = snapshot.error;
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        match line {
                            "" => {}
                            "/grabar" => handle.trigger_recording()?,
                            "/parar" => handle.stop_recording()?,
                            "/pausa" => handle.stop_listening()?,
                            "/escuchar" => handle.start_listening()?,
                            "/reiniciar" => handle.reset()?,
                            text => handle.submit_text(text)?,
                        }
                    }
                    None => break,
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Answer one question and print intent, topic and reply
async fn ask(config: &Config, text: &str, remote: bool) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;

    let reply: ProcessReply = if remote {
        let backend = HttpProcessingClient::new(
            &config.backend.base_url,
            Duration::from_secs(config.backend.timeout_secs),
        )?;
        backend.process_text(text, None).await?
    } else {
        Assistant::from_config(config, Arc::clone(&catalog))?
            .chat(text, None)
            .await?
    };

    let intent = reply.intent.as_deref().unwrap_or("-");
    println!("Intent:     {intent} ({:.2})", reply.confidence);
    match reply.intent.as_deref().and_then(|i| catalog.get(i)) {
        Some(topic) => println!("Topic:      {} [{}]", topic.title, topic.id),
        None => println!("Topic:      -"),
    }
    println!("Reply:      {}", reply.fulfillment_text);
    Ok(())
}

/// Serve the HTTP API until Ctrl-C
async fn serve(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let catalog = load_catalog(&config)?;
    let assistant = Arc::new(Assistant::from_config(&config, catalog)?);

    ApiServer::new(assistant, &config.server)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

fn list_topics(config: &Config) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    for topic in catalog.topics() {
        println!("{:<24} {:<28} {}", topic.intent_key, topic.title, topic.summary);
    }
    println!("\n{} topics", catalog.len());
    Ok(())
}

/// Print an input level meter once per second
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut stream =
        tokio::task::spawn_blocking(|| MicrophoneStream::open(&CaptureConstraints::default()))
            .await??;
    stream.start_recorder()?;
    println!("Sample rate: {} Hz", stream.sample_rate());
    println!("---");

    let mut peak_energy = 0.0f32;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = stream.take_samples();
        let energy = calculate_energy(&samples);
        peak_energy = peak_energy.max(energy);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        println!("[{:2}s] RMS: {energy:.4} | [{meter}]", i + 1);
    }

    stream.stop_tracks();

    println!("\n---");
    if peak_energy < 0.01 {
        println!("The level stayed near 0. Check that the microphone is connected and selected.");
    } else {
        println!("Your microphone is working. Peak RMS: {peak_energy:.4}");
    }
    Ok(())
}
