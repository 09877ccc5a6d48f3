use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use posecap_core::orientation::{classify_offset, nose_offset};
use posecap_core::{detect_single, load_detector};
use posecap_hw::{Camera, EncodedImage, LiveStream};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

mod config;
mod host;
mod router;
mod session;
mod ui;

use config::Config;
use router::{resolve_results, Resolved, Route};
use session::{SessionOutcome, SessionSettings, SessionStatus, UserInput};

#[derive(Parser)]
#[command(name = "posecap", about = "Guided front/right/left face capture", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guided capture session
    Run {
        /// V4L2 device path (overrides POSECAP_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
        /// Capture on Enter instead of automatically
        #[arg(long)]
        manual: bool,
        /// Output directory for captured images
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also print each image as a data: URL
        #[arg(long)]
        data_urls: bool,
    },
    /// List video capture devices
    Devices,
    /// Run camera and detector diagnostics
    Test {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Classify head orientation from landmark x coordinates
    Classify {
        nose_x: f32,
        left_eye_x: f32,
        right_eye_x: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Run {
            device,
            manual,
            out,
            data_urls,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            if manual {
                config.auto_capture = false;
            }
            if let Some(out) = out {
                config.output_dir = out;
            }
            run_app(config, data_urls).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { device } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            run_diagnostics(&config).await?;
        }
        Commands::Classify {
            nose_x,
            left_eye_x,
            right_eye_x,
        } => {
            let landmarks = [
                (left_eye_x, 0.0),
                (right_eye_x, 0.0),
                (nose_x, 0.0),
                (0.0, 0.0),
                (0.0, 0.0),
            ];
            let offset = nose_offset(&landmarks);
            println!("offset: {offset:.1}");
            println!("orientation: {}", classify_offset(offset, &config.thresholds()));
        }
    }

    Ok(())
}

/// Capture, then results, until the user quits.
async fn run_app(config: Config, data_urls: bool) -> Result<()> {
    let settings = SessionSettings::from_config(&config);
    let (status_tx, status_rx) = watch::channel(SessionStatus::idle(settings.steps.len()));

    let root = CancellationToken::new();
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut input = spawn_input_reader();
    let printer = tokio::spawn(print_status(status_rx.clone()));
    let _host = if config.host_bridge {
        host::start(status_rx).await
    } else {
        None
    };

    // Start loading while the camera opens; sessions join the same load.
    let model_dir = config.model_dir.clone();
    tokio::spawn(async move { load_detector(&model_dir).await });

    println!("Press Enter to capture in manual mode, q then Enter to quit.");
    let mut route: Route<EncodedImage> = Route::Capture;
    loop {
        tracing::debug!(path = route.path(), "navigating");
        route = match route {
            Route::Capture => {
                let device = config.camera_device.clone();
                let warmup = config.warmup_frames;
                let model_dir = config.model_dir.clone();
                let outcome = session::run(
                    &settings,
                    move || LiveStream::acquire(&device, warmup),
                    async move { load_detector(&model_dir).await },
                    &mut input,
                    &status_tx,
                    root.child_token(),
                )
                .await?;

                match outcome {
                    SessionOutcome::Completed(captures) => Route::Results(captures),
                    SessionOutcome::Cancelled => break,
                    failed => {
                        match &failed {
                            SessionOutcome::CameraUnavailable(msg) => println!("Camera unavailable: {msg}"),
                            SessionOutcome::DetectionUnavailable(msg) => {
                                println!("Face detection unavailable: {msg}");
                                println!("Run `posecap run --manual` to capture without detection.");
                            }
                            _ => {}
                        }
                        if !failed.is_retryable() {
                            break;
                        }
                        println!("Press Enter to retry, or q to quit.");
                        if !confirm(&mut input, &root).await {
                            break;
                        }
                        Route::Capture
                    }
                }
            }
            Route::Results(captures) => match resolve_results(captures, &settings.steps) {
                Resolved::Show(review) => {
                    print!("{}", ui::results_screen(&review, data_urls));
                    let session_id = uuid::Uuid::new_v4().to_string();
                    let dir = config.output_dir.join(&session_id);
                    ui::write_results(&review, &dir, &session_id, chrono::Utc::now())?;
                    println!("Saved to {}", dir.display());

                    println!("Press Enter to start over, or q to quit.");
                    if !confirm(&mut input, &root).await {
                        break;
                    }
                    Route::Capture
                }
                Resolved::Redirect { to, notice } => {
                    println!("{notice}");
                    to
                }
            },
        };
        status_tx.send_replace(SessionStatus::idle(settings.steps.len()));
    }

    drop(status_tx);
    let _ = printer.await;
    Ok(())
}

/// Stdin lines as user input: `q` quits, anything else captures/accepts.
fn spawn_input_reader() -> mpsc::Receiver<UserInput> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("posecap-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let input = match line.trim() {
                    "q" | "quit" => UserInput::Quit,
                    _ => UserInput::Capture,
                };
                if tx.blocking_send(input).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "no input thread, keyboard input disabled");
    }
    rx
}

/// Wait for Enter (true) or quit (false). Input typed earlier is discarded.
async fn confirm(input: &mut mpsc::Receiver<UserInput>, cancel: &CancellationToken) -> bool {
    while input.try_recv().is_ok() {}
    tokio::select! {
        _ = cancel.cancelled() => false,
        next = input.recv() => next == Some(UserInput::Capture),
    }
}

/// Print the instruction header and status line whenever they change.
async fn print_status(mut status: watch::Receiver<SessionStatus>) {
    let mut header = None;
    let mut line = String::new();
    while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();

        let next_header = ui::instruction_header(&snapshot);
        if next_header != header {
            if let Some(h) = &next_header {
                println!("\n{h}");
            }
            header = next_header;
        }

        let next_line = ui::status_line(&snapshot);
        if next_line != line {
            println!("  {next_line}");
            line = next_line;
        }
    }
}

async fn run_diagnostics(config: &Config) -> Result<()> {
    println!("Opening {}...", config.camera_device);
    let device = config.camera_device.clone();
    let warmup = config.warmup_frames;
    let stream = tokio::task::spawn_blocking(move || LiveStream::acquire(&device, warmup))
        .await?
        .context("opening camera")?;

    let mut frames = stream.subscribe();
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            frames.changed().await?;
            if let Some(frame) = frames.borrow_and_update().clone() {
                return Ok::<_, anyhow::Error>(frame);
            }
        }
    })
    .await
    .context("timed out waiting for a frame")??;
    println!(
        "  frame {}x{} seq {}: brightness {:.1}{}",
        frame.width,
        frame.height,
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );
    drop(stream);

    println!("Loading detection model from {}...", config.model_dir.display());
    let detector = load_detector(&config.model_dir).await?;
    let thresholds = config.thresholds();
    let face = tokio::task::spawn_blocking(move || {
        let mut detector = detector
            .lock()
            .map_err(|_| anyhow::anyhow!("detector lock poisoned"))?;
        Ok::<_, anyhow::Error>(detect_single(&mut *detector, &frame.data, frame.width, frame.height)?)
    })
    .await??;

    match face {
        None => println!("  no face detected"),
        Some(face) => {
            println!("  face at ({:.0}, {:.0}) confidence {:.2}", face.x, face.y, face.confidence);
            if let Some(landmarks) = face.landmarks {
                let offset = nose_offset(&landmarks);
                println!("  nose offset {offset:.1}: {}", classify_offset(offset, &thresholds));
            }
        }
    }
    Ok(())
}
