use anyhow::{Context, Result};
use mayhem_remote::cli::{Cli, Commands};
use mayhem_remote::config::AppConfig;
use mayhem_remote::link::emulator::{DemoDeviceProvider, EmulatorOptions};
use mayhem_remote::link::serial::SerialDeviceProvider;
use mayhem_remote::link::{DeviceInfo, DeviceProvider, ShellClient};
use mayhem_remote::protocol::LinkCapabilities;
use mayhem_remote::screen::{self, ScreenSize};
use mayhem_remote::session::SessionController;
use mayhem_remote::tui;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match &cli.command {
        Commands::Remote { log_file, .. } => init_file_logging(&tui::expand_path(log_file))?,
        _ => init_stderr_logging(),
    }

    let config_path = cli.config.as_deref().map(tui::expand_path);
    let mut config = AppConfig::load_or_default(config_path.as_deref())?;
    if let Some(profile) = cli.profile {
        config.session.profile = profile;
    }
    if cli.no_reconnect {
        config.session.auto_reconnect = false;
    }

    match cli.command {
        Commands::Devices => list_devices(&config, cli.port),
        Commands::Probe { json } => probe(&config, cli.port, json).await,
        Commands::Capture { out } => capture(&config, cli.port, &out).await,
        Commands::Remote { demo, graphics, .. } => {
            start_remote(config, cli.port, demo, graphics.as_deref()).await
        }
    }
}

fn init_stderr_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// The UI owns the terminal, so the interactive session logs to a file.
fn init_file_logging(path: &Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init()
        .ok();
    Ok(())
}

fn list_devices(config: &AppConfig, port: Option<String>) -> Result<()> {
    let provider = SerialDeviceProvider::new(config.link.baud_rate, port);
    let devices = provider.list();
    if devices.is_empty() {
        println!("No USB serial device found");
        return Ok(());
    }
    for device in devices {
        let access = if device.has_permission {
            ""
        } else {
            " (no permission)"
        };
        println!("{}  {}{}", device.title, device.subtitle, access);
    }
    Ok(())
}

/// Open the first (or pinned) device and run the connect handshake.
async fn open_first(
    config: &AppConfig,
    port: Option<String>,
) -> Result<(DeviceInfo, ShellClient, ScreenSize, LinkCapabilities)> {
    let provider = SerialDeviceProvider::new(config.link.baud_rate, port);
    let device = provider
        .list()
        .into_iter()
        .next()
        .context("No USB serial device found")?;
    let stream = provider
        .open(&device)
        .with_context(|| format!("Failed to open {}", device.id))?;

    let mut shell = ShellClient::new(config.link.clone());
    shell.open(stream).await?;
    let size = match shell.query_resolution().await {
        Ok(size) => size,
        Err(e) => {
            shell.close().await;
            return Err(e).context("Radio did not report its screen size");
        }
    };
    let caps = shell.detect_link_capabilities().await;
    Ok((device, shell, size, caps))
}

#[derive(Serialize)]
struct ProbeReport {
    device: String,
    port: String,
    width: u32,
    height: u32,
    capabilities: LinkCapabilities,
    turbo: bool,
}

async fn probe(config: &AppConfig, port: Option<String>, json: bool) -> Result<()> {
    let (device, mut shell, size, caps) = open_first(config, port).await?;
    shell.close().await;

    let report = ProbeReport {
        device: device.title,
        port: device.id,
        width: size.width(),
        height: size.height(),
        capabilities: caps,
        turbo: caps.turbo_enabled(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("📡 {} on {}", report.device, report.port);
        println!("Screen: {}", size);
        println!(
            "Fast buttons: {} | Fast touch: {} | Half frames: {}",
            caps.button_fast, caps.touch_fast, caps.frame_half
        );
        println!("Turbo link: {}", report.turbo);
    }
    Ok(())
}

async fn capture(config: &AppConfig, port: Option<String>, out: &Path) -> Result<()> {
    let (_device, mut shell, detected, _caps) = open_first(config, port).await?;
    let size = config.session.profile.resolve(detected);
    let frame = shell.fetch_frame(size).await;
    shell.close().await;
    let frame = frame.context("Failed to fetch screen frame")?;

    screen::viewer::frame_to_image(&frame)
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("✅ Saved {} screen to {}", size, out.display());
    Ok(())
}

async fn start_remote(
    config: AppConfig,
    port: Option<String>,
    demo: bool,
    graphics: Option<&str>,
) -> Result<()> {
    let provider: Arc<dyn DeviceProvider> = if demo {
        Arc::new(DemoDeviceProvider::new(EmulatorOptions::default()))
    } else {
        Arc::new(SerialDeviceProvider::new(config.link.baud_rate, port))
    };
    let controller = SessionController::new(config.session, config.link, provider);

    // Query the terminal before raw mode takes over stdin
    let picker = screen::viewer::create_picker(graphics);
    let mut ui = tui::RemoteUI::new(controller.clone(), picker);
    let result = ui.run().await;

    controller.shutdown().await;
    result
}
