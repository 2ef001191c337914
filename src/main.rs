use anyhow::Context;
use clap::{Parser, Subcommand};
use ir_blaster::domain::settings::SettingsService;
use ir_blaster::infrastructure::logging;
use ir_blaster::{BleTransport, DeviceRegistry, LearnMode, Session};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "ir-blaster", version, about = "Drive a BLE IR blaster")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peripheral address, e.g. AA:BB:CC:DD:EE:FF
    #[arg(long, short)]
    address: Option<String>,

    /// Override the per-wait timeout
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and report the connection state
    Status,
    /// Read the temperature sensor
    Temperature,
    /// Capture an audio/video remote
    LearnAv,
    /// Capture an air conditioner remote
    LearnAc,
    /// Transmit a hex-encoded IR code
    Emit { ir_data: String },
    /// Attach to the peripheral, then tear the link down and wait for it to drop
    Disconnect,
}

#[derive(Serialize)]
struct TemperatureResult<'a> {
    address: &'a str,
    success: bool,
    temperature: f64,
}

#[derive(Serialize)]
struct LearnResult<'a> {
    address: &'a str,
    success: bool,
    data: String,
}

#[cfg(windows)]
fn platform_transport() -> anyhow::Result<Arc<dyn BleTransport>> {
    Ok(Arc::new(
        ir_blaster::infrastructure::bluetooth::winrt::WinRtTransport::new(),
    ))
}

#[cfg(not(windows))]
fn platform_transport() -> anyhow::Result<Arc<dyn BleTransport>> {
    anyhow::bail!("No BLE transport is available for this platform")
}

async fn learn(session: &Session, mode: LearnMode, timeout: Duration) -> anyhow::Result<()> {
    session.set_timeout(timeout);
    let data = session.learn(mode).await?;
    print_json(&LearnResult {
        address: session.address(),
        success: data.success,
        data: data.data,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_service = match &cli.config {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new().context("Failed to load settings")?,
    };
    let settings = settings_service.get().clone();
    let _logging_guard = logging::init_logger(&settings.log_settings)?;
    info!("Settings loaded from {}", settings_service.path().display());

    let address = cli
        .address
        .clone()
        .or_else(|| settings.device_address.clone())
        .context("No device address given and none configured")?;

    let registry = DeviceRegistry::new(platform_transport()?)
        .with_characteristics(settings.characteristics()?)
        .with_default_timeout(settings.operation_timeout());
    let session = registry.session(&address);

    let learn_timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.learn_timeout());
    if let Some(ms) = cli.timeout_ms {
        session.set_timeout(Duration::from_millis(ms));
    }

    match cli.command {
        Command::Status => {
            session.connect().await?;
            print_json(&registry.statuses())?;
        }
        Command::Temperature => {
            let data = session.get_temperature().await?;
            print_json(&TemperatureResult {
                address: session.address(),
                success: data.success,
                temperature: data.temperature,
            })?;
        }
        Command::LearnAv => learn(&session, LearnMode::Av, learn_timeout).await?,
        Command::LearnAc => learn(&session, LearnMode::Ac, learn_timeout).await?,
        Command::Emit { ir_data } => {
            let summary = session.emit_data(&ir_data).await?;
            print_json(&summary)?;
            if !summary.is_complete() {
                anyhow::bail!("{} of {} writes failed", summary.failed, summary.attempted);
            }
        }
        Command::Disconnect => {
            // A fresh process has no link of its own until it attaches.
            session.connect().await?;
            session.disconnect_sync().await?;
            print_json(&registry.statuses())?;
            return Ok(());
        }
    }

    registry.disconnect_all().await;
    Ok(())
}
