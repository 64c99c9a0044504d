use anyhow::Context;
use polar_stream::domain::models::{
    DeviceFamily, MessageSeverity, StatusMessage, TelemetryEvent,
};
use polar_stream::domain::settings::SettingsService;
use polar_stream::infrastructure::logging::init_logger;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn prompt_family() -> anyhow::Result<DeviceFamily> {
    println!("{}", "=".repeat(50));
    println!("  Polar Heart Rate Monitor - Connect Tool");
    println!("{}", "=".repeat(50));
    println!("\nWhich sensor do you want to connect to?");
    println!("  1) {}", DeviceFamily::HeartRateStrap.display_name());
    println!("  2) {}", DeviceFamily::MultiSensor.display_name());

    let stdin = io::stdin();
    loop {
        print!("\nEnter 1 or 2: ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            anyhow::bail!("stdin closed before a device was chosen");
        }
        match line.trim() {
            "1" => return Ok(DeviceFamily::HeartRateStrap),
            "2" => return Ok(DeviceFamily::MultiSensor),
            _ => println!("  Please enter 1 or 2."),
        }
    }
}

/// Print decoded events until the engine drops its sender
async fn print_events(mut rx: mpsc::UnboundedReceiver<TelemetryEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TelemetryEvent::HeartRate(hr) if hr.rr_intervals.is_empty() => {
                info!("HR: {} bpm", hr.value)
            }
            TelemetryEvent::HeartRate(hr) => {
                info!("HR: {} bpm  RR: {:?}", hr.value, hr.rr_intervals)
            }
            TelemetryEvent::Motion(frame) => {
                info!(
                    "PMD data [{}]  {} bytes",
                    frame.sensor_kind,
                    frame.payload.len() + 1
                )
            }
            TelemetryEvent::ControlResponse(response) => {
                info!(
                    "PMD control response op=0x{:02x} type={} status={}",
                    response.opcode, response.sensor_kind, response.status
                )
            }
            TelemetryEvent::FrameError {
                characteristic,
                reason,
            } => warn!("Dropped frame on {}: {}", characteristic, reason),
            TelemetryEvent::ConnectionStatus(status) => info!("Status: {:?}", status),
            TelemetryEvent::LogMessage(StatusMessage { message, severity }) => match severity {
                MessageSeverity::Error => error!("{}", message),
                MessageSeverity::Warning => warn!("{}", message),
                MessageSeverity::Info | MessageSeverity::Success => info!("{}", message),
            },
        }
    }
}

#[cfg(windows)]
async fn run(
    family: DeviceFamily,
    settings: Arc<Mutex<SettingsService>>,
    event_sender: mpsc::UnboundedSender<TelemetryEvent>,
) -> anyhow::Result<()> {
    use polar_stream::infrastructure::bluetooth::winrt::WinRtTransport;
    use polar_stream::BluetoothService;

    let queue_capacity = settings
        .lock()
        .map_err(|_| anyhow::anyhow!("Failed to lock settings"))?
        .get()
        .notification_queue_capacity;
    let mut service = BluetoothService::new(
        move || Ok(WinRtTransport::new(queue_capacity)),
        event_sender,
        settings,
    );

    let device = service.connect(family).await?;
    info!("Connected to {} - press Ctrl+C to disconnect.", device);

    let report = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Disconnecting...");
            service.disconnect().await?
        }
        report = service.wait() => report?,
    };

    if let Some(report) = report {
        info!("Session ended: {:?}", report.end_reason);
        for failure in &report.teardown_failures {
            warn!("Teardown: {}", failure);
        }
    }
    Ok(())
}

#[cfg(not(windows))]
async fn run(
    _family: DeviceFamily,
    _settings: Arc<Mutex<SettingsService>>,
    _event_sender: mpsc::UnboundedSender<TelemetryEvent>,
) -> anyhow::Result<()> {
    anyhow::bail!("no Bluetooth LE backend is available on this platform")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();
    info!(
        "Settings loaded from {}",
        settings_service.path().display()
    );

    let family = tokio::task::spawn_blocking(prompt_family)
        .await
        .context("Prompt task failed")??;

    let settings = Arc::new(Mutex::new(settings_service));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(event_rx));

    let result = run(family, settings, event_tx).await;
    // All senders are gone once the service is dropped
    let _ = printer.await;

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
