use anyhow::Context;
use heart_rate_ble::domain::models::{MessageSeverity, MonitorEvent};
use heart_rate_ble::domain::settings::SettingsService;
use heart_rate_ble::infrastructure::bluetooth::platform::BtleplugBackend;
use heart_rate_ble::infrastructure::bluetooth::{HeartRateMonitor, MonitorConfig};
use heart_rate_ble::infrastructure::logging::init_logger;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;
    let _logging = init_logger(&settings.get().log_settings)?;
    info!("Starting heart rate monitor");

    let config = MonitorConfig::from(&settings.get().ble);
    let backend = Arc::new(BtleplugBackend::new().await);
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let monitor = HeartRateMonitor::new(backend, config, event_sender);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MonitorEvent::ConnectionStatus(status) => info!("Connection status: {:?}", status),
                MonitorEvent::LogMessage(message) => match message.severity {
                    MessageSeverity::Error => error!("{}", message.message),
                    MessageSeverity::Warning => warn!("{}", message.message),
                    MessageSeverity::Info | MessageSeverity::Success => {
                        info!("{}", message.message)
                    }
                },
            }
        }
    });

    if !monitor.is_mock_mode() && !monitor.is_supported() {
        warn!("No Bluetooth adapter available, falling back to mock mode");
        monitor.enable_mock_mode();
    }

    let handle = monitor.connect().await.context("connecting to heart rate device")?;
    if !monitor.is_mock_mode() {
        if let Err(e) = settings.remember_device(handle.id()) {
            warn!("Failed to save device: {:#}", e);
        }
    }

    monitor
        .start_monitoring(|sample| info!(bpm = sample.value, source = ?sample.source, "Heart rate"))
        .await
        .context("starting heart rate monitoring")?;

    info!("Monitoring {}, press Ctrl-C to stop", handle.id());
    tokio::signal::ctrl_c().await?;

    monitor.disconnect().await;
    info!("Shut down");
    Ok(())
}
