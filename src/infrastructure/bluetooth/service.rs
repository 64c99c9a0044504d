//! Bluetooth Service Module
//!
//! Control surface for the application: owns at most one running session
//! and exposes `connect(family)` / `disconnect()`.

use crate::domain::models::{DeviceFamily, DeviceIdentity, TelemetryEvent};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::connection::{ConnectionSession, SessionReport};
use crate::infrastructure::bluetooth::error::{BleError, TransportError};
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type TransportFactory<T> = Box<dyn Fn() -> Result<T, TransportError> + Send + Sync>;

struct ActiveSession {
    device: DeviceIdentity,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<SessionReport, BleError>>,
}

/// Main Bluetooth service coordinating session lifetimes
pub struct BluetoothService<T: BleTransport + 'static> {
    transport_factory: TransportFactory<T>,
    event_sender: mpsc::UnboundedSender<TelemetryEvent>,
    settings: Arc<Mutex<SettingsService>>,
    active: Option<ActiveSession>,
}

impl<T: BleTransport + 'static> BluetoothService<T> {
    pub fn new(
        transport_factory: impl Fn() -> Result<T, TransportError> + Send + Sync + 'static,
        event_sender: mpsc::UnboundedSender<TelemetryEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        Self {
            transport_factory: Box::new(transport_factory),
            event_sender,
            settings,
            active: None,
        }
    }

    /// Find, connect and start streaming from a device of `family`.
    ///
    /// Returns once the session is streaming; notifications are then
    /// delivered on a background task until `disconnect` or link loss.
    pub async fn connect(&mut self, family: DeviceFamily) -> Result<DeviceIdentity, BleError> {
        if let Some(active) = &self.active {
            if !active.handle.is_finished() {
                return Err(BleError::InvalidState(format!(
                    "already connected to {}",
                    active.device
                )));
            }
        }
        // Reap a session that ended on its own
        if let Some(finished) = self.active.take() {
            let _ = finished.handle.await;
        }

        let settings = {
            let settings = self
                .settings
                .lock()
                .map_err(|_| BleError::InvalidState("settings lock poisoned".to_string()))?;
            settings.get().clone()
        };

        let transport = (self.transport_factory)().map_err(|e| {
            BleError::ConnectFailed(format!("transport unavailable: {}", e))
        })?;
        let mut session =
            ConnectionSession::new(transport, family, settings, self.event_sender.clone());
        let device = session.establish().await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { session.stream_until_stopped(stop_rx).await });
        info!("Session for {} running", device);

        self.active = Some(ActiveSession {
            device: device.clone(),
            stop_tx: Some(stop_tx),
            handle,
        });
        Ok(device)
    }

    /// Stop the running session and wait for teardown to finish.
    /// Without a session this is a no-op returning `None`.
    pub async fn disconnect(&mut self) -> Result<Option<SessionReport>, BleError> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };
        if let Some(stop_tx) = active.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        Self::join(active.handle).await.map(Some)
    }

    /// Wait until the running session ends on its own (remote disconnect).
    /// Cancel-safe: if the future is dropped the session stays registered.
    pub async fn wait(&mut self) -> Result<Option<SessionReport>, BleError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        let result = (&mut active.handle).await;
        self.active = None;
        match result {
            Ok(report) => report.map(Some),
            Err(e) => Err(BleError::InvalidState(format!("session task failed: {}", e))),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn connected_device(&self) -> Option<&DeviceIdentity> {
        self.active.as_ref().map(|active| &active.device)
    }

    async fn join(
        handle: JoinHandle<Result<SessionReport, BleError>>,
    ) -> Result<SessionReport, BleError> {
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Session task failed: {}", e);
                Err(BleError::InvalidState(format!("session task failed: {}", e)))
            }
        }
    }
}
