//! BLE Connection Module
//!
//! Per-device session lifecycle: scan, connect, negotiate, pair, subscribe,
//! optionally unlock SDK mode, stream, then tear everything down in reverse.

use crate::domain::models::{
    ConnectionStatus, DeviceFamily, DeviceIdentity, MessageSeverity, SensorKind, StatusMessage,
    TelemetryEvent,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::{BleError, TransportError};
use crate::infrastructure::bluetooth::frames::{
    decode_control_response, decode_heart_rate, decode_pmd_frame,
};
use crate::infrastructure::bluetooth::protocol::{
    HR_MEASUREMENT_UUID, PMD_CONTROL_UUID, PMD_DATA_UUID,
};
use crate::infrastructure::bluetooth::scanner::DeviceScanner;
use crate::infrastructure::bluetooth::sdk_mode::SdkModeController;
use crate::infrastructure::bluetooth::subscriptions::{NotificationRoute, SubscriptionManager};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Why the streaming phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    StopRequested,
    RemoteDisconnect,
    TransportClosed,
}

/// Outcome of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub device: Option<DeviceIdentity>,
    pub end_reason: EndReason,
    pub teardown_failures: Vec<BleError>,
}

/// One live connection to one peripheral
pub struct ConnectionSession<T: BleTransport> {
    transport: T,
    family: DeviceFamily,
    settings: Settings,
    event_sender: mpsc::UnboundedSender<TelemetryEvent>,
    subscriptions: SubscriptionManager,
    sdk: SdkModeController,
    status: ConnectionStatus,
    device: Option<DeviceIdentity>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    mtu: Option<u16>,
}

impl<T: BleTransport> ConnectionSession<T> {
    pub fn new(
        transport: T,
        family: DeviceFamily,
        settings: Settings,
        event_sender: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            sdk: SdkModeController::new(&settings),
            transport,
            family,
            settings,
            event_sender,
            subscriptions: SubscriptionManager::new(),
            status: ConnectionStatus::Disconnected,
            device: None,
            events: None,
            mtu: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    /// MTU in effect, if negotiation succeeded
    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn sdk_mode(&self) -> &SdkModeController {
        &self.sdk
    }

    /// Bring the link up to `Streaming`.
    ///
    /// Scan and connect failures return straight away. A fatal error after
    /// the link is up runs the full teardown before returning. A session
    /// that has been connected once cannot be established again.
    pub async fn establish(&mut self) -> Result<DeviceIdentity, BleError> {
        if self.status != ConnectionStatus::Disconnected {
            return Err(BleError::InvalidState(format!(
                "session already {:?}",
                self.status
            )));
        }
        if let Some(device) = &self.device {
            return Err(BleError::InvalidState(format!(
                "session for {} has ended",
                device
            )));
        }

        self.set_status(ConnectionStatus::Scanning);
        self.send_log(
            &format!("Scanning for {}...", self.family.display_name()),
            MessageSeverity::Info,
        );
        let family = self.family;
        let device = match DeviceScanner::find(
            &mut self.transport,
            move |name| family.matches(name),
            self.settings.scan_timeout(),
        )
        .await
        {
            Ok(device) => device,
            Err(e) => {
                error!("{}", e);
                self.send_log(
                    &format!("{} not found", family.display_name()),
                    MessageSeverity::Error,
                );
                self.set_status(ConnectionStatus::Disconnected);
                return Err(e);
            }
        };

        self.set_status(ConnectionStatus::Connecting);
        self.send_log(&format!("Connecting to {}...", device), MessageSeverity::Info);
        if let Err(e) = self.connect_transport(&device).await {
            error!("{}", e);
            self.send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
            self.set_status(ConnectionStatus::Disconnected);
            return Err(e);
        }
        self.device = Some(device.clone());
        self.events = self.transport.take_events();

        if let Err(e) = self.prepare().await {
            error!("Session setup failed: {}", e);
            self.send_log(&format!("Setup failed: {}", e), MessageSeverity::Error);
            let teardown_failures = self.teardown().await;
            if teardown_failures.is_empty() {
                return Err(e);
            }
            for failure in &teardown_failures {
                warn!("Teardown after failed setup: {}", failure);
            }
            // Setup error first, then whatever teardown could not undo
            let mut failures = vec![e];
            failures.extend(teardown_failures);
            return Err(BleError::TeardownIncomplete { failures });
        }

        self.set_status(ConnectionStatus::Streaming);
        self.send_log(
            &format!("Connected to {} - streaming", device.name),
            MessageSeverity::Success,
        );
        Ok(device)
    }

    async fn connect_transport(&mut self, device: &DeviceIdentity) -> Result<(), BleError> {
        let timeout = self.settings.connect_timeout();
        match tokio::time::timeout(timeout, self.transport.connect(device, timeout)).await {
            Ok(Ok(())) if self.transport.is_connected() => Ok(()),
            Ok(Ok(())) => Err(BleError::ConnectFailed(
                "transport reported success but link is down".to_string(),
            )),
            Ok(Err(e)) => Err(BleError::ConnectFailed(e.to_string())),
            Err(_) => Err(BleError::ConnectFailed(format!(
                "no connection within {:?}",
                timeout
            ))),
        }
    }

    async fn prepare(&mut self) -> Result<(), BleError> {
        self.set_status(ConnectionStatus::Negotiating);
        self.negotiate_mtu().await;

        self.set_status(ConnectionStatus::Pairing);
        self.pair().await;

        self.set_status(ConnectionStatus::SubscribingCore);
        self.subscribe_core().await?;

        if self.family.supports_sdk_mode() {
            self.set_status(ConnectionStatus::EnablingSdkMode);
            self.enable_streams().await?;
        }
        Ok(())
    }

    /// Best-effort: the default MTU still works, just with smaller frames
    async fn negotiate_mtu(&mut self) {
        match self.transport.request_mtu(self.settings.preferred_mtu).await {
            Ok(mtu) => {
                info!("MTU: {}", mtu);
                self.mtu = Some(mtu);
            }
            Err(e) => {
                let degraded = BleError::NegotiationDegraded(e.to_string());
                warn!("{}", degraded);
                self.send_log("MTU negotiation skipped", MessageSeverity::Warning);
            }
        }
    }

    /// Best-effort: a bonded device rejecting a second pair request is fine
    async fn pair(&mut self) {
        match self.transport.pair().await {
            Ok(()) => info!("Paired"),
            Err(TransportError::AlreadyPaired) => info!("Device already paired"),
            Err(e) => {
                let degraded = BleError::PairingDegraded(e.to_string());
                warn!("{}", degraded);
                self.send_log(&format!("Pairing note: {}", e), MessageSeverity::Warning);
            }
        }
    }

    async fn subscribe_core(&mut self) -> Result<(), BleError> {
        match self.family {
            DeviceFamily::HeartRateStrap => {
                // Heart rate is the strap's only job
                self.subscriptions
                    .subscribe(
                        &mut self.transport,
                        HR_MEASUREMENT_UUID,
                        NotificationRoute::HeartRate,
                    )
                    .await?;
                self.send_log("HR notifications started", MessageSeverity::Info);

                if let Err(e) = self.subscribe_pmd().await {
                    warn!("Optional PMD subscription failed: {}", e);
                    self.send_log(
                        &format!("PMD subscribe note: {}", e),
                        MessageSeverity::Warning,
                    );
                }
            }
            DeviceFamily::MultiSensor => {
                self.subscribe_pmd().await?;
                tokio::time::sleep(self.settings.subscribe_settle()).await;

                match self
                    .subscriptions
                    .subscribe(
                        &mut self.transport,
                        HR_MEASUREMENT_UUID,
                        NotificationRoute::HeartRate,
                    )
                    .await
                {
                    Ok(()) => self.send_log("HR notifications started", MessageSeverity::Info),
                    Err(e) => {
                        warn!("HR subscription failed, continuing with PMD only: {}", e);
                        self.send_log(
                            &format!("HR subscribe note: {}", e),
                            MessageSeverity::Warning,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Control point first: the data characteristic is useless without it
    async fn subscribe_pmd(&mut self) -> Result<(), BleError> {
        self.subscriptions
            .subscribe(
                &mut self.transport,
                PMD_CONTROL_UUID,
                NotificationRoute::PmdControl,
            )
            .await?;
        tokio::time::sleep(self.settings.subscribe_settle()).await;
        self.subscriptions
            .subscribe(&mut self.transport, PMD_DATA_UUID, NotificationRoute::PmdData)
            .await?;
        self.send_log("PMD notifications started", MessageSeverity::Info);
        Ok(())
    }

    async fn enable_streams(&mut self) -> Result<(), BleError> {
        self.send_log("Enabling SDK Mode...", MessageSeverity::Info);
        self.sdk.enable(&mut self.transport).await?;

        let settings = self.settings.accelerometer.to_stream_settings();
        self.sdk
            .start_stream(
                &mut self.transport,
                &self.subscriptions,
                SensorKind::Accelerometer,
                &settings,
            )
            .await?;
        self.send_log("ACC stream started", MessageSeverity::Info);
        Ok(())
    }

    /// Deliver notifications until `stop` fires or the link goes away, then
    /// tear down. Teardown always runs to completion.
    pub async fn stream_until_stopped(
        &mut self,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<SessionReport, BleError> {
        if self.status != ConnectionStatus::Streaming {
            return Err(BleError::InvalidState(format!(
                "cannot stream while {:?}",
                self.status
            )));
        }

        let end_reason = match self.events.take() {
            Some(mut events) => loop {
                tokio::select! {
                    biased;
                    // A dropped sender counts as a stop request
                    _ = &mut stop => break EndReason::StopRequested,
                    event = events.recv() => match event {
                        Some(TransportEvent::Notification { characteristic, value }) => {
                            self.dispatch(characteristic, &value);
                        }
                        Some(TransportEvent::Disconnected) => break EndReason::RemoteDisconnect,
                        None => break EndReason::TransportClosed,
                    },
                }
            },
            None => {
                let _ = stop.await;
                EndReason::StopRequested
            }
        };

        match end_reason {
            EndReason::StopRequested => info!("Stop requested, disconnecting..."),
            EndReason::RemoteDisconnect | EndReason::TransportClosed => {
                let e = BleError::UnexpectedDisconnect;
                warn!("{}", e);
                self.send_log("Device disconnected.", MessageSeverity::Warning);
            }
        }

        let teardown_failures = self.teardown().await;
        Ok(SessionReport {
            device: self.device.clone(),
            end_reason,
            teardown_failures,
        })
    }

    fn dispatch(&self, characteristic: Uuid, value: &[u8]) {
        if self.settings.debug_raw_data_logging {
            trace!("Notification {} {:02X?}", characteristic, value);
        }

        let result = match self.subscriptions.route(characteristic) {
            Some(NotificationRoute::HeartRate) => {
                decode_heart_rate(value).map(TelemetryEvent::HeartRate)
            }
            Some(NotificationRoute::PmdData) => decode_pmd_frame(value).map(TelemetryEvent::Motion),
            Some(NotificationRoute::PmdControl) => {
                decode_control_response(value).map(|response| {
                    if response.is_success() {
                        debug!("PMD control response {:?}", response);
                    } else {
                        warn!("PMD control error response {:?}", response);
                    }
                    TelemetryEvent::ControlResponse(response)
                })
            }
            None => {
                trace!("Ignoring notification from unsubscribed {}", characteristic);
                return;
            }
        };

        let event = result.unwrap_or_else(|e| {
            debug!("Bad frame on {}: {}", characteristic, e);
            TelemetryEvent::FrameError {
                characteristic,
                reason: e.to_string(),
            }
        });
        let _ = self.event_sender.send(event);
    }

    /// Stop streams, leave SDK mode, unsubscribe, disconnect. Every step runs
    /// regardless of earlier failures.
    async fn teardown(&mut self) -> Vec<BleError> {
        self.set_status(ConnectionStatus::TearingDown);
        let mut failures = Vec::new();

        if let Err(e) = self.sdk.disable(&mut self.transport).await {
            failures.extend(e.into_failures());
        }

        failures.extend(self.subscriptions.unsubscribe_all(&mut self.transport).await);

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
            failures.push(BleError::DisconnectFailed(e.to_string()));
        }

        // The link is gone whatever the writes returned
        self.sdk.reset();
        self.events = None;
        if failures.is_empty() {
            info!("Teardown complete");
        } else {
            warn!("Teardown complete with {} failure(s)", failures.len());
        }
        self.send_log("Disconnected.", MessageSeverity::Info);
        self.set_status(ConnectionStatus::Disconnected);
        failures
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        debug!("Session {:?} -> {:?}", self.status, status);
        self.status = status;
        let _ = self.event_sender.send(TelemetryEvent::ConnectionStatus(status));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(TelemetryEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
