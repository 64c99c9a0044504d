//! SDK mode and PMD stream control
//!
//! The firmware handles control point writes one at a time, so every
//! command waits for the write response and then a settling delay before
//! the next dependent command goes out.

use crate::domain::models::SensorKind;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::{
    build_sdk_mode_command, build_start_command, build_stop_command, StreamSetting,
    PMD_CONTROL_UUID,
};
use crate::infrastructure::bluetooth::subscriptions::SubscriptionManager;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkModeState {
    Disabled,
    Enabling,
    Enabled,
    StreamActive(BTreeSet<SensorKind>),
    Disabling,
}

pub struct SdkModeController {
    state: SdkModeState,
    sdk_settle: Duration,
    command_settle: Duration,
    write_timeout: Duration,
}

impl SdkModeController {
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: SdkModeState::Disabled,
            sdk_settle: settings.sdk_settle(),
            command_settle: settings.command_settle(),
            write_timeout: settings.write_timeout(),
        }
    }

    pub fn state(&self) -> &SdkModeState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        matches!(
            self.state,
            SdkModeState::Enabled | SdkModeState::StreamActive(_)
        )
    }

    pub fn active_streams(&self) -> Vec<SensorKind> {
        match &self.state {
            SdkModeState::StreamActive(kinds) => kinds.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Forget all SDK and stream state once the link is gone
    pub fn reset(&mut self) {
        if self.state != SdkModeState::Disabled {
            debug!("Resetting SDK mode state from {:?}", self.state);
        }
        self.state = SdkModeState::Disabled;
    }

    /// Write a command to the control point and wait for the response
    async fn send<T>(&self, transport: &mut T, command: Vec<u8>) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        debug!("PMD control write {:02X?}", command);
        match tokio::time::timeout(self.write_timeout, transport.write(PMD_CONTROL_UUID, &command))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BleError::WriteFailed {
                command,
                reason: e.to_string(),
            }),
            Err(_) => Err(BleError::WriteFailed {
                command,
                reason: format!("no write response within {:?}", self.write_timeout),
            }),
        }
    }

    pub async fn enable<T>(&mut self, transport: &mut T) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        match self.state {
            SdkModeState::Disabled => {}
            SdkModeState::Enabled | SdkModeState::StreamActive(_) => return Ok(()),
            SdkModeState::Enabling | SdkModeState::Disabling => {
                return Err(BleError::InvalidState(format!(
                    "cannot enable SDK mode while {:?}",
                    self.state
                )))
            }
        }

        info!("Enabling SDK mode...");
        self.state = SdkModeState::Enabling;
        if let Err(e) = self.send(transport, build_sdk_mode_command(true)).await {
            self.state = SdkModeState::Disabled;
            return Err(e);
        }
        tokio::time::sleep(self.sdk_settle).await;
        self.state = SdkModeState::Enabled;
        info!("SDK mode enabled");
        Ok(())
    }

    /// Start a sensor stream. Requires SDK mode and an active control point
    /// subscription.
    pub async fn start_stream<T>(
        &mut self,
        transport: &mut T,
        subscriptions: &SubscriptionManager,
        sensor_kind: SensorKind,
        settings: &[StreamSetting],
    ) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        if !subscriptions.is_active(PMD_CONTROL_UUID) {
            return Err(BleError::InvalidState(
                "PMD control point is not subscribed".to_string(),
            ));
        }

        let mut active = match &self.state {
            SdkModeState::Enabled => BTreeSet::new(),
            SdkModeState::StreamActive(kinds) if kinds.contains(&sensor_kind) => return Ok(()),
            SdkModeState::StreamActive(kinds) => kinds.clone(),
            other => {
                return Err(BleError::InvalidState(format!(
                    "cannot start {} stream while {:?}",
                    sensor_kind, other
                )))
            }
        };

        self.send(transport, build_start_command(sensor_kind, settings))
            .await?;
        tokio::time::sleep(self.command_settle).await;

        active.insert(sensor_kind);
        self.state = SdkModeState::StreamActive(active);
        info!("{} stream started", sensor_kind);
        Ok(())
    }

    /// Stop a sensor stream. Stopping an inactive stream is a no-op.
    pub async fn stop_stream<T>(
        &mut self,
        transport: &mut T,
        sensor_kind: SensorKind,
    ) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        let mut active = match &self.state {
            SdkModeState::StreamActive(kinds) if kinds.contains(&sensor_kind) => kinds.clone(),
            _ => return Ok(()),
        };

        self.send(transport, build_stop_command(sensor_kind)).await?;
        tokio::time::sleep(self.command_settle).await;

        active.remove(&sensor_kind);
        self.state = if active.is_empty() {
            SdkModeState::Enabled
        } else {
            SdkModeState::StreamActive(active)
        };
        info!("{} stream stopped", sensor_kind);
        Ok(())
    }

    /// Stop every active stream, then leave SDK mode. Each step is attempted
    /// even if an earlier one failed.
    pub async fn disable<T>(&mut self, transport: &mut T) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        if matches!(self.state, SdkModeState::Disabled) {
            return Ok(());
        }

        let mut failures = Vec::new();
        for sensor_kind in self.active_streams() {
            if let Err(e) = self.stop_stream(transport, sensor_kind).await {
                warn!("Failed to stop {} stream: {}", sensor_kind, e);
                failures.push(e);
            }
        }

        info!("Disabling SDK mode...");
        let previous = std::mem::replace(&mut self.state, SdkModeState::Disabling);
        match self.send(transport, build_sdk_mode_command(false)).await {
            Ok(()) => {
                tokio::time::sleep(self.command_settle).await;
                self.state = SdkModeState::Disabled;
                info!("SDK mode disabled");
            }
            Err(e) => {
                warn!("Failed to disable SDK mode: {}", e);
                self.state = previous;
                failures.push(e);
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(BleError::TeardownIncomplete { failures }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceIdentity;
    use crate::domain::settings::AccelerometerSettings;
    use crate::infrastructure::bluetooth::mock::{MockHandle, MockTransport};
    use crate::infrastructure::bluetooth::subscriptions::NotificationRoute;

    async fn setup() -> (MockTransport, MockHandle, SubscriptionManager, SdkModeController) {
        let (mut transport, handle) = MockTransport::new(8);
        let device = DeviceIdentity {
            address: 0xBB,
            name: "Polar Sense 0001".to_string(),
        };
        transport
            .connect(&device, Duration::from_secs(1))
            .await
            .unwrap();
        let mut subs = SubscriptionManager::new();
        subs.subscribe(&mut transport, PMD_CONTROL_UUID, NotificationRoute::PmdControl)
            .await
            .unwrap();
        let controller = SdkModeController::new(&Settings::default());
        (transport, handle, subs, controller)
    }

    fn acc() -> Vec<StreamSetting> {
        AccelerometerSettings::default().to_stream_settings()
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_start_disable_sequence() {
        let (mut transport, handle, subs, mut sdk) = setup().await;

        sdk.enable(&mut transport).await.unwrap();
        assert_eq!(sdk.state(), &SdkModeState::Enabled);

        sdk.start_stream(&mut transport, &subs, SensorKind::Accelerometer, &acc())
            .await
            .unwrap();
        assert_eq!(sdk.active_streams(), vec![SensorKind::Accelerometer]);

        sdk.disable(&mut transport).await.unwrap();
        assert_eq!(sdk.state(), &SdkModeState::Disabled);

        assert_eq!(
            handle.writes_to(PMD_CONTROL_UUID),
            vec![
                vec![0x02, 0x09],
                vec![
                    0x02, 0x02, 0x00, 0x01, 0x34, 0x00, 0x01, 0x01, 0x10, 0x00, 0x02, 0x01,
                    0x08, 0x00, 0x04, 0x01, 0x03, 0x00
                ],
                vec![0x03, 0x02],
                vec![0x03, 0x09],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_after_enable() {
        let (mut transport, _handle, _subs, mut sdk) = setup().await;
        let started = tokio::time::Instant::now();
        sdk.enable(&mut transport).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_when_disabled_is_noop() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        sdk.disable(&mut transport).await.unwrap();
        assert!(handle.writes_to(PMD_CONTROL_UUID).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_without_streams_sends_no_stop() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();
        sdk.disable(&mut transport).await.unwrap();
        assert_eq!(
            handle.writes_to(PMD_CONTROL_UUID),
            vec![vec![0x02, 0x09], vec![0x03, 0x09]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_inactive_stream_is_noop() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();
        sdk.stop_stream(&mut transport, SensorKind::Gyroscope)
            .await
            .unwrap();
        assert_eq!(handle.writes_to(PMD_CONTROL_UUID), vec![vec![0x02, 0x09]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_control_subscription() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();

        let empty = SubscriptionManager::new();
        let err = sdk
            .start_stream(&mut transport, &empty, SensorKind::Accelerometer, &acc())
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::InvalidState(_)));
        assert_eq!(handle.writes_to(PMD_CONTROL_UUID), vec![vec![0x02, 0x09]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_sdk_mode() {
        let (mut transport, _handle, subs, mut sdk) = setup().await;
        let err = sdk
            .start_stream(&mut transport, &subs, SensorKind::Accelerometer, &acc())
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_enable_stays_disabled() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        handle.fail_write(vec![0x02, 0x09]);

        let err = sdk.enable(&mut transport).await.unwrap_err();
        assert!(matches!(err, BleError::WriteFailed { .. }));
        assert_eq!(sdk.state(), &SdkModeState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_continues_after_failed_stop() {
        let (mut transport, handle, subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();
        sdk.start_stream(&mut transport, &subs, SensorKind::Accelerometer, &acc())
            .await
            .unwrap();
        handle.fail_write(vec![0x03, 0x02]);

        let err = sdk.disable(&mut transport).await.unwrap_err();
        assert!(matches!(err, BleError::WriteFailed { ref command, .. } if command == &vec![0x03, 0x02]));
        assert_eq!(sdk.state(), &SdkModeState::Disabled);
        assert_eq!(
            handle.writes_to(PMD_CONTROL_UUID).last(),
            Some(&vec![0x03, 0x09])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_enable_times_out() {
        let (mut transport, handle, _subs, mut sdk) = setup().await;
        handle.hang_write(vec![0x02, 0x09]);

        let started = tokio::time::Instant::now();
        let err = sdk.enable(&mut transport).await.unwrap_err();
        assert!(matches!(
            err,
            BleError::WriteFailed { ref command, ref reason }
                if command == &vec![0x02, 0x09] && reason.starts_with("no write response")
        ));
        assert!(started.elapsed() >= Settings::default().write_timeout());
        assert_eq!(sdk.state(), &SdkModeState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_start_leaves_stream_inactive() {
        let (mut transport, handle, subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();
        handle.hang_write(build_start_command(SensorKind::Accelerometer, &acc()));

        let err = sdk
            .start_stream(&mut transport, &subs, SensorKind::Accelerometer, &acc())
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::WriteFailed { .. }));
        assert_eq!(sdk.state(), &SdkModeState::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_streams() {
        let (mut transport, handle, subs, mut sdk) = setup().await;
        sdk.enable(&mut transport).await.unwrap();
        sdk.start_stream(&mut transport, &subs, SensorKind::Accelerometer, &acc())
            .await
            .unwrap();

        sdk.reset();
        assert_eq!(sdk.state(), &SdkModeState::Disabled);
        assert!(sdk.active_streams().is_empty());

        // Next enable goes out on the wire again
        sdk.enable(&mut transport).await.unwrap();
        assert_eq!(
            handle.writes_to(PMD_CONTROL_UUID).last(),
            Some(&vec![0x02, 0x09])
        );
    }
}
