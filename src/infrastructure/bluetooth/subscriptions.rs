//! Notification subscription bookkeeping
//!
//! Keeps the active characteristics in the order they were enabled so
//! teardown can reverse exactly what was set up.

use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::transport::BleTransport;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where notifications from a characteristic are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationRoute {
    HeartRate,
    PmdControl,
    PmdData,
}

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    active: Vec<(Uuid, NotificationRoute)>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable notifications. Subscribing an active characteristic is a no-op.
    pub async fn subscribe<T>(
        &mut self,
        transport: &mut T,
        characteristic: Uuid,
        route: NotificationRoute,
    ) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        if self.is_active(characteristic) {
            debug!("{} already subscribed", characteristic);
            return Ok(());
        }

        transport
            .subscribe(characteristic)
            .await
            .map_err(|e| BleError::SubscribeFailed {
                uuid: characteristic,
                reason: e.to_string(),
            })?;

        info!("Notifications enabled for {} ({:?})", characteristic, route);
        self.active.push((characteristic, route));
        Ok(())
    }

    /// Disable notifications. Unsubscribing an inactive characteristic is a no-op.
    pub async fn unsubscribe<T>(
        &mut self,
        transport: &mut T,
        characteristic: Uuid,
    ) -> Result<(), BleError>
    where
        T: BleTransport + ?Sized,
    {
        let Some(index) = self.position(characteristic) else {
            return Ok(());
        };

        transport
            .unsubscribe(characteristic)
            .await
            .map_err(|e| BleError::SubscribeFailed {
                uuid: characteristic,
                reason: e.to_string(),
            })?;

        self.active.remove(index);
        info!("Notifications disabled for {}", characteristic);
        Ok(())
    }

    /// Unsubscribe everything, newest first. Every characteristic is attempted
    /// and dropped from the set; failures are returned together.
    pub async fn unsubscribe_all<T>(&mut self, transport: &mut T) -> Vec<BleError>
    where
        T: BleTransport + ?Sized,
    {
        let mut failures = Vec::new();
        while let Some((characteristic, _)) = self.active.pop() {
            if let Err(e) = transport.unsubscribe(characteristic).await {
                warn!("Failed to unsubscribe {}: {}", characteristic, e);
                failures.push(BleError::SubscribeFailed {
                    uuid: characteristic,
                    reason: e.to_string(),
                });
            }
        }
        failures
    }

    pub fn is_active(&self, characteristic: Uuid) -> bool {
        self.position(characteristic).is_some()
    }

    pub fn route(&self, characteristic: Uuid) -> Option<NotificationRoute> {
        self.active
            .iter()
            .find(|(uuid, _)| *uuid == characteristic)
            .map(|(_, route)| *route)
    }

    /// Active characteristics in subscription order
    pub fn active(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.active.iter().map(|(uuid, _)| *uuid)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn position(&self, characteristic: Uuid) -> Option<usize> {
        self.active
            .iter()
            .position(|(uuid, _)| *uuid == characteristic)
    }
}
