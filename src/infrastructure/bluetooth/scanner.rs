//! BLE Scanner Module
//!
//! Name-prefix filtered discovery with a mandatory timeout.

use crate::domain::models::DeviceIdentity;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DeviceScanner;

impl DeviceScanner {
    /// Return the first advertiser whose name satisfies `predicate`.
    ///
    /// Scanning is always stopped before returning, whether a device was
    /// found or the timeout elapsed.
    pub async fn find<T, P>(
        transport: &mut T,
        predicate: P,
        timeout: Duration,
    ) -> Result<DeviceIdentity, BleError>
    where
        T: BleTransport + ?Sized,
        P: Fn(&str) -> bool + Send + Sync,
    {
        info!("Scanning for up to {:?}", timeout);
        let mut advertisements = transport
            .start_scan()
            .await
            .map_err(|e| BleError::ConnectFailed(format!("scan could not start: {}", e)))?;

        let search = async {
            while let Some(advertisement) = advertisements.recv().await {
                let Some(name) = advertisement.name.as_deref() else {
                    continue;
                };
                debug!(
                    "Advertisement from {:#X} '{}' ({} dBm)",
                    advertisement.address, name, advertisement.signal_strength
                );
                if predicate(name) {
                    return Some(DeviceIdentity {
                        address: advertisement.address,
                        name: name.to_string(),
                    });
                }
            }
            None
        };

        let found = tokio::time::timeout(timeout, search).await.ok().flatten();

        if let Err(e) = transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Some(device) => {
                info!("Found: {}", device);
                Ok(device)
            }
            None => Err(BleError::DeviceNotFound {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
