//! Secondary RGB accessory (case fans, strips).
//!
//! A single colour wash per key press. This sink fails independently of the
//! keyboard lighting endpoint: the first error disables it for the rest of the
//! process, logged once.

mod openrgb;

pub use openrgb::{decode_controller_data, ControllerSummary, OpenRgbClient};

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{BoxFuture, ColorRgb, KeysmashError, Result};

const PREFERRED_NAMES: [&str; 4] = ["nzxt", "hue", "kraken", "smart device"];

/// How long a single accessory call may take before the sink gives up on it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub led_count: usize,
}

/// Connection to an RGB peripheral server.
pub trait AccessoryClient: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<()>>;
    fn enumerate_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>>;
    fn set_all_leds(&self, device_index: u32, color: ColorRgb) -> BoxFuture<'_, Result<()>>;
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;
}

/// Devices whose names look like case lighting, or every device when none do.
pub fn select_targets(devices: &[DeviceInfo]) -> Vec<u32> {
    let preferred: Vec<u32> = devices
        .iter()
        .filter(|device| {
            let name = device.name.to_lowercase();
            PREFERRED_NAMES.iter().any(|needle| name.contains(needle))
        })
        .map(|device| device.index)
        .collect();

    if preferred.is_empty() {
        devices.iter().map(|device| device.index).collect()
    } else {
        preferred
    }
}

/// Clears the in-flight flag however the write ends, including when the
/// task running it is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AccessorySink {
    client: Arc<dyn AccessoryClient>,
    targets: Mutex<Vec<u32>>,
    connected: AtomicBool,
    disabled: AtomicBool,
    writing: AtomicBool,
    call_timeout: Duration,
}

impl AccessorySink {
    pub fn new(client: Arc<dyn AccessoryClient>) -> Self {
        Self {
            client,
            targets: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| KeysmashError::msg("accessory call timed out"))?
    }

    /// Connects and picks target devices. On failure the sink stays a no-op.
    pub async fn init(&self) -> bool {
        match self.try_init().await {
            Ok(targets) => {
                tracing::info!(?targets, "accessory lighting ready");
                self.connected.store(true, Ordering::Release);
                true
            }
            Err(err) => {
                tracing::warn!(%err, "accessory lighting not available");
                false
            }
        }
    }

    async fn try_init(&self) -> Result<Vec<u32>> {
        self.bounded(self.client.connect()).await?;
        let devices = self.bounded(self.client.enumerate_devices()).await?;
        let targets = select_targets(&devices);
        tracing::debug!(devices = devices.len(), "accessory devices enumerated");

        let mut slot = self
            .targets
            .lock()
            .map_err(|_| KeysmashError::Poisoned("accessory targets"))?;
        slot.clone_from(&targets);
        Ok(targets)
    }

    pub fn is_enabled(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.disabled.load(Ordering::Acquire)
    }

    /// Washes every target device in `color`. Never fails; the first error
    /// or timeout turns the sink off for good. A colour arriving while the
    /// previous one is still being written is dropped.
    pub async fn set_color(&self, color: ColorRgb) {
        if !self.is_enabled() {
            return;
        }
        if self.writing.swap(true, Ordering::AcqRel) {
            tracing::trace!("accessory busy; colour dropped");
            return;
        }
        let _in_flight = InFlight(&self.writing);

        let targets = match self.targets.lock() {
            Ok(targets) => targets.clone(),
            Err(_) => return,
        };

        for index in targets {
            let written = self.bounded(self.client.set_all_leds(index, color)).await;
            if let Err(err) = written {
                if !self.disabled.swap(true, Ordering::AcqRel) {
                    tracing::warn!(%err, device = index, "accessory lighting failed; disabling");
                }
                return;
            }
        }
    }

    pub async fn destroy(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.bounded(self.client.disconnect()).await {
                tracing::debug!(%err, "accessory disconnect failed");
            }
        }
    }
}

impl std::fmt::Debug for AccessorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorySink")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("disabled", &self.disabled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn device(index: u32, name: &str) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            led_count: 8,
        }
    }

    #[derive(Default)]
    struct FakeClient {
        refuse_connect: bool,
        fail_writes: bool,
        hang_writes: bool,
        writes: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl AccessoryClient for FakeClient {
        fn connect(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                if self.refuse_connect {
                    Err(KeysmashError::msg("connection refused"))
                } else {
                    Ok(())
                }
            })
        }

        fn enumerate_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>> {
            Box::pin(async move { Ok(vec![device(0, "Corsair DRAM"), device(1, "NZXT Hue 2")]) })
        }

        fn set_all_leds(&self, _index: u32, _color: ColorRgb) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if self.hang_writes {
                    std::future::pending::<()>().await;
                }
                if self.fail_writes {
                    Err(KeysmashError::msg("broken pipe"))
                } else {
                    Ok(())
                }
            })
        }

        fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.disconnects.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn prefers_case_lighting_devices() {
        let devices = vec![device(0, "Corsair DRAM"), device(1, "NZXT Hue 2"), device(2, "Kraken X63")];
        assert_eq!(select_targets(&devices), vec![1, 2]);
    }

    #[test]
    fn falls_back_to_every_device() {
        let devices = vec![device(0, "Corsair DRAM"), device(3, "ASUS Aura")];
        assert_eq!(select_targets(&devices), vec![0, 3]);
    }

    #[tokio::test]
    async fn first_failure_disables_for_good() {
        let client = Arc::new(FakeClient {
            fail_writes: true,
            ..Default::default()
        });
        let sink = AccessorySink::new(client.clone());
        assert!(sink.init().await);

        sink.set_color(ColorRgb::WHITE).await;
        sink.set_color(ColorRgb::WHITE).await;
        sink.set_color(ColorRgb::WHITE).await;

        assert_eq!(client.writes.load(Ordering::SeqCst), 1);
        assert!(!sink.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_writes_time_out_and_do_not_pile_up() {
        let client = Arc::new(FakeClient {
            hang_writes: true,
            ..Default::default()
        });
        let sink = Arc::new(AccessorySink::new(client.clone()));
        assert!(sink.init().await);

        let presses: Vec<_> = (0..1000)
            .map(|_| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.set_color(ColorRgb::WHITE).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(presses.iter().all(|press| press.is_finished()));
        assert_eq!(client.writes.load(Ordering::SeqCst), 1);
        assert!(!sink.is_enabled());

        sink.destroy().await;
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_server_makes_a_silent_sink() {
        let client = Arc::new(FakeClient {
            refuse_connect: true,
            ..Default::default()
        });
        let sink = AccessorySink::new(client.clone());
        assert!(!sink.init().await);

        sink.set_color(ColorRgb::WHITE).await;
        sink.destroy().await;

        assert_eq!(client.writes.load(Ordering::SeqCst), 0);
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn washes_only_the_selected_device() {
        let client = Arc::new(FakeClient::default());
        let sink = AccessorySink::new(client.clone());
        assert!(sink.init().await);

        sink.set_color(ColorRgb::new(80, 120, 255)).await;
        sink.destroy().await;
        sink.destroy().await;

        assert_eq!(client.writes.load(Ordering::SeqCst), 1);
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 1);
    }
}
