use std::sync::{Arc, Mutex};
use log::info;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

type ActiveScan = Arc<Mutex<Option<CancellationToken>>>;

/// Only one radio operation (a scan window or a connect attempt) runs at a time. A connect
/// request cancels a running scan instead of waiting for its timeout.
#[derive(Clone, Default)]
pub struct Radio {
    lock: Arc<AsyncMutex<()>>,
    active_scan: ActiveScan,
}

pub struct RadioGuard {
    _guard: OwnedMutexGuard<()>,
    active_scan: Option<ActiveScan>,
}

impl Drop for RadioGuard {
    fn drop(&mut self) {
        // runs before `_guard` is released, so the next holder never sees a stale token
        if let Some(active_scan) = self.active_scan.take() {
            *active_scan.lock().expect("Failed to lock active scan") = None;
        }
    }
}

impl Radio {
    pub async fn acquire_for_scan(&self, cancel: CancellationToken) -> RadioGuard {
        let guard = self.lock.clone().lock_owned().await;
        *self.active_scan.lock().expect("Failed to lock active scan") = Some(cancel);

        RadioGuard {
            _guard: guard,
            active_scan: Some(self.active_scan.clone()),
        }
    }

    pub async fn acquire_for_connect(&self) -> RadioGuard {
        let scan = self.active_scan.lock().expect("Failed to lock active scan").take();
        if let Some(scan) = scan {
            info!("Cancelling scan in favour of connect");
            scan.cancel();
        }

        RadioGuard {
            _guard: self.lock.clone().lock_owned().await,
            active_scan: None,
        }
    }
}
