use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::radio::{Radio, RadioGuard};
use crate::device::service::ServiceFilter;
use crate::device::transport::{Advertisement, Transport};
use crate::device::types::DeviceRecord;
use crate::error::{DeviceError, TransportError};

type SeenDevices = Arc<Mutex<IndexMap<String, DeviceRecord>>>;

pub struct Scanner<T: Transport> {
    transport: Arc<T>,
    radio: Radio,
}

impl<T: Transport> Clone for Scanner<T> {
    fn clone(&self) -> Self {
        Scanner { transport: self.transport.clone(), radio: self.radio.clone() }
    }
}

/// One discovery window. Yields each matching device once; the window closes after the timeout,
/// on [`ScanSession::cancel`], or when the session is dropped. The radio is released as soon as
/// the window closes.
pub struct ScanSession {
    receiver: UnboundedReceiver<DeviceRecord>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    seen: SeenDevices,
}

impl ScanSession {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The most recent record for `address` in this window. Its signal strength may be newer than
    /// that of the record that was yielded.
    pub fn latest(&self, address: &str) -> Option<DeviceRecord> {
        self.seen.lock().expect("Failed to lock scan results").get(address).cloned()
    }

    /// Stops the window (if still open), waits for the radio to be released and returns the latest
    /// record of every device seen.
    pub async fn finish(mut self) -> Vec<DeviceRecord> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("Scan task failed: {:?}", err);
            }
        }
        let records = self.seen.lock().expect("Failed to lock scan results").values().cloned().collect();
        records
    }

    /// Runs the window until its timeout and returns the latest record of every device seen.
    pub async fn collect_all(mut self) -> Vec<DeviceRecord> {
        while self.next().await.is_some() {}
        self.finish().await
    }
}

impl Stream for ScanSession {
    type Item = DeviceRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DeviceRecord>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn record_from(advertisement: Advertisement, filter: &ServiceFilter) -> DeviceRecord {
    DeviceRecord {
        services: filter.matching(&advertisement.services),
        address: advertisement.address,
        name: advertisement.name,
        rssi: advertisement.rssi,
    }
}

// only a missing or disabled adapter makes scanning unavailable, anything else may go away again
fn scan_error(source: TransportError) -> DeviceError {
    match source {
        TransportError::AdapterUnavailable => DeviceError::ScanUnavailable { source },
        source => DeviceError::ScanFailed { source },
    }
}

async fn scan_task<T: Transport>(
    transport: Arc<T>,
    radio: RadioGuard,
    cancel: CancellationToken,
    timeout: Duration,
    filter: ServiceFilter,
    mut advertisements: BoxStream<'static, Advertisement>,
    sender: UnboundedSender<DeviceRecord>,
    seen: SeenDevices,
) {
    let deadline = sleep(timeout);
    tokio::pin!(deadline);

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scan cancelled");
                break 'mainloop;
            },
            _ = &mut deadline => {
                debug!("Scan window elapsed");
                break 'mainloop;
            },
            advertisement = advertisements.next() => {
                let Some(advertisement) = advertisement else {
                    break 'mainloop;
                };

                // Some environments ignore the filter, so make sure to check the service uuids again
                if !filter.matches_any(&advertisement.services) {
                    continue;
                }

                let record = record_from(advertisement, &filter);
                let previous = seen
                    .lock()
                    .expect("Failed to lock scan results")
                    .insert(record.address.clone(), record.clone());

                match previous {
                    None => {
                        info!("Found {}", record);
                        // the consumer may have stopped listening, keep collecting until cancelled
                        let _ = sender.unbounded_send(record);
                    },
                    Some(previous) => {
                        debug!("Updated {}: RSSI {:?} -> {:?}", record.address, previous.rssi, record.rssi);
                    },
                }
            },
        }
    }

    drop(advertisements);
    if let Err(err) = transport.stop_scan().await {
        warn!("Failed to stop scanning: {:?}", err);
    }
    drop(radio);
}

impl<T: Transport> Scanner<T> {
    pub fn new(transport: Arc<T>, radio: Radio) -> Self {
        Scanner { transport, radio }
    }

    /// Opens a new discovery window. An empty result is not an error. A missing or disabled adapter
    /// is [`DeviceError::ScanUnavailable`], other radio faults are [`DeviceError::ScanFailed`].
    pub async fn scan(&self, timeout: Duration, filter: &ServiceFilter) -> Result<ScanSession, DeviceError> {
        let cancel = CancellationToken::new();
        let radio = self.radio.acquire_for_scan(cancel.clone()).await;
        let uuids = filter.to_vec();

        if let Err(source) = self.transport.start_scan(&uuids).await {
            warn!("Scanning failed {:?}", source);
            return Err(scan_error(source));
        }

        let advertisements = match self.transport.advertisements().await {
            Ok(advertisements) => advertisements,
            Err(source) => {
                warn!("Listening for advertisements failed {:?}", source);
                if let Err(err) = self.transport.stop_scan().await {
                    warn!("Failed to stop scanning: {:?}", err);
                }
                return Err(scan_error(source));
            },
        };

        let (sender, receiver) = unbounded();
        let seen: SeenDevices = Arc::new(Mutex::new(IndexMap::new()));

        let handle = spawn(scan_task(
            self.transport.clone(),
            radio,
            cancel.clone(),
            timeout,
            filter.clone(),
            advertisements,
            sender,
            seen.clone(),
        ));

        Ok(ScanSession { receiver, cancel, handle: Some(handle), seen })
    }

    /// Scans until `address` shows up or the window times out.
    pub async fn locate(&self, address: &str, timeout: Duration, filter: &ServiceFilter) -> Result<Option<DeviceRecord>, DeviceError> {
        let mut session = self.scan(timeout, filter).await?;

        while let Some(record) = session.next().await {
            if record.address.eq_ignore_ascii_case(address) {
                session.finish().await;
                return Ok(Some(record));
            }
        }

        session.finish().await;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::{advertisement, FakeTransport};
    use crate::device::service::normalize_uuid;
    use crate::error::ErrorKind;

    fn scanner(transport: &Arc<FakeTransport>) -> Scanner<FakeTransport> {
        Scanner::new(transport.clone(), Radio::default())
    }

    #[tokio::test(start_paused = true)]
    async fn deduplicates_by_address_and_keeps_latest_rssi() {
        let transport = Arc::new(FakeTransport::new());
        transport.state().advertisements = vec![
            advertisement("AA:BB:CC:00:00:01", -70, "ffd0"),
            advertisement("AA:BB:CC:00:00:02", -60, "0000fff0-0000-1000-8000-00805f9b34fb"),
            advertisement("AA:BB:CC:00:00:01", -40, "ffd0"),
        ];

        let mut session = scanner(&transport).scan(Duration::from_secs(2), &ServiceFilter::default()).await.unwrap();

        let first = session.next().await.unwrap();
        let second = session.next().await.unwrap();
        assert_eq!(first.address, "AA:BB:CC:00:00:01");
        assert_eq!(first.rssi, Some(-70));
        assert_eq!(second.address, "AA:BB:CC:00:00:02");

        // the window ends at the timeout without yielding the repeated advertisement
        assert!(session.next().await.is_none());
        assert_eq!(session.latest("AA:BB:CC:00:00:01").unwrap().rssi, Some(-40));

        let records = session.finish().await;
        assert_eq!(records.len(), 2);
        assert_eq!(transport.state().scans_stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_scan_is_a_fresh_window() {
        let transport = Arc::new(FakeTransport::new());
        transport.state().advertisements = vec![advertisement("AA:BB:CC:00:00:01", -70, "fff0")];
        let scanner = scanner(&transport);

        for _ in 0..2 {
            let records = scanner
                .scan(Duration::from_secs(1), &ServiceFilter::default())
                .await
                .unwrap()
                .collect_all()
                .await;
            assert_eq!(records.len(), 1);
        }

        let state = transport.state();
        assert_eq!(state.scans_started, 2);
        assert_eq!(state.scans_stopped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_devices_outside_the_filter() {
        let transport = Arc::new(FakeTransport::new());
        let mut mixed = advertisement("AA:BB:CC:00:00:01", -70, "FFF0");
        mixed.services.insert(0, normalize_uuid("180a").unwrap());
        transport.state().advertisements = vec![
            advertisement("11:22:33:44:55:66", -50, "180f"),
            mixed,
        ];

        let records = scanner(&transport)
            .scan(Duration::from_secs(1), &ServiceFilter::default())
            .await
            .unwrap()
            .collect_all()
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "AA:BB:CC:00:00:01");
        assert_eq!(records[0].services, vec![normalize_uuid("fff0").unwrap()]);
        assert_eq!(transport.state().scan_filter, ServiceFilter::default().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scan_is_success() {
        let transport = Arc::new(FakeTransport::new());
        let records = scanner(&transport)
            .scan(Duration::from_secs(1), &ServiceFilter::default())
            .await
            .unwrap()
            .collect_all()
            .await;
        assert!(records.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_adapter_is_scan_unavailable() {
        let transport = Arc::new(FakeTransport::new());
        transport.state().adapter_missing = true;

        let err = scanner(&transport).scan(Duration::from_secs(1), &ServiceFilter::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ScanUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn other_radio_faults_are_not_scan_unavailable() {
        let transport = Arc::new(FakeTransport::new());
        transport.state().scan_failures = 1;
        let scanner = scanner(&transport);

        let err = scanner.scan(Duration::from_secs(1), &ServiceFilter::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ScanFailed);

        // the radio was released and the next window works
        assert!(scanner.scan(Duration::from_secs(1), &ServiceFilter::default()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_session_releases_the_radio() {
        let transport = Arc::new(FakeTransport::new());
        let radio = Radio::default();
        let scanner = Scanner::new(transport.clone(), radio.clone());

        let session = scanner.scan(Duration::from_secs(3600), &ServiceFilter::default()).await.unwrap();
        drop(session);

        // would wait for an hour if the scan session leaked
        let acquired = tokio::time::timeout(Duration::from_secs(1), radio.acquire_for_scan(CancellationToken::new())).await;
        assert!(acquired.is_ok());
        assert_eq!(transport.state().scans_stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn locate_stops_at_the_wanted_device() {
        let transport = Arc::new(FakeTransport::new());
        transport.state().advertisements = vec![
            advertisement("AA:BB:CC:00:00:01", -70, "ffd0"),
            advertisement("AA:BB:CC:00:00:02", -60, "ffd0"),
        ];

        let found = scanner(&transport)
            .locate("aa:bb:cc:00:00:02", Duration::from_secs(3600), &ServiceFilter::default())
            .await
            .unwrap();
        assert_eq!(found.unwrap().address, "AA:BB:CC:00:00:02");
        assert_eq!(transport.state().scans_stopped, 1);
    }
}
