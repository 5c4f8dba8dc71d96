//! Shared helpers for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use batchloader::downloader::{DownloadTask, GroupOptions, GroupPhase, TaskGroup, TaskResult};
use batchloader::fetch::{FetchResponse, Fetcher};
use batchloader::queue::{EventBus, GroupEvent, GroupEventKind, GroupListener, QueueManager};
use batchloader::{GroupId, TransferError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Fetcher that holds each transfer until the test releases it
///
/// Tracks how many transfers are in flight and the highest count seen.
pub struct GatedFetcher {
    status: u16,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedFetcher {
    /// Every transfer waits for `release`
    pub fn gated(status: u16) -> Arc<Self> {
        Arc::new(Self::build(status, Some(Semaphore::new(0))))
    }

    /// Transfers finish after a yield
    pub fn open(status: u16) -> Arc<Self> {
        Arc::new(Self::build(status, None))
    }

    fn build(status: u16, gate: Option<Semaphore>) -> Self {
        Self {
            status,
            gate,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Let `n` held transfers finish
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    fn id(&self) -> &'static str {
        "gated"
    }

    async fn fetch(&self, _source: &str, _destination: &Path) -> Result<FetchResponse, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match &self.gate {
            Some(gate) => {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|e| TransferError::Aborted(e.to_string()))?;
                permit.forget();
            }
            None => tokio::task::yield_now().await,
        }

        Ok(FetchResponse::new(self.status, 1))
    }
}

/// Listener that records every event it sees
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<(GroupId, GroupEventKind)>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds_for(&self, group: GroupId) -> Vec<GroupEventKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == group)
            .map(|(_, kind)| *kind)
            .collect()
    }

    pub fn count(&self, group: GroupId, kind: GroupEventKind) -> usize {
        self.kinds_for(group).into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl GroupListener for EventRecorder {
    async fn on_event(&self, event: &GroupEvent) {
        self.events.lock().unwrap().push((event.group, event.kind));
    }
}

/// Completion outcomes collected from task callbacks
#[derive(Default)]
pub struct Outcomes {
    pub ok: AtomicUsize,
    pub failed: Mutex<Vec<TransferError>>,
}

impl Outcomes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ok(&self) -> usize {
        self.ok.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<TransferError> {
        self.failed.lock().unwrap().clone()
    }
}

/// `count` tasks whose callbacks report into `outcomes`
pub fn tasks(count: usize, outcomes: &Arc<Outcomes>) -> Vec<DownloadTask> {
    (0..count)
        .map(|i| {
            let outcomes = Arc::clone(outcomes);
            DownloadTask::new(format!("https://example.com/file-{i}"), format!("/tmp/file-{i}"))
                .with_completion(move |result: TaskResult| match result {
                    Ok(_) => {
                        outcomes.ok.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => outcomes.failed.lock().unwrap().push(e),
                })
        })
        .collect()
}

pub fn group(
    count: usize,
    fetcher: &Arc<GatedFetcher>,
    bus: &EventBus,
    delegate: Option<Arc<EventRecorder>>,
    outcomes: &Arc<Outcomes>,
) -> TaskGroup {
    let delegate = delegate.map(|d| d as Arc<dyn GroupListener>);
    TaskGroup::new(
        delegate,
        tasks(count, outcomes),
        fetcher.clone(),
        bus.clone(),
        GroupOptions::default(),
    )
}

/// Poll `check` until it holds or `WAIT` runs out
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the queue holds exactly `expected`, head first
pub async fn wait_for_queue(qm: &QueueManager, expected: &[GroupId]) {
    let deadline = Instant::now() + WAIT;
    loop {
        let groups = qm.groups().await;
        if groups == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for queue {expected:?}, have {groups:?}"
        );
        sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `group` reaches `phase`
pub async fn wait_for_phase(group: &TaskGroup, phase: GroupPhase) {
    let deadline = Instant::now() + WAIT;
    loop {
        let current = group.phase().await;
        if current == phase {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {phase:?}, group is {current:?}"
        );
        sleep(Duration::from_millis(5)).await;
    }
}

/// Receive broadcast events until one matches `group` and `kind`
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<GroupEvent>,
    group: GroupId,
    kind: GroupEventKind,
) -> GroupEvent {
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event bus open");
            if event.group == group && event.kind == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind:?} from {group}"))
}

/// Minimal HTTP/1.1 server: `/missing*` answers 404, everything else 200 with `body`
pub async fn spawn_http_server(body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/");

                let (status, payload): (&str, &[u8]) = if path.starts_with("/missing") {
                    ("404 Not Found", b"not found")
                } else {
                    ("200 OK", body)
                };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(payload).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

/// Server that announces a large body, sends `prefix` and then stalls
pub async fn spawn_stalling_server(prefix: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let head = "HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(prefix).await;
                let _ = socket.flush().await;
                sleep(Duration::from_secs(60)).await;
            });
        }
    });

    format!("http://{addr}")
}
