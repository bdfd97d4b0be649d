//! Integration tests for the event broadcaster and image receiver.
//!
//! Broadcaster tests run on a paused clock, so ticks fire as soon as every
//! task is idle and results do not depend on wall time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use otalink_core::{
    AccessPoint, Command, ConfigError, FirmwareDescriptor, LinkStatus, StatusSource, StatusStore,
    TransitionPolicy, UpdatePhase, UpdateStateMachine,
};
use otalink_protocol::{SseDecoder, SseFrame, TickBatch};
use otalink_server::{
    BroadcasterConfig, EventBroadcaster, ImageError, ImageReceiver, ObserverError, ObserverHandle,
};

const TICK: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<StatusStore>,
    machine: UpdateStateMachine,
    broadcaster: EventBroadcaster,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Build a broadcaster without starting its tick loop.
fn build(queue_depth: usize) -> (Arc<StatusStore>, UpdateStateMachine, EventBroadcaster) {
    let store = Arc::new(StatusStore::new(FirmwareDescriptor::new("0.1.0")));
    let machine = UpdateStateMachine::new(store.clone(), TransitionPolicy::Permissive);
    let broadcaster = EventBroadcaster::new(
        store.clone(),
        BroadcasterConfig {
            tick_interval: TICK,
            queue_depth,
        },
    );
    (store, machine, broadcaster)
}

/// Start a broadcaster tick loop.
fn start(queue_depth: usize) -> Harness {
    let (store, machine, broadcaster) = build(queue_depth);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(broadcaster.clone().run(shutdown_rx));
    Harness {
        store,
        machine,
        broadcaster,
        shutdown,
        handle,
    }
}

/// Wait for the next batch, failing the test after a generous timeout.
async fn next(observer: &mut ObserverHandle) -> Arc<TickBatch> {
    timeout(TICK * 4, observer.recv())
        .await
        .expect("Timed out waiting for tick")
        .expect("Observer stream ended")
}

/// Status source whose answer can be changed between ticks.
struct SwitchableSource {
    link: Mutex<Option<serde_json::Value>>,
}

impl SwitchableSource {
    fn new(link: serde_json::Value) -> Self {
        Self {
            link: Mutex::new(Some(link)),
        }
    }

    fn set(&self, link: Option<serde_json::Value>) {
        *self.link.lock().unwrap() = link;
    }
}

impl StatusSource for SwitchableSource {
    fn load_link_status(&self) -> Result<LinkStatus, ConfigError> {
        match self.link.lock().unwrap().clone() {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ConfigError::InvalidData(e.to_string())),
            None => Err(ConfigError::NotFound("status.json".to_string())),
        }
    }

    fn load_access_points(&self) -> Result<Vec<AccessPoint>, ConfigError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_progress_increments_once_per_tick() {
    let h = start(8);
    let mut observer = h.broadcaster.subscribe();

    let mut previous = next(&mut observer).await.update().progress;
    for _ in 0..10 {
        let progress = next(&mut observer).await.update().progress;
        assert_eq!(progress, (previous + 1) % 100);
        previous = progress;
    }

    h.handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_each_tick_is_an_ordered_quadruple() {
    let h = start(8);
    let observer = h.broadcaster.subscribe();

    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    let forward = tokio::spawn(async move { observer.forward(&mut server).await });

    let mut decoder = SseDecoder::new();
    let mut frames: Vec<SseFrame> = Vec::new();
    let mut buf = vec![0u8; 4096];
    while frames.len() < 12 {
        let n = timeout(TICK * 4, client.read(&mut buf))
            .await
            .expect("Timed out reading stream")
            .unwrap();
        assert!(n > 0, "Stream closed early");
        frames.extend(decoder.push(std::str::from_utf8(&buf[..n]).unwrap()));
    }

    let frames = &frames[..12];
    for (i, quad) in frames.chunks(4).enumerate() {
        assert_eq!(quad[0].event, None);
        assert!(quad[0].data.starts_with(&format!("tick {}", i + 1)));
        assert_eq!(quad[1].event.as_deref(), Some("status"));
        assert_eq!(quad[2].event.as_deref(), Some("firmware"));
        assert_eq!(quad[2].data, r#"{"version":"0.1.0"}"#);
        assert_eq!(quad[3].event.as_deref(), Some("update"));

        let update: serde_json::Value = serde_json::from_str(&quad[3].data).unwrap();
        assert_eq!(update["progress"], (i + 1) as u64);
        assert_eq!(update["status"], "initial");
    }

    h.shutdown.send(true).unwrap();
    let written = forward.await.unwrap().unwrap();
    assert!(written >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_observer_does_not_block_others() {
    let h = start(2);
    let _stalled = h.broadcaster.subscribe();
    let mut healthy = h.broadcaster.subscribe();

    for expected in 1..=10u8 {
        let batch = next(&mut healthy).await;
        assert_eq!(batch.update().progress, expected);
    }

    // The stalled observer filled its queue on tick 3 and was removed
    assert_eq!(h.broadcaster.observer_count(), 1);
    let stats = h.broadcaster.statistics();
    assert_eq!(stats.observers_dropped, 1);
    assert_eq!(stats.observers, 1);

    h.handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_removes_only_that_observer() {
    let h = start(8);
    let leaving = h.broadcaster.subscribe();
    let mut staying = h.broadcaster.subscribe();

    let (client, mut server) = tokio::io::duplex(1024);
    let forward = tokio::spawn(async move { leaving.forward(&mut server).await });

    // Client hangs up before the first tick
    drop(client);

    let first = next(&mut staying).await;
    assert_eq!(first.update().progress, 1);

    let result = timeout(TICK * 4, forward).await.unwrap().unwrap();
    assert!(matches!(result, Err(ObserverError::Write(_))));
    assert_eq!(h.broadcaster.observer_count(), 1);

    // The remaining observer keeps its cadence
    assert_eq!(next(&mut staying).await.update().progress, 2);
    assert_eq!(next(&mut staying).await.update().progress, 3);

    h.handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_restart_reflected_in_next_update() {
    let h = start(8);
    let mut observer = h.broadcaster.subscribe();

    assert_eq!(next(&mut observer).await.update().status, "initial");

    h.machine.apply_command(Command::Connect).unwrap();
    assert_eq!(next(&mut observer).await.update().status, "connected");

    h.machine.apply_command(Command::BeginTransfer).unwrap();
    h.machine
        .apply_command(Command::Restart { update: false })
        .unwrap();
    assert_eq!(next(&mut observer).await.update().status, "downloading");

    h.machine
        .apply_command(Command::Restart { update: true })
        .unwrap();
    assert_eq!(next(&mut observer).await.update().status, "connected");

    h.handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_failed_transfer_scenario() {
    let h = start(8);
    assert_eq!(h.store.phase(), UpdatePhase::Initial);
    assert_eq!(h.store.counter().value(), 0);

    h.machine.apply_command(Command::BeginTransfer).unwrap();
    let mut observer = h.broadcaster.subscribe();

    for expected in 1..=3u8 {
        let batch = next(&mut observer).await;
        assert_eq!(batch.update().progress, expected);
        assert_eq!(batch.update().status, "downloading");
    }

    h.machine.apply_command(Command::TransferFailed).unwrap();
    let batch = next(&mut observer).await;
    assert_eq!(batch.update().progress, 4);
    assert_eq!(batch.update().status, "failed");

    h.handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_late_observer_gets_no_backlog() {
    let h = start(8);
    let mut early = h.broadcaster.subscribe();

    assert_eq!(next(&mut early).await.tick(), 1);
    assert_eq!(next(&mut early).await.tick(), 2);

    let mut late = h.broadcaster.subscribe();
    let first_late = next(&mut late).await;
    assert_eq!(first_late.tick(), 3);
    assert_eq!(next(&mut early).await.tick(), 3);
    assert_eq!(next(&mut late).await.tick(), 4);

    h.handle.abort();
}

#[tokio::test]
async fn test_counter_wraps_to_zero() {
    let (store, _machine, broadcaster) = build(4);
    let mut observer = broadcaster.subscribe();

    for _ in 0..99 {
        broadcaster.tick_once().await.unwrap();
        observer.recv().await.unwrap();
    }
    assert_eq!(store.counter().value(), 99);

    broadcaster.tick_once().await.unwrap();
    assert_eq!(observer.recv().await.unwrap().update().progress, 0);
    broadcaster.tick_once().await.unwrap();
    assert_eq!(observer.recv().await.unwrap().update().progress, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_all_streams() {
    let h = start(8);
    let mut a = h.broadcaster.subscribe();
    let mut b = h.broadcaster.subscribe();
    next(&mut a).await;
    next(&mut b).await;

    h.shutdown.send(true).unwrap();
    timeout(TICK, h.handle).await.unwrap().unwrap();

    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
    assert_eq!(h.broadcaster.observer_count(), 0);

    // A client arriving after shutdown gets an already-ended stream
    let mut late = h.broadcaster.subscribe();
    assert!(timeout(TICK, late.recv()).await.unwrap().is_none());
    assert_eq!(h.broadcaster.observer_count(), 0);
}

#[tokio::test]
async fn test_source_reloaded_each_tick_keeps_last_good() {
    let (store, _machine, broadcaster) = build(4);
    let source = Arc::new(SwitchableSource::new(serde_json::json!({
        "ssid": "home",
        "if_status": false
    })));
    let broadcaster = broadcaster.with_source(source.clone());
    let mut observer = broadcaster.subscribe();

    broadcaster.tick_once().await.unwrap();
    observer.recv().await.unwrap();
    assert_eq!(
        store.link_status().get("if_status"),
        Some(&serde_json::json!(false))
    );

    source.set(Some(serde_json::json!({ "ssid": "home", "if_status": true })));
    broadcaster.tick_once().await.unwrap();
    observer.recv().await.unwrap();
    assert_eq!(
        store.link_status().get("if_status"),
        Some(&serde_json::json!(true))
    );

    // Source disappears: the tick still goes out with the last good status
    source.set(None);
    let batch = broadcaster.tick_once().await.unwrap();
    assert_eq!(batch.update().progress, 3);
    assert_eq!(
        store.link_status().get("if_status"),
        Some(&serde_json::json!(true))
    );
}

// ============================================================================
// Image receiver
// ============================================================================

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "otalink-image-{}-{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Count leftover `.part` files in `dir`.
fn part_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".part")
        })
        .count()
}

/// Four 4-byte chunks of `byte`, each released only when the peer stream
/// reaches the same chunk.
fn lockstep(
    byte: u8,
    barrier: Arc<tokio::sync::Barrier>,
) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> {
    futures::stream::unfold(0, move |i| {
        let barrier = barrier.clone();
        async move {
            if i == 4 {
                return None;
            }
            barrier.wait().await;
            Some((Ok(vec![byte; 4]), i + 1))
        }
    })
}

fn chunks(parts: &[&'static [u8]]) -> impl futures::Stream<Item = Result<&'static [u8], std::io::Error>> {
    futures::stream::iter(parts.to_vec().into_iter().map(Ok))
}

fn receiver(path: &std::path::Path, max_bytes: u64) -> (Arc<StatusStore>, ImageReceiver) {
    let (store, machine, _) = build(4);
    (store, ImageReceiver::new(machine, path, max_bytes))
}

#[tokio::test]
async fn test_image_written_and_phase_downloading() {
    let dir = temp_dir("ok");
    let path = dir.join("firmware.bin");
    let (store, receiver) = receiver(&path, 1024);

    let written = receiver
        .receive(chunks(&[b"\x7fELF", b"-payload"]), Some(12))
        .await
        .unwrap();

    assert_eq!(written, 12);
    assert_eq!(std::fs::read(&path).unwrap(), b"\x7fELF-payload");
    assert_eq!(part_files(&dir), 0);
    // The receiver leaves reporting the outcome to its caller
    assert_eq!(store.phase(), UpdatePhase::Downloading);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_image_overwrites_previous() {
    let dir = temp_dir("overwrite");
    let path = dir.join("firmware.bin");
    std::fs::write(&path, b"old image that is longer").unwrap();
    let (_store, receiver) = receiver(&path, 1024);

    receiver.receive(chunks(&[b"new"]), None).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"new");

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_truncated_image_is_not_visible() {
    let dir = temp_dir("truncated");
    let path = dir.join("firmware.bin");
    std::fs::write(&path, b"previous").unwrap();
    let (store, receiver) = receiver(&path, 1024);

    let err = receiver
        .receive(chunks(&[b"abc"]), Some(10))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImageError::Truncated {
            declared: 10,
            received: 3
        }
    ));
    assert!(err.is_client_error());
    assert_eq!(std::fs::read(&path).unwrap(), b"previous");
    assert_eq!(part_files(&dir), 0);
    assert_eq!(store.phase(), UpdatePhase::Downloading);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_overrun_and_size_limit() {
    let dir = temp_dir("limits");
    let path = dir.join("firmware.bin");
    let (_store, receiver) = receiver(&path, 8);

    let err = receiver
        .receive(chunks(&[b"abcd", b"ef"]), Some(4))
        .await
        .unwrap_err();
    assert!(matches!(err, ImageError::Overrun { declared: 4 }));

    let err = receiver
        .receive(chunks(&[b"abcd"]), Some(9))
        .await
        .unwrap_err();
    assert!(matches!(err, ImageError::TooLarge { limit: 8 }));

    let err = receiver
        .receive(chunks(&[b"abcdef", b"ghij"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ImageError::TooLarge { limit: 8 }));
    assert!(!path.exists());

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_stream_error_is_reported() {
    let dir = temp_dir("stream");
    let path = dir.join("firmware.bin");
    let (_store, receiver) = receiver(&path, 1024);

    let body = futures::stream::iter(vec![
        Ok(&b"abc"[..]),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )),
    ]);
    let err = receiver.receive(body, None).await.unwrap_err();
    match err {
        ImageError::Stream(msg) => assert!(msg.contains("connection reset")),
        other => panic!("Expected Stream error, got {:?}", other),
    }
    assert!(!path.exists());

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_concurrent_uploads_do_not_mix() {
    let dir = temp_dir("concurrent");
    let path = dir.join("firmware.bin");
    let (store, receiver) = receiver(&path, 1024);

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let (a, b) = tokio::join!(
        receiver.receive(lockstep(b'A', barrier.clone()), Some(16)),
        receiver.receive(lockstep(b'B', barrier.clone()), Some(16)),
    );

    assert_eq!(a.unwrap(), 16);
    assert_eq!(b.unwrap(), 16);

    let image = std::fs::read(&path).unwrap();
    assert!(
        image == vec![b'A'; 16] || image == vec![b'B'; 16],
        "Image mixes both uploads: {:?}",
        String::from_utf8_lossy(&image)
    );
    assert_eq!(part_files(&dir), 0);
    assert_eq!(store.phase(), UpdatePhase::Downloading);

    std::fs::remove_dir_all(dir).ok();
}
