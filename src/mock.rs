//! In-memory transport, storage and bootloader used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{ParseError, StorageError, TransportError};
use crate::suit::{Bootloader, Manifest, ManifestParser, SlotHeader, SlotIndex, StorageBackend};
use crate::transport::{Inbox, QoS, TopicId, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(SocketAddr),
    Subscribe(String),
    Unsubscribe(String),
    Register(String),
    Publish(TopicId, Vec<u8>),
}

#[derive(Default)]
struct Shared {
    calls: Vec<Call>,
    connect_failures: VecDeque<TransportError>,
    subscribe_failures: VecDeque<TransportError>,
    retained: HashMap<String, Bytes>,
    inboxes: HashMap<String, Inbox>,
    next_id: TopicId,
}

/// Records every request and replays retained publishes on subscribe.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| f(c)).count()
    }

    /// Fails the next connect attempt.
    pub fn fail_connect(&self, error: TransportError) {
        self.lock().connect_failures.push_back(error);
    }

    /// Fails the next subscribe attempt.
    pub fn fail_subscribe(&self, error: TransportError) {
        self.lock().subscribe_failures.push_back(error);
    }

    /// Publishes `data` to whoever subscribes to `topic` from now on.
    pub fn retain(&self, topic: &str, data: impl Into<Bytes>) {
        self.lock().retained.insert(topic.to_string(), data.into());
    }

    /// Splits `data` into a count and numbered blocks under `base`.
    pub fn retain_stream(&self, base: &str, data: &[u8], block_size: usize) {
        let blocks: Vec<&[u8]> = data.chunks(block_size).collect();
        self.retain(base, blocks.len().to_string());
        for (i, block) in blocks.into_iter().enumerate() {
            self.retain(&format!("{}/{}", base, i), Bytes::copy_from_slice(block));
        }
    }

    pub fn inbox(&self, topic: &str) -> Option<Inbox> {
        self.lock().inboxes.get(topic).cloned()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().inboxes.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self, gateway: SocketAddr) -> Result<(), TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Connect(gateway));
        match shared.connect_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        _qos: QoS,
        inbox: Inbox,
    ) -> Result<TopicId, TransportError> {
        let (id, retained) = {
            let mut shared = self.lock();
            shared.calls.push(Call::Subscribe(topic.to_string()));
            if let Some(e) = shared.subscribe_failures.pop_front() {
                return Err(e);
            }
            shared.next_id += 1;
            shared.inboxes.insert(topic.to_string(), inbox.clone());
            (shared.next_id, shared.retained.get(topic).cloned())
        };

        if let Some(data) = retained {
            inbox.on_publish(topic, data);
        }
        Ok(id)
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Unsubscribe(topic.to_string()));
        shared.inboxes.remove(topic);
        Ok(())
    }

    async fn register(&mut self, topic: &str) -> Result<TopicId, TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Register(topic.to_string()));
        shared.next_id += 1;
        Ok(shared.next_id)
    }

    async fn publish(&mut self, topic: TopicId, data: &[u8], _qos: QoS) -> Result<(), TransportError> {
        self.lock().calls.push(Call::Publish(topic, data.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct Written {
    writes: Vec<(String, usize, Vec<u8>)>,
    finished: Vec<String>,
    attempts: usize,
    fail_from: Option<usize>,
}

#[derive(Clone, Default)]
pub struct MockStorage {
    inner: Arc<Mutex<Written>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(location, offset, len)` of every successful write.
    pub fn writes(&self) -> Vec<(String, usize, usize)> {
        let inner = self.inner.lock().unwrap();
        inner
            .writes
            .iter()
            .map(|(loc, offset, data)| (loc.clone(), *offset, data.len()))
            .collect()
    }

    pub fn finished(&self) -> Vec<String> {
        self.inner.lock().unwrap().finished.clone()
    }

    pub fn image(&self, location: &str) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let mut image = Vec::new();
        for (_, offset, data) in inner.writes.iter().filter(|(l, _, _)| l == location) {
            let end = offset + data.len();
            if image.len() < end {
                image.resize(end, 0);
            }
            image[*offset..end].copy_from_slice(data);
        }
        image
    }

    /// Fails the `n`th write attempt (zero-based) and all that follow.
    pub fn fail_writes_from(&self, n: usize) {
        self.inner.lock().unwrap().fail_from = Some(n);
    }
}

impl StorageBackend for MockStorage {
    fn write(&mut self, location: &str, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner.attempts;
        inner.attempts += 1;
        if inner.fail_from.is_some_and(|n| attempt >= n) {
            return Err(StorageError::new(location, "write failed"));
        }
        inner.writes.push((location.to_string(), offset, data.to_vec()));
        Ok(())
    }

    fn finish(&mut self, location: &str) -> Result<(), StorageError> {
        self.inner.lock().unwrap().finished.push(location.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TestComponent {
    uri: Option<String>,
    location: Option<String>,
    size: Option<u64>,
}

impl TestComponent {
    pub fn new(uri: &str, location: &str, size: Option<u64>) -> Self {
        Self {
            uri: Some(uri.to_string()),
            location: Some(location.to_string()),
            size,
        }
    }

    /// Component that is installed but not fetched.
    pub fn local(location: &str) -> Self {
        Self {
            uri: None,
            location: Some(location.to_string()),
            size: None,
        }
    }

    pub fn without_location(uri: &str, size: u64) -> Self {
        Self {
            uri: Some(uri.to_string()),
            location: None,
            size: Some(size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestManifest {
    components: Vec<TestComponent>,
}

impl TestManifest {
    pub fn new(components: Vec<TestComponent>) -> Self {
        Self { components }
    }
}

impl Manifest for TestManifest {
    fn component_count(&self) -> usize {
        self.components.len()
    }

    fn uri(&self, component: usize) -> Option<&str> {
        self.components.get(component)?.uri.as_deref()
    }

    fn storage_location(&self, component: usize) -> Option<&str> {
        self.components.get(component)?.location.as_deref()
    }

    fn image_size(&self, component: usize) -> Option<u64> {
        self.components.get(component)?.size
    }
}

/// Returns a fixed result and keeps every input it was handed.
#[derive(Clone)]
pub struct MockParser {
    result: Result<TestManifest, ParseError>,
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockParser {
    pub fn accepting(manifest: TestManifest) -> Self {
        Self {
            result: Ok(manifest),
            seen: Arc::default(),
        }
    }

    pub fn rejecting(error: ParseError) -> Self {
        Self {
            result: Err(error),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }
}

impl ManifestParser for MockParser {
    type Manifest = TestManifest;

    fn parse(&mut self, data: &[u8]) -> Result<TestManifest, ParseError> {
        self.seen.lock().unwrap().push(data.to_vec());
        self.result.clone()
    }
}

/// Two-slot bootloader running from slot 0.
pub struct MockBootloader {
    valid: AtomicBool,
    reboots: AtomicUsize,
}

impl MockBootloader {
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
            reboots: AtomicUsize::new(0),
        }
    }

    pub fn corrupt(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }
}

impl Bootloader for MockBootloader {
    fn current_slot(&self) -> SlotIndex {
        0
    }

    fn other_slot(&self) -> SlotIndex {
        1
    }

    fn header(&self, slot: SlotIndex) -> Option<SlotHeader> {
        (slot < 2).then(|| SlotHeader {
            magic: 0x544f_4952,
            version: 7 + slot as u32,
            start_addr: 0x2000 + 0x4_0000 * slot as u32,
            checksum: 0x1234_5678,
        })
    }

    fn validate(&self, _header: &SlotHeader) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
    }
}
