//! Live test records keyed by remote address and test identity
//!
//! At most one [`Test`] exists per [`TestKey`]. The control handler creates
//! records, data-plane handlers look them up, and the owning control handler
//! deletes them when the session ends.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::net::normalize_ip;
use crate::protocol::{TestId, TestParam, TestProtocol, TestType};
use crate::stats::TestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestKey {
    pub remote: IpAddr,
    pub test_id: TestId,
}

impl TestKey {
    pub fn new(remote: IpAddr, test_id: TestId) -> Self {
        Self {
            remote: normalize_ip(remote),
            test_id,
        }
    }
}

impl std::fmt::Display for TestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.test_id, self.remote)
    }
}

/// One in-progress measurement session
pub struct Test {
    key: TestKey,
    param: TestParam,
    done_tx: watch::Sender<bool>,
    active: AtomicBool,
    result: TestResult,
    started: Instant,
}

impl Test {
    pub fn new(remote: IpAddr, param: TestParam) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            key: TestKey::new(remote, param.test_id),
            param,
            done_tx,
            active: AtomicBool::new(false),
            result: TestResult::new(),
            started: Instant::now(),
        }
    }

    pub fn key(&self) -> TestKey {
        self.key
    }

    pub fn remote(&self) -> IpAddr {
        self.key.remote
    }

    pub fn param(&self) -> &TestParam {
        &self.param
    }

    pub fn result(&self) -> &TestResult {
        &self.result
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Subscribe to the one-shot `done` broadcast
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Fire `done`. Idempotent.
    pub fn finish(&self) {
        self.done_tx.send_replace(true);
    }

    /// Observational only; data-plane handlers do not consult it
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

/// Returned when a test already exists for the requested key
#[derive(Debug, Clone)]
pub struct DuplicateTest {
    pub key: TestKey,
}

impl std::fmt::Display for DuplicateTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rejected duplicate {} test from {}",
            self.key.test_id, self.key.remote
        )
    }
}

impl std::error::Error for DuplicateTest {}

/// Keyed store of live tests.
///
/// Implementations must make `create`, `lookup` and `delete` linearizable.
pub trait TestRegistry: Send + Sync {
    /// Register a new test unless one already exists for the same key
    fn create(&self, remote: IpAddr, param: TestParam) -> Result<Arc<Test>, DuplicateTest>;

    fn lookup(
        &self,
        remote: IpAddr,
        protocol: TestProtocol,
        test_type: TestType,
    ) -> Option<Arc<Test>>;

    /// Remove `test`. A newer record under the same key is left alone.
    fn delete(&self, test: &Arc<Test>);

    /// All registered tests, in no particular order
    fn snapshot(&self) -> Vec<Arc<Test>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`TestRegistry`] backed by a sharded concurrent map
#[derive(Default)]
pub struct SessionTable {
    tests: DashMap<TestKey, Arc<Test>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestRegistry for SessionTable {
    fn create(&self, remote: IpAddr, param: TestParam) -> Result<Arc<Test>, DuplicateTest> {
        let key = TestKey::new(remote, param.test_id);
        match self.tests.entry(key) {
            Entry::Occupied(_) => Err(DuplicateTest { key }),
            Entry::Vacant(slot) => {
                let test = Arc::new(Test::new(remote, param));
                slot.insert(test.clone());
                Ok(test)
            }
        }
    }

    fn lookup(
        &self,
        remote: IpAddr,
        protocol: TestProtocol,
        test_type: TestType,
    ) -> Option<Arc<Test>> {
        let key = TestKey::new(remote, TestId::new(protocol, test_type));
        self.tests.get(&key).map(|t| t.clone())
    }

    fn delete(&self, test: &Arc<Test>) {
        self.tests
            .remove_if(&test.key(), |_, existing| Arc::ptr_eq(existing, test));
    }

    fn snapshot(&self) -> Vec<Arc<Test>> {
        self.tests.iter().map(|t| t.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.tests.len()
    }
}
