//! Shared test fixtures for fuel integration tests: a disposable `.fuel/`
//! directory, a free TCP port allocator for IPC server tests, and small
//! builders for `Task`/`Epic`/`Run` values.

use std::net::TcpListener;

use fuel_store::{Store, TaskCreate};
use tempfile::TempDir;

/// A temporary `.fuel/` directory backing a fresh [`Store`]. Dropping
/// this removes the directory; keep it alive for the test's duration.
pub struct FuelFixture {
    pub dir: TempDir,
    pub store: Store,
}

impl FuelFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp .fuel directory");
        let fuel_dir = dir.path().join(".fuel");
        let store = Store::open(&fuel_dir);
        Self { dir, store }
    }

    pub fn fuel_dir(&self) -> std::path::PathBuf {
        self.dir.path().join(".fuel")
    }

    /// Create a task with just a title, returning its id.
    pub fn seed_task(&self, title: &str) -> String {
        self.store
            .tasks
            .create(TaskCreate {
                title: title.to_string(),
                ..Default::default()
            })
            .expect("seed task creation should succeed")
            .id
    }
}

impl Default for FuelFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind an ephemeral loopback port, read back its number, and drop the
/// listener immediately — good enough for handing a free port to an
/// `IpcServer` under test, with an acceptable (if nonzero) race against
/// another process grabbing it first.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    listener.local_addr().expect("failed to read local addr").port()
}
