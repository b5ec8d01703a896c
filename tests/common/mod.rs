// tests/common/mod.rs

#![allow(dead_code)]

use snowflake_ai::connect::{ConnectError, ConnectResult, Row, Session, SessionFactory, SessionParams};
use snowflake_ai::{BootstrapOptions, ResolvedConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Default)]
pub struct FakeSession {
    closed: AtomicBool,
    broken: AtomicBool,
}

impl FakeSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn break_session(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl Session for FakeSession {
    fn sql(&self, _query: &str) -> ConnectResult<Vec<Row>> {
        if self.is_closed() || self.broken.load(Ordering::SeqCst) {
            return Err(ConnectError::Session("gone".into()));
        }
        let mut row = Row::new();
        row.insert("current_role()".into(), "PUBLIC".into());
        Ok(vec![row])
    }

    fn close(&self) -> ConnectResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeFactory {
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeSession> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }
}

impl SessionFactory for FakeFactory {
    fn create_session(&self, _params: &SessionParams) -> ConnectResult<Arc<dyn Session>> {
        let session = Arc::new(FakeSession::default());
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

/// A scratch layout with separate working and home directories.
pub struct Sandbox {
    pub root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("cwd")).unwrap();
        fs::create_dir_all(root.path().join("home")).unwrap();
        Self { root }
    }

    pub fn cwd(&self) -> PathBuf {
        self.root.path().join("cwd")
    }

    pub fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    /// Writes `name` under `dir` (relative to the sandbox root), creating it.
    pub fn write(&self, dir: &str, name: &str, text: &str) -> PathBuf {
        let dir = self.root.path().join(dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    pub fn options(&self) -> BootstrapOptions {
        BootstrapOptions::new().with_cwd(self.cwd()).with_home(self.home())
    }

    pub fn resolve(&self) -> Arc<ResolvedConfig> {
        Arc::new(snowflake_ai::core::config_resolver::bootstrap(&self.options()).unwrap())
    }
}
