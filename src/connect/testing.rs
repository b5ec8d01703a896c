// src/connect/testing.rs

//! In-memory doubles for the session seam, shared by unit tests.

use crate::connect::session::{Row, Session, SessionFactory, SessionParams};
use crate::connect::{ConnectError, ConnectResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct MockSession {
    closed: AtomicBool,
    broken: AtomicBool,
    queries: Mutex<Vec<String>>,
}

impl MockSession {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes every later query fail, as a dropped network session would.
    pub(crate) fn break_session(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Session for MockSession {
    fn sql(&self, query: &str) -> ConnectResult<Vec<Row>> {
        if self.is_closed() || self.broken.load(Ordering::SeqCst) {
            return Err(ConnectError::Session("session is gone".into()));
        }
        self.queries.lock().unwrap().push(query.to_string());
        let mut row = Row::new();
        row.insert("result".into(), "OK".into());
        Ok(vec![row])
    }

    fn close(&self) -> ConnectResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockSessionFactory {
    pub(crate) created: Mutex<Vec<SessionParams>>,
    pub(crate) sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockSessionFactory {
    pub(crate) fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn last_session(&self) -> Arc<MockSession> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }

    pub(crate) fn last_params(&self) -> SessionParams {
        self.created.lock().unwrap().last().cloned().unwrap()
    }
}

impl SessionFactory for MockSessionFactory {
    fn create_session(&self, params: &SessionParams) -> ConnectResult<Arc<dyn Session>> {
        let session = Arc::new(MockSession::default());
        self.created.lock().unwrap().push(params.clone());
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}
