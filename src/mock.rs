//! In-memory backend to exercise `Connector`s and `RowSequence`s without a MongoDB server.
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use mongodb::bson::doc;
use mongodb::bson::Document;

use crate::backend::BackendImpl;
use crate::backend::BackendInterface;
use crate::backend::ClientImpl;
use crate::backend::ClientInterface;
use crate::backend::ClientSettings;
use crate::backend::CursorInterface;
use crate::backend::DocumentCursor;
use crate::rows::CursorSlot;
use crate::ErrorKind;
use crate::Result;

/// Manage a mocked backend and inspect how it was used.
#[derive(Clone, Default)]
pub struct Mock {
    pub state: Arc<Mutex<MockState>>,
}

impl Mock {
    pub fn new() -> Mock {
        Mock::default()
    }

    /// Return a `BackendImpl` "view" into the mock.
    pub fn backend(&self) -> BackendImpl {
        BackendImpl::new(MockBackend {
            state: Arc::clone(&self.state),
        })
    }

    /// Add documents to a collection.
    pub fn insert<S: Into<String>>(&self, collection: S, documents: Vec<Document>) {
        self.lock()
            .collections
            .entry(collection.into())
            .or_default()
            .extend(documents);
    }

    /// Access the mock state.
    pub fn lock(&self) -> MutexGuard<MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Internal mock state.
#[derive(Default)]
pub struct MockState {
    /// Documents returned by finds, by collection name.
    pub collections: HashMap<String, Vec<Document>>,

    /// Fail cursors for a collection when reading the document at this index.
    pub cursor_faults: HashMap<String, usize>,

    /// Response returned by `ping`, `{ok: 1.0}` if not set.
    pub ping_response: Option<Document>,

    pub fail_connect: bool,
    pub fail_cursor_close: bool,
    pub fail_find: bool,
    pub fail_ping: bool,

    /// Settings passed to each `connect` call.
    pub connects: Vec<ClientSettings>,
    pub cursors_closed: usize,
    pub cursors_opened: usize,
    /// `(db, collection, filter)` of each `find` call.
    pub finds: Vec<(String, String, Document)>,
    /// Database passed to each `ping` call.
    pub pings: Vec<String>,
    pub shutdowns: usize,
}

impl MockState {
    pub fn shared() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState::default()))
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl BackendInterface for MockBackend {
    fn connect(&self, settings: &ClientSettings) -> Result<ClientImpl> {
        let mut state = lock(&self.state);
        state.connects.push(settings.clone());
        if state.fail_connect {
            return Err(ErrorKind::Connect(settings.address()).into());
        }
        Ok(ClientImpl::new(MockClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockClient {
    state: Arc<Mutex<MockState>>,
}

impl ClientInterface for MockClient {
    fn ping(&self, db: &str) -> Result<Document> {
        let mut state = lock(&self.state);
        state.pings.push(db.to_string());
        if state.fail_ping {
            return Err(ErrorKind::HealthCheck(db.to_string()).into());
        }
        let response = state
            .ping_response
            .clone()
            .unwrap_or_else(|| doc! {"ok": 1.0});
        Ok(response)
    }

    fn find(&self, db: &str, collection: &str, filter: Document) -> Result<DocumentCursor> {
        let mut state = lock(&self.state);
        state
            .finds
            .push((db.to_string(), collection.to_string(), filter));
        if state.fail_find {
            return Err(ErrorKind::QueryOp(collection.to_string()).into());
        }
        let documents = state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();
        let fail_at = state.cursor_faults.get(collection).copied();
        state.cursors_opened += 1;
        let cursor = MockCursor::new(collection, documents, fail_at, Arc::clone(&self.state));
        Ok(DocumentCursor::new(cursor))
    }

    fn shutdown(&mut self) -> Result<()> {
        lock(&self.state).shutdowns += 1;
        Ok(())
    }
}

/// Cursor over a fixed list of documents.
pub struct MockCursor {
    collection: String,
    documents: VecDeque<Document>,
    fail_at: Option<usize>,
    reads: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockCursor {
    /// Create a cursor that fails on the `fail_at`-th read, if set.
    pub fn new<S: Into<String>>(
        collection: S,
        documents: Vec<Document>,
        fail_at: Option<usize>,
        state: Arc<Mutex<MockState>>,
    ) -> MockCursor {
        MockCursor {
            collection: collection.into(),
            documents: documents.into(),
            fail_at,
            reads: 0,
            state,
        }
    }

    pub(crate) fn into_slot(self) -> CursorSlot {
        Arc::new(Mutex::new(Some(DocumentCursor::new(self))))
    }
}

impl CursorInterface for MockCursor {
    fn next_document(&mut self) -> Option<Result<Document>> {
        let read = self.reads;
        self.reads += 1;
        if self.fail_at == Some(read) {
            return Some(Err(ErrorKind::CursorFault(self.collection.clone()).into()));
        }
        self.documents.pop_front().map(Ok)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut state = lock(&self.state);
        state.cursors_closed += 1;
        if state.fail_cursor_close {
            return Err(ErrorKind::CursorFault(self.collection.clone()).into());
        }
        Ok(())
    }
}
