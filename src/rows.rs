use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use mongodb::bson::Bson;
use mongodb::bson::Document;
use slog::debug;
use slog::error;
use slog::warn;
use slog::Logger;

use crate::backend::DocumentCursor;
use crate::error::failure_info;
use crate::metrics::ROWS_COUNT;
use crate::ErrorKind;
use crate::Result;

/// A single result record: top-level document fields mapped to their BSON values.
pub type Row = HashMap<String, Bson>;

/// Copy every top-level field of a document into a `Row`.
///
/// Values are carried over untouched: nested documents and arrays are not flattened
/// and `null`s are kept.
pub fn flatten(document: Document) -> Row {
    document.into_iter().collect()
}

/// Cursor slot shared between a `RowSequence` and the `Connector` that created it.
///
/// The sequence owns the cursor; the connector only holds a weak reference
/// so it can release cursors left open when it is closed.
pub(crate) type CursorSlot = Arc<Mutex<Option<DocumentCursor>>>;

fn lock(slot: &CursorSlot) -> MutexGuard<Option<DocumentCursor>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Close the cursor in the slot, if it is still open.
///
/// Returns `true` if a cursor was closed by this call.
pub(crate) fn close_cursor(slot: &CursorSlot, collection: &str, logger: &Logger) -> bool {
    let cursor = match lock(slot).take() {
        None => return false,
        Some(cursor) => cursor,
    };
    match cursor.close() {
        Ok(()) => debug!(logger, "Closed MongoDB cursor"; "collection" => collection),
        Err(error) => warn!(
            logger, "Exception while closing MongoDB cursor";
            "collection" => collection,
            failure_info(&error),
        ),
    }
    true
}

/// States of a `RowSequence`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum SequenceState {
    /// The cursor may have more documents.
    Active,

    /// The cursor is closed and no more rows will be returned.
    Exhausted,
}

/// Lazy, forward-only sequence of `Row`s read from a query cursor.
///
/// Rows can be consumed with the explicit `has_next`/`next_row` protocol
/// or through the `Iterator` implementation.
/// The cursor is closed exactly once: when it runs out of documents, when it fails,
/// when `close` is called or when the sequence is dropped, whichever happens first.
pub struct RowSequence {
    collection: String,
    cursor: CursorSlot,
    logger: Logger,
    peeked: Option<Document>,
    rows: u64,
    state: SequenceState,
}

impl RowSequence {
    pub(crate) fn new(collection: String, cursor: CursorSlot, logger: Logger) -> RowSequence {
        RowSequence {
            collection,
            cursor,
            logger,
            peeked: None,
            rows: 0,
            state: SequenceState::Active,
        }
    }

    /// Name of the collection rows are read from.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of rows returned so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == SequenceState::Exhausted && self.peeked.is_none()
    }

    /// Check if another row is available, fetching it from the cursor if needed.
    ///
    /// When the cursor has no more documents the sequence is exhausted and
    /// the cursor closed. Cursor failures also exhaust the sequence and are returned.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.state == SequenceState::Exhausted {
            return Ok(false);
        }
        match self.pull()? {
            Some(document) => {
                self.peeked = Some(document);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Return the next row.
    ///
    /// Callers are expected to check `has_next` first: calling this on an
    /// exhausted sequence returns a `SequenceExhausted` error.
    pub fn next_row(&mut self) -> Result<Row> {
        let document = match self.peeked.take() {
            Some(document) => document,
            None if self.state == SequenceState::Exhausted => {
                return Err(ErrorKind::SequenceExhausted(self.collection.clone()).into());
            }
            None => match self.pull()? {
                Some(document) => document,
                None => return Err(ErrorKind::SequenceExhausted(self.collection.clone()).into()),
            },
        };
        self.rows += 1;
        ROWS_COUNT
            .with_label_values(&[self.collection.as_str()])
            .inc();
        Ok(flatten(document))
    }

    /// Close the sequence and release its cursor.
    ///
    /// Safe to call any number of times; problems closing the cursor are logged only.
    pub fn close(&mut self) {
        self.state = SequenceState::Exhausted;
        self.peeked = None;
        close_cursor(&self.cursor, &self.collection, &self.logger);
    }

    /// Fetch a document from the cursor, exhausting the sequence when there are none left.
    fn pull(&mut self) -> Result<Option<Document>> {
        let next = match lock(&self.cursor).as_mut() {
            None => None,
            Some(cursor) => cursor.next_document(),
        };
        match next {
            Some(Ok(document)) => Ok(Some(document)),
            None => {
                debug!(
                    self.logger, "MongoDB cursor exhausted";
                    "collection" => &self.collection,
                    "rows" => self.rows,
                );
                self.close();
                Ok(None)
            }
            Some(Err(error)) => {
                error!(
                    self.logger, "Failed to read from MongoDB cursor";
                    "collection" => &self.collection,
                    "rows" => self.rows,
                    failure_info(&error),
                );
                self.close();
                Err(error)
            }
        }
    }
}

impl fmt::Debug for RowSequence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RowSequence")
            .field("collection", &self.collection)
            .field("rows", &self.rows)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for RowSequence {
    fn drop(&mut self) {
        self.close();
    }
}

impl Iterator for RowSequence {
    type Item = Result<Row>;
    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_row()),
            Ok(false) => None,
            Err(error) => Some(Err(error)),
        }
    }
}
