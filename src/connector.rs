use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Instant;

use mongodb::bson::Bson;
use mongodb::bson::Document;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::backend;
use crate::backend::BackendImpl;
use crate::backend::ClientImpl;
use crate::backend::ClientSettings;
use crate::backend::DocumentCursor;
use crate::backend::ReadPreference;
use crate::config::ConnectionConfig;
use crate::credential::Credential;
use crate::error::failure_info;
use crate::query::parse_query;
use crate::rows::close_cursor;
use crate::rows::RowSequence;
use crate::ErrorKind;
use crate::Result;

/// Check the `ok` field of a command response.
fn response_ok(response: &Document) -> bool {
    match response.get("ok") {
        Some(Bson::Double(ok)) => (*ok - 1.0).abs() < f64::EPSILON,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        _ => false,
    }
}

/// Connection to a MongoDB database that runs queries for an import pipeline.
///
/// A `Connector` is created disconnected, connected once with `init`,
/// used for any number of `query` calls and finally `close`d.
/// Each query returns an independent `RowSequence` that owns its cursor.
pub struct Connector {
    backend: BackendImpl,
    client: Option<ClientImpl>,
    cursors: Vec<(String, Weak<Mutex<Option<DocumentCursor>>>)>,
    db: Option<String>,
    logger: Logger,
}

impl Connector {
    /// Create a connector using the MongoDB driver.
    pub fn new(logger: Logger) -> Connector {
        let backend = backend::mongodb(logger.clone());
        Connector::with_backend(backend, logger)
    }

    /// Create a connector that opens clients with the given backend.
    pub fn with_backend(backend: BackendImpl, logger: Logger) -> Connector {
        Connector {
            backend,
            client: None,
            cursors: Vec::new(),
            db: None,
            logger,
        }
    }

    /// Name of the database queries run against, if connected.
    pub fn database(&self) -> Option<&str> {
        self.db.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Connect to MongoDB and verify the server is reachable.
    ///
    /// Configuration and credentials are validated before any connection is attempted.
    /// Initialising a connected `Connector` closes the previous connection first.
    pub fn init(&mut self, config: &ConnectionConfig) -> Result<()> {
        if self.client.is_some() {
            warn!(self.logger, "Connector already initialised, closing previous connection");
            self.close();
        }
        let db = config.database()?.to_string();
        let credential = Credential::resolve(config)?;
        let settings = ClientSettings {
            host: config.host.clone(),
            port: config.port,
            credential,
            read_preference: ReadPreference::SecondaryPreferred,
        };
        info!(
            self.logger, "Connecting to MongoDB";
            "address" => settings.address(),
            "database" => &db,
            "mechanism" => settings.credential.as_ref().map(|credential| credential.mechanism.as_str()),
        );

        let mut client = self.backend.connect(&settings)?;
        if let Err(error) = health_check(&client, &db) {
            warn!(
                self.logger, "MongoDB health check failed";
                "address" => settings.address(),
                failure_info(&error),
            );
            shutdown(&mut client, &self.logger);
            return Err(error);
        }
        self.client = Some(client);
        self.db = Some(db);
        Ok(())
    }

    /// Ping the server again to check it is still reachable.
    pub fn health_check(&self) -> Result<()> {
        match (self.client.as_ref(), self.db.as_deref()) {
            (Some(client), Some(db)) => health_check(client, db),
            _ => Err(ErrorKind::NotConnected.into()),
        }
    }

    /// Run a query against a collection and return the matching rows.
    ///
    /// The query is sent to the server immediately but rows are fetched lazily
    /// as the returned sequence is iterated.
    pub fn query(&mut self, query: &str, collection: &str) -> Result<RowSequence> {
        let (client, db) = match (self.client.as_ref(), self.db.as_deref()) {
            (Some(client), Some(db)) => (client, db),
            _ => return Err(ErrorKind::NotConnected.into()),
        };
        let filter = parse_query(query)?;
        info!(
            self.logger, "Executing MongoDB query";
            "collection" => collection,
            "query" => query,
        );
        let start = Instant::now();
        let cursor = client.find(db, collection, filter)?;
        debug!(
            self.logger, "MongoDB query cursor ready";
            "collection" => collection,
            "duration_ms" => start.elapsed().as_millis() as u64,
        );

        let slot = Arc::new(Mutex::new(Some(cursor)));
        self.cursors.retain(|(_, cursor)| cursor.strong_count() > 0);
        self.cursors
            .push((collection.to_string(), Arc::downgrade(&slot)));
        Ok(RowSequence::new(
            collection.to_string(),
            slot,
            self.logger.clone(),
        ))
    }

    /// Release any cursor still open and the client.
    ///
    /// Safe to call any number of times, including on connectors that never connected.
    /// Problems releasing resources are logged and otherwise ignored.
    pub fn close(&mut self) {
        for (collection, cursor) in self.cursors.drain(..) {
            if let Some(cursor) = cursor.upgrade() {
                if close_cursor(&cursor, &collection, &self.logger) {
                    debug!(
                        self.logger, "Released cursor left open at connector close";
                        "collection" => &collection,
                    );
                }
            }
        }
        if let Some(mut client) = self.client.take() {
            shutdown(&mut client, &self.logger);
            info!(self.logger, "Closed MongoDB connection"; "database" => self.db.as_deref());
        }
        self.db = None;
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

fn health_check(client: &ClientImpl, db: &str) -> Result<()> {
    let response = client.ping(db)?;
    if !response_ok(&response) {
        return Err(ErrorKind::HealthCheckFailed(response.to_string()).into());
    }
    Ok(())
}

fn shutdown(client: &mut ClientImpl, logger: &Logger) {
    if let Err(error) = client.shutdown() {
        warn!(logger, "Exception while closing MongoDB client"; failure_info(&error));
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use mongodb::bson::Bson;
    use slog::o;
    use slog::Logger;

    use super::response_ok;
    use super::Connector;
    use crate::backend::ReadPreference;
    use crate::config::ConnectionConfig;
    use crate::credential::AuthMechanism;
    use crate::mock::Mock;
    use crate::ErrorClass;
    use crate::ErrorKind;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            database: Some("catalogue".into()),
            ..ConnectionConfig::default()
        }
    }

    fn connector(mock: &Mock) -> Connector {
        let logger = Logger::root(slog::Discard, o!());
        Connector::with_backend(mock.backend(), logger)
    }

    fn connected(mock: &Mock) -> Connector {
        let mut connector = connector(mock);
        connector.init(&config()).unwrap();
        connector
    }

    #[test]
    fn init_connects_and_pings() {
        let mock = Mock::new();
        let connector = connected(&mock);
        assert!(connector.is_connected());
        assert_eq!(connector.database(), Some("catalogue"));

        let state = mock.lock();
        assert_eq!(state.connects.len(), 1);
        let settings = &state.connects[0];
        assert_eq!(settings.address(), "localhost:27017");
        assert_eq!(settings.credential, None);
        assert_eq!(settings.read_preference, ReadPreference::SecondaryPreferred);
        assert_eq!(state.pings, vec!["catalogue".to_string()]);
    }

    #[test]
    fn init_passes_credential() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        let config = ConnectionConfig {
            mechanism: Some("SCRAM-SHA-1".into()),
            username: Some("importer".into()),
            password: Some("secret".into()),
            source: Some("admin".into()),
            ..config()
        };
        connector.init(&config).unwrap();
        let state = mock.lock();
        let credential = state.connects[0].credential.as_ref().unwrap();
        assert_eq!(credential.mechanism, AuthMechanism::ScramSha1);
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[test]
    fn init_requires_database() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        let error = connector.init(&ConnectionConfig::default()).unwrap_err();
        assert_eq!(error.kind().class(), ErrorClass::Config);
        assert!(mock.lock().connects.is_empty());
        assert!(!connector.is_connected());
    }

    #[test]
    fn init_rejects_missing_mechanism() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        let config = ConnectionConfig {
            password: Some("secret".into()),
            ..config()
        };
        let error = connector.init(&config).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthMechanismMissing));
        assert!(mock.lock().connects.is_empty());
    }

    #[test]
    fn init_rejects_unknown_mechanism() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        let config = ConnectionConfig {
            mechanism: Some("MONGODB-CR".into()),
            username: Some("importer".into()),
            password: Some("secret".into()),
            ..config()
        };
        let error = connector.init(&config).unwrap_err();
        assert_eq!(error.kind().class(), ErrorClass::Auth);
        assert!(mock.lock().connects.is_empty());
    }

    #[test]
    fn init_fails_on_non_ok_ping() {
        let mock = Mock::new();
        mock.lock().ping_response = Some(doc! {"ok": 0.0, "errmsg": "auth failed"});
        let mut connector = connector(&mock);
        let error = connector.init(&config()).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::HealthCheckFailed(_)));
        assert_eq!(error.kind().class(), ErrorClass::Connect);
        assert!(!connector.is_connected());
        assert_eq!(mock.lock().shutdowns, 1);

        connector.close();
        connector.close();
        assert_eq!(mock.lock().shutdowns, 1);
    }

    #[test]
    fn init_fails_on_ping_error() {
        let mock = Mock::new();
        mock.lock().fail_ping = true;
        let mut connector = connector(&mock);
        let error = connector.init(&config()).unwrap_err();
        assert_eq!(error.kind().class(), ErrorClass::Connect);
        connector.close();
    }

    #[test]
    fn init_fails_on_connect_error() {
        let mock = Mock::new();
        mock.lock().fail_connect = true;
        let mut connector = connector(&mock);
        let error = connector.init(&config()).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Connect(address) if address == "localhost:27017"));
        assert!(mock.lock().pings.is_empty());
        connector.close();
    }

    #[test]
    fn init_twice_replaces_client() {
        let mock = Mock::new();
        let mut connector = connected(&mock);
        connector.init(&config()).unwrap();
        let state = mock.lock();
        assert_eq!(state.connects.len(), 2);
        assert_eq!(state.shutdowns, 1);
    }

    #[test]
    fn close_without_init() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        connector.close();
        connector.close();
        drop(connector);
        assert_eq!(mock.lock().shutdowns, 0);
    }

    #[test]
    fn close_is_idempotent() {
        let mock = Mock::new();
        let mut connector = connected(&mock);
        connector.close();
        connector.close();
        assert!(!connector.is_connected());
        drop(connector);
        assert_eq!(mock.lock().shutdowns, 1);
    }

    #[test]
    fn health_check_requires_connection() {
        let mock = Mock::new();
        let connector = connector(&mock);
        let error = connector.health_check().unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::NotConnected));

        let connector = connected(&mock);
        connector.health_check().unwrap();
        assert_eq!(mock.lock().pings.len(), 2);
    }

    #[test]
    fn query_returns_rows() {
        let mock = Mock::new();
        mock.insert("items", vec![doc! {"a": 1, "b": "x", "c": {"d": 2}}]);
        let mut connector = connected(&mock);
        let rows: Vec<_> = connector
            .query(r#"{"b": "x"}"#, "items")
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["c"], Bson::Document(doc! {"d": 2}));

        let state = mock.lock();
        let (db, collection, filter) = &state.finds[0];
        assert_eq!(db, "catalogue");
        assert_eq!(collection, "items");
        assert_eq!(filter, &doc! {"b": "x"});
        assert_eq!(state.cursors_closed, 1);
    }

    #[test]
    fn query_accepts_shell_syntax() {
        let mock = Mock::new();
        let mut connector = connected(&mock);
        let rows = connector
            .query("{deleted: false, 'n': {$gt: NumberLong(2)}}", "items")
            .unwrap();
        assert_eq!(rows.count(), 0);
        let state = mock.lock();
        assert_eq!(state.finds[0].2, doc! {"deleted": false, "n": {"$gt": 2_i64}});
    }

    #[test]
    fn query_requires_init() {
        let mock = Mock::new();
        let mut connector = connector(&mock);
        let error = connector.query("{}", "items").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::NotConnected));
        assert_eq!(error.kind().class(), ErrorClass::Query);
    }

    #[test]
    fn query_rejects_malformed_expression() {
        let mock = Mock::new();
        let mut connector = connected(&mock);
        let error = connector.query("{\"a\": ", "items").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::QueryParse));
        assert!(mock.lock().finds.is_empty());

        // The connector is still usable after a failed query.
        let rows = connector.query("{}", "items").unwrap();
        assert_eq!(rows.count(), 0);
    }

    #[test]
    fn query_find_failure() {
        let mock = Mock::new();
        let mut connector = connected(&mock);
        mock.lock().fail_find = true;
        let error = connector.query("{}", "items").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::QueryOp(name) if name == "items"));
        assert_eq!(mock.lock().cursors_opened, 0);
    }

    #[test]
    fn queries_are_independent() {
        let mock = Mock::new();
        mock.insert("items", vec![doc! {"n": 1}, doc! {"n": 2}]);
        let mut connector = connected(&mock);
        let mut first = connector.query("{}", "items").unwrap();
        let mut second = connector.query("{}", "items").unwrap();

        assert_eq!(first.by_ref().count(), 2);
        assert!(first.is_exhausted());
        assert!(second.has_next().unwrap());
        assert_eq!(second.next_row().unwrap()["n"], Bson::Int32(1));
        assert_eq!(second.count(), 1);
        assert_eq!(mock.lock().cursors_opened, 2);
        assert_eq!(mock.lock().cursors_closed, 2);
    }

    #[test]
    fn close_releases_open_cursors() {
        let mock = Mock::new();
        mock.insert("items", vec![doc! {"n": 1}, doc! {"n": 2}]);
        let mut connector = connected(&mock);
        let mut rows = connector.query("{}", "items").unwrap();
        assert!(rows.has_next().unwrap());

        connector.close();
        assert_eq!(mock.lock().cursors_closed, 1);
        assert_eq!(mock.lock().shutdowns, 1);

        // The buffered row is still returned, then the sequence ends.
        assert!(rows.next_row().is_ok());
        assert!(!rows.has_next().unwrap());
        drop(rows);
        assert_eq!(mock.lock().cursors_closed, 1);
    }

    #[test]
    fn cursor_fault_surfaces_through_query() {
        let mock = Mock::new();
        mock.insert("items", vec![doc! {"n": 1}, doc! {"n": 2}]);
        mock.lock().cursor_faults.insert("items".into(), 1);
        let mut connector = connected(&mock);
        let mut rows = connector.query("{}", "items").unwrap();
        assert!(rows.next().unwrap().is_ok());
        let error = rows.next().unwrap().unwrap_err();
        assert_eq!(error.kind().class(), ErrorClass::Cursor);
        assert!(rows.next().is_none());
        assert_eq!(mock.lock().cursors_closed, 1);
    }

    #[test]
    fn ok_responses() {
        assert!(response_ok(&doc! {"ok": 1.0}));
        assert!(response_ok(&doc! {"ok": 1}));
        assert!(response_ok(&doc! {"ok": 1_i64}));
        assert!(!response_ok(&doc! {"ok": 0.0}));
        assert!(!response_ok(&doc! {}));
    }
}
