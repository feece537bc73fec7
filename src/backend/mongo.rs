use failure::ResultExt;
use mongodb::bson::doc;
use mongodb::bson::Document;
use mongodb::options::AuthMechanism as MongoAuthMechanism;
use mongodb::options::ClientOptions;
use mongodb::options::Credential as MongoCredential;
use mongodb::options::ReadPreference as MongoReadPreference;
use mongodb::options::ReadPreferenceOptions;
use mongodb::options::SelectionCriteria;
use mongodb::options::ServerAddress;
use mongodb::sync::Client;
use mongodb::sync::Cursor;
use slog::debug;
use slog::Logger;

use super::BackendInterface;
use super::ClientImpl;
use super::ClientInterface;
use super::ClientSettings;
use super::CursorInterface;
use super::DocumentCursor;
use super::ReadPreference;
use crate::credential::AuthMechanism;
use crate::credential::Credential;
use crate::metrics::MONGODB_OPS_COUNT;
use crate::metrics::MONGODB_OPS_DURATION;
use crate::metrics::MONGODB_OP_ERRORS_COUNT;
use crate::Error;
use crate::ErrorKind;
use crate::Result;

/// Open clients to MongoDB with the official driver.
pub struct MongoDB {
    logger: Logger,
}

impl MongoDB {
    pub fn new(logger: Logger) -> MongoDB {
        MongoDB { logger }
    }
}

impl BackendInterface for MongoDB {
    fn connect(&self, settings: &ClientSettings) -> Result<ClientImpl> {
        let address = settings.address();
        debug!(
            self.logger, "Opening MongoDB client";
            "address" => &address,
            "mechanism" => settings.credential.as_ref().map(|credential| credential.mechanism.as_str()),
        );
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: settings.host.clone(),
                port: Some(settings.port),
            }])
            .selection_criteria(selection_criteria(settings.read_preference))
            .credential(settings.credential.as_ref().map(credential))
            .build();
        let client = Client::with_options(options).with_context(|_| ErrorKind::Connect(address))?;
        Ok(ClientImpl::new(MongoClient { client }))
    }
}

fn credential(credential: &Credential) -> MongoCredential {
    let mechanism = match credential.mechanism {
        AuthMechanism::Gssapi => MongoAuthMechanism::Gssapi,
        AuthMechanism::MongoDbX509 => MongoAuthMechanism::MongoDbX509,
        AuthMechanism::Plain => MongoAuthMechanism::Plain,
        AuthMechanism::ScramSha1 => MongoAuthMechanism::ScramSha1,
        AuthMechanism::ScramSha256 => MongoAuthMechanism::ScramSha256,
    };
    MongoCredential::builder()
        .mechanism(mechanism)
        .username(credential.username.clone())
        .source(credential.source.clone())
        .password(credential.password.clone())
        .build()
}

fn selection_criteria(preference: ReadPreference) -> SelectionCriteria {
    let preference = match preference {
        ReadPreference::Primary => MongoReadPreference::Primary,
        ReadPreference::SecondaryPreferred => MongoReadPreference::SecondaryPreferred {
            options: ReadPreferenceOptions::default(),
        },
    };
    SelectionCriteria::ReadPreference(preference)
}

/// Count, time and record failures of a MongoDB operation.
fn observe<T, E, F>(operation: &str, op: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
{
    MONGODB_OPS_COUNT.with_label_values(&[operation]).inc();
    let _timer = MONGODB_OPS_DURATION
        .with_label_values(&[operation])
        .start_timer();
    op().map_err(|error| {
        MONGODB_OP_ERRORS_COUNT
            .with_label_values(&[operation])
            .inc();
        error
    })
}

/// Client operations backed by a `mongodb::sync::Client`.
struct MongoClient {
    client: Client,
}

impl ClientInterface for MongoClient {
    fn ping(&self, db: &str) -> Result<Document> {
        let response = observe("ping", || {
            self.client
                .database(db)
                .run_command(doc! {"ping": 1}, None)
        })
        .with_context(|_| ErrorKind::HealthCheck(db.to_string()))?;
        Ok(response)
    }

    fn find(&self, db: &str, collection: &str, filter: Document) -> Result<DocumentCursor> {
        let cursor = observe("find", || {
            self.client
                .database(db)
                .collection::<Document>(collection)
                .find(filter, None)
        })
        .with_context(|_| ErrorKind::QueryOp(collection.to_string()))?;
        let cursor = MongoCursor {
            collection: collection.to_string(),
            cursor,
        };
        Ok(DocumentCursor::new(cursor))
    }

    fn shutdown(&mut self) -> Result<()> {
        // The sync driver releases connections when the last client handle is dropped.
        Ok(())
    }
}

/// Cursor over the results of a MongoDB `find`.
struct MongoCursor {
    collection: String,
    cursor: Cursor<Document>,
}

impl CursorInterface for MongoCursor {
    fn next_document(&mut self) -> Option<Result<Document>> {
        // Reads are served from the driver's batch and only some issue a getMore.
        let cursor = &mut self.cursor;
        let collection = &self.collection;
        observe("next", || cursor.next().transpose())
            .with_context(|_| ErrorKind::CursorFault(collection.clone()))
            .map_err(Error::from)
            .transpose()
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping the cursor kills it on the server if it is not exhausted.
        drop(self.cursor);
        Ok(())
    }
}
