use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use mongodb::bson::Document;
use slog::Logger;

use crate::credential::Credential;
use crate::Result;

mod mongo;

/// Instantiate the MongoDB backend used by default by `Connector`s.
pub fn mongodb(logger: Logger) -> BackendImpl {
    BackendImpl::new(self::mongo::MongoDB::new(logger))
}

// Macro definition to generate an interface trait with a wrapping wrapper
// for dynamic dispatch to Send + Sync + 'static implementations.
macro_rules! arc_interface {
    (
        $(#[$struct_meta:meta])*
        struct $struct_name:ident,
        $(#[$trait_meta:meta])*
        trait $trait_name:ident,
        interface $trait_def:tt
    ) => {
        $(#[$trait_meta])*
        pub trait $trait_name: Send + Sync $trait_def

        $(#[$struct_meta])*
        #[derive(Clone)]
        pub struct $struct_name(Arc<dyn $trait_name>);

        impl $struct_name {
            pub fn new<I: $trait_name + 'static>(interface: I) -> Self {
                Self(Arc::new(interface))
            }
        }

        impl Deref for $struct_name {
            type Target = dyn $trait_name + 'static;
            fn deref(&self) -> &(dyn $trait_name + 'static) {
                self.0.deref()
            }
        }
    }
}

// Macro definition to generate an interface trait with an owning wrapper
// for dynamic dispatch to Send + 'static implementations.
macro_rules! box_interface {
    (
        $(#[$struct_meta:meta])*
        struct $struct_name:ident,
        $(#[$trait_meta:meta])*
        trait $trait_name:ident,
        interface $trait_def:tt
    ) => {
        $(#[$trait_meta])*
        pub trait $trait_name: Send $trait_def

        $(#[$struct_meta])*
        pub struct $struct_name(Box<dyn $trait_name>);

        impl $struct_name {
            pub fn new<I: $trait_name + 'static>(interface: I) -> Self {
                Self(Box::new(interface))
            }
        }

        impl Deref for $struct_name {
            type Target = dyn $trait_name + 'static;
            fn deref(&self) -> &(dyn $trait_name + 'static) {
                self.0.deref()
            }
        }

        impl DerefMut for $struct_name {
            fn deref_mut(&mut self) -> &mut (dyn $trait_name + 'static) {
                self.0.deref_mut()
            }
        }
    };
}

arc_interface! {
    /// Dynamic dispatch client creation to a backend-specific implementation.
    struct BackendImpl,

    /// Definition of the operations needed to open clients to a document store.
    trait BackendInterface,

    interface {
        /// Open a client for the given settings.
        ///
        /// Clients may connect lazily: reachability is verified by the caller
        /// with `ClientInterface::ping`.
        fn connect(&self, settings: &ClientSettings) -> Result<ClientImpl>;
    }
}

box_interface! {
    /// Dynamic dispatch client operations to a backend-specific implementation.
    struct ClientImpl,

    /// Definition of the operations a `Connector` performs on an open client.
    trait ClientInterface,

    interface {
        /// Run the `ping` command against the given database and return the response.
        fn ping(&self, db: &str) -> Result<Document>;

        /// Run a `find` on `db.collection` and return the resulting cursor.
        fn find(&self, db: &str, collection: &str, filter: Document) -> Result<DocumentCursor>;

        /// Release the client.
        ///
        /// Called at most once, right before the client is dropped.
        fn shutdown(&mut self) -> Result<()>;
    }
}

/// Forward-only cursor over the documents returned by a query.
pub trait CursorInterface: Send {
    /// Fetch the next document, `None` when the cursor has no more documents.
    fn next_document(&mut self) -> Option<Result<Document>>;

    /// Release the cursor and any server-side resources behind it.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Owning wrapper around a backend-specific cursor.
pub struct DocumentCursor(Box<dyn CursorInterface>);

impl DocumentCursor {
    pub fn new<C: CursorInterface + 'static>(cursor: C) -> DocumentCursor {
        DocumentCursor(Box::new(cursor))
    }

    pub fn next_document(&mut self) -> Option<Result<Document>> {
        self.0.next_document()
    }

    pub fn close(self) -> Result<()> {
        self.0.close()
    }
}

/// Read preference requested for queries.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ReadPreference {
    Primary,
    SecondaryPreferred,
}

/// Everything a backend needs to open a client.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub credential: Option<Credential>,
    pub read_preference: ReadPreference,
}

impl ClientSettings {
    /// The `host:port` pair the client connects to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
