use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::hash::BuildHasher;
use std::io::Read;
use std::path::Path;

use failure::ResultExt;
use serde::Deserialize;

use crate::logging::Config as LoggingConfig;
use crate::ErrorKind;
use crate::Result;

/// Property name for the target database.
pub const DATABASE: &str = "database";
/// Property name for the server host.
pub const HOST: &str = "host";
/// Property name for the server port.
pub const PORT: &str = "port";
/// Property name for the authentication source database.
pub const SOURCE: &str = "source";
/// Property name for the authentication mechanism.
pub const MECHANISM: &str = "mechanism";
/// Property name for the authentication username.
pub const USERNAME: &str = "username";
/// Property name for the authentication password.
pub const PASSWORD: &str = "password";

/// Settings needed to connect a `Connector` to MongoDB.
#[derive(Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Name of the database to query.
    #[serde(default)]
    pub database: Option<String>,

    /// Host of the MongoDB server.
    #[serde(default = "ConnectionConfig::default_host")]
    pub host: String,

    /// Port of the MongoDB server.
    #[serde(default = "ConnectionConfig::default_port")]
    pub port: u16,

    /// Authentication mechanism, resolved only when a password is set.
    #[serde(default)]
    pub mechanism: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Database the user is defined in.
    #[serde(default)]
    pub source: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        ConnectionConfig {
            database: None,
            host: ConnectionConfig::default_host(),
            port: ConnectionConfig::default_port(),
            mechanism: None,
            username: None,
            password: None,
            source: None,
        }
    }
}

// Keep passwords out of logs and panic messages.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("source", &self.source)
            .finish()
    }
}

impl ConnectionConfig {
    fn default_host() -> String {
        String::from("localhost")
    }

    fn default_port() -> u16 {
        27017
    }

    /// Build a configuration from a flat set of string properties.
    ///
    /// Missing optional properties fall back to their defaults.
    /// Required properties are checked when the configuration is used.
    pub fn from_properties<S: BuildHasher>(
        props: &HashMap<String, String, S>,
    ) -> Result<ConnectionConfig> {
        let port = match props.get(PORT) {
            None => ConnectionConfig::default_port(),
            Some(port) => port
                .trim()
                .parse::<u16>()
                .with_context(|_| ErrorKind::ConfigInvalid(PORT, port.clone()))?,
        };
        Ok(ConnectionConfig {
            database: props.get(DATABASE).cloned(),
            host: props
                .get(HOST)
                .cloned()
                .unwrap_or_else(ConnectionConfig::default_host),
            port,
            mechanism: props.get(MECHANISM).cloned(),
            username: props.get(USERNAME).cloned(),
            password: props.get(PASSWORD).cloned(),
            source: props.get(SOURCE).cloned(),
        })
    }

    /// Name of the database to query, which must be set and not empty.
    pub fn database(&self) -> Result<&str> {
        match self.database.as_deref() {
            Some(database) if !database.trim().is_empty() => Ok(database),
            _ => Err(ErrorKind::ConfigMissing(DATABASE).into()),
        }
    }

    /// The `host:port` pair to connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration file for the `mongorows` command.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// MongoDB connection options.
    pub mongo: ConnectionConfig,
}

impl Config {
    /// Loads the configuration from the given [`std::fs::File`].
    ///
    /// [`std::fs::File`]: https://doc.rust-lang.org/std/fs/struct.File.html
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let config = File::open(path).with_context(|_| ErrorKind::ConfigLoad)?;
        Config::from_reader(config)
    }

    /// Loads the configuration from the given [`std::io::Read`].
    ///
    /// [`std::io::Read`]: https://doc.rust-lang.org/std/io/trait.Read.html
    pub fn from_reader<R: Read>(reader: R) -> Result<Config> {
        let conf = serde_yaml::from_reader(reader).with_context(|_| ErrorKind::ConfigLoad)?;
        Ok(conf)
    }
}
