use std::fmt;
use std::str::FromStr;

use crate::config::ConnectionConfig;
use crate::Error;
use crate::ErrorKind;
use crate::Result;

/// Authentication mechanisms the connector knows how to build credentials for.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AuthMechanism {
    Gssapi,
    MongoDbX509,
    Plain,
    ScramSha1,
    ScramSha256,
}

impl AuthMechanism {
    /// Name of the mechanism as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::Gssapi => "GSSAPI",
            AuthMechanism::MongoDbX509 => "MONGODB-X509",
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::ScramSha1 => "SCRAM-SHA-1",
            AuthMechanism::ScramSha256 => "SCRAM-SHA-256",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMechanism {
    type Err = Error;

    fn from_str(name: &str) -> Result<AuthMechanism> {
        match name {
            "GSSAPI" => Ok(AuthMechanism::Gssapi),
            "MONGODB-X509" => Ok(AuthMechanism::MongoDbX509),
            "PLAIN" => Ok(AuthMechanism::Plain),
            "SCRAM-SHA-1" => Ok(AuthMechanism::ScramSha1),
            "SCRAM-SHA-256" => Ok(AuthMechanism::ScramSha256),
            other => Err(ErrorKind::AuthMechanismUnknown(other.to_string()).into()),
        }
    }
}

/// Credential to authenticate the client with.
///
/// Which fields are set depends on the mechanism:
///
///   * `GSSAPI`: username only.
///   * `MONGODB-X509`: optional username.
///   * `PLAIN`, `SCRAM-SHA-1`, `SCRAM-SHA-256`: username, source and password.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Credential {
    pub mechanism: AuthMechanism,
    pub username: Option<String>,
    pub source: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credential")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("source", &self.source)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credential {
    /// Resolve the credential described by the configuration, if any.
    ///
    /// Credentials are only built when a password is configured.
    /// Resolution never touches the network so configuration mistakes
    /// are reported before any connection is attempted.
    pub fn resolve(config: &ConnectionConfig) -> Result<Option<Credential>> {
        let password = match config.password.as_ref() {
            None => return Ok(None),
            Some(password) => password,
        };
        let mechanism: AuthMechanism = config
            .mechanism
            .as_deref()
            .ok_or(ErrorKind::AuthMechanismMissing)?
            .parse()?;
        let credential = match mechanism {
            AuthMechanism::Gssapi => Credential {
                mechanism,
                username: Some(required_username(config, mechanism)?),
                source: None,
                password: None,
            },
            AuthMechanism::MongoDbX509 => Credential {
                mechanism,
                username: config.username.clone(),
                source: None,
                password: None,
            },
            AuthMechanism::Plain | AuthMechanism::ScramSha1 | AuthMechanism::ScramSha256 => {
                let source = config
                    .source
                    .clone()
                    .ok_or_else(|| ErrorKind::AuthSourceMissing(mechanism.as_str()))?;
                Credential {
                    mechanism,
                    username: Some(required_username(config, mechanism)?),
                    source: Some(source),
                    password: Some(password.clone()),
                }
            }
        };
        Ok(Some(credential))
    }
}

fn required_username(config: &ConnectionConfig, mechanism: AuthMechanism) -> Result<String> {
    let username = config
        .username
        .clone()
        .ok_or_else(|| ErrorKind::AuthUsernameMissing(mechanism.as_str()))?;
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::AuthMechanism;
    use super::Credential;
    use crate::config::ConnectionConfig;
    use crate::ErrorKind;

    fn config(mechanism: Option<&str>) -> ConnectionConfig {
        ConnectionConfig {
            database: Some("catalogue".into()),
            mechanism: mechanism.map(String::from),
            username: Some("importer".into()),
            password: Some("secret".into()),
            source: Some("admin".into()),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn no_password_no_credential() {
        let config = ConnectionConfig {
            password: None,
            ..config(Some("NOT-A-MECHANISM"))
        };
        assert_eq!(Credential::resolve(&config).unwrap(), None);
    }

    #[test]
    fn mechanism_names_round_trip() {
        for mechanism in &[
            AuthMechanism::Gssapi,
            AuthMechanism::MongoDbX509,
            AuthMechanism::Plain,
            AuthMechanism::ScramSha1,
            AuthMechanism::ScramSha256,
        ] {
            let parsed: AuthMechanism = mechanism.as_str().parse().unwrap();
            assert_eq!(parsed, *mechanism);
        }
    }

    #[test]
    fn mechanism_names_are_case_sensitive() {
        let error = "scram-sha-1".parse::<AuthMechanism>().unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthMechanismUnknown(name) if name == "scram-sha-1"));
    }

    #[test]
    fn missing_mechanism() {
        let error = Credential::resolve(&config(None)).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthMechanismMissing));
    }

    #[test]
    fn unknown_mechanism() {
        let error = Credential::resolve(&config(Some("MONGODB-CR"))).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthMechanismUnknown(name) if name == "MONGODB-CR"));
    }

    #[test]
    fn gssapi_uses_username_only() {
        let credential = Credential::resolve(&config(Some("GSSAPI"))).unwrap().unwrap();
        assert_eq!(credential.mechanism, AuthMechanism::Gssapi);
        assert_eq!(credential.username.as_deref(), Some("importer"));
        assert_eq!(credential.source, None);
        assert_eq!(credential.password, None);
    }

    #[test]
    fn x509_username_is_optional() {
        let config = ConnectionConfig {
            username: None,
            ..config(Some("MONGODB-X509"))
        };
        let credential = Credential::resolve(&config).unwrap().unwrap();
        assert_eq!(credential.mechanism, AuthMechanism::MongoDbX509);
        assert_eq!(credential.username, None);
        assert_eq!(credential.password, None);
    }

    #[test]
    fn scram_uses_username_source_password() {
        let credential = Credential::resolve(&config(Some("SCRAM-SHA-256")))
            .unwrap()
            .unwrap();
        assert_eq!(credential.mechanism, AuthMechanism::ScramSha256);
        assert_eq!(credential.username.as_deref(), Some("importer"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
        assert_eq!(credential.password.as_deref(), Some("secret"));
    }

    #[test]
    fn plain_requires_username() {
        let config = ConnectionConfig {
            username: None,
            ..config(Some("PLAIN"))
        };
        let error = Credential::resolve(&config).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthUsernameMissing("PLAIN")));
    }

    #[test]
    fn scram_requires_source() {
        let config = ConnectionConfig {
            source: None,
            ..config(Some("SCRAM-SHA-1"))
        };
        let error = Credential::resolve(&config).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AuthSourceMissing("SCRAM-SHA-1")));
    }

    #[test]
    fn debug_hides_password() {
        let credential = Credential::resolve(&config(Some("PLAIN"))).unwrap().unwrap();
        assert!(!format!("{:?}", credential).contains("secret"));
    }
}
