//! Paged LDAP search with uniform attribute normalization.
//!
//! One call to [`search`] runs one logical directory search. Server-side
//! result paging is driven internally, cookie by cookie, so callers see a
//! plain finite stream of [`DirectoryEntry`] values and never the
//! protocol-level continuation mechanics. Attribute values come back in a
//! uniform shape: `None` for attributes the server did not return, a
//! scalar for single-valued results, an ordered sequence otherwise, with
//! text/bytes decided by the caller's binary-attribute list.
//!
//! ```no_run
//! use ldap_paged_search::{search, ConnParams, SearchSpec};
//!
//! # async fn run() -> Result<(), ldap_paged_search::SearchError> {
//! let mut spec = SearchSpec::new("dc=example,dc=com", "(objectClass=user)");
//! spec.attrs = vec!["mail".to_string()];
//!
//! let mut stream = search(&spec, ConnParams::default()).await?;
//! while let Some(entry) = stream.next().await? {
//!     println!("{} {:?}", entry.dn, entry.value("mail"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod conn;
pub mod entry;
pub mod error;
pub mod search;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use conn::{DirectoryConn, Page};
pub use entry::{AttrValue, DirectoryEntry};
pub use error::SearchError;
pub use search::{search, ConnSource, PagedSearch, SearchRequest, SearchScope, SearchSpec};

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    389
}

/// Parameters for building a connection when the caller does not supply
/// one. A connection built from these is owned by the executor and
/// released exactly once when the operation ends.
#[derive(Serialize, Deserialize, Clone)]
pub struct ConnParams {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect over LDAPS instead of plain LDAP.
    #[serde(default)]
    pub use_tls: bool,

    #[serde(default = "default_true")]
    pub verify_certs: bool,

    /// Bind DN or user principal. Absent means an anonymous session.
    #[serde(default)]
    pub username: Option<String>,

    /// Bind password. Absent or empty with a username set means the
    /// password is prompted for on the terminal, without echo.
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            use_tls: false,
            verify_certs: true,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for ConnParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("verify_certs", &self.verify_certs)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ConnParams {
    pub fn uri(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Connect and bind. Binding is always a simple bind; with no
    /// username the session stays anonymous.
    pub async fn connect(&self) -> Result<Ldap, SearchError> {
        let uri = self.uri();
        let settings = LdapConnSettings::new().set_no_tls_verify(!self.verify_certs);

        debug!(uri = %uri, "connecting");
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &uri)
            .await
            .map_err(|source| SearchError::Connect {
                uri: uri.clone(),
                source,
            })?;
        ldap3::drive!(conn);

        if let Some(user) = &self.username {
            let pass = match self.password.as_deref() {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => rpassword::prompt_password(format!("Password for {user}: ")).map_err(
                    |source| SearchError::Prompt {
                        user: user.clone(),
                        source,
                    },
                )?,
            };

            debug!(user = %user, "simple bind");
            ldap.simple_bind(user, &pass)
                .await
                .and_then(|res| res.success())
                .map_err(|source| SearchError::Bind {
                    user: user.clone(),
                    source,
                })?;
        }

        Ok(ldap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_reflects_scheme_host_and_port() {
        let mut params = ConnParams::default();
        assert_eq!(params.uri(), "ldap://localhost:389");

        params.host = "dc01.example.com".to_string();
        params.port = 3269;
        params.use_tls = true;
        assert_eq!(params.uri(), "ldaps://dc01.example.com:3269");
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: ConnParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.host, "localhost");
        assert_eq!(params.port, 389);
        assert!(!params.use_tls);
        assert!(params.verify_certs);
        assert!(params.username.is_none());
        assert!(params.password.is_none());
    }

    #[test]
    fn debug_redacts_the_password() {
        let params = ConnParams {
            username: Some("cn=admin,dc=example,dc=com".to_string()),
            password: Some("hunter2".to_string()),
            ..ConnParams::default()
        };
        let printed = format!("{params:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("***"));
    }
}
