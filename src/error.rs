use std::time::Duration;

use ldap3::LdapError;
use thiserror::Error;

/// Failure modes of one logical search.
///
/// Every variant aborts the whole operation; there is no retry and no
/// partial-result suppression. An internally-created connection is still
/// released when any of these surface.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request itself is unusable (empty base or filter).
    #[error("invalid search request: {0}")]
    Invalid(String),

    /// Could not establish a connection to the server.
    #[error("cannot connect to {uri}")]
    Connect {
        uri: String,
        #[source]
        source: LdapError,
    },

    /// Could not collect a password from the terminal.
    #[error("cannot read password for {user}")]
    Prompt {
        user: String,
        #[source]
        source: std::io::Error,
    },

    /// The bind step of connection setup failed.
    #[error("bind failed for {user}")]
    Bind {
        user: String,
        #[source]
        source: LdapError,
    },

    /// Paging was requested but the server response carried no
    /// paged-results control. The server accepted the search without
    /// honoring the control, so continuing would silently drop pages.
    #[error("server returned no paged-results control for filter {filter:?}")]
    PagingNotHonored { filter: String },

    /// A single round trip exceeded the configured wait bound.
    #[error("search timed out after {}s", limit.as_secs())]
    Timeout { limit: Duration },

    /// Non-success result code from the server, passed through verbatim.
    #[error("server rejected the search: rc={rc} {text}")]
    Server { rc: u32, text: String },

    /// Transport-level failure surfaced by the protocol library.
    #[error(transparent)]
    Ldap(#[from] LdapError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_not_honored_names_the_filter() {
        let err = SearchError::PagingNotHonored {
            filter: "(objectClass=user)".to_string(),
        };
        assert!(err.to_string().contains("(objectClass=user)"));
    }

    #[test]
    fn server_error_carries_rc_and_text() {
        let err = SearchError::Server {
            rc: 50,
            text: "Insufficient access".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rc=50"));
        assert!(msg.contains("Insufficient access"));
    }

    #[test]
    fn timeout_reports_seconds() {
        let err = SearchError::Timeout {
            limit: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("120s"));
    }
}
