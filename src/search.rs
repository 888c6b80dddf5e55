use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use ldap3::{Ldap, Scope};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conn::DirectoryConn;
use crate::entry::{normalize, DirectoryEntry};
use crate::error::SearchError;
use crate::ConnParams;

/// The distinguished name is always requested, ahead of caller attributes.
const DN_ATTR: &str = "distinguishedName";

fn default_page_size() -> u32 {
    100
}

fn default_timeout() -> u64 {
    120
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Scope {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Description of one logical search. Read-only once handed to
/// [`search`]; construct it literally or deserialize it from config.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchSpec {
    /// Container to search under. Required, non-empty.
    pub base: String,

    /// LDAP filter. Required, non-empty.
    pub filter: String,

    #[serde(default)]
    pub scope: SearchScope,

    /// Attributes to load, in caller order. The distinguished name is
    /// always requested in addition.
    #[serde(default)]
    pub attrs: Vec<String>,

    /// Subset of `attrs` whose values are opaque byte sequences.
    #[serde(default)]
    pub binary_attrs: Vec<String>,

    /// Entries per page; 0 disables paging (single round trip, server
    /// default limits apply).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-round-trip wait bound, also sent as the server-side time limit.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl SearchSpec {
    pub fn new(base: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            filter: filter.into(),
            scope: SearchScope::default(),
            attrs: Vec::new(),
            binary_attrs: Vec::new(),
            page_size: default_page_size(),
            timeout_secs: default_timeout(),
        }
    }

    fn validate(&self) -> Result<(), SearchError> {
        if self.base.trim().is_empty() {
            return Err(SearchError::Invalid("search base is empty".to_string()));
        }
        if self.filter.trim().is_empty() {
            return Err(SearchError::Invalid("search filter is empty".to_string()));
        }
        Ok(())
    }

    /// Wire attribute list: the DN first, then caller attributes in
    /// order, duplicates collapsed case-insensitively.
    fn attr_list(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(DN_ATTR.to_ascii_lowercase());
        let mut out = vec![DN_ATTR.to_string()];
        for attr in &self.attrs {
            if seen.insert(attr.to_ascii_lowercase()) {
                out.push(attr.clone());
            }
        }
        out
    }

    /// Caller attribute names to normalize per entry, deduplicated with
    /// the first-written casing kept.
    fn wanted(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        self.attrs
            .iter()
            .filter(|a| seen.insert(a.to_ascii_lowercase()))
            .cloned()
            .collect()
    }

    fn binary_set(&self) -> HashSet<String> {
        self.binary_attrs
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect()
    }
}

/// One reusable wire-level request; the paging cookie is threaded through
/// separately because it changes on every round trip.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: String,
    pub attrs: Vec<String>,
    pub timeout: Duration,
    /// `None` disables paging entirely.
    pub page_size: Option<i32>,
}

impl SearchRequest {
    fn from_spec(spec: &SearchSpec) -> Self {
        Self {
            base: spec.base.clone(),
            scope: spec.scope.into(),
            filter: spec.filter.clone(),
            attrs: spec.attr_list(),
            timeout: Duration::from_secs(spec.timeout_secs),
            page_size: match spec.page_size {
                0 => None,
                n => Some(n.min(i32::MAX as u32) as i32),
            },
        }
    }
}

/// Where the executor gets its connection from. A caller-supplied handle
/// is borrowed and never unbound; parameters produce a connection the
/// executor owns and releases itself.
pub enum ConnSource {
    Bound(Ldap),
    Params(ConnParams),
}

impl From<Ldap> for ConnSource {
    fn from(ldap: Ldap) -> Self {
        ConnSource::Bound(ldap)
    }
}

impl From<ConnParams> for ConnSource {
    fn from(params: ConnParams) -> Self {
        ConnSource::Params(params)
    }
}

/// Run one logical search, resolving the connection source first.
///
/// The returned stream is finite and not restartable; drive it with
/// [`PagedSearch::next`] or drain it with [`PagedSearch::collect`].
pub async fn search(
    spec: &SearchSpec,
    conn: impl Into<ConnSource>,
) -> Result<PagedSearch<Ldap>, SearchError> {
    match conn.into() {
        ConnSource::Bound(ldap) => PagedSearch::new(ldap, false, spec),
        ConnSource::Params(params) => {
            spec.validate()?;
            let ldap = params.connect().await?;
            PagedSearch::new(ldap, true, spec)
        }
    }
}

enum LoopState {
    Start,
    Continue(Vec<u8>),
    Done,
}

/// The paged-search executor: a pull-driven state machine over one
/// connection. At most one page of normalized entries is buffered.
///
/// Dropping the executor early releases an owned connection as well: the
/// connection driver terminates once its last handle is gone.
pub struct PagedSearch<C: DirectoryConn> {
    conn: C,
    owned: bool,
    released: bool,
    req: SearchRequest,
    wanted: Vec<String>,
    binary: HashSet<String>,
    page: VecDeque<DirectoryEntry>,
    state: LoopState,
}

impl<C: DirectoryConn> PagedSearch<C> {
    /// Build an executor over an already-acquired connection capability.
    /// `owned` decides whether the executor unbinds it when finished.
    pub fn new(conn: C, owned: bool, spec: &SearchSpec) -> Result<Self, SearchError> {
        spec.validate()?;
        Ok(Self {
            conn,
            owned,
            released: false,
            req: SearchRequest::from_spec(spec),
            wanted: spec.wanted(),
            binary: spec.binary_set(),
            page: VecDeque::new(),
            state: LoopState::Start,
        })
    }

    /// Next entry, in server order, fetching the next page when the
    /// current one is drained. Returns `Ok(None)` once the server has
    /// signalled completion; every error ends the operation for good.
    pub async fn next(&mut self) -> Result<Option<DirectoryEntry>, SearchError> {
        loop {
            if let Some(entry) = self.page.pop_front() {
                return Ok(Some(entry));
            }

            let cookie = match std::mem::replace(&mut self.state, LoopState::Done) {
                LoopState::Done => {
                    self.release().await;
                    return Ok(None);
                }
                LoopState::Start => Vec::new(),
                LoopState::Continue(cookie) => cookie,
            };

            let page = match self.conn.search_page(&self.req, &cookie).await {
                Ok(page) => page,
                Err(err) => {
                    self.release().await;
                    return Err(err);
                }
            };

            self.state = if self.req.page_size.is_none() {
                LoopState::Done
            } else {
                match page.cookie {
                    // The server accepted the search without honoring the
                    // paging control; continuing would silently truncate.
                    // Nothing from the offending page is emitted.
                    None => {
                        self.release().await;
                        return Err(SearchError::PagingNotHonored {
                            filter: self.req.filter.clone(),
                        });
                    }
                    Some(cookie) if cookie.is_empty() => LoopState::Done,
                    Some(cookie) => LoopState::Continue(cookie),
                }
            };

            self.page = page
                .entries
                .into_iter()
                .map(|e| normalize(e, &self.wanted, &self.binary))
                .collect();
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<DirectoryEntry>, SearchError> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Stop early without draining, releasing an owned connection.
    pub async fn finish(mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        if self.owned && !self.released {
            self.released = true;
            // An unbind failure during cleanup must not mask the result
            // of the search itself.
            if let Err(err) = self.conn.unbind().await {
                debug!(error = %err, "unbind failed during release");
            }
        }
    }
}
