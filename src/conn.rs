use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, MakeCritical, PagedResults, RawControl};
use ldap3::{Ldap, SearchEntry, SearchOptions, SearchResult};
use tokio::time;
use tracing::debug;

use crate::error::SearchError;
use crate::search::SearchRequest;

/// Outcome of one search round trip.
pub struct Page {
    pub entries: Vec<SearchEntry>,
    /// Cookie from the paged-results response control. `None` when the
    /// response carried no such control; an empty cookie means the server
    /// has delivered the last page.
    pub cookie: Option<Vec<u8>>,
}

/// One request/response cycle against a directory server.
///
/// Implemented by [`Ldap`]; the paging loop is written against this trait
/// so its state machine can be driven by scripted doubles in tests.
///
/// Referrals are returned to the caller, never chased, so result paging
/// stays well-defined on a single connection.
#[async_trait]
pub trait DirectoryConn: Send {
    /// Send `req` with `cookie` in its paging control (the cookie is
    /// ignored when paging is off) and wait for the complete response,
    /// bounded by the request's timeout.
    async fn search_page(
        &mut self,
        req: &SearchRequest,
        cookie: &[u8],
    ) -> Result<Page, SearchError>;

    /// Tear down the underlying session. The executor calls this at most
    /// once, and only for connections it created itself.
    async fn unbind(&mut self) -> Result<(), SearchError>;
}

#[async_trait]
impl DirectoryConn for Ldap {
    async fn search_page(
        &mut self,
        req: &SearchRequest,
        cookie: &[u8],
    ) -> Result<Page, SearchError> {
        // Per-operation options go on a cloned handle so a caller-supplied
        // connection is left untouched.
        let mut op = self.clone();
        let secs = req.timeout.as_secs().min(i32::MAX as u64) as i32;
        op.with_search_options(SearchOptions::new().timelimit(secs));
        if let Some(size) = req.page_size {
            let ctrl: RawControl = PagedResults {
                size,
                cookie: cookie.to_vec(),
            }
            .critical()
            .into();
            op.with_controls(ctrl);
        }

        debug!(base = %req.base, filter = %req.filter, "sending search request");
        let fut = op.search(&req.base, req.scope, &req.filter, &req.attrs);
        let SearchResult(entries, res) = time::timeout(req.timeout, fut)
            .await
            .map_err(|_| SearchError::Timeout { limit: req.timeout })??;

        if res.rc != 0 {
            return Err(SearchError::Server {
                rc: res.rc,
                text: res.text,
            });
        }

        let cookie = res.ctrls.into_iter().find_map(|ctrl| match ctrl {
            Control(Some(ControlType::PagedResults), raw) => {
                Some(raw.parse::<PagedResults>().cookie)
            }
            _ => None,
        });

        debug!(
            entries = entries.len(),
            control = cookie.is_some(),
            "search page received"
        );

        Ok(Page {
            entries: entries.into_iter().map(SearchEntry::construct).collect(),
            cookie,
        })
    }

    async fn unbind(&mut self) -> Result<(), SearchError> {
        Ok(Ldap::unbind(self).await?)
    }
}
