//! Server-side search sessions
//!
//! `performSearch` opens a session holding a result list on the remote end;
//! results are paged by index range until the session is discarded.
//!
//! ```text
//! perform_search ──► Open{count} ──get_search_results*──► discard ──► Discarded
//! ```

use cdp::Transport;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{DomError, Result};
use crate::types::NodeId;

/// Server-assigned search session id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(pub String);

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of opening a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSession {
    pub search_id: SearchId,
    pub result_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    Open { result_count: u32 },
    Discarded,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResults {
    node_ids: Vec<NodeId>,
}

/// Tracks every search session opened through one transport
pub struct SearchSessions<T: Transport> {
    transport: Arc<T>,
    /// Discarded entries stay as tombstones so late paging reports
    /// `SessionClosed` rather than `SearchNotFound`. One id and a tag per
    /// search ever opened on this transport.
    sessions: Mutex<HashMap<SearchId, SearchState>>,
}

impl<T: Transport> SearchSessions<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Run a plain-text, selector or XPath query over the whole document
    pub async fn perform_search(
        &self,
        query: &str,
        include_user_agent_shadow_dom: bool,
    ) -> Result<SearchSession> {
        let result = self
            .transport
            .send_command(
                "DOM.performSearch",
                Some(json!({
                    "query": query,
                    "includeUserAgentShadowDOM": include_user_agent_shadow_dom,
                })),
            )
            .await?;
        let session: SearchSession = serde_json::from_value(result)?;

        tracing::debug!(
            search_id = %session.search_id,
            result_count = session.result_count,
            "search opened"
        );
        self.sessions.lock().await.insert(
            session.search_id.clone(),
            SearchState::Open {
                result_count: session.result_count,
            },
        );
        Ok(session)
    }

    /// Result ids in `from..to` (end exclusive).
    ///
    /// The range is checked against the session's result count before
    /// anything is sent; an empty range needs no round trip.
    pub async fn get_search_results(
        &self,
        search_id: &SearchId,
        from_index: u32,
        to_index: u32,
    ) -> Result<Vec<NodeId>> {
        let count = self.result_count(search_id).await?;
        if from_index > to_index || to_index > count {
            return Err(DomError::InvalidRange {
                from: from_index,
                to: to_index,
                count,
            });
        }
        if from_index == to_index {
            return Ok(Vec::new());
        }

        let result = self
            .transport
            .send_command(
                "DOM.getSearchResults",
                Some(json!({
                    "searchId": search_id,
                    "fromIndex": from_index,
                    "toIndex": to_index,
                })),
            )
            .await?;
        let results: SearchResults = serde_json::from_value(result)?;
        Ok(results.node_ids)
    }

    /// Release the remote result list. The session is closed only once the
    /// remote end has acknowledged.
    pub async fn discard(&self, search_id: &SearchId) -> Result<()> {
        self.result_count(search_id).await?;

        self.transport
            .send_command(
                "DOM.discardSearchResults",
                Some(json!({ "searchId": search_id })),
            )
            .await?;

        self.sessions
            .lock()
            .await
            .insert(search_id.clone(), SearchState::Discarded);
        tracing::debug!(search_id = %search_id, "search discarded");
        Ok(())
    }

    /// Result count of an open session
    pub async fn result_count(&self, search_id: &SearchId) -> Result<u32> {
        match self.sessions.lock().await.get(search_id) {
            Some(SearchState::Open { result_count }) => Ok(*result_count),
            Some(SearchState::Discarded) => Err(DomError::SessionClosed(search_id.clone())),
            None => Err(DomError::SearchNotFound(search_id.clone())),
        }
    }

    /// Ids of sessions not yet discarded
    pub async fn open_sessions(&self) -> Vec<SearchId> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|(_, state)| matches!(state, SearchState::Open { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
