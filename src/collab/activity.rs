/// Activity feed
///
/// The feed is written only as a side effect of successful operations (the
/// store appends the event in the same unit as the change). Readers page
/// forward by cursor; a cursor from any earlier page is a valid restart point.
///
/// Push is layered on top without touching the core: after every committed
/// write the facade publishes an `ActivityNotice`, and long-polling readers
/// wait for one instead of hammering the store.

use crate::error::{EngineError, EngineResult};
use crate::storage::WorkflowStore;
use crate::workflow::types::{ActivityEvent, Cursor, WorkflowId};
use futures::{stream, Stream};
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::broadcast;

pub const MAX_PAGE_SIZE: usize = 500;

/// Signal that a workflow has new events up to `cursor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivityNotice {
    pub workflow_id: WorkflowId,
    pub cursor: Cursor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityPage {
    pub events: Vec<ActivityEvent>,
    /// Pass back as `since` to continue; equals the request cursor on an empty page
    pub next_cursor: Cursor,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct ActivityFeed {
    store: Arc<dyn WorkflowStore>,
    page_size: usize,
    notices: broadcast::Sender<ActivityNotice>,
}

impl ActivityFeed {
    pub fn new(store: Arc<dyn WorkflowStore>, page_size: usize) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            store,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            notices,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One page of events strictly after `since`
    pub async fn list(&self, id: WorkflowId, since: Cursor, limit: Option<usize>) -> EngineResult<ActivityPage> {
        let limit = limit.unwrap_or(self.page_size).clamp(1, MAX_PAGE_SIZE);
        let mut events = self.store.list_activity(id, since, limit + 1).await?;

        let has_more = events.len() > limit;
        events.truncate(limit);
        let next_cursor = events.last().map_or(since, |e| e.cursor);

        tracing::debug!("📜 {} activity events for workflow {} after {:?}", events.len(), id, since);
        Ok(ActivityPage {
            events,
            next_cursor,
            has_more,
        })
    }

    /// Like `list`, but when nothing is new wait up to `wait` for a notice on
    /// this workflow before reading again
    pub async fn wait_for(
        &self,
        id: WorkflowId,
        since: Cursor,
        limit: Option<usize>,
        wait: Duration,
    ) -> EngineResult<ActivityPage> {
        // Subscribe before the first read so a write landing in between is not missed
        let mut notices = self.subscribe();
        let page = self.list(id, since, limit).await?;
        if !page.events.is_empty() || wait.is_zero() {
            return Ok(page);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, notices.recv()).await {
                Ok(Ok(notice)) if notice.workflow_id == id && notice.cursor > since => break,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!("📜 Activity listener lagged by {} notices", skipped);
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return Ok(page),
            }
        }
        self.list(id, since, limit).await
    }

    /// Every event after `since` as a lazy stream, fetched a page at a time
    ///
    /// The stream ends at the last event that existed when its final page was
    /// read; restart it from the last cursor seen to pick up later events.
    pub fn stream(&self, id: WorkflowId, since: Cursor) -> impl Stream<Item = EngineResult<ActivityEvent>> + Send + 'static {
        let feed = self.clone();
        let buffer: VecDeque<ActivityEvent> = VecDeque::new();

        stream::try_unfold((feed, since, buffer, false), move |(feed, cursor, mut buffer, exhausted)| async move {
            if buffer.is_empty() && !exhausted {
                let page = feed.list(id, cursor, None).await?;
                let done = !page.has_more;
                buffer.extend(page.events);
                return Ok::<_, EngineError>(
                    buffer
                        .pop_front()
                        .map(|event| (event.clone(), (feed, event.cursor, buffer, done))),
                );
            }
            Ok(buffer
                .pop_front()
                .map(|event| (event.clone(), (feed, event.cursor, buffer, exhausted))))
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityNotice> {
        self.notices.subscribe()
    }

    /// Announce a committed event; dropped silently when nobody listens
    pub fn publish(&self, event: &ActivityEvent) {
        let _ = self.notices.send(ActivityNotice {
            workflow_id: event.workflow_id,
            cursor: event.cursor,
        });
    }
}
