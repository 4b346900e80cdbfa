//! # Query Dispatcher
//!
//! Turns one plain-text chat query into the envelopes sent back to the client:
//! 1. `gpt-response`: always, with the completion text or the fallback message
//! 2. `partner-search-results`: only when the query names an expertise
//! 3. `error`: when the partner lookup fails
//!
//! Nothing here ends the session; every failure becomes an envelope.
//!
//! A session feeds its queries through a [`QueryQueue`], so replies leave in the order
//! the queries arrived even when an earlier completion is slower than a later one.

pub mod intent;

use crate::completion::CompletionService;
use crate::relay::envelope::Envelope;
use crate::store::{PartnerStore, EXPERTISE_KEY_FIELD};
use intent::ExpertiseExtractor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LOOKUP_ERROR_MESSAGE: &str = "Error processing your request.";

#[derive(Clone)]
pub struct QueryDispatcher {
    completion: Arc<dyn CompletionService>,
    store: Arc<dyn PartnerStore>,
    extractor: Arc<dyn ExpertiseExtractor>,
    collection: String,
    fallback_message: String,
}

impl QueryDispatcher {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        store: Arc<dyn PartnerStore>,
        extractor: Arc<dyn ExpertiseExtractor>,
        collection: impl Into<String>,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            store,
            extractor,
            collection: collection.into(),
            fallback_message: fallback_message.into(),
        }
    }

    /// Answer one query. Envelopes come back in the order they should be sent.
    pub async fn dispatch(&self, query: &str) -> Vec<Envelope> {
        let mut replies = Vec::with_capacity(2);

        let answer = match self.completion.complete(query).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "Completion failed, sending fallback message");
                self.fallback_message.clone()
            }
        };
        replies.push(Envelope::GptResponse(answer));

        if let Some(expertise) = self.extractor.extract(query) {
            let key = expertise.to_lowercase();
            debug!(expertise = %key, "Looking up partners");

            match self
                .store
                .query_by_exact_field(&self.collection, EXPERTISE_KEY_FIELD, &key)
                .await
            {
                Ok(records) => replies.push(Envelope::PartnerSearchResults(records)),
                Err(err) => {
                    warn!(error = %err, expertise = %key, "Partner lookup failed");
                    replies.push(Envelope::Error(LOOKUP_ERROR_MESSAGE.to_string()));
                }
            }
        }

        replies
    }

    /// Start one worker that answers queries one at a time, handing each reply batch
    /// to `deliver` before taking the next query.
    pub fn spawn_queue<F>(&self, deliver: F) -> QueryQueue
    where
        F: Fn(Vec<Envelope>) + Send + 'static,
    {
        let (queries, mut pending) = mpsc::unbounded_channel::<String>();
        let dispatcher = self.clone();

        let worker = tokio::spawn(async move {
            while let Some(query) = pending.recv().await {
                let replies = dispatcher.dispatch(&query).await;
                deliver(replies);
            }
        });

        QueryQueue { queries, worker }
    }
}

/// Ordered query intake for one session. Dropping it cancels the worker along with
/// any queries still waiting.
pub struct QueryQueue {
    queries: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

impl QueryQueue {
    /// Returns `false` once the worker is gone.
    pub fn submit(&self, query: String) -> bool {
        self.queries.send(query).is_ok()
    }
}

impl Drop for QueryQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
