/// Debounced multi-entity search
///
/// Keystrokes go in through `SearchController::input`; a request is issued
/// only after `debounce` of silence and only for queries of at least
/// `min_chars` characters. Results for superseded requests are dropped.
use crate::api::HospitalApi;
use crate::error::Result;
use crate::models::SearchResults;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    /// No query (or too short): nothing shown
    Idle,
    Searching { query: String },
    Ready { query: String, results: SearchResults },
    Failed { query: String, message: String },
}

/// Trimmed query if it is long enough to send
pub fn normalize_query(raw: &str, min_chars: usize) -> Option<String> {
    let query = raw.trim();
    (query.chars().count() >= min_chars.max(1)).then(|| query.to_string())
}

pub struct SearchController {
    input: mpsc::UnboundedSender<String>,
    state: watch::Receiver<SearchState>,
    task: JoinHandle<()>,
}

impl SearchController {
    pub fn spawn(api: Arc<dyn HospitalApi>, debounce: Duration, min_chars: usize) -> Self {
        let (input, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SearchState::Idle);
        let task = tokio::spawn(run_debounce(api, rx, state_tx, debounce, min_chars));
        Self { input, state, task }
    }

    /// Feed the current contents of the search box
    pub fn input(&self, query: impl Into<String>) {
        if self.input.send(query.into()).is_err() {
            warn!("Search input dropped: controller stopped");
        }
    }

    pub fn clear(&self) {
        self.input(String::new());
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.clone()
    }

    /// Stop accepting input and wait for the debounce task to exit
    pub async fn shutdown(self) {
        let Self { input, task, .. } = self;
        drop(input);
        let _ = task.await;
    }
}

async fn run_debounce(
    api: Arc<dyn HospitalApi>,
    mut input: mpsc::UnboundedReceiver<String>,
    state: watch::Sender<SearchState>,
    debounce: Duration,
    min_chars: usize,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, String, Result<SearchResults>)>();
    let timer = tokio::time::sleep(debounce);
    tokio::pin!(timer);

    let mut pending: Option<String> = None;
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            next = input.recv() => {
                let Some(raw) = next else { break };
                match normalize_query(&raw, min_chars) {
                    Some(query) => {
                        pending = Some(query);
                        timer.as_mut().reset(Instant::now() + debounce);
                    }
                    None => {
                        pending = None;
                        // Anything still in flight is now stale
                        seq += 1;
                        state.send_replace(SearchState::Idle);
                    }
                }
            }
            () = &mut timer, if pending.is_some() => {
                if let Some(query) = pending.take() {
                    seq += 1;
                    let ticket = seq;
                    debug!("Search #{} for {:?}", ticket, query);
                    state.send_replace(SearchState::Searching { query: query.clone() });

                    let api = api.clone();
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let result = api.search(&query).await;
                        let _ = done.send((ticket, query, result));
                    });
                }
            }
            Some((ticket, query, result)) = done_rx.recv() => {
                if ticket != seq {
                    debug!("Dropping stale search result #{} for {:?}", ticket, query);
                    continue;
                }
                let next = match result {
                    Ok(results) => SearchState::Ready { query, results },
                    Err(e) => {
                        warn!("Search for {:?} failed: {}", query, e);
                        SearchState::Failed { query, message: e.to_string() }
                    }
                };
                state.send_replace(next);
            }
        }
    }
}
