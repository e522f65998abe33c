/// Conversation list and chat state machine
///
/// `ConversationList` is the plain state: counterparts in most-recently-active
/// order, the open conversation and its transcript. `Inbox` drives it from
/// user commands and inbound real-time messages, talking to the API and the
/// unread counters along the way.
use crate::api::HospitalApi;
use crate::error::{Result, WardError};
use crate::models::{ChatMessage, Counterpart, SessionUser, UnreadKind};
use crate::unread::UnreadStore;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How many message ids are remembered for duplicate detection
const SEEN_WINDOW: usize = 1024;

/// Bounded set of recently seen message ids
#[derive(Debug, Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    /// Record `id`; false if it was already present
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == SEEN_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Debug, Default)]
pub struct ConversationList {
    counterparts: Vec<Counterpart>,
    open: Option<String>,
    transcript: Vec<ChatMessage>,
    seen: SeenIds,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a fresh server copy, keeping local unread counts
    /// for counterparts that are still present
    pub fn replace_counterparts(&mut self, fresh: Vec<Counterpart>) {
        let previous = std::mem::take(&mut self.counterparts);
        self.counterparts = fresh
            .into_iter()
            .map(|mut c| {
                if let Some(old) = previous.iter().find(|o| o.id == c.id) {
                    c.unread_count = c.unread_count.max(old.unread_count);
                }
                if self.open.as_deref() == Some(c.id.as_str()) {
                    c.unread_count = 0;
                }
                c
            })
            .collect();
    }

    pub fn counterparts(&self) -> &[Counterpart] {
        &self.counterparts
    }

    pub fn get(&self, user_id: &str) -> Option<&Counterpart> {
        self.counterparts.iter().find(|c| c.id == user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.get(user_id).is_some()
    }

    /// Move a counterpart to position 0. False if unknown.
    pub fn move_to_front(&mut self, user_id: &str) -> bool {
        match self.counterparts.iter().position(|c| c.id == user_id) {
            Some(0) => true,
            Some(idx) => {
                let c = self.counterparts.remove(idx);
                self.counterparts.insert(0, c);
                true
            }
            None => false,
        }
    }

    /// Add a counterpart at position 0 unless already listed
    pub fn insert_front(&mut self, counterpart: Counterpart) {
        if !self.contains(&counterpart.id) {
            self.counterparts.insert(0, counterpart);
        }
    }

    /// +1 on the counterpart's unread tally; returns the new value
    pub fn bump_unread(&mut self, user_id: &str) -> Option<u32> {
        self.counterparts
            .iter_mut()
            .find(|c| c.id == user_id)
            .map(|c| {
                c.unread_count = c.unread_count.saturating_add(1);
                c.unread_count
            })
    }

    /// Zero the counterpart's unread tally; returns what it was
    pub fn clear_unread(&mut self, user_id: &str) -> u32 {
        self.counterparts
            .iter_mut()
            .find(|c| c.id == user_id)
            .map(|c| std::mem::take(&mut c.unread_count))
            .unwrap_or(0)
    }

    pub fn open_counterpart(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn is_open(&self, user_id: &str) -> bool {
        self.open.as_deref() == Some(user_id)
    }

    /// Switch the open conversation, dropping the previous transcript
    pub fn open(&mut self, user_id: &str) {
        self.open = Some(user_id.to_string());
        self.transcript.clear();
        self.clear_unread(user_id);
    }

    pub fn close(&mut self) {
        self.open = None;
        self.transcript.clear();
    }

    /// Install a freshly fetched transcript for the open conversation.
    ///
    /// Messages appended while the fetch was in flight are kept after the
    /// history unless the history already contains them.
    pub fn load_transcript(&mut self, messages: Vec<ChatMessage>) -> &[ChatMessage] {
        let arrived = std::mem::replace(&mut self.transcript, messages);
        let fetched: HashSet<String> = self
            .transcript
            .iter()
            .filter_map(|m| m.id.clone())
            .collect();
        for id in &fetched {
            self.seen.insert(id);
        }

        for m in arrived {
            let already = match &m.id {
                Some(id) => fetched.contains(id),
                None => self.transcript.contains(&m),
            };
            if !already {
                self.transcript.push(m);
            }
        }
        &self.transcript
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Has a message with this id already been delivered?
    pub fn is_duplicate(&self, message: &ChatMessage) -> bool {
        message.id.as_deref().is_some_and(|id| self.seen.contains(id))
    }

    /// Remember a message id without showing it
    pub fn mark_seen(&mut self, message: &ChatMessage) -> bool {
        match &message.id {
            Some(id) => self.seen.insert(id),
            None => true,
        }
    }

    /// Append to the open transcript; false if it was a duplicate
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.mark_seen(&message) {
            return false;
        }
        self.transcript.push(message);
        true
    }
}

/// What an inbound message did to local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Shown in the open conversation and acknowledged
    Appended,
    /// Counted as unread for the sender
    Unread { from: String, unread_count: u32 },
    /// Our own message echoed back (other tab or self-chat)
    Echo,
    /// Already delivered once
    Duplicate,
}

/// Chat front: counterparts, open transcript, send/open/receive
pub struct Inbox {
    me: SessionUser,
    api: Arc<dyn HospitalApi>,
    unread: Arc<UnreadStore>,
    state: Mutex<ConversationList>,
    /// Bumped on every open so a late transcript can't land in the wrong pane
    open_seq: AtomicU64,
}

impl Inbox {
    pub fn new(me: SessionUser, api: Arc<dyn HospitalApi>, unread: Arc<UnreadStore>) -> Self {
        Self {
            me,
            api,
            unread,
            state: Mutex::new(ConversationList::new()),
            open_seq: AtomicU64::new(0),
        }
    }

    pub fn me(&self) -> &SessionUser {
        &self.me
    }

    /// Fetch the counterpart list from the server
    pub async fn load_counterparts(&self) -> Result<Vec<Counterpart>> {
        let fresh = self.api.chat_users().await?;
        let fresh: Vec<Counterpart> = fresh.into_iter().filter(|c| c.id != self.me.id).collect();
        let mut state = self.state.lock().await;
        state.replace_counterparts(fresh);
        debug!("Loaded {} chat counterparts", state.counterparts().len());
        Ok(state.counterparts().to_vec())
    }

    pub async fn counterparts(&self) -> Vec<Counterpart> {
        self.state.lock().await.counterparts().to_vec()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().await.transcript().to_vec()
    }

    pub async fn open_counterpart(&self) -> Option<String> {
        self.state.lock().await.open_counterpart().map(str::to_string)
    }

    /// Open a conversation: zero its unread count, load the transcript,
    /// send the read-receipt and reconcile the global counters
    pub async fn open_conversation(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let seq = self.open_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().await.open(user_id);

        let messages = self.api.chat_history(user_id).await?;

        let transcript = {
            let mut state = self.state.lock().await;
            if self.open_seq.load(Ordering::SeqCst) != seq || !state.is_open(user_id) {
                debug!("Discarding transcript for {}: conversation changed", user_id);
                return Err(WardError::Session(format!(
                    "conversation with {} was closed while loading",
                    user_id
                )));
            }
            state.load_transcript(messages).to_vec()
        };

        self.acknowledge(user_id).await?;
        info!("Opened conversation with {} ({} messages)", user_id, transcript.len());
        Ok(transcript)
    }

    pub async fn close_conversation(&self) {
        self.open_seq.fetch_add(1, Ordering::SeqCst);
        self.state.lock().await.close();
    }

    /// Send a message; the server's stored copy is appended when the
    /// conversation is open and the counterpart moves to the front
    pub async fn send_message(&self, to: &str, body: &str) -> Result<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(WardError::Session("Cannot send an empty message".to_string()));
        }

        let sent = self.api.send_message(to, body).await?;

        let mut state = self.state.lock().await;
        if state.is_open(to) {
            state.append(sent.clone());
        } else {
            state.mark_seen(&sent);
        }
        if !state.move_to_front(to) {
            debug!("Sent to {} who is not in the conversation list", to);
        }
        Ok(sent)
    }

    /// Apply a `receive_message` event
    pub async fn handle_incoming(&self, message: ChatMessage) -> Result<Delivery> {
        if message.sender == self.me.id {
            return Ok(self.handle_echo(message).await);
        }

        let from = message.sender.clone();
        let mut state = self.state.lock().await;

        if state.is_duplicate(&message) {
            debug!("Duplicate message {:?} from {}", message.id, from);
            return Ok(Delivery::Duplicate);
        }

        if state.is_open(&from) {
            state.append(message);
            state.move_to_front(&from);
            drop(state);
            self.acknowledge(&from).await?;
            return Ok(Delivery::Appended);
        }

        state.mark_seen(&message);
        if !state.contains(&from) {
            drop(state);
            if let Err(e) = self.load_counterparts().await {
                warn!("Could not refresh counterparts for new sender {}: {}", from, e);
            }
            state = self.state.lock().await;
        }

        if !state.contains(&from) {
            warn!("Sender {} missing from chat users, adding placeholder", from);
            state.insert_front(Counterpart::new(from.clone(), from.clone()));
        }
        let unread_count = state.bump_unread(&from).unwrap_or(0);
        state.move_to_front(&from);
        drop(state);

        self.unread.increment(UnreadKind::Messages);
        Ok(Delivery::Unread { from, unread_count })
    }

    async fn handle_echo(&self, message: ChatMessage) -> Delivery {
        let to = message.receiver.clone();
        let mut state = self.state.lock().await;
        if state.is_duplicate(&message) {
            return Delivery::Duplicate;
        }
        if state.is_open(&to) {
            state.append(message);
        } else {
            state.mark_seen(&message);
        }
        state.move_to_front(&to);
        Delivery::Echo
    }

    /// Read-receipt for one counterpart followed by a reconciling fetch
    async fn acknowledge(&self, user_id: &str) -> Result<()> {
        self.state.lock().await.clear_unread(user_id);
        self.api.mark_chat_read(user_id).await?;
        self.unread.fetch_unread_count().await?;
        Ok(())
    }
}
