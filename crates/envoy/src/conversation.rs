use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_shared::{Exchange, ExchangeId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{ApiClient, ClientError};

const LOAD_FAILED: &str = "Failed to load chat history";
const SEND_FAILED: &str = "Failed to send message. Please try again.";
const DELETE_FAILED: &str = "Failed to delete chat";

/// Exchanges newest-first, plus at most one selected member.
///
/// Selection is held by id and only ever points at an element of the list:
/// removing or replacing the element clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationList {
    exchanges: Vec<Exchange>,
    selected: Option<ExchangeId>,
}

impl ConversationList {
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn selected(&self) -> Option<&Exchange> {
        let id = self.selected?;
        self.get(id)
    }

    pub fn get(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Wholesale replacement in the order given. Drops any selection.
    pub fn replace(&mut self, exchanges: Vec<Exchange>) {
        self.exchanges = exchanges;
        self.selected = None;
    }

    /// Puts a freshly created exchange on top and selects it.
    pub fn prepend(&mut self, exchange: Exchange) {
        let id = exchange.id;
        self.exchanges.retain(|e| e.id != id);
        self.exchanges.insert(0, exchange);
        self.selected = Some(id);
    }

    pub fn remove(&mut self, id: ExchangeId) -> Option<Exchange> {
        let index = self.exchanges.iter().position(|e| e.id == id)?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        Some(self.exchanges.remove(index))
    }

    /// Returns false (and leaves the selection alone) for unknown ids.
    pub fn select(&mut self, id: ExchangeId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.selected = Some(id);
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("query is empty")]
    EmptyQuery,

    /// The service rejected the session. It has been signed out.
    #[error("session expired, sign in again")]
    SessionExpired,

    /// The session changed while the request was in flight; its result was dropped.
    #[error("session changed before the response arrived")]
    Abandoned,

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Default)]
struct ChatState {
    list: ConversationList,
    draft: String,
    error: Option<String>,
    sends_in_flight: usize,
}

/// Conversation list kept in step with the service.
///
/// Operations take `&self` and release the state lock before every await, so
/// a send and a delete can be in flight together. Each applies its result
/// when its response arrives.
pub struct ConversationStore {
    client: ApiClient,
    state: Mutex<ChatState>,
}

impl ConversationStore {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            state: Mutex::new(ChatState::default()),
        }
    }

    pub async fn load_history(&self) -> Result<usize, ChatError> {
        let epoch = self.begin();
        let outcome = self.client.history().await;

        match self.settle(epoch, outcome)? {
            Ok(exchanges) => {
                let count = exchanges.len();
                debug!(count, "Loaded history");
                self.with_state(|state| state.list.replace(exchanges));
                Ok(count)
            }
            Err(e) => Err(self.fail(&e, LOAD_FAILED.to_string())),
        }
    }

    pub async fn send_message(&self, query: &str) -> Result<Exchange, ChatError> {
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }

        let epoch = self.begin();
        let in_flight = SendInFlight::start(self);
        let outcome = self.client.send_chat(query).await;
        drop(in_flight);

        match self.settle(epoch, outcome)? {
            Ok(exchange) => {
                debug!(id = exchange.id, "Exchange created");
                self.with_state(|state| {
                    state.list.prepend(exchange.clone());
                    state.draft.clear();
                });
                Ok(exchange)
            }
            Err(e) => {
                let message = e
                    .service_message()
                    .map_or_else(|| SEND_FAILED.to_string(), str::to_owned);
                Err(self.fail(&e, message))
            }
        }
    }

    /// Sends whatever is currently in the draft.
    pub async fn submit_draft(&self) -> Result<Exchange, ChatError> {
        let draft = self.draft();
        self.send_message(&draft).await
    }

    /// Always asks the service, even for ids not in the local list.
    pub async fn delete_exchange(&self, id: ExchangeId) -> Result<(), ChatError> {
        let epoch = self.begin();
        let outcome = self.client.delete_chat(id).await;

        match self.settle(epoch, outcome)? {
            Ok(()) => {
                let removed = self.with_state(|state| state.list.remove(id));
                debug!(id, removed = removed.is_some(), "Exchange deleted");
                Ok(())
            }
            Err(e) => Err(self.fail(&e, DELETE_FAILED.to_string())),
        }
    }

    pub fn select(&self, id: ExchangeId) -> bool {
        self.with_state(|state| state.list.select(id))
    }

    pub fn clear_selection(&self) {
        self.with_state(|state| state.list.clear_selection());
    }

    pub fn list(&self) -> ConversationList {
        self.with_state(|state| state.list.clone())
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.with_state(|state| state.list.exchanges().to_vec())
    }

    pub fn selected(&self) -> Option<Exchange> {
        self.with_state(|state| state.list.selected().cloned())
    }

    pub fn draft(&self) -> String {
        self.with_state(|state| state.draft.clone())
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.with_state(|state| state.draft = text);
    }

    pub fn error(&self) -> Option<String> {
        self.with_state(|state| state.error.clone())
    }

    pub fn dismiss_error(&self) {
        self.with_state(|state| state.error = None);
    }

    /// Advisory: lets a front-end disable submission. Sends are never refused.
    pub fn is_sending(&self) -> bool {
        self.with_state(|state| state.sends_in_flight > 0)
    }

    pub fn reset(&self) {
        self.with_state(|state| *state = ChatState::default());
    }

    // Clears the banner and records which session the operation runs under.
    fn begin(&self) -> u64 {
        self.with_state(|state| state.error = None);
        self.client.session().epoch()
    }

    /// Decides whether a finished request may still touch local state.
    ///
    /// The inner result is handed back only while the session that issued the
    /// request is still the current one.
    fn settle<T>(
        &self,
        epoch: u64,
        outcome: Result<T, ClientError>,
    ) -> Result<Result<T, ClientError>, ChatError> {
        let session = self.client.session();

        if session.epoch() != epoch {
            if !session.is_authenticated() {
                self.reset();
            }
            return match outcome {
                Err(ClientError::Unauthorized) => Err(ChatError::SessionExpired),
                _ => {
                    debug!("Dropping response from a previous session");
                    Err(ChatError::Abandoned)
                }
            };
        }

        match outcome {
            Err(ClientError::Unauthorized) => {
                self.reset();
                Err(ChatError::SessionExpired)
            }
            other => Ok(other),
        }
    }

    fn fail(&self, cause: &ClientError, message: String) -> ChatError {
        warn!(error = %cause, "{message}");
        self.with_state(|state| state.error = Some(message.clone()));
        ChatError::Failed(message)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts one send as in flight until dropped, including when the send
/// future itself is dropped mid-request.
struct SendInFlight<'a> {
    store: &'a ConversationStore,
}

impl<'a> SendInFlight<'a> {
    fn start(store: &'a ConversationStore) -> Self {
        store.with_state(|state| state.sends_in_flight += 1);
        Self { store }
    }
}

impl Drop for SendInFlight<'_> {
    fn drop(&mut self) {
        self.store
            .with_state(|state| state.sends_in_flight = state.sends_in_flight.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn exchange(id: ExchangeId) -> Exchange {
        Exchange {
            id,
            query: format!("q{id}"),
            response: format!("r{id}"),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, id as u32).unwrap(),
        }
    }

    fn list(ids: &[ExchangeId]) -> ConversationList {
        let mut list = ConversationList::default();
        list.replace(ids.iter().copied().map(exchange).collect());
        list
    }

    fn ids(list: &ConversationList) -> Vec<ExchangeId> {
        list.exchanges().iter().map(|e| e.id).collect()
    }

    #[test]
    fn removing_the_selected_exchange_clears_selection() {
        let mut list = list(&[2, 1]);
        assert!(list.select(2));

        let removed = list.remove(2).unwrap();
        assert_eq!(removed.id, 2);
        assert_eq!(ids(&list), vec![1]);
        assert!(list.selected().is_none());
    }

    #[test]
    fn removing_another_exchange_keeps_selection() {
        let mut list = list(&[3, 2, 1]);
        list.select(3);
        list.remove(1);
        assert_eq!(list.selected().map(|e| e.id), Some(3));
    }

    #[test]
    fn removing_an_absent_id_is_a_no_op() {
        let mut list = list(&[2, 1]);
        list.select(1);
        assert!(list.remove(9).is_none());
        assert_eq!(ids(&list), vec![2, 1]);
        assert_eq!(list.selected().map(|e| e.id), Some(1));
    }

    #[test]
    fn prepend_puts_new_exchange_first_and_selects_it() {
        let mut list = list(&[2, 1]);
        list.select(1);
        list.prepend(exchange(3));
        assert_eq!(ids(&list), vec![3, 2, 1]);
        assert_eq!(list.selected(), Some(&exchange(3)));
    }

    #[test]
    fn prepend_never_duplicates_an_id() {
        let mut list = list(&[2, 1]);
        list.prepend(exchange(1));
        assert_eq!(ids(&list), vec![1, 2]);
    }

    #[test]
    fn replace_keeps_server_order_and_drops_selection() {
        let mut list = list(&[5, 4]);
        list.select(5);
        list.replace(vec![exchange(1), exchange(9), exchange(3)]);
        assert_eq!(ids(&list), vec![1, 9, 3]);
        assert!(list.selected().is_none());
    }

    #[test]
    fn selecting_an_unknown_id_is_ignored() {
        let mut list = list(&[2, 1]);
        list.select(2);
        assert!(!list.select(7));
        assert_eq!(list.selected().map(|e| e.id), Some(2));
    }
}
