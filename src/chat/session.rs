//! In-memory conversation store
//!
//! Each session holds its own history behind its own lock, so turns on one session
//! are serialized while different sessions proceed independently. Histories are
//! capped (first message plus the most recent ones) and idle sessions are evicted
//! by a background reaper.

use crate::config::SessionSettings;
use crate::llm::provider::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Session id used when a caller gives none
pub const DEFAULT_SESSION_ID: &str = "default";

/// Message history of one session
#[derive(Debug)]
pub struct History {
    messages: Vec<Message>,
    last_active: Instant,
}

impl History {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_active: Instant::now(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Drop the most recent message (used to undo a failed turn)
    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    /// Keep the first message plus the most recent `max - 1`; returns whether anything was dropped
    pub fn trim(&mut self, max: usize) -> bool {
        if max == 0 || self.messages.len() <= max {
            return false;
        }
        let tail_start = self.messages.len() - (max - 1);
        self.messages.drain(1..tail_start);
        true
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// One conversation
#[derive(Debug)]
pub struct Session {
    id: String,
    history: Mutex<History>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exclusive access to the history for the duration of a turn
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, History> {
        let mut history = self.history.lock().await;
        history.touch();
        history
    }
}

/// All live sessions
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_messages: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages: settings.max_messages,
            ttl: Duration::from_secs(settings.ttl_secs),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Get a session, creating it when absent
    pub async fn session(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session = id, "Session created");
                Arc::new(Session {
                    id: id.to_string(),
                    history: Mutex::new(History::new()),
                })
            })
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop a session's history; returns whether it existed
    pub async fn clear(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Evict sessions idle longer than the TTL; sessions mid-turn are never evicted
    pub async fn reap_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let ttl = self.ttl;

        sessions.retain(|_, session| match session.history.try_lock() {
            Ok(history) => history.last_active.elapsed() < ttl,
            Err(_) => true,
        });

        let reaped = before - sessions.len();
        if reaped > 0 {
            info!(reaped, remaining = sessions.len(), "Idle sessions evicted");
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until `shutdown` fires
    pub fn start_reaper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.reap_idle().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_secs: u64) -> SessionStore {
        SessionStore::new(&SessionSettings {
            max_messages: 20,
            ttl_secs,
            reap_interval_secs: 1,
        })
    }

    #[test]
    fn test_trim_keeps_first_and_recent() {
        let mut history = History::new();
        for i in 0..25 {
            history.push(Message::user(format!("m{}", i)));
        }

        assert!(history.trim(20));
        assert_eq!(history.len(), 20);
        assert_eq!(history.messages()[0].content, "m0");
        assert_eq!(history.messages()[1].content, "m6");
        assert_eq!(history.messages()[19].content, "m24");

        assert!(!history.trim(20));
    }

    #[tokio::test]
    async fn test_session_get_or_create() {
        let store = store(60);
        let a = store.session("a").await;
        a.lock().await.push(Message::user("hello"));

        let again = store.session("a").await;
        assert_eq!(again.lock().await.len(), 1);
        assert_eq!(store.len().await, 1);

        assert!(store.clear("a").await);
        assert!(!store.clear("a").await);
        assert!(store.session("a").await.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_sessions() {
        let store = store(60);
        store.session("idle").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        store.session("fresh").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.reap_idle().await, 1);
        assert!(store.get("idle").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_survives_reap() {
        let store = store(10);
        let session = store.session("busy").await;
        let guard = session.lock().await;
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(store.reap_idle().await, 0);
        drop(guard);
        assert_eq!(store.reap_idle().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_until_shutdown() {
        let store = Arc::new(store(10));
        store.session("idle").await;

        let shutdown = CancellationToken::new();
        let reaper = Arc::clone(&store).start_reaper(Duration::from_secs(5), shutdown.clone());

        // The 5s tick leaves the session alone, the 10s tick evicts it
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(store.get("idle").await.is_some());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.get("idle").await.is_none());

        shutdown.cancel();
        reaper.await.unwrap();
        assert!(store.is_empty().await);
    }
}
