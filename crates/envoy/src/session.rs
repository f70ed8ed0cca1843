use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use parley_shared::User;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The authenticated identity plus the credential sent with protected calls.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    pub token: String,
}

impl Session {
    fn is_well_formed(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            SessionState::Unauthenticated => None,
        }
    }
}

/// Durable home of the session between runs.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Session persisted as a JSON file, replaced atomically on every save.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<Session>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        let session = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let staging = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(session)?;
        write_private(&staging, &content)?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

// The file holds a bearer token, so only the owner may read it.
#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    // `mode` only applies on creation; a leftover staging file keeps its own.
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .with_context(|| format!("restricting {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

/// Keeps the session in memory only. Cloning the `Arc` and restoring a second
/// store from it behaves like a restart.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<Session>>,
}

impl MemoryStorage {
    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// Two-state session machine shared by the request client, the forms and
/// the conversation store.
///
/// Every transition writes storage first and publishes second, so anything
/// observing the new state (or a restart right after) sees it persisted.
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    transition: Mutex<()>,
}

impl SessionStore {
    /// Builds the store from whatever the storage holds right now.
    pub fn restore(storage: Arc<dyn SessionStorage>) -> Self {
        let initial = match storage.load() {
            Ok(Some(session)) if session.is_well_formed() => {
                info!(username = %session.user.username, "Restored session");
                SessionState::Authenticated(session)
            }
            Ok(Some(_)) => {
                warn!("Ignoring persisted session without a token");
                SessionState::Unauthenticated
            }
            Ok(None) => SessionState::Unauthenticated,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Persisted session is unreadable, starting signed out");
                SessionState::Unauthenticated
            }
        };

        Self {
            storage,
            state: watch::Sender::new(initial),
            epoch: AtomicU64::new(0),
            transition: Mutex::new(()),
        }
    }

    pub fn login(&self, user: User, token: String) {
        let session = Session { user, token };
        let _guard = self.lock_transition();

        if let Err(e) = self.storage.save(&session) {
            error!(error = %format!("{e:#}"), "Failed to persist session");
        }

        info!(username = %session.user.username, "Signed in");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(SessionState::Authenticated(session));
    }

    /// Safe from any state. Storage is cleared even if already signed out.
    pub fn logout(&self) {
        let _guard = self.lock_transition();
        self.end_session();
    }

    /// Forced logout after an authentication rejection. Only ends the session
    /// if it still holds `token`, the credential the rejected request carried.
    /// Returns whether a transition happened.
    pub fn invalidate(&self, token: Option<&str>) -> bool {
        let _guard = self.lock_transition();

        let current = self.state.borrow().session().map(|s| s.token.clone());
        if current.as_deref() != token || current.is_none() {
            return false;
        }

        warn!("Session rejected by the service, signing out");
        self.end_session();
        true
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().session().map(|s| s.token.clone())
    }

    /// Counts transitions. A request that started under one epoch and
    /// finished under another belongs to a session that no longer exists.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    // Caller holds the transition lock.
    fn end_session(&self) {
        if let Err(e) = self.storage.clear() {
            error!(error = %format!("{e:#}"), "Failed to clear persisted session");
        }

        let changed = self.state.send_if_modified(|state| {
            if state.is_authenticated() {
                *state = SessionState::Unauthenticated;
                true
            } else {
                false
            }
        });

        if changed {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            info!("Signed out");
        }
    }

    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: Some(1),
            username: name.to_string(),
            email: None,
        }
    }

    fn store() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::default());
        let store = SessionStore::restore(storage.clone());
        (storage, store)
    }

    #[test]
    fn starts_signed_out_with_empty_storage() {
        let (_, store) = store();
        assert!(!store.is_authenticated());
        assert_eq!(store.current(), SessionState::Unauthenticated);
        assert!(store.token().is_none());
    }

    #[test]
    fn authentication_tracks_the_latest_transition() {
        let (_, store) = store();

        store.login(user("ada"), "t1".into());
        assert!(store.is_authenticated());
        store.logout();
        assert!(!store.is_authenticated());
        store.logout();
        assert!(!store.is_authenticated());
        store.login(user("ada"), "t2".into());
        store.login(user("bob"), "t3".into());
        assert!(store.is_authenticated());
        assert_eq!(store.session().unwrap().user.username, "bob");
        assert_eq!(store.token().as_deref(), Some("t3"));
    }

    #[test]
    fn restart_after_login_restores_the_same_session() {
        let (storage, store) = store();
        store.login(user("ada"), "secret".into());
        drop(store);

        let restored = SessionStore::restore(storage);
        let session = restored.session().unwrap();
        assert_eq!(session.user, user("ada"));
        assert_eq!(session.token, "secret");
    }

    #[test]
    fn restart_after_logout_starts_signed_out() {
        let (storage, store) = store();
        store.login(user("ada"), "secret".into());
        store.logout();

        assert!(storage.load().unwrap().is_none());
        assert!(!SessionStore::restore(storage).is_authenticated());
    }

    #[test]
    fn blank_persisted_token_is_not_a_session() {
        let storage = Arc::new(MemoryStorage::default());
        storage
            .save(&Session {
                user: user("ada"),
                token: "  ".into(),
            })
            .unwrap();

        assert!(!SessionStore::restore(storage).is_authenticated());
    }

    #[test]
    fn invalidate_only_ends_the_session_that_was_rejected() {
        let (_, store) = store();
        store.login(user("ada"), "old".into());
        store.login(user("ada"), "new".into());

        assert!(!store.invalidate(Some("old")));
        assert!(!store.invalidate(None));
        assert!(store.is_authenticated());

        assert!(store.invalidate(Some("new")));
        assert!(!store.is_authenticated());
        assert!(!store.invalidate(Some("new")));
    }

    #[test]
    fn epoch_moves_on_every_real_transition() {
        let (_, store) = store();
        let start = store.epoch();

        store.logout();
        assert_eq!(store.epoch(), start);

        store.login(user("ada"), "t".into());
        assert_eq!(store.epoch(), start + 1);
        store.logout();
        assert_eq!(store.epoch(), start + 2);
    }

    #[test]
    fn subscribers_observe_transitions() {
        let (_, store) = store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.login(user("ada"), "t".into());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated());

        store.logout();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_authenticated());
    }

    #[test]
    fn file_storage_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let storage = Arc::new(FileStorage::new(&path));

        let store = SessionStore::restore(storage.clone());
        store.login(user("ada"), "secret".into());
        assert!(path.exists());

        let restored = SessionStore::restore(Arc::new(FileStorage::new(&path)));
        assert_eq!(restored.token().as_deref(), Some("secret"));

        restored.logout();
        assert!(!path.exists());
        restored.logout();
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_readable_by_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, "left over").unwrap();
        fs::set_permissions(&staging, fs::Permissions::from_mode(0o644)).unwrap();

        let store = SessionStore::restore(Arc::new(FileStorage::new(&path)));
        store.login(user("ada"), "secret".into());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!staging.exists());
    }

    #[test]
    fn malformed_session_file_starts_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();

        let storage = Arc::new(FileStorage::new(&path));
        assert!(storage.load().is_err());
        assert!(!SessionStore::restore(storage).is_authenticated());
    }
}
