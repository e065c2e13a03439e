//! Session state machine: restoring → authenticated | anonymous.
//!
//! The store starts in the restoring state (`is_loading = true`). Exactly
//! one terminal transition (`set_credentials` or `clear_credentials`)
//! moves `is_loading` to false, and nothing ever sets it back. After that,
//! `is_authenticated` and token presence never disagree: both are derived
//! from the same credential triple under one lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::types::User;

use super::storage::{CredentialStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};

/// Session transitions observable by the UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
  SignedIn,
  SignedOut,
  TokensRefreshed,
}

/// Read-only view of the session for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
  pub user: Option<User>,
  pub is_authenticated: bool,
  pub is_loading: bool,
}

#[derive(Default)]
struct SessionState {
  user: Option<User>,
  access_token: Option<String>,
  refresh_token: Option<String>,
  is_loading: bool,
}

impl SessionState {
  fn is_authenticated(&self) -> bool {
    !self.is_loading
      && self.user.is_some()
      && self.access_token.is_some()
      && self.refresh_token.is_some()
  }
}

type SignOutHook = Box<dyn Fn() + Send + Sync>;

/// Holds current credentials and gates which queries may run.
///
/// Explicitly constructed and dependency-injected; create one per process
/// (or per test) and share it by cloning.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<Mutex<SessionState>>,
  storage: Arc<dyn CredentialStorage>,
  events: broadcast::Sender<SessionEvent>,
  sign_out_hooks: Arc<Mutex<Vec<SignOutHook>>>,
}

impl SessionStore {
  pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      inner: Arc::new(Mutex::new(SessionState {
        is_loading: true,
        ..SessionState::default()
      })),
      storage,
      events,
      sign_out_hooks: Arc::new(Mutex::new(Vec::new())),
    }
  }

  fn state(&self) -> MutexGuard<'_, SessionState> {
    // State updates are whole-struct assignments inside short critical
    // sections, so a poisoned lock still guards consistent data.
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Restore the session from durable storage.
  ///
  /// A complete credential triple moves the store to authenticated; a
  /// missing or corrupt triple moves it to anonymous. Either way this is
  /// the single restoring → settled transition.
  pub fn restore(&self) {
    let access_token = self.storage.get(ACCESS_TOKEN_KEY);
    let refresh_token = self.storage.get(REFRESH_TOKEN_KEY);
    let user = self
      .storage
      .get(USER_KEY)
      .and_then(|raw| serde_json::from_str::<User>(&raw).ok());

    match (access_token, refresh_token, user) {
      (Some(access), Some(refresh), Some(user)) => {
        info!(user_id = %user.id, "session restored from storage");
        self.apply_credentials(user, access, refresh, false);
      }
      _ => {
        info!("no stored session, starting anonymous");
        self.clear_credentials();
      }
    }
  }

  /// Sign in: persist the credential triple, then update memory, so a crash
  /// mid-write never leaves memory ahead of storage.
  pub fn set_credentials(&self, user: User, access_token: String, refresh_token: String) {
    self.apply_credentials(user, access_token, refresh_token, true);
  }

  fn apply_credentials(&self, user: User, access_token: String, refresh_token: String, persist: bool) {
    if persist {
      match serde_json::to_string(&user) {
        Ok(serialized) => self.storage.set(USER_KEY, &serialized),
        Err(e) => warn!(error = %e, "failed to serialize user for storage"),
      }
      self.storage.set(ACCESS_TOKEN_KEY, &access_token);
      self.storage.set(REFRESH_TOKEN_KEY, &refresh_token);
    }

    {
      let mut state = self.state();
      state.user = Some(user);
      state.access_token = Some(access_token);
      state.refresh_token = Some(refresh_token);
      state.is_loading = false;
    }

    let _ = self.events.send(SessionEvent::SignedIn);
  }

  /// Sign out: remove stored credentials, clear memory, and run registered
  /// sign-out hooks synchronously so cached data is purged before any
  /// caller observes the anonymous state.
  pub fn clear_credentials(&self) {
    self.storage.remove(ACCESS_TOKEN_KEY);
    self.storage.remove(REFRESH_TOKEN_KEY);
    self.storage.remove(USER_KEY);

    {
      let mut state = self.state();
      state.user = None;
      state.access_token = None;
      state.refresh_token = None;
      state.is_loading = false;
    }

    let hooks = self
      .sign_out_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    for hook in hooks.iter() {
      hook();
    }
    drop(hooks);

    let _ = self.events.send(SessionEvent::SignedOut);
  }

  /// Token refresh: updates only the token fields; `user`,
  /// `is_authenticated` and `is_loading` are untouched.
  pub fn update_tokens(&self, access_token: String, refresh_token: String) {
    self.storage.set(ACCESS_TOKEN_KEY, &access_token);
    self.storage.set(REFRESH_TOKEN_KEY, &refresh_token);

    {
      let mut state = self.state();
      state.access_token = Some(access_token);
      state.refresh_token = Some(refresh_token);
    }

    let _ = self.events.send(SessionEvent::TokensRefreshed);
  }

  /// Transition triggered by a transport-level 401/403. No-op when already
  /// anonymous, so repeated failures don't emit duplicate events.
  pub fn force_logout(&self) {
    if !self.is_authenticated() {
      return;
    }
    warn!("authorization failure, forcing logout");
    self.clear_credentials();
  }

  /// Register a hook run synchronously on every sign-out (forced or
  /// explicit). The cache engine's `reset_all` is registered here so no
  /// entity data survives across sessions.
  pub fn on_sign_out(&self, hook: impl Fn() + Send + Sync + 'static) {
    self
      .sign_out_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Box::new(hook));
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
    self.events.subscribe()
  }

  pub fn is_loading(&self) -> bool {
    self.state().is_loading
  }

  pub fn is_authenticated(&self) -> bool {
    self.state().is_authenticated()
  }

  pub fn user(&self) -> Option<User> {
    self.state().user.clone()
  }

  pub fn access_token(&self) -> Option<String> {
    self.state().access_token.clone()
  }

  pub fn refresh_token(&self) -> Option<String> {
    self.state().refresh_token.clone()
  }

  pub fn snapshot(&self) -> Session {
    let state = self.state();
    Session {
      user: state.user.clone(),
      is_authenticated: state.is_authenticated(),
      is_loading: state.is_loading,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::storage::MemoryStorage;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn user() -> User {
    User {
      id: "u1".into(),
      email: "a@b.c".into(),
      name: Some("Ada".into()),
      avatar_url: None,
      onboarding_complete: false,
    }
  }

  fn store() -> SessionStore {
    SessionStore::new(Arc::new(MemoryStorage::new()))
  }

  /// Storage where every operation fails; must behave like "absent".
  struct FailingStorage;

  impl CredentialStorage for FailingStorage {
    fn get(&self, _key: &str) -> Option<String> {
      None
    }
    fn set(&self, _key: &str, _value: &str) {}
    fn remove(&self, _key: &str) {}
  }

  #[test]
  fn test_initial_state_is_restoring() {
    let store = store();
    assert!(store.is_loading());
    assert!(!store.is_authenticated());
    assert!(store.user().is_none());
  }

  #[test]
  fn test_sign_in_transition() {
    let store = store();
    store.set_credentials(user(), "at".into(), "rt".into());

    assert!(!store.is_loading());
    assert!(store.is_authenticated());
    assert_eq!(store.access_token(), Some("at".to_string()));
    assert_eq!(store.user().map(|u| u.id), Some("u1".to_string()));
  }

  #[test]
  fn test_restore_with_complete_triple() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, "at");
    storage.set(REFRESH_TOKEN_KEY, "rt");
    storage.set(USER_KEY, &serde_json::to_string(&user()).expect("serialize"));

    let store = SessionStore::new(storage);
    store.restore();
    assert!(store.is_authenticated());
    assert!(!store.is_loading());
  }

  #[test]
  fn test_restore_with_missing_token_goes_anonymous() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, "at");
    // refresh token and user missing

    let store = SessionStore::new(storage);
    store.restore();
    assert!(!store.is_authenticated());
    assert!(!store.is_loading());
  }

  #[test]
  fn test_restore_with_corrupt_user_goes_anonymous() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, "at");
    storage.set(REFRESH_TOKEN_KEY, "rt");
    storage.set(USER_KEY, "not valid json");

    let store = SessionStore::new(storage);
    store.restore();
    assert!(!store.is_authenticated());
  }

  #[test]
  fn test_restore_with_failing_storage_goes_anonymous() {
    let store = SessionStore::new(Arc::new(FailingStorage));
    store.restore();
    assert!(!store.is_authenticated());
    assert!(!store.is_loading());
  }

  #[test]
  fn test_is_loading_terminal_invariant() {
    let store = store();
    store.set_credentials(user(), "at".into(), "rt".into());
    assert!(!store.is_loading());

    // No further transition may ever flip is_loading back.
    for _ in 0..5 {
      store.clear_credentials();
      assert!(!store.is_loading());
      store.set_credentials(user(), "at2".into(), "rt2".into());
      assert!(!store.is_loading());
      store.update_tokens("at3".into(), "rt3".into());
      assert!(!store.is_loading());
    }
  }

  #[test]
  fn test_auth_flag_agrees_with_token_presence() {
    let store = store();
    store.set_credentials(user(), "at".into(), "rt".into());
    assert_eq!(store.is_authenticated(), store.access_token().is_some());

    store.clear_credentials();
    assert_eq!(store.is_authenticated(), store.access_token().is_some());
  }

  #[test]
  fn test_update_tokens_keeps_user_and_auth() {
    let store = store();
    store.set_credentials(user(), "at".into(), "rt".into());
    store.update_tokens("at2".into(), "rt2".into());

    assert!(store.is_authenticated());
    assert_eq!(store.access_token(), Some("at2".to_string()));
    assert_eq!(store.user().map(|u| u.id), Some("u1".to_string()));
  }

  #[test]
  fn test_sign_in_persists_before_memory_is_visible() {
    let storage = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(storage.clone());
    store.set_credentials(user(), "at".into(), "rt".into());

    assert_eq!(storage.get(ACCESS_TOKEN_KEY), Some("at".to_string()));
    assert_eq!(storage.get(REFRESH_TOKEN_KEY), Some("rt".to_string()));
    assert!(storage.get(USER_KEY).is_some());
  }

  #[test]
  fn test_clear_removes_stored_credentials() {
    let storage = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(storage.clone());
    store.set_credentials(user(), "at".into(), "rt".into());
    store.clear_credentials();

    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
    assert_eq!(storage.get(REFRESH_TOKEN_KEY), None);
    assert_eq!(storage.get(USER_KEY), None);
  }

  #[test]
  fn test_sign_out_hooks_run_synchronously() {
    let store = store();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_hook = calls.clone();
    store.on_sign_out(move || {
      calls_hook.fetch_add(1, Ordering::SeqCst);
    });

    store.set_credentials(user(), "at".into(), "rt".into());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    store.clear_credentials();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_force_logout_only_fires_when_authenticated() {
    let store = store();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_hook = calls.clone();
    store.on_sign_out(move || {
      calls_hook.fetch_add(1, Ordering::SeqCst);
    });

    store.clear_credentials(); // settle restoring state
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.force_logout(); // anonymous: no-op
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.set_credentials(user(), "at".into(), "rt".into());
    store.force_logout();
    assert!(!store.is_authenticated());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_events_broadcast() {
    let store = store();
    let mut rx = store.subscribe();

    store.set_credentials(user(), "at".into(), "rt".into());
    assert_eq!(rx.recv().await, Ok(SessionEvent::SignedIn));

    store.update_tokens("at2".into(), "rt2".into());
    assert_eq!(rx.recv().await, Ok(SessionEvent::TokensRefreshed));

    store.clear_credentials();
    assert_eq!(rx.recv().await, Ok(SessionEvent::SignedOut));
  }
}
