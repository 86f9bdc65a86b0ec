//! In-process fakes for the ports, shared by unit and integration tests.
//!
//! Compiled into the library only under `cfg(test)`; integration tests
//! include this file as a module, so paths go through the crate name.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

use shadowtrade::domain::{ActiveAccount, PositionSnapshot, Side};
use shadowtrade::ports::{
    CredentialVault, Credentials, Envelope, RealtimePush, VaultError, VenueClient, VenueConnector,
    VenueError,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An open position snapshot with plausible figures
pub fn open_snapshot(id: &str) -> PositionSnapshot {
    PositionSnapshot {
        id: id.to_string(),
        side: Side::Buy,
        quantity: 100.0,
        margin: 1_000.0,
        leverage: 10.0,
        entry_price: 60_000.0,
        exit_price: None,
        realized_pnl: 0.0,
        opening_fee: 2.0,
        closing_fee: 0.0,
        opened_at: Utc::now(),
        closed_at: None,
    }
}

fn mark_closed(mut snap: PositionSnapshot) -> PositionSnapshot {
    snap.exit_price = Some(snap.entry_price * 1.01);
    snap.realized_pnl = 25.0;
    snap.closing_fee = 2.0;
    snap.closed_at = Some(Utc::now());
    snap
}

/// Holds venue listing calls until released
#[derive(Debug)]
pub struct Gate {
    entered: Notify,
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            entered: Notify::new(),
            open,
        }
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    /// Wait until a call is parked at the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let every parked and future call through
    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

#[derive(Debug, Default)]
struct FakeVenueState {
    open: Vec<PositionSnapshot>,
    closed: Vec<PositionSnapshot>,
    list_error: Option<VenueError>,
    close_errors: HashMap<String, VenueError>,
    close_calls: Vec<String>,
    list_open_calls: usize,
    gate: Option<Arc<Gate>>,
}

/// Venue holding positions in memory. Closing moves a position to the closed list.
#[derive(Debug, Default)]
pub struct FakeVenue {
    state: Mutex<FakeVenueState>,
}

impl FakeVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open(self, snapshot: PositionSnapshot) -> Self {
        self.open_position(snapshot);
        self
    }

    pub fn open_position(&self, snapshot: PositionSnapshot) {
        lock(&self.state).open.push(snapshot);
    }

    /// Close a position outside the engine (user action, stop loss...)
    pub fn close_externally(&self, id: &str) {
        let mut state = lock(&self.state);
        if let Some(idx) = state.open.iter().position(|p| p.id == id) {
            let snap = state.open.remove(idx);
            state.closed.push(mark_closed(snap));
        }
    }

    pub fn fail_listing(&self, error: Option<VenueError>) {
        lock(&self.state).list_error = error;
    }

    pub fn fail_close(&self, id: &str, error: VenueError) {
        lock(&self.state).close_errors.insert(id.to_string(), error);
    }

    /// Park `list_open_positions` calls until the returned gate is released
    pub fn hold_listing(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        lock(&self.state).gate = Some(gate.clone());
        gate
    }

    pub fn close_calls(&self) -> Vec<String> {
        lock(&self.state).close_calls.clone()
    }

    pub fn list_open_calls(&self) -> usize {
        lock(&self.state).list_open_calls
    }

    pub fn is_open(&self, id: &str) -> bool {
        lock(&self.state).open.iter().any(|p| p.id == id)
    }
}

#[async_trait]
impl VenueClient for FakeVenue {
    async fn test_connection(&self) -> Result<(), VenueError> {
        match &lock(&self.state).list_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn list_open_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError> {
        let gate = lock(&self.state).gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = lock(&self.state);
        state.list_open_calls += 1;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(state.open.clone())
    }

    async fn list_closed_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError> {
        let state = lock(&self.state);
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(state.closed.clone())
    }

    async fn close_position(&self, position_id: &str) -> Result<PositionSnapshot, VenueError> {
        let mut state = lock(&self.state);
        state.close_calls.push(position_id.to_string());
        if let Some(e) = state.close_errors.get(position_id) {
            return Err(e.clone());
        }
        match state.open.iter().position(|p| p.id == position_id) {
            Some(idx) => {
                let snap = mark_closed(state.open.remove(idx));
                state.closed.push(snap.clone());
                Ok(snap)
            }
            None => Err(VenueError::AlreadyClosed(position_id.to_string())),
        }
    }
}

/// Hands out pre-registered fake venues per account id
#[derive(Debug, Default)]
pub struct FakeConnector {
    venues: Mutex<HashMap<String, Arc<FakeVenue>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account_id: &str, venue: Arc<FakeVenue>) {
        lock(&self.venues).insert(account_id.to_string(), venue);
    }
}

impl VenueConnector for FakeConnector {
    fn connect(
        &self,
        account: &ActiveAccount,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn VenueClient>, VenueError> {
        lock(&self.venues)
            .get(&account.account_id)
            .cloned()
            .map(|v| v as Arc<dyn VenueClient>)
            .ok_or_else(|| VenueError::InvalidCredentials(format!("no venue for {}", account.account_id)))
    }
}

/// Vault over a mutable account list
#[derive(Debug, Default)]
pub struct StaticVault {
    accounts: Mutex<Vec<ActiveAccount>>,
    unavailable: Mutex<bool>,
}

impl StaticVault {
    pub fn new(accounts: Vec<ActiveAccount>) -> Self {
        Self {
            accounts: Mutex::new(accounts),
            unavailable: Mutex::new(false),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<ActiveAccount>) {
        *lock(&self.accounts) = accounts;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }
}

#[async_trait]
impl CredentialVault for StaticVault {
    async fn active_accounts(&self) -> Result<Vec<ActiveAccount>, VaultError> {
        if *lock(&self.unavailable) {
            return Err(VaultError::Unavailable("vault offline".into()));
        }
        Ok(lock(&self.accounts).clone())
    }

    async fn credentials(&self, account_id: &str) -> Result<Credentials, VaultError> {
        if lock(&self.accounts).iter().any(|a| a.account_id == account_id) {
            Ok(Credentials {
                api_key: format!("key-{}", account_id),
                api_secret: "secret".into(),
                passphrase: "pass".into(),
            })
        } else {
            Err(VaultError::AccountNotFound(account_id.to_string()))
        }
    }
}

/// Records every push; users listed as online report delivery
#[derive(Debug, Default)]
pub struct RecordingPush {
    online: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(Option<String>, Envelope)>>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, user_id: &str, online: bool) {
        let mut users = lock(&self.online);
        if online {
            users.insert(user_id.to_string());
        } else {
            users.remove(user_id);
        }
    }

    /// Envelopes sent to `user_id` (broadcasts excluded)
    pub fn sent_to(&self, user_id: &str) -> Vec<Envelope> {
        lock(&self.sent)
            .iter()
            .filter(|(u, _)| u.as_deref() == Some(user_id))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<Envelope> {
        lock(&self.sent)
            .iter()
            .filter(|(u, _)| u.is_none())
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl RealtimePush for RecordingPush {
    fn send_to_user(&self, user_id: &str, envelope: Envelope) -> bool {
        lock(&self.sent).push((Some(user_id.to_string()), envelope));
        lock(&self.online).contains(user_id)
    }

    fn broadcast(&self, envelope: Envelope) -> usize {
        lock(&self.sent).push((None, envelope));
        lock(&self.online).len()
    }
}
