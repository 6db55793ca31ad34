//! Session registry.
//!
//! Maps session codes to live games. Each game sits behind its own
//! `RwLock`, so actions on one session never wait on another; the map
//! itself is only touched for create, lookup and delete. Seating happens
//! through the engine, under the session's own lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tycoon_core::game::random_code;
use tycoon_core::{Catalog, CatalogError, GameState, RandomDice, Timestamp};

/// Shared handle to one live session
pub type SharedGame = Arc<RwLock<GameState>>;

/// Attempts at drawing an unused code before giving up
const CODE_ATTEMPTS: usize = 64;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Game {0} not found")]
    NotFound(String),

    #[error("Only the host can do that")]
    Unauthorized,

    #[error("Could not allocate a free game code")]
    CodesExhausted,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub struct Registry {
    sessions: DashMap<String, SharedGame>,
    catalog: Arc<Catalog>,
}

impl Registry {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            sessions: DashMap::new(),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Put previously stored sessions back. Later duplicates replace earlier ones.
    pub fn restore(&self, games: impl IntoIterator<Item = GameState>) -> usize {
        let mut count = 0;
        for game in games {
            self.sessions
                .insert(game.code.clone(), Arc::new(RwLock::new(game)));
            count += 1;
        }
        count
    }

    /// Open a session under a fresh code with the host seated
    pub fn create(&self, host_id: &str, host_name: &str, now: Timestamp) -> Result<SharedGame, RegistryError> {
        let mut dice = RandomDice::from_entropy();
        for _ in 0..CODE_ATTEMPTS {
            let code = random_code(&mut dice);
            if let Entry::Vacant(slot) = self.sessions.entry(code.clone()) {
                let game = GameState::new(code, host_id, host_name, &self.catalog, now)?;
                let shared = Arc::new(RwLock::new(game));
                slot.insert(Arc::clone(&shared));
                return Ok(shared);
            }
        }
        Err(RegistryError::CodesExhausted)
    }

    pub fn get(&self, code: &str) -> Option<SharedGame> {
        self.sessions.get(code).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session. Only its host may do this. The session's write lock
    /// is held until the entry is gone, so no action lands in between.
    pub async fn delete(&self, code: &str, user: &str) -> Result<(), RegistryError> {
        let shared = self
            .get(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;
        let game = shared.write().await;
        if game.host_id != user {
            return Err(RegistryError::Unauthorized);
        }
        if self.sessions.remove_if(code, |_, live| Arc::ptr_eq(live, &shared)).is_none() {
            return Err(RegistryError::NotFound(code.to_string()));
        }
        Ok(())
    }

    /// Whether `shared` is still the session registered under `code`
    pub fn is_live(&self, code: &str, shared: &SharedGame) -> bool {
        self.sessions
            .get(code)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), shared))
    }

    /// Handles to every live session
    pub fn handles(&self) -> Vec<SharedGame> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshots of every session the user is seated in, ordered by code
    pub async fn list_by_user(&self, user: &str) -> Vec<GameState> {
        let mut games = Vec::new();
        for shared in self.handles() {
            let game = shared.read().await;
            if game.player(user).is_some() {
                games.push(game.clone());
            }
        }
        games.sort_by(|a, b| a.code.cmp(&b.code));
        games
    }
}
