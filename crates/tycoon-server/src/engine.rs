//! The single mutation path.
//!
//! Human input, bot decisions and the auction sweep all end up in
//! [`Engine`]. Each mutation runs under the session's write lock; once it
//! is applied the new log entries and snapshot go to the persister, the
//! snapshot goes to the broadcaster, and the bot scheduler is told to look
//! at the session again.

use crate::registry::{Registry, RegistryError, SharedGame};
use crate::store::Persister;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, OwnedRwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tycoon_core::{
    ActionContext, ActionEnvelope, GameAction, GameError, GameEvent, GameState, PayloadError, RandomDice,
    Timestamp, UserId,
};

/// Wall clock in milliseconds
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Fan-out of session snapshots to whoever is watching
pub trait Broadcaster: Send + Sync {
    fn publish(&self, game: &GameState);

    /// The session is gone
    fn close(&self, code: &str);
}

/// Who is acting, as established by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
        }
    }
}

/// Result of a dispatched action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied { version: u64, events: Vec<GameEvent> },
    Rejected(GameError),
    /// Unknown verb or a repeated join; nothing changed
    Ignored,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Game {0} not found")]
    SessionNotFound(String),

    #[error(transparent)]
    Malformed(#[from] PayloadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Engine {
    registry: Arc<Registry>,
    persister: Persister,
    broadcaster: Arc<dyn Broadcaster>,
    bots: mpsc::UnboundedSender<String>,
}

impl Engine {
    /// `bots` receives the code of every session that changed
    pub fn new(
        registry: Arc<Registry>,
        persister: Persister,
        broadcaster: Arc<dyn Broadcaster>,
        bots: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            registry,
            persister,
            broadcaster,
            bots,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn session(&self, code: &str) -> Result<SharedGame, DispatchError> {
        self.registry
            .get(code)
            .ok_or_else(|| DispatchError::SessionNotFound(code.to_string()))
    }

    /// Write-lock a session, failing if it was deleted while we waited
    async fn lock_session(&self, code: &str) -> Result<OwnedRwLockWriteGuard<GameState>, DispatchError> {
        let shared = self.session(code)?;
        let game = Arc::clone(&shared).write_owned().await;
        if !self.registry.is_live(code, &shared) {
            debug!(code = %code, "Session deleted while waiting for its lock");
            return Err(DispatchError::SessionNotFound(code.to_string()));
        }
        Ok(game)
    }

    /// Hand a freshly changed state to storage, subscribers and the scheduler
    fn publish(&self, game: &GameState, log_seq: u64, wake_bots: bool) {
        for entry in game.log_since(log_seq) {
            self.persister.append_log(&game.code, entry.clone());
        }
        self.persister.save_snapshot(game.clone());
        self.broadcaster.publish(game);
        if wake_bots && self.bots.send(game.code.clone()).is_err() {
            warn!(code = %game.code, "Bot scheduler is gone");
        }
    }

    pub async fn create_game(&self, actor: &Actor) -> Result<GameState, DispatchError> {
        let shared = self.registry.create(&actor.user_id, &actor.name, now_ms())?;
        let game = shared.read().await.clone();
        info!(code = %game.code, user = %actor.user_id, "Game created");
        self.publish(&game, 0, false);
        Ok(game)
    }

    pub async fn delete_game(&self, code: &str, user: &str) -> Result<(), DispatchError> {
        self.registry.delete(code, user).await?;
        self.persister.delete(code);
        self.broadcaster.close(code);
        info!(code = %code, user = %user, "Game deleted");
        Ok(())
    }

    /// Parse an inbound envelope and dispatch it. Unknown verbs are ignored.
    pub async fn dispatch_envelope(
        &self,
        code: &str,
        actor: &Actor,
        envelope: &ActionEnvelope,
    ) -> Result<Outcome, DispatchError> {
        match GameAction::from_envelope(envelope)? {
            Some(action) => self.dispatch(code, actor, action).await,
            None => {
                debug!(code = %code, verb = %envelope.action, "Ignoring unknown action");
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Validate and apply one action under the session's write lock
    pub async fn dispatch(&self, code: &str, actor: &Actor, action: GameAction) -> Result<Outcome, DispatchError> {
        let mut game = self.lock_session(code).await?;
        let now = now_ms();
        let log_seq = game.next_log_seq;
        let verb = action.verb();

        let result = if action == GameAction::JoinGame {
            game.seat(&actor.user_id, &actor.name, now).map(|seated| seated.then(Vec::new))
        } else {
            let mut dice = RandomDice::from_entropy();
            let mut ctx = ActionContext::new(self.registry.catalog(), &mut dice, now);
            game.apply_action(&actor.user_id, action, &mut ctx).map(Some)
        };

        match result {
            Ok(Some(events)) => {
                debug!(code = %code, user = %actor.user_id, verb, version = game.version, "Action applied");
                self.publish(&game, log_seq, true);
                Ok(Outcome::Applied {
                    version: game.version,
                    events,
                })
            }
            Ok(None) => Ok(Outcome::Ignored),
            Err(e) => {
                debug!(code = %code, user = %actor.user_id, verb, "Action rejected: {}", e);
                Ok(Outcome::Rejected(e))
            }
        }
    }

    /// Attach a bot's reasoning to the chat. Does not wake the scheduler.
    pub async fn post_bot_thought(&self, code: &str, bot: &str, thought: &str) -> Result<(), DispatchError> {
        let mut game = self.lock_session(code).await?;
        let (version, log_seq) = (game.version, game.next_log_seq);
        game.push_bot_thought(bot, thought, now_ms());
        if game.version != version {
            self.publish(&game, log_seq, false);
        }
        Ok(())
    }

    /// Resolve every auction whose deadline has passed
    pub async fn sweep_auctions(&self) -> usize {
        let now = now_ms();
        let mut resolved = 0;
        for shared in self.registry.handles() {
            let mut game = shared.write().await;
            if !self.registry.is_live(&game.code, &shared) {
                continue;
            }
            let log_seq = game.next_log_seq;
            if game.sweep_auction(now).is_some() {
                debug!(code = %game.code, "Auction resolved by sweep");
                self.publish(&game, log_seq, true);
                resolved += 1;
            }
        }
        resolved
    }

    /// Ask the scheduler to look at every live session, e.g. after a restart
    pub async fn wake_all(&self) {
        for shared in self.registry.handles() {
            let code = shared.read().await.code.clone();
            if self.bots.send(code).is_err() {
                warn!("Bot scheduler is gone");
                return;
            }
        }
    }
}

/// Run [`Engine::sweep_auctions`] on a fixed period
pub fn spawn_auction_sweep(engine: Arc<Engine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.sweep_auctions().await;
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use dashmap::DashMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tycoon_core::{Auction, Catalog, GameStatus, TokenColor};

    /// Records every published version per session
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub published: DashMap<String, Vec<u64>>,
        pub closed: DashMap<String, ()>,
    }

    impl Broadcaster for Recorder {
        fn publish(&self, game: &GameState) {
            self.published.entry(game.code.clone()).or_default().push(game.version);
        }

        fn close(&self, code: &str) {
            self.closed.insert(code.to_string(), ());
        }
    }

    pub(crate) struct Harness {
        pub engine: Arc<Engine>,
        pub store: Arc<MemoryStore>,
        pub recorder: Arc<Recorder>,
        pub bots: mpsc::UnboundedReceiver<String>,
    }

    pub(crate) fn harness() -> Harness {
        let store = Arc::new(MemoryStore::default());
        let (persister, _worker) = Persister::spawn(store.clone());
        let recorder = Arc::new(Recorder::default());
        let (tx, bots) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new(Arc::new(Catalog::standard())));
        let engine = Arc::new(Engine::new(registry, persister, recorder.clone(), tx));
        Harness {
            engine,
            store,
            recorder,
            bots,
        }
    }

    fn alice() -> Actor {
        Actor::new("alice", "Alice")
    }

    fn bob() -> Actor {
        Actor::new("bob", "Bob")
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_create_publishes_and_persists() {
        let h = harness();
        let game = h.engine.create_game(&alice()).await.unwrap();
        settle().await;

        assert_eq!(h.recorder.published.get(&game.code).unwrap().clone(), vec![game.version]);
        assert!(h.store.snapshots.contains_key(&game.code));
    }

    #[tokio::test]
    async fn test_dispatch_applies_and_wakes_bots() {
        let mut h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;

        let joined = h.engine.dispatch(&code, &bob(), GameAction::JoinGame).await.unwrap();
        assert!(matches!(joined, Outcome::Applied { .. }));
        assert_eq!(h.bots.recv().await, Some(code.clone()));

        let again = h.engine.dispatch(&code, &bob(), GameAction::JoinGame).await.unwrap();
        assert_eq!(again, Outcome::Ignored);
        {
            let shared = h.engine.registry().get(&code).unwrap();
            let game = shared.read().await;
            assert_eq!(game.players.len(), 2);
            assert_eq!(game.players[1].token_color, TokenColor::PALETTE[1]);
        }
        assert!(matches!(
            h.engine.dispatch("ZZZZ", &bob(), GameAction::JoinGame).await,
            Err(DispatchError::SessionNotFound(_))
        ));

        let envelope = ActionEnvelope {
            action: "START_GAME".into(),
            payload: json!({}),
        };
        let started = h.engine.dispatch_envelope(&code, &alice(), &envelope).await.unwrap();
        assert!(matches!(started, Outcome::Applied { .. }));

        let shared = h.engine.registry().get(&code).unwrap();
        assert_eq!(shared.read().await.status, GameStatus::RollingOrder);

        settle().await;
        let logs = h.store.logs.get(&code).unwrap();
        let seqs: Vec<u64> = logs.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.dedup();
        assert_eq!(seqs, sorted);
    }

    #[tokio::test]
    async fn test_rejection_leaves_state_and_broadcasts_nothing() {
        let h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;
        let before = h.engine.registry().get(&code).unwrap().read().await.clone();

        let outcome = h.engine.dispatch(&code, &alice(), GameAction::RollDice).await.unwrap();
        assert_eq!(outcome, Outcome::Rejected(GameError::InvalidPhase));

        let after = h.engine.registry().get(&code).unwrap().read().await.clone();
        assert_eq!(before, after);
        assert_eq!(h.recorder.published.get(&code).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let h = harness();
        let result = h.engine.dispatch("NOPE", &alice(), GameAction::RollDice).await;
        assert!(matches!(result, Err(DispatchError::SessionNotFound(code)) if code == "NOPE"));

        let code = h.engine.create_game(&alice()).await.unwrap().code;
        let bad = ActionEnvelope {
            action: "BID".into(),
            payload: json!({ "amount": "lots" }),
        };
        assert!(matches!(
            h.engine.dispatch_envelope(&code, &alice(), &bad).await,
            Err(DispatchError::Malformed(_))
        ));

        let unknown = ActionEnvelope {
            action: "TELEPORT".into(),
            payload: json!({}),
        };
        assert_eq!(
            h.engine.dispatch_envelope(&code, &alice(), &unknown).await.unwrap(),
            Outcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_delete_game() {
        let h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;
        h.engine.dispatch(&code, &bob(), GameAction::JoinGame).await.unwrap();

        assert!(matches!(
            h.engine.delete_game(&code, "bob").await,
            Err(DispatchError::Registry(RegistryError::Unauthorized))
        ));
        h.engine.delete_game(&code, "alice").await.unwrap();
        settle().await;

        assert!(h.recorder.closed.contains_key(&code));
        assert!(!h.store.snapshots.contains_key(&code));
        assert!(matches!(
            h.engine.dispatch(&code, &alice(), GameAction::RollDice).await,
            Err(DispatchError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_action_queued_behind_delete_does_not_revive_session() {
        let h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;
        let shared = h.engine.registry().get(&code).unwrap();
        let guard = shared.write().await;

        let engine = Arc::clone(&h.engine);
        let target = code.clone();
        let delete = tokio::spawn(async move { engine.delete_game(&target, "alice").await });
        settle().await;
        let engine = Arc::clone(&h.engine);
        let target = code.clone();
        let join = tokio::spawn(async move { engine.dispatch(&target, &bob(), GameAction::JoinGame).await });
        settle().await;
        drop(guard);

        delete.await.unwrap().unwrap();
        assert!(matches!(join.await.unwrap(), Err(DispatchError::SessionNotFound(_))));
        settle().await;

        assert!(h.engine.registry().get(&code).is_none());
        assert!(!h.store.snapshots.contains_key(&code));
        assert_eq!(shared.read().await.players.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_resolves_due_auction() {
        let h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;
        let shared = h.engine.registry().get(&code).unwrap();
        {
            let mut game = shared.write().await;
            game.seat("bob", "Bob", 0).unwrap();
            game.status = GameStatus::Active;
            game.current_turn = Some("alice".into());
            game.auction = Some(Auction::open("1.1.1".into(), 0));
        }

        assert_eq!(h.engine.sweep_auctions().await, 1);
        let game = shared.read().await;
        assert!(game.auction.is_none());
        assert!(game.owner_of("1.1.1").is_none());
        drop(game);
        assert_eq!(h.engine.sweep_auctions().await, 0);
    }

    #[tokio::test]
    async fn test_wake_all_survives_missing_scheduler() {
        let mut h = harness();
        let first = h.engine.create_game(&alice()).await.unwrap().code;
        let second = h.engine.create_game(&bob()).await.unwrap().code;

        h.engine.wake_all().await;
        let mut woken = vec![h.bots.recv().await.unwrap(), h.bots.recv().await.unwrap()];
        woken.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(woken, expected);

        drop(h.bots);
        h.engine.wake_all().await;
    }

    #[tokio::test]
    async fn test_bot_thought_does_not_wake_scheduler() {
        let mut h = harness();
        let code = h.engine.create_game(&alice()).await.unwrap().code;

        h.engine.post_bot_thought(&code, "alice", "hmm").await.unwrap();
        h.engine.post_bot_thought(&code, "ghost", "boo").await.unwrap();
        assert!(h.bots.try_recv().is_err());

        let game = h.engine.registry().get(&code).unwrap().read().await.clone();
        assert_eq!(game.chat.len(), 1);
    }
}
