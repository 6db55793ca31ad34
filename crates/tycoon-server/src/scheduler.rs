//! Bot scheduling.
//!
//! Every applied mutation pushes its session code onto a queue. A single
//! worker drains the queue, works out which automated decision the session
//! is waiting on, and spawns one delayed task per pending decision. When a
//! task wakes it re-reads the session (it may have been deleted or moved
//! on), asks the [`DecisionAdvisor`] with the lock released, and routes the
//! answer through [`Engine::dispatch`] like any human action.

use crate::engine::{Actor, DispatchError, Engine, Outcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tycoon_core::player::BotStrategy;
use tycoon_core::{next_bot_task, AdvisorReply, Bot, BotTask, BotTaskKind, DecisionError, GameAction, GameState};

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("Advisor had nothing to suggest")]
    NoSuggestion,

    #[error(transparent)]
    Decision(#[from] DecisionError),
}

/// External source of bot decisions
pub trait DecisionAdvisor: Send + Sync {
    /// Propose a move for `bot_id`, given a snapshot taken without any lock held
    fn request_decision<'a>(
        &'a self,
        game: &'a GameState,
        bot_id: &'a str,
        kind: BotTaskKind,
    ) -> BoxFuture<'a, Result<AdvisorReply, AdvisorError>>;
}

/// Advisor that answers with the built-in rule ladder
pub struct RuleBasedAdvisor;

impl DecisionAdvisor for RuleBasedAdvisor {
    fn request_decision<'a>(
        &'a self,
        game: &'a GameState,
        bot_id: &'a str,
        kind: BotTaskKind,
    ) -> BoxFuture<'a, Result<AdvisorReply, AdvisorError>> {
        let reply = rule_based(game, bot_id, kind)
            .map(AdvisorReply::Action)
            .ok_or(AdvisorError::NoSuggestion);
        async move { reply }.boxed()
    }
}

fn rule_based(game: &GameState, bot_id: &str, kind: BotTaskKind) -> Option<GameAction> {
    let player = game.player(bot_id)?;
    Bot::for_player(player).decide(game, kind)
}

/// Scheduler timing and retry settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fast_delay: Duration,
    pub slow_delay: Duration,
    pub advisor_retries: u32,
}

impl SchedulerConfig {
    fn delay(&self, kind: BotTaskKind) -> Duration {
        if kind.is_quick() {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }
}

pub struct Scheduler {
    engine: Arc<Engine>,
    advisor: Arc<dyn DecisionAdvisor>,
    config: SchedulerConfig,
    /// Session code -> decision already waiting on its delay
    pending: DashMap<String, BotTask>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, advisor: Arc<dyn DecisionAdvisor>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            advisor,
            config,
            pending: DashMap::new(),
        }
    }

    /// Drain session codes from `rx` until every sender is gone
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(code) = rx.recv().await {
                self.inspect(&code).await;
            }
            info!("Bot scheduler stopped");
        })
    }

    /// Schedule the decision the session is waiting on, unless it already is
    pub async fn inspect(self: &Arc<Self>, code: &str) {
        let Some(shared) = self.engine.registry().get(code) else {
            self.pending.remove(code);
            return;
        };
        let Some(task) = next_bot_task(&*shared.read().await) else {
            return;
        };

        match self.pending.entry(code.to_string()) {
            Entry::Occupied(slot) if *slot.get() == task => return,
            Entry::Occupied(mut slot) => {
                slot.insert(task.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
            }
        }

        debug!(code = %code, bot = %task.bot_id, kind = ?task.kind, "Bot task scheduled");
        let scheduler = Arc::clone(self);
        let code = code.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.config.delay(task.kind)).await;
            scheduler.pending.remove_if(&code, |_, pending| *pending == task);
            scheduler.run(&code, &task).await;
        });
    }

    /// Snapshot of the session if it still waits on `task`
    async fn still_due(&self, code: &str, task: &BotTask) -> Option<GameState> {
        let shared = self.engine.registry().get(code)?;
        let game = shared.read().await;
        (next_bot_task(&game).as_ref() == Some(task)).then(|| game.clone())
    }

    async fn run(&self, code: &str, task: &BotTask) {
        let Some(game) = self.still_due(code, task).await else {
            debug!(code = %code, bot = %task.bot_id, "Bot task no longer due");
            return;
        };
        let Some(player) = game.player(&task.bot_id) else {
            return;
        };
        let actor = Actor::new(task.bot_id.clone(), player.name.clone());
        let uses_advisor = player
            .bot
            .as_ref()
            .is_some_and(|seat| seat.strategy == BotStrategy::Advisor);

        if uses_advisor {
            for attempt in 0..=self.config.advisor_retries {
                let Some(game) = self.still_due(code, task).await else {
                    return;
                };
                match self.ask_advisor(code, &actor, &game, task.kind).await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(DispatchError::SessionNotFound(_)) => return,
                    Err(e) => warn!(code = %code, bot = %task.bot_id, "Bot dispatch failed: {}", e),
                }
                debug!(code = %code, bot = %task.bot_id, attempt, "Advisor attempt produced no move");
            }
            info!(code = %code, bot = %task.bot_id, "Advisor gave up, using rule-based play");
        }

        let Some(game) = self.still_due(code, task).await else {
            return;
        };
        let Some(action) = rule_based(&game, &task.bot_id, task.kind) else {
            debug!(code = %code, bot = %task.bot_id, "Bot is waiting on someone else");
            return;
        };
        match self.engine.dispatch(code, &actor, action).await {
            Ok(Outcome::Rejected(e)) => warn!(code = %code, bot = %task.bot_id, "Bot move rejected: {}", e),
            Err(e) => debug!(code = %code, bot = %task.bot_id, "Bot move dropped: {}", e),
            Ok(_) => {}
        }
    }

    /// One advisor round trip. Ok(true) when a move was applied.
    async fn ask_advisor(
        &self,
        code: &str,
        actor: &Actor,
        game: &GameState,
        kind: BotTaskKind,
    ) -> Result<bool, DispatchError> {
        let decision = match self.advisor.request_decision(game, &actor.user_id, kind).await {
            Ok(reply) => reply.into_decision().map_err(AdvisorError::from),
            Err(e) => Err(e),
        };
        let decision = match decision {
            Ok(decision) => decision,
            Err(e) => {
                warn!(code = %code, bot = %actor.user_id, "Advisor failed: {}", e);
                return Ok(false);
            }
        };

        if let Some(reason) = &decision.reason {
            self.engine.post_bot_thought(code, &actor.user_id, reason).await?;
        }
        match self.engine.dispatch(code, actor, decision.action).await? {
            Outcome::Applied { .. } => Ok(true),
            Outcome::Rejected(e) => {
                debug!(code = %code, bot = %actor.user_id, "Advisor move rejected: {}", e);
                Ok(false)
            }
            Outcome::Ignored => Ok(false),
        }
    }
}
