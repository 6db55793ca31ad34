//! Automated players.
//!
//! [`next_bot_task`] finds the one automated decision a session is waiting
//! on, if any. [`Bot`] is the rule-based strategy: a fixed priority ladder
//! that never bypasses validation, since everything it returns is an
//! ordinary [`GameAction`] applied through [`GameState::apply_action`].

use crate::actions::{Amount, GameAction};
use crate::board::{Money, PropertyId, UserId};
use crate::economy;
use crate::game::{GameState, GameStatus};
use crate::player::{BotPersonality, Player};
use crate::trade::{TradeOffer, TradeProposal};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delay before quick reactions (order rolls, rent collection)
pub const FAST_DELAY_MS: u64 = 1_000;

/// Delay before decisions that should feel considered
pub const SLOW_DELAY_MS: u64 = 2_000;

pub const BID_INCREMENT: Money = 10;

/// Bots only build while holding at least this much
pub const BUILD_MIN_BALANCE: Money = 300;

/// Cash a bot keeps in hand after building
pub const BUILD_RESERVE: Money = 150;

pub const TRADE_PROPOSAL_CHANCE: f64 = 0.4;

/// What kind of decision a bot owes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotTaskKind {
    RollOrder,
    Auction,
    CollectRent,
    RespondTrade,
    TakeTurn,
}

impl BotTaskKind {
    /// Chores that need no deliberation
    pub fn is_quick(self) -> bool {
        matches!(self, BotTaskKind::RollOrder | BotTaskKind::CollectRent)
    }

    /// Default delay before acting, in milliseconds
    pub fn delay_ms(self) -> u64 {
        if self.is_quick() {
            FAST_DELAY_MS
        } else {
            SLOW_DELAY_MS
        }
    }
}

/// A pending automated decision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotTask {
    pub bot_id: UserId,
    pub kind: BotTaskKind,
}

impl BotTask {
    fn new(bot_id: &str, kind: BotTaskKind) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            kind,
        }
    }
}

fn is_active_bot(game: &GameState, user: &str) -> bool {
    game.player(user).is_some_and(|p| p.is_bot() && p.active)
}

/// The automated decision the session is waiting on, in priority order:
/// order rolls, auction responses, rent collection, trade responses, and
/// finally the current actor's turn.
pub fn next_bot_task(game: &GameState) -> Option<BotTask> {
    match game.status {
        GameStatus::RollingOrder => {
            return game
                .players
                .iter()
                .filter(|p| p.is_bot())
                .find(|p| !game.order_rolls.iter().any(|(id, _)| *id == p.user_id))
                .map(|p| BotTask::new(&p.user_id, BotTaskKind::RollOrder));
        }
        GameStatus::Active => {}
        _ => return None,
    }

    if let Some(auction) = &game.auction {
        let bidder = game.players.iter().find(|p| {
            p.is_bot()
                && p.active
                && !auction.is_highest_bidder(&p.user_id)
                && !auction.has_passed(&p.user_id)
        });
        if let Some(bot) = bidder {
            return Some(BotTask::new(&bot.user_id, BotTaskKind::Auction));
        }
    }

    if let Some(rent) = &game.pending_rent {
        if is_active_bot(game, &rent.creditor_id) {
            return Some(BotTask::new(&rent.creditor_id, BotTaskKind::CollectRent));
        }
    }

    if let Some(trade) = &game.trade {
        if is_active_bot(game, &trade.target_id) {
            return Some(BotTask::new(&trade.target_id, BotTaskKind::RespondTrade));
        }
    }

    game.current_turn
        .as_deref()
        .filter(|id| is_active_bot(game, id))
        .map(|id| BotTask::new(id, BotTaskKind::TakeTurn))
}

/// Whether a bot with `personality` takes the trade
pub fn evaluate_trade(offer: &TradeOffer, personality: &BotPersonality) -> bool {
    let offered = offer.offered_value();
    let requested = offer.requested_value();
    if offered > requested {
        return true;
    }
    personality.is_agreeable() && offered as f64 >= requested as f64 * 0.8
}

/// A rule-based bot player
pub struct Bot {
    pub bot_id: UserId,
    pub personality: &'static BotPersonality,
    rng: StdRng,
}

impl Bot {
    pub fn new(bot_id: impl Into<UserId>, personality: &'static BotPersonality) -> Self {
        Self {
            bot_id: bot_id.into(),
            personality,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(bot_id: impl Into<UserId>, personality: &'static BotPersonality, seed: u64) -> Self {
        Self {
            bot_id: bot_id.into(),
            personality,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Bot playing the given seat with its configured personality
    pub fn for_player(player: &Player) -> Self {
        let personality = player
            .bot
            .as_ref()
            .map(|seat| seat.personality())
            .unwrap_or_else(|| BotPersonality::by_id("classic"));
        Self::new(player.user_id.clone(), personality)
    }

    /// Answer a scheduled task
    pub fn decide(&mut self, game: &GameState, kind: BotTaskKind) -> Option<GameAction> {
        match kind {
            BotTaskKind::RollOrder => Some(GameAction::RollOrder),
            BotTaskKind::Auction => self.auction_response(game),
            BotTaskKind::CollectRent => Some(GameAction::CollectRent),
            BotTaskKind::RespondTrade => self.trade_response(game),
            BotTaskKind::TakeTurn => self.choose_action(game),
        }
    }

    /// Next move on the bot's own turn. None means wait for someone else.
    pub fn choose_action(&mut self, game: &GameState) -> Option<GameAction> {
        let bot_id = self.bot_id.clone();
        let bot = bot_id.as_str();
        game.check_turn(bot).ok()?;
        let me = game.player(bot)?;
        let properties = game.properties_of(bot);

        if me.balance < 0 {
            return Some(self.liquidate(game, me, &properties));
        }

        if game
            .pending_rent
            .as_ref()
            .is_some_and(|r| r.creditor_id == bot)
        {
            return Some(GameAction::CollectRent);
        }

        if game.card_pending.is_some() {
            return Some(GameAction::DrawCard);
        }

        if game.dice == (0, 0) {
            return game.can_roll(bot).then_some(GameAction::RollDice);
        }

        let valid = game.valid_actions(bot);
        if valid.contains(&GameAction::buy_here()) {
            return Some(GameAction::buy_here());
        }
        if valid.contains(&GameAction::auction_here()) {
            return Some(GameAction::auction_here());
        }

        if me.balance > BUILD_MIN_BALANCE {
            let build = properties.iter().find(|id| {
                game.check_buy_building(bot, id)
                    .is_ok_and(|cost| me.balance > cost + BUILD_RESERVE)
            });
            if let Some(id) = build {
                return Some(GameAction::buy_building(id.clone()));
            }
        }

        if game.trade.is_none() && self.rng.gen_bool(TRADE_PROPOSAL_CHANCE) {
            if let Some(proposal) = self.trade_proposal(game) {
                return Some(GameAction::InitiateTrade(proposal));
            }
        }

        if game.can_roll(bot) {
            return Some(GameAction::RollDice);
        }

        let owes_rent = game
            .pending_rent
            .as_ref()
            .is_some_and(|r| r.debtor_id == bot);
        if owes_rent {
            return None;
        }
        Some(GameAction::EndTurn)
    }

    /// Raise cash: sell a building, mortgage, borrow, or give up
    fn liquidate(&self, game: &GameState, me: &Player, properties: &[PropertyId]) -> GameAction {
        let bot = self.bot_id.as_str();
        if let Some(id) = properties
            .iter()
            .find(|id| game.check_sell_building(bot, id).is_ok())
        {
            return GameAction::sell_building(id.clone());
        }
        if let Some(id) = properties
            .iter()
            .find(|id| game.check_mortgage(bot, id).is_ok())
        {
            return GameAction::mortgage(id.clone());
        }

        let profile = me.credit.clone().unwrap_or_default();
        let score = economy::credit_score(&profile, me.balance, me.loan, properties.len());
        let shortfall = -me.balance;
        if me.loan + shortfall <= economy::credit_limit(score) {
            return GameAction::TakeLoan(Amount { amount: shortfall });
        }
        GameAction::DeclareBankruptcy
    }

    /// Bid the minimum increment up to the personality's limit, else pass
    pub fn auction_response(&self, game: &GameState) -> Option<GameAction> {
        let bot = self.bot_id.as_str();
        let auction = game.auction.as_ref()?;
        let me = game.player(bot)?;
        if auction.is_highest_bidder(bot) || auction.has_passed(bot) {
            return None;
        }

        let price = game
            .board
            .property_tile(&auction.property_id)
            .map(|t| t.price)
            .unwrap_or(0);
        let limit = (me.balance as f64).min(price as f64 * (1.0 + self.personality.risk_tolerance));
        let next_bid = auction.highest_bid + BID_INCREMENT;

        if next_bid as f64 <= limit {
            Some(GameAction::bid(next_bid))
        } else {
            Some(GameAction::PassAuction)
        }
    }

    pub fn trade_response(&self, game: &GameState) -> Option<GameAction> {
        let trade = game.trade.as_ref()?;
        if trade.target_id != self.bot_id {
            return None;
        }
        if evaluate_trade(trade, self.personality) {
            Some(GameAction::AcceptTrade)
        } else {
            Some(GameAction::RejectTrade)
        }
    }

    /// Ask another player for a tile that would complete one of our groups
    pub fn trade_proposal(&mut self, game: &GameState) -> Option<TradeProposal> {
        let bot = self.bot_id.as_str();
        let me = game.player(bot)?;

        let mut group_sizes: BTreeMap<&str, usize> = BTreeMap::new();
        let mut mine: BTreeMap<&str, usize> = BTreeMap::new();
        for tile in game.board.tiles() {
            let (Some(group), Some(id)) = (tile.group_id.as_deref(), tile.property_id.as_deref()) else {
                continue;
            };
            *group_sizes.entry(group).or_default() += 1;
            if game.owner_of(id).map(String::as_str) == Some(bot) {
                *mine.entry(group).or_default() += 1;
            }
        }

        let wanted: Vec<_> = game
            .board
            .tiles()
            .iter()
            .filter_map(|tile| {
                let group = tile.group_id.as_deref()?;
                let id = tile.property_id.as_deref()?;
                let owner = game.owner_of(id)?;
                let held = mine.get(group).copied().unwrap_or(0);
                let partial = held > 0 && held < group_sizes.get(group).copied().unwrap_or(0);
                (owner != bot && partial && !tile.has_buildings()).then_some((tile, owner))
            })
            .collect();
        let (target_tile, owner) = wanted.choose(&mut self.rng).copied()?;
        let target_group = target_tile.group_id.as_deref();

        let spare = game.board.tiles().iter().find(|tile| {
            let (Some(group), Some(id)) = (tile.group_id.as_deref(), tile.property_id.as_deref()) else {
                return false;
            };
            let share = mine.get(group).copied().unwrap_or(0) as f64
                / group_sizes.get(group).copied().unwrap_or(1) as f64;
            game.owner_of(id).map(String::as_str) == Some(bot)
                && !tile.mortgaged
                && !tile.has_buildings()
                && Some(group) != target_group
                && share < 0.5
        });

        let (offer_properties, offer_cash) = match spare.and_then(|t| t.property_id.clone()) {
            Some(id) => (vec![id], if me.balance > 300 { 50 } else { 0 }),
            None if me.balance > target_tile.price * 2 => {
                (Vec::new(), target_tile.price + 100 + self.rng.gen_range(0..200))
            }
            None => return None,
        };

        Some(TradeProposal {
            target_id: owner.clone(),
            offer_properties,
            offer_cash,
            request_properties: vec![target_tile.property_id.clone()?],
            request_cash: 0,
        })
    }
}
