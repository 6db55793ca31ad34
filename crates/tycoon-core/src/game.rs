//! Core game state machine.
//!
//! This module contains the `GameState` struct and all game logic. Every
//! change goes through [`GameState::apply_action`], which either applies the
//! action and returns the resulting events, or rejects it with a
//! [`GameError`] and leaves the state untouched.

use crate::actions::{
    AddBot, Amount, ChatLine, GameAction, GameEvent, PlayerConfig, PropertyTarget,
    RentConfirmation, StartGame, TileTarget,
};
use crate::auction::Auction;
use crate::board::{Board, Money, Position, PropertyId, Tile, TileKind, UserId, MAX_BUILD_LEVEL};
use crate::cards::{Card, CardDeck, CardEffect, MoveTarget, JAIL_FREE_BONUS};
use crate::catalog::{Catalog, CatalogError};
use crate::dice::DiceSource;
use crate::economy::{self, RentContext, PASS_GO_CREDIT};
use crate::player::{BotPersonality, Player, TokenColor, STARTING_BALANCE};
use crate::trade::{TradeOffer, TradeProposal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 8;

/// Most recent entries kept in the event log
pub const EVENT_LOG_LIMIT: usize = 100;

/// Most recent entries kept in the chat
pub const CHAT_LIMIT: usize = 50;

pub const MAX_CHAT_LENGTH: usize = 500;

/// Alphabet for session codes and bot ids
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LENGTH: usize = 4;

const BOT_NAMES: [&str; 8] = [
    "Penny", "Monty", "Goldie", "Rusty", "Dotty", "Bricks", "Ledger", "Sterling",
];

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Waiting,
    RollingOrder,
    Active,
    Finished,
}

/// Errors that can occur when applying actions
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("Invalid action for current phase")]
    InvalidPhase,

    #[error("You are not seated in this game")]
    NotSeated,

    #[error("Only the host can do that")]
    NotHost,

    #[error("At least two players are needed")]
    NotEnoughPlayers,

    #[error("The table is full")]
    SessionFull,

    #[error("Game already started")]
    GameAlreadyStarted,

    #[error("Game is over")]
    GameOver,

    #[error("Bankrupt players cannot act")]
    PlayerBankrupt,

    #[error("You have already rolled")]
    AlreadyRolled,

    #[error("Roll the dice first")]
    MustRollFirst,

    #[error("Rent is still outstanding")]
    RentOutstanding,

    #[error("Draw your card first")]
    CardNotDrawn,

    #[error("There is no card to draw")]
    NoCardToDraw,

    #[error("No rent is pending")]
    NoPendingRent,

    #[error("Only the creditor can collect this rent")]
    NotCreditor,

    #[error("That does not match the pending rent")]
    RentMismatch,

    #[error("You are not standing on that property")]
    NotOnProperty,

    #[error("This tile cannot be owned")]
    NotOwnable,

    #[error("Unknown property: {0}")]
    UnknownProperty(PropertyId),

    #[error("Property is already owned")]
    AlreadyOwned,

    #[error("You do not own that property")]
    NotOwner,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Credit limit of {limit} exceeded")]
    CreditLimitExceeded { limit: Money },

    #[error("Repayment exceeds the outstanding loan")]
    RepaymentExceedsLoan,

    #[error("Buildings can only go on streets")]
    NotBuildable,

    #[error("You must own the whole group")]
    IncompleteGroup,

    #[error("A property in the group is mortgaged")]
    GroupMortgaged,

    #[error("Build evenly across the group")]
    UnevenBuild,

    #[error("Property already has a hotel")]
    MaxBuildLevel,

    #[error("No buildings to sell")]
    NoBuildings,

    #[error("Sell the buildings in this group first")]
    HasBuildings,

    #[error("Property is already mortgaged")]
    AlreadyMortgaged,

    #[error("Property is not mortgaged")]
    NotMortgaged,

    #[error("An auction is already running")]
    AuctionInProgress,

    #[error("This landing was already auctioned")]
    AuctionAlreadyHeld,

    #[error("No active auction")]
    NoActiveAuction,

    #[error("The auction is closed")]
    AuctionClosed,

    #[error("The auction is still running")]
    AuctionStillRunning,

    #[error("Bid must beat {highest}")]
    BidTooLow { highest: Money },

    #[error("You already passed on this auction")]
    AlreadyPassed,

    #[error("The highest bidder cannot pass")]
    HighestBidderCannotPass,

    #[error("A trade is already pending")]
    TradeInProgress,

    #[error("No active trade")]
    NoActiveTrade,

    #[error("You cannot trade with yourself")]
    CannotTradeWithSelf,

    #[error("Unknown player")]
    UnknownPlayer,

    #[error("Only the trade target can accept")]
    NotTradeTarget,

    #[error("You are not part of this trade")]
    NotTradeParty,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message is too long")]
    MessageTooLong,

    #[error("No active players remain")]
    NoActivePlayers,
}

/// Uncollected rent charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRent {
    pub debtor_id: UserId,
    pub creditor_id: UserId,
    pub amount: Money,
    pub property_id: PropertyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Info,
    Alert,
    Success,
    Action,
    Dice,
    Movement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic per session, survives trimming
    pub seq: u64,
    pub kind: LogKind,
    pub message: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatKind {
    Player,
    BotThought,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: UserId,
    pub name: String,
    pub kind: ChatKind,
    pub message: String,
    pub timestamp: Timestamp,
}

/// Everything an action needs from outside the state
pub struct ActionContext<'a> {
    pub catalog: &'a Catalog,
    pub dice: &'a mut dyn DiceSource,
    pub now: Timestamp,
}

impl<'a> ActionContext<'a> {
    pub fn new(catalog: &'a Catalog, dice: &'a mut dyn DiceSource, now: Timestamp) -> Self {
        Self { catalog, dice, now }
    }
}

/// Random code drawn from [`CODE_ALPHABET`]
pub fn random_code(source: &mut dyn DiceSource) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[source.pick(CODE_ALPHABET.len())] as char)
        .collect()
}

/// The complete game state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub code: String,
    pub host_id: UserId,
    pub status: GameStatus,
    pub players: Vec<Player>,
    pub board: Board,
    pub current_turn: Option<UserId>,
    pub turn_order: Vec<UserId>,
    /// Last roll; (0, 0) means not yet rolled this turn
    pub dice: (u8, u8),
    /// Rolling-order submissions in arrival order
    pub order_rolls: Vec<(UserId, u8)>,
    /// Property id -> owner
    pub ownership: BTreeMap<PropertyId, UserId>,
    pub auction: Option<Auction>,
    pub trade: Option<TradeOffer>,
    pub pending_rent: Option<PendingRent>,
    /// Card drawn this turn
    pub drawn_card: Option<Card>,
    /// Deck the current actor must draw from before ending the turn
    pub card_pending: Option<CardDeck>,
    /// Set once the current landing has gone to auction
    #[serde(default)]
    pub landing_auctioned: bool,
    pub tile_visits: BTreeMap<Position, u32>,
    pub event_log: VecDeque<LogEntry>,
    pub next_log_seq: u64,
    pub chat: VecDeque<ChatMessage>,
    pub winner: Option<UserId>,
    /// Bumped on every applied change
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GameState {
    /// Create a session with the host seated
    pub fn new(
        code: impl Into<String>,
        host_id: impl Into<UserId>,
        host_name: impl Into<String>,
        catalog: &Catalog,
        now: Timestamp,
    ) -> Result<Self, CatalogError> {
        let host_id = host_id.into();
        let host = Player::new(host_id.clone(), host_name, TokenColor::PALETTE[0]);
        let host_name = host.name.clone();

        let mut state = Self {
            code: code.into(),
            host_id,
            status: GameStatus::Waiting,
            players: vec![host],
            board: Board::from_catalog(catalog)?,
            current_turn: None,
            turn_order: Vec::new(),
            dice: (0, 0),
            order_rolls: Vec::new(),
            ownership: BTreeMap::new(),
            auction: None,
            trade: None,
            pending_rent: None,
            drawn_card: None,
            card_pending: None,
            landing_auctioned: false,
            tile_visits: BTreeMap::new(),
            event_log: VecDeque::new(),
            next_log_seq: 0,
            chat: VecDeque::new(),
            winner: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.push_log(LogKind::Info, format!("{} opened the table", host_name), now);
        Ok(state)
    }

    // ==================== Queries ====================

    pub fn player(&self, user: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user)
    }

    pub fn player_mut(&mut self, user: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user)
    }

    fn player_index(&self, user: &str) -> Result<usize, GameError> {
        self.players
            .iter()
            .position(|p| p.user_id == user)
            .ok_or(GameError::NotSeated)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.current_turn.as_deref().and_then(|id| self.player(id))
    }

    pub fn is_current(&self, user: &str) -> bool {
        self.current_turn.as_deref() == Some(user)
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.active)
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    pub fn owner_of(&self, property_id: &str) -> Option<&UserId> {
        self.ownership.get(property_id)
    }

    /// Property ids held by a player
    pub fn properties_of(&self, user: &str) -> Vec<PropertyId> {
        self.ownership
            .iter()
            .filter(|(_, owner)| owner.as_str() == user)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count_owned(&self, user: &str) -> usize {
        self.ownership.values().filter(|o| o.as_str() == user).count()
    }

    fn count_owned_of_kind(&self, user: &str, kind: TileKind) -> usize {
        self.ownership
            .iter()
            .filter(|(id, owner)| {
                owner.as_str() == user
                    && self.board.property_tile(id).map(|t| t.kind) == Some(kind)
            })
            .count()
    }

    /// Whether `user` owns every tile of a group
    pub fn owns_full_group(&self, user: &str, group_id: &str) -> bool {
        let ids = self.board.group_property_ids(group_id);
        !ids.is_empty()
            && ids
                .iter()
                .all(|id| self.owner_of(id).map(String::as_str) == Some(user))
    }

    /// Balance plus unmortgaged property value, minus loan
    pub fn net_worth(&self, user: &str) -> Money {
        let Some(player) = self.player(user) else {
            return 0;
        };
        let holdings: Money = self
            .properties_of(user)
            .iter()
            .filter_map(|id| self.board.property_tile(id))
            .filter(|t| !t.mortgaged)
            .map(|t| t.price)
            .sum();
        player.balance + holdings - player.loan
    }

    /// (houses, hotels) across a player's properties
    pub fn building_counts(&self, user: &str) -> (Money, Money) {
        self.properties_of(user)
            .iter()
            .filter_map(|id| self.board.property_tile(id))
            .fold((0, 0), |(houses, hotels), t| match t.building_level {
                0 => (houses, hotels),
                level if level >= MAX_BUILD_LEVEL => (houses, hotels + 1),
                level => (houses + level as Money, hotels),
            })
    }

    fn rent_context(&self, owner: &str, tile: &Tile, dice_total: u32) -> RentContext {
        RentContext {
            dice_total,
            owner_railroads: self.count_owned_of_kind(owner, TileKind::Railroad),
            owner_utilities: self.count_owned_of_kind(owner, TileKind::Utility),
            owner_has_full_group: tile
                .group_id
                .as_deref()
                .is_some_and(|g| self.owns_full_group(owner, g)),
        }
    }

    /// Rent `tile` would charge right now with the given dice total
    pub fn rent_for(&self, tile: &Tile, dice_total: u32) -> Option<Money> {
        let owner = self.owner_of(tile.property_id.as_deref()?)?;
        if tile.mortgaged {
            return Some(0);
        }
        Some(economy::rent(tile, &self.rent_context(owner, tile, dice_total)))
    }

    fn dice_total(&self) -> u32 {
        self.dice.0 as u32 + self.dice.1 as u32
    }

    /// Whether the current actor may roll
    pub fn can_roll(&self, user: &str) -> bool {
        let (d1, d2) = self.dice;
        self.check_turn(user).is_ok()
            && ((d1 == 0 && d2 == 0) || (d1 == d2 && d1 != 0))
            && self.card_pending.is_none()
            && self.pending_rent.is_none()
    }

    fn name_of(&self, user: &str) -> String {
        self.player(user)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| user.to_string())
    }

    // ==================== Logs ====================

    /// Append to the bounded event log
    pub fn push_log(&mut self, kind: LogKind, message: impl Into<String>, now: Timestamp) {
        self.next_log_seq += 1;
        self.event_log.push_back(LogEntry {
            seq: self.next_log_seq,
            kind,
            message: message.into(),
            timestamp: now,
        });
        while self.event_log.len() > EVENT_LOG_LIMIT {
            self.event_log.pop_front();
        }
    }

    /// Log entries appended after `seq`
    pub fn log_since(&self, seq: u64) -> impl Iterator<Item = &LogEntry> {
        self.event_log.iter().filter(move |e| e.seq > seq)
    }

    fn push_chat(&mut self, user: &str, kind: ChatKind, message: String, now: Timestamp) {
        let name = self.name_of(user);
        self.chat.push_back(ChatMessage {
            user_id: user.to_string(),
            name,
            kind,
            message,
            timestamp: now,
        });
        while self.chat.len() > CHAT_LIMIT {
            self.chat.pop_front();
        }
    }

    /// Record the reasoning a bot attached to a decision
    pub fn push_bot_thought(&mut self, bot: &str, thought: &str, now: Timestamp) {
        let thought = thought.trim();
        if thought.is_empty() || self.player(bot).is_none() {
            return;
        }
        let thought: String = thought.chars().take(MAX_CHAT_LENGTH).collect();
        self.push_chat(bot, ChatKind::BotThought, thought, now);
        self.touch(now);
    }

    fn touch(&mut self, now: Timestamp) {
        self.version += 1;
        self.updated_at = now;
    }

    // ==================== Seating ====================

    /// Seat a human player. Returns false if they were already seated.
    pub fn seat(&mut self, user: &str, name: &str, now: Timestamp) -> Result<bool, GameError> {
        if self.player(user).is_some() {
            return Ok(false);
        }
        if self.status != GameStatus::Waiting {
            return Err(GameError::GameAlreadyStarted);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::SessionFull);
        }

        let color = TokenColor::first_unused(self.players.iter().map(|p| &p.token_color));
        self.players.push(Player::new(user, name, color));
        self.push_log(LogKind::Info, format!("{} joined the game", name), now);
        self.touch(now);
        Ok(true)
    }

    // ==================== Dispatch ====================

    /// Validate and apply one action
    pub fn apply_action(
        &mut self,
        user: &str,
        action: GameAction,
        ctx: &mut ActionContext<'_>,
    ) -> Result<Vec<GameEvent>, GameError> {
        let player = self.player(user).ok_or(GameError::NotSeated)?;

        let social = matches!(
            action,
            GameAction::JoinGame | GameAction::SendChat(_) | GameAction::UpdatePlayerConfig(_)
        );
        if !social {
            if self.status == GameStatus::Finished {
                return Err(GameError::GameOver);
            }
            if !player.active {
                return Err(GameError::PlayerBankrupt);
            }
        }

        let events = match action {
            GameAction::JoinGame => Ok(Vec::new()),
            GameAction::StartGame(req) => self.start_game(user, req, ctx.now),
            GameAction::AddBot(req) => self.add_bot(user, req, ctx),
            GameAction::UpdatePlayerConfig(req) => self.update_player_config(user, req),
            GameAction::SendChat(line) => self.send_chat(user, line, ctx.now),

            GameAction::RollOrder => self.roll_order(user, ctx),
            GameAction::RollDice => self.roll_dice(user, ctx),
            GameAction::DrawCard => self.draw_card(user, ctx),
            GameAction::EndTurn => self.end_turn(user, ctx.now),

            GameAction::BuyProperty(target) => self.buy_property(user, target, ctx.now),
            GameAction::BuyBuilding(PropertyTarget { property_id }) => {
                self.buy_building(user, &property_id, ctx.now)
            }
            GameAction::SellBuilding(PropertyTarget { property_id }) => {
                self.sell_building(user, &property_id, ctx.now)
            }
            GameAction::MortgageProperty(PropertyTarget { property_id }) => {
                self.mortgage_property(user, &property_id, ctx.now)
            }
            GameAction::UnmortgageProperty(PropertyTarget { property_id }) => {
                self.unmortgage_property(user, &property_id, ctx.now)
            }
            GameAction::SellProperty(PropertyTarget { property_id }) => {
                self.sell_property(user, &property_id, ctx.now)
            }

            GameAction::PayRent(confirmation) => self.pay_rent(user, confirmation, ctx.now),
            GameAction::CollectRent => self.collect_rent(user, ctx.now),

            GameAction::StartAuction(target) => self.start_auction(user, target, ctx.now),
            GameAction::Bid(Amount { amount }) => self.bid(user, amount, ctx.now),
            GameAction::PassAuction => self.pass_auction(user, ctx.now),
            GameAction::FinalizeAuction => self.finalize_auction(ctx.now),

            GameAction::InitiateTrade(proposal) => self.initiate_trade(user, proposal, ctx.now),
            GameAction::AcceptTrade => self.accept_trade(user, ctx.now),
            GameAction::RejectTrade => self.reject_trade(user, ctx.now),

            GameAction::TakeLoan(Amount { amount }) => self.take_loan(user, amount, ctx.now),
            GameAction::PayLoan(Amount { amount }) => self.pay_loan(user, amount, ctx.now),
            GameAction::DeclareBankruptcy => self.declare_bankruptcy(user, ctx.now),
        }?;

        self.touch(ctx.now);
        Ok(events)
    }

    /// Resolve the auction if its deadline has passed. Used by the periodic
    /// sweep; returns None when there is nothing to do.
    pub fn sweep_auction(&mut self, now: Timestamp) -> Option<Vec<GameEvent>> {
        let due = self.auction.as_ref().is_some_and(|a| a.is_due(now));
        if !due || self.status != GameStatus::Active {
            return None;
        }
        let events = self.resolve_auction(now);
        self.touch(now);
        Some(events)
    }

    /// Ensure `user` is the active current actor of an ACTIVE game
    pub fn check_turn(&self, user: &str) -> Result<(), GameError> {
        if self.status != GameStatus::Active {
            return Err(GameError::InvalidPhase);
        }
        let player = self.player(user).ok_or(GameError::NotSeated)?;
        if !player.active {
            return Err(GameError::PlayerBankrupt);
        }
        if !self.is_current(user) {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    fn check_active_game(&self) -> Result<(), GameError> {
        if self.status != GameStatus::Active {
            return Err(GameError::InvalidPhase);
        }
        Ok(())
    }

    // ==================== Lobby ====================

    fn start_game(&mut self, user: &str, req: StartGame, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        if self.status != GameStatus::Waiting {
            return Err(GameError::GameAlreadyStarted);
        }
        if self.players.len() < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers);
        }

        let initial_balance = req
            .initial_balance
            .filter(|b| *b > 0)
            .unwrap_or(STARTING_BALANCE);
        for player in &mut self.players {
            player.balance = initial_balance;
            player.position = 0;
        }
        self.order_rolls.clear();
        self.status = GameStatus::RollingOrder;

        let name = self.name_of(user);
        self.push_log(
            LogKind::Info,
            format!("{} started the game. Roll to decide the turn order!", name),
            now,
        );
        Ok(vec![GameEvent::GameStarted { initial_balance }])
    }

    fn add_bot(&mut self, user: &str, req: AddBot, ctx: &mut ActionContext<'_>) -> Result<Vec<GameEvent>, GameError> {
        if user != self.host_id {
            return Err(GameError::NotHost);
        }
        if self.status != GameStatus::Waiting {
            return Err(GameError::GameAlreadyStarted);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::SessionFull);
        }

        let personality = BotPersonality::by_id(req.personality_id.as_deref().unwrap_or("classic"));

        let mut bot_id = None;
        for _ in 0..16 {
            let candidate = format!("BOT_{}", random_code(ctx.dice));
            if self.player(&candidate).is_none() {
                bot_id = Some(candidate);
                break;
            }
        }
        let bot_id = bot_id.unwrap_or_else(|| format!("BOT_{}{}", random_code(ctx.dice), self.players.len()));

        let nickname = BOT_NAMES[ctx.dice.pick(BOT_NAMES.len())];
        let name = format!("[BOT] {} ({})", nickname, personality.name);
        let color = TokenColor::first_unused(self.players.iter().map(|p| &p.token_color));

        self.players
            .push(Player::new_bot(bot_id.clone(), name.clone(), color, personality));
        self.push_log(LogKind::Info, format!("{} joined the game", name), ctx.now);
        Ok(vec![GameEvent::BotAdded { user_id: bot_id }])
    }

    fn update_player_config(&mut self, user: &str, req: PlayerConfig) -> Result<Vec<GameEvent>, GameError> {
        let player = self.player_mut(user).ok_or(GameError::NotSeated)?;
        if let Some(color) = req.token_color {
            player.token_color = color;
        }
        if let Some(shape) = req.token_shape {
            player.token_shape = Some(shape);
        }
        Ok(vec![GameEvent::PlayerUpdated {
            user_id: user.to_string(),
        }])
    }

    fn send_chat(&mut self, user: &str, line: ChatLine, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let message = line.message.trim();
        if message.is_empty() {
            return Err(GameError::EmptyMessage);
        }
        if message.chars().count() > MAX_CHAT_LENGTH {
            return Err(GameError::MessageTooLong);
        }
        self.push_chat(user, ChatKind::Player, message.to_string(), now);
        Ok(vec![GameEvent::ChatPosted {
            user_id: user.to_string(),
        }])
    }

    // ==================== Turn Flow ====================

    fn roll_order(&mut self, user: &str, ctx: &mut ActionContext<'_>) -> Result<Vec<GameEvent>, GameError> {
        if self.status != GameStatus::RollingOrder {
            return Err(GameError::InvalidPhase);
        }
        if self.order_rolls.iter().any(|(id, _)| id == user) {
            return Err(GameError::AlreadyRolled);
        }

        let (d1, d2) = ctx.dice.roll_pair();
        let roll = d1 + d2;
        self.order_rolls.push((user.to_string(), roll));

        let name = self.name_of(user);
        self.push_log(LogKind::Dice, format!("{} rolled {} for turn order", name, roll), ctx.now);
        let mut events = vec![GameEvent::OrderRolled {
            user_id: user.to_string(),
            roll,
        }];

        let everyone_rolled = self
            .players
            .iter()
            .all(|p| self.order_rolls.iter().any(|(id, _)| *id == p.user_id));
        if everyone_rolled {
            let mut ranked = self.order_rolls.clone();
            // stable: ties keep submission order
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            self.turn_order = ranked.into_iter().map(|(id, _)| id).collect();
            self.current_turn = self.turn_order.first().cloned();
            self.status = GameStatus::Active;
            self.dice = (0, 0);

            let names: Vec<String> = self.turn_order.iter().map(|id| self.name_of(id)).collect();
            self.push_log(
                LogKind::Success,
                format!("Turn order: {}", names.join(", ")),
                ctx.now,
            );
            events.push(GameEvent::TurnOrderDecided {
                order: self.turn_order.clone(),
            });
            if let Some(first) = &self.current_turn {
                events.push(GameEvent::TurnChanged {
                    user_id: first.clone(),
                });
            }
        }

        Ok(events)
    }

    fn roll_dice(&mut self, user: &str, ctx: &mut ActionContext<'_>) -> Result<Vec<GameEvent>, GameError> {
        self.check_turn(user)?;
        if self.card_pending.is_some() {
            return Err(GameError::CardNotDrawn);
        }
        if self.pending_rent.is_some() {
            return Err(GameError::RentOutstanding);
        }
        if !self.can_roll(user) {
            return Err(GameError::AlreadyRolled);
        }

        let idx = self.player_index(user)?;
        let (d1, d2) = ctx.dice.roll_pair();
        self.dice = (d1, d2);
        self.drawn_card = None;
        self.landing_auctioned = false;

        let from = self.players[idx].position;
        let (to, passed_go) = Board::advance(from, (d1 + d2) as u32);
        self.players[idx].position = to;

        let name = self.players[idx].name.clone();
        let doubles = if d1 == d2 { " (doubles!)" } else { "" };
        self.push_log(
            LogKind::Dice,
            format!("{} rolled {} + {}{}", name, d1, d2, doubles),
            ctx.now,
        );

        let mut events = vec![
            GameEvent::DiceRolled {
                user_id: user.to_string(),
                dice: (d1, d2),
            },
            GameEvent::PlayerMoved {
                user_id: user.to_string(),
                from,
                to,
            },
        ];
        if passed_go {
            events.extend(self.pass_go(idx, ctx.now));
        }
        events.extend(self.land(idx, false, ctx));
        Ok(events)
    }

    fn pass_go(&mut self, idx: usize, now: Timestamp) -> Vec<GameEvent> {
        let user = self.players[idx].user_id.clone();
        let owned = self.count_owned(&user);
        let player = &mut self.players[idx];
        player.balance += PASS_GO_CREDIT;

        let mut events = vec![GameEvent::PassedGo {
            user_id: user.clone(),
            credit: PASS_GO_CREDIT,
        }];
        let name = player.name.clone();
        let settlement = economy::settle_loan_at_go(player, owned);

        self.push_log(
            LogKind::Success,
            format!("{} passed GO and collected {}", name, PASS_GO_CREDIT),
            now,
        );
        if let Some(s) = settlement {
            if s.covered {
                self.push_log(
                    LogKind::Info,
                    format!(
                        "{} paid loan installment {} plus interest {}",
                        name, s.minimum_payment, s.interest
                    ),
                    now,
                );
            } else {
                self.push_log(
                    LogKind::Alert,
                    format!(
                        "{} missed the minimum loan payment of {}; interest {} added to the loan",
                        name, s.minimum_payment, s.interest
                    ),
                    now,
                );
            }
            events.push(GameEvent::LoanInterestCharged {
                user_id: user,
                interest: s.interest,
                payment: if s.covered { s.minimum_payment } else { 0 },
                covered: s.covered,
            });
        }
        events
    }

    /// Resolve the tile a player now stands on
    fn land(&mut self, idx: usize, from_card: bool, ctx: &mut ActionContext<'_>) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let position = self.players[idx].position;
        self.players[idx].record_visit(position);
        *self.tile_visits.entry(position).or_insert(0) += 1;

        let Some(tile) = self.board.tile(position).cloned() else {
            return events;
        };
        let user = self.players[idx].user_id.clone();
        let name = self.players[idx].name.clone();

        match tile.kind {
            kind if kind.is_ownable() => {
                let Some(property_id) = tile.property_id.clone() else {
                    return events;
                };
                match self.owner_of(&property_id).cloned() {
                    None => self.push_log(
                        LogKind::Movement,
                        format!("{} landed on {}, available for {}", name, tile.name, tile.price),
                        ctx.now,
                    ),
                    Some(owner) if owner == user => self.push_log(
                        LogKind::Movement,
                        format!("{} landed on their own {}", name, tile.name),
                        ctx.now,
                    ),
                    Some(_) if tile.mortgaged => self.push_log(
                        LogKind::Movement,
                        format!("{} landed on {}, which is mortgaged", name, tile.name),
                        ctx.now,
                    ),
                    Some(owner) => {
                        let amount = economy::rent(
                            &tile,
                            &self.rent_context(&owner, &tile, self.dice_total()),
                        );
                        if amount > 0 {
                            let owner_name = self.name_of(&owner);
                            self.push_log(
                                LogKind::Alert,
                                format!("{} owes {} rent of {} for {}", name, owner_name, amount, tile.name),
                                ctx.now,
                            );
                            self.pending_rent = Some(PendingRent {
                                debtor_id: user.clone(),
                                creditor_id: owner.clone(),
                                amount,
                                property_id: property_id.clone(),
                            });
                            events.push(GameEvent::RentCharged {
                                debtor: user,
                                creditor: owner,
                                property_id,
                                amount,
                            });
                        }
                    }
                }
            }
            TileKind::Tax => {
                self.players[idx].balance -= tile.price;
                self.push_log(
                    LogKind::Alert,
                    format!("{} paid {} of {}", name, tile.name, tile.price),
                    ctx.now,
                );
                events.push(GameEvent::TaxPaid {
                    user_id: user,
                    amount: tile.price,
                });
            }
            TileKind::GoToJail => {
                events.extend(self.send_to_jail(idx, ctx.now));
            }
            TileKind::Chance | TileKind::Community if !from_card => {
                let deck = if tile.kind == TileKind::Chance {
                    CardDeck::Chance
                } else {
                    CardDeck::Community
                };
                self.card_pending = Some(deck);
                self.push_log(
                    LogKind::Movement,
                    format!("{} landed on {} and must draw a card", name, tile.name),
                    ctx.now,
                );
            }
            _ => self.push_log(
                LogKind::Movement,
                format!("{} landed on {}", name, tile.name),
                ctx.now,
            ),
        }

        events
    }

    fn send_to_jail(&mut self, idx: usize, now: Timestamp) -> Vec<GameEvent> {
        let from = self.players[idx].position;
        if let Some(jail) = self.board.first_of_kind(TileKind::Jail) {
            self.players[idx].position = jail;
        }
        self.players[idx].in_jail = true;

        let player = &self.players[idx];
        let (user, name, to) = (player.user_id.clone(), player.name.clone(), player.position);
        self.push_log(LogKind::Alert, format!("{} was sent to jail", name), now);
        vec![
            GameEvent::PlayerMoved {
                user_id: user.clone(),
                from,
                to,
            },
            GameEvent::SentToJail { user_id: user },
        ]
    }

    fn draw_card(&mut self, user: &str, ctx: &mut ActionContext<'_>) -> Result<Vec<GameEvent>, GameError> {
        self.check_turn(user)?;
        let deck = self.card_pending.ok_or(GameError::NoCardToDraw)?;
        let idx = self.player_index(user)?;
        self.card_pending = None;

        let cards = ctx.catalog.deck(deck);
        if cards.is_empty() {
            self.push_log(LogKind::Info, "The deck is empty", ctx.now);
            return Ok(Vec::new());
        }
        let card = cards[ctx.dice.pick(cards.len())].clone();

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Action,
            format!("{} drew \"{}\": {}", name, card.title, card.description),
            ctx.now,
        );
        let mut events = vec![GameEvent::CardDrawn {
            user_id: user.to_string(),
            deck,
            card_id: card.id,
            title: card.title.clone(),
        }];

        let effect = card.parsed_effect();
        self.drawn_card = Some(card);
        events.extend(self.apply_card(idx, effect, ctx));
        Ok(events)
    }

    fn adjust_balance(&mut self, idx: usize, delta: Money) -> GameEvent {
        self.players[idx].balance += delta;
        GameEvent::CashChanged {
            user_id: self.players[idx].user_id.clone(),
            delta,
        }
    }

    fn apply_card(&mut self, idx: usize, effect: CardEffect, ctx: &mut ActionContext<'_>) -> Vec<GameEvent> {
        let others: Vec<usize> = (0..self.players.len())
            .filter(|&j| j != idx && self.players[j].active)
            .collect();

        match effect {
            CardEffect::Collect(amount) => vec![self.adjust_balance(idx, amount)],
            CardEffect::Pay(amount) => vec![self.adjust_balance(idx, -amount)],
            CardEffect::CollectFromAll(amount) => {
                let mut events = Vec::new();
                for j in others {
                    events.push(self.adjust_balance(j, -amount));
                    events.push(self.adjust_balance(idx, amount));
                }
                events
            }
            CardEffect::PayToAll(amount) => {
                let mut events = Vec::new();
                for j in others {
                    events.push(self.adjust_balance(idx, -amount));
                    events.push(self.adjust_balance(j, amount));
                }
                events
            }
            CardEffect::Repairs {
                per_house,
                per_hotel,
            } => {
                let (houses, hotels) = self.building_counts(&self.players[idx].user_id);
                let cost = houses * per_house + hotels * per_hotel;
                if cost > 0 {
                    vec![self.adjust_balance(idx, -cost)]
                } else {
                    Vec::new()
                }
            }
            CardEffect::JailFree => {
                self.players[idx].in_jail = false;
                vec![self.adjust_balance(idx, JAIL_FREE_BONUS)]
            }
            CardEffect::Move(target) => self.card_move(idx, target, ctx),
            CardEffect::Unknown(code) => {
                self.push_log(LogKind::Info, format!("Card effect '{}' has no effect", code), ctx.now);
                Vec::new()
            }
        }
    }

    fn card_move(&mut self, idx: usize, target: MoveTarget, ctx: &mut ActionContext<'_>) -> Vec<GameEvent> {
        let from = self.players[idx].position;
        let user = self.players[idx].user_id.clone();

        let destination = match target {
            MoveTarget::Jail => return self.send_to_jail(idx, ctx.now),
            MoveTarget::Go { bonus } => {
                self.players[idx].position = 0;
                let mut events = vec![
                    GameEvent::PlayerMoved {
                        user_id: user,
                        from,
                        to: 0,
                    },
                    self.adjust_balance(idx, bonus),
                ];
                events.extend(self.land(idx, true, ctx));
                return events;
            }
            MoveTarget::Relative(steps) if steps > 0 => Some(Board::advance(from, steps as u32).0),
            MoveTarget::Relative(steps) => Some(Board::retreat(from, steps.unsigned_abs())),
            MoveTarget::NearestRailroad => self.board.next_of_kind(from, TileKind::Railroad),
            MoveTarget::NearestUtility => self.board.next_of_kind(from, TileKind::Utility),
            MoveTarget::RandomProperty => {
                let ownable = self.board.ownable_positions();
                if ownable.is_empty() {
                    None
                } else {
                    Some(ownable[ctx.dice.pick(ownable.len())])
                }
            }
            MoveTarget::LastProperty => self.board.last_ownable(),
        };

        let Some(to) = destination else {
            return Vec::new();
        };
        self.players[idx].position = to;
        let mut events = vec![GameEvent::PlayerMoved {
            user_id: user,
            from,
            to,
        }];
        events.extend(self.land(idx, true, ctx));
        events
    }

    fn end_turn(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_turn(user)?;
        if self
            .pending_rent
            .as_ref()
            .is_some_and(|r| r.debtor_id == user)
        {
            return Err(GameError::RentOutstanding);
        }
        if self.card_pending.is_some() {
            return Err(GameError::CardNotDrawn);
        }
        if self.dice == (0, 0) {
            return Err(GameError::MustRollFirst);
        }

        let next = self.next_active_after(user).ok_or(GameError::NoActivePlayers)?;
        Ok(vec![self.hand_turn_to(next, now)])
    }

    /// Next active player in turn order after `user`, wrapping around
    fn next_active_after(&self, user: &str) -> Option<UserId> {
        let len = self.turn_order.len();
        let start = self.turn_order.iter().position(|id| id == user).unwrap_or(len);
        (1..=len)
            .map(|step| &self.turn_order[(start + step) % len])
            .find(|id| self.player(id).is_some_and(|p| p.active))
            .cloned()
    }

    fn hand_turn_to(&mut self, next: UserId, now: Timestamp) -> GameEvent {
        self.current_turn = Some(next.clone());
        self.dice = (0, 0);
        self.drawn_card = None;
        self.card_pending = None;
        self.landing_auctioned = false;
        let name = self.name_of(&next);
        self.push_log(LogKind::Info, format!("It is {}'s turn", name), now);
        GameEvent::TurnChanged { user_id: next }
    }

    // ==================== Property ====================

    /// Ownable, unowned property under the actor, optionally named explicitly
    fn landed_unowned(&self, user: &str, target: &TileTarget) -> Result<&Tile, GameError> {
        let player = self.player(user).ok_or(GameError::NotSeated)?;
        let tile = match &target.property_id {
            Some(id) => self
                .board
                .property_tile(id)
                .ok_or_else(|| GameError::UnknownProperty(id.clone()))?,
            None => self.board.tile(player.position).ok_or(GameError::NotOwnable)?,
        };
        if tile.position != player.position {
            return Err(GameError::NotOnProperty);
        }
        let property_id = tile.property_id.as_deref().ok_or(GameError::NotOwnable)?;
        if self.owner_of(property_id).is_some() {
            return Err(GameError::AlreadyOwned);
        }
        if self
            .auction
            .as_ref()
            .is_some_and(|a| a.property_id == property_id)
        {
            return Err(GameError::AuctionInProgress);
        }
        Ok(tile)
    }

    /// Tile for a property owned by `user`
    fn owned_tile(&self, user: &str, property_id: &str) -> Result<&Tile, GameError> {
        let tile = self
            .board
            .property_tile(property_id)
            .ok_or_else(|| GameError::UnknownProperty(property_id.to_string()))?;
        if self.owner_of(property_id).map(String::as_str) != Some(user) {
            return Err(GameError::NotOwner);
        }
        Ok(tile)
    }

    fn group_has_buildings(&self, tile: &Tile) -> bool {
        match &tile.group_id {
            Some(group) => self.board.group_tiles(group).any(Tile::has_buildings),
            None => tile.has_buildings(),
        }
    }

    /// Cost of the next building on `property_id`, if `user` may build now
    pub fn check_buy_building(&self, user: &str, property_id: &str) -> Result<Money, GameError> {
        self.check_turn(user)?;
        let tile = self.owned_tile(user, property_id)?;
        if !tile.kind.is_buildable() {
            return Err(GameError::NotBuildable);
        }
        let group = tile.group_id.as_deref().ok_or(GameError::NotBuildable)?;
        if !self.owns_full_group(user, group) {
            return Err(GameError::IncompleteGroup);
        }
        if self.board.group_tiles(group).any(|t| t.mortgaged) {
            return Err(GameError::GroupMortgaged);
        }
        if tile.building_level >= MAX_BUILD_LEVEL {
            return Err(GameError::MaxBuildLevel);
        }
        let min_level = self
            .board
            .group_tiles(group)
            .map(|t| t.building_level)
            .min()
            .unwrap_or(0);
        if tile.building_level != min_level {
            return Err(GameError::UnevenBuild);
        }
        let cost = economy::building_cost(tile).ok_or(GameError::MaxBuildLevel)?;
        let balance = self.player(user).map(|p| p.balance).unwrap_or(0);
        if balance < cost {
            return Err(GameError::InsufficientFunds);
        }
        Ok(cost)
    }

    /// Refund for selling the top building on `property_id`
    pub fn check_sell_building(&self, user: &str, property_id: &str) -> Result<Money, GameError> {
        self.check_turn(user)?;
        let tile = self.owned_tile(user, property_id)?;
        if tile.building_level == 0 {
            return Err(GameError::NoBuildings);
        }
        if let Some(group) = tile.group_id.as_deref() {
            let max_level = self
                .board
                .group_tiles(group)
                .map(|t| t.building_level)
                .max()
                .unwrap_or(0);
            if tile.building_level != max_level {
                return Err(GameError::UnevenBuild);
            }
        }
        economy::building_refund(tile).ok_or(GameError::NoBuildings)
    }

    /// Payout for mortgaging `property_id`
    pub fn check_mortgage(&self, user: &str, property_id: &str) -> Result<Money, GameError> {
        self.check_active_game()?;
        let tile = self.owned_tile(user, property_id)?;
        if tile.mortgaged {
            return Err(GameError::AlreadyMortgaged);
        }
        if self.group_has_buildings(tile) {
            return Err(GameError::HasBuildings);
        }
        Ok(economy::mortgage_payout(tile))
    }

    /// Cost of lifting the mortgage on `property_id`
    pub fn check_unmortgage(&self, user: &str, property_id: &str) -> Result<Money, GameError> {
        self.check_active_game()?;
        let tile = self.owned_tile(user, property_id)?;
        if !tile.mortgaged {
            return Err(GameError::NotMortgaged);
        }
        let cost = economy::unmortgage_cost(tile);
        let balance = self.player(user).map(|p| p.balance).unwrap_or(0);
        if balance < cost {
            return Err(GameError::InsufficientFunds);
        }
        Ok(cost)
    }

    /// Refund for selling `property_id` back to the bank
    pub fn check_sell_property(&self, user: &str, property_id: &str) -> Result<Money, GameError> {
        self.check_active_game()?;
        let tile = self.owned_tile(user, property_id)?;
        if self.group_has_buildings(tile) {
            return Err(GameError::HasBuildings);
        }
        Ok(economy::bank_sale_value(tile))
    }

    fn tile_for(&mut self, property_id: &str) -> Result<&mut Tile, GameError> {
        self.board
            .property_tile_mut(property_id)
            .ok_or_else(|| GameError::UnknownProperty(property_id.to_string()))
    }

    fn buy_property(&mut self, user: &str, target: TileTarget, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_turn(user)?;
        let tile = self.landed_unowned(user, &target)?;
        let (property_id, price, tile_name) = (
            tile.property_id.clone().ok_or(GameError::NotOwnable)?,
            tile.price,
            tile.name.clone(),
        );

        let idx = self.player_index(user)?;
        if self.players[idx].balance < price {
            return Err(GameError::InsufficientFunds);
        }

        self.players[idx].balance -= price;
        self.ownership.insert(property_id.clone(), user.to_string());

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Success,
            format!("{} bought {} for {}", name, tile_name, price),
            now,
        );
        Ok(vec![GameEvent::PropertyBought {
            user_id: user.to_string(),
            property_id,
            price,
        }])
    }

    fn buy_building(&mut self, user: &str, property_id: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let cost = self.check_buy_building(user, property_id)?;
        let idx = self.player_index(user)?;
        self.players[idx].balance -= cost;

        let tile = self.tile_for(property_id)?;
        tile.building_level += 1;
        let (level, tile_name) = (tile.building_level, tile.name.clone());

        let what = if level >= MAX_BUILD_LEVEL { "a hotel" } else { "a house" };
        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Success,
            format!("{} built {} on {} for {}", name, what, tile_name, cost),
            now,
        );
        Ok(vec![GameEvent::BuildingBought {
            property_id: property_id.to_string(),
            level,
            cost,
        }])
    }

    fn sell_building(&mut self, user: &str, property_id: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let refund = self.check_sell_building(user, property_id)?;
        let idx = self.player_index(user)?;
        self.players[idx].balance += refund;

        let tile = self.tile_for(property_id)?;
        tile.building_level -= 1;
        let (level, tile_name) = (tile.building_level, tile.name.clone());

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Info,
            format!("{} sold a building on {} for {}", name, tile_name, refund),
            now,
        );
        Ok(vec![GameEvent::BuildingSold {
            property_id: property_id.to_string(),
            level,
            refund,
        }])
    }

    fn mortgage_property(&mut self, user: &str, property_id: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let amount = self.check_mortgage(user, property_id)?;
        let idx = self.player_index(user)?;
        self.players[idx].balance += amount;

        let tile = self.tile_for(property_id)?;
        tile.mortgaged = true;
        let tile_name = tile.name.clone();

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Info,
            format!("{} mortgaged {} for {}", name, tile_name, amount),
            now,
        );
        Ok(vec![GameEvent::PropertyMortgaged {
            property_id: property_id.to_string(),
            amount,
        }])
    }

    fn unmortgage_property(&mut self, user: &str, property_id: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let amount = self.check_unmortgage(user, property_id)?;
        let idx = self.player_index(user)?;
        self.players[idx].balance -= amount;

        let tile = self.tile_for(property_id)?;
        tile.mortgaged = false;
        let tile_name = tile.name.clone();

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Info,
            format!("{} lifted the mortgage on {} for {}", name, tile_name, amount),
            now,
        );
        Ok(vec![GameEvent::PropertyUnmortgaged {
            property_id: property_id.to_string(),
            amount,
        }])
    }

    fn sell_property(&mut self, user: &str, property_id: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let amount = self.check_sell_property(user, property_id)?;
        let idx = self.player_index(user)?;
        self.players[idx].balance += amount;

        let tile = self.tile_for(property_id)?;
        tile.mortgaged = false;
        let tile_name = tile.name.clone();
        self.ownership.remove(property_id);

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Info,
            format!("{} sold {} to the bank for {}", name, tile_name, amount),
            now,
        );
        Ok(vec![GameEvent::PropertySold {
            property_id: property_id.to_string(),
            amount,
        }])
    }

    // ==================== Rent ====================

    fn pay_rent(&mut self, user: &str, confirmation: RentConfirmation, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let rent = self.pending_rent.as_ref().ok_or(GameError::NoPendingRent)?;
        if rent.creditor_id != user {
            return Err(GameError::NotCreditor);
        }
        if rent.debtor_id != confirmation.target_id || rent.property_id != confirmation.property_id {
            return Err(GameError::RentMismatch);
        }
        self.collect_rent(user, now)
    }

    fn collect_rent(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let rent = self.pending_rent.as_ref().ok_or(GameError::NoPendingRent)?;
        if rent.creditor_id != user {
            return Err(GameError::NotCreditor);
        }
        let debtor = self.player_index(&rent.debtor_id)?;
        let creditor = self.player_index(&rent.creditor_id)?;
        let Some(rent) = self.pending_rent.take() else {
            return Err(GameError::NoPendingRent);
        };

        self.players[debtor].balance -= rent.amount;
        self.players[creditor].balance += rent.amount;

        let (debtor_name, creditor_name) = (
            self.players[debtor].name.clone(),
            self.players[creditor].name.clone(),
        );
        self.push_log(
            LogKind::Success,
            format!("{} collected {} rent from {}", creditor_name, rent.amount, debtor_name),
            now,
        );
        Ok(vec![GameEvent::RentCollected {
            debtor: rent.debtor_id,
            creditor: rent.creditor_id,
            amount: rent.amount,
        }])
    }

    // ==================== Auctions ====================

    fn start_auction(&mut self, user: &str, target: TileTarget, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_turn(user)?;
        if self.auction.is_some() {
            return Err(GameError::AuctionInProgress);
        }
        if self.landing_auctioned {
            return Err(GameError::AuctionAlreadyHeld);
        }
        let tile = self.landed_unowned(user, &target)?;
        let property_id = tile.property_id.clone().ok_or(GameError::NotOwnable)?;
        let tile_name = tile.name.clone();

        let auction = Auction::open(property_id.clone(), now);
        let end_time = auction.end_time;
        self.auction = Some(auction);
        self.landing_auctioned = true;

        self.push_log(
            LogKind::Action,
            format!("Auction opened for {}", tile_name),
            now,
        );
        Ok(vec![GameEvent::AuctionStarted {
            property_id,
            end_time,
        }])
    }

    fn bid(&mut self, user: &str, amount: Money, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let idx = self.player_index(user)?;
        let (balance, name) = (self.players[idx].balance, self.players[idx].name.clone());
        let auction = self.auction.as_mut().ok_or(GameError::NoActiveAuction)?;
        if amount > balance {
            // report a closed auction before a funds problem
            if auction.is_due(now) {
                return Err(GameError::AuctionClosed);
            }
            return Err(GameError::InsufficientFunds);
        }

        let extended = auction.place_bid(user, &name, amount, now)?;
        let suffix = if extended { " (time extended)" } else { "" };
        self.push_log(
            LogKind::Action,
            format!("{} bid {}{}", name, amount, suffix),
            now,
        );
        Ok(vec![GameEvent::BidPlaced {
            user_id: user.to_string(),
            amount,
            extended,
        }])
    }

    fn pass_auction(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let name = self.name_of(user);
        let auction = self.auction.as_mut().ok_or(GameError::NoActiveAuction)?;
        if !auction.pass(user)? {
            return Err(GameError::AlreadyPassed);
        }
        self.push_log(LogKind::Info, format!("{} passed", name), now);
        Ok(vec![GameEvent::AuctionPassed {
            user_id: user.to_string(),
        }])
    }

    fn finalize_auction(&mut self, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let auction = self.auction.as_ref().ok_or(GameError::NoActiveAuction)?;
        if !auction.is_due(now) {
            return Err(GameError::AuctionStillRunning);
        }
        Ok(self.resolve_auction(now))
    }

    fn resolve_auction(&mut self, now: Timestamp) -> Vec<GameEvent> {
        let Some(auction) = self.auction.take() else {
            return Vec::new();
        };
        let tile_name = self
            .board
            .property_tile(&auction.property_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| auction.property_id.clone());

        let winner = auction
            .highest_bidder
            .as_deref()
            .and_then(|id| self.player_index(id).ok())
            .filter(|&idx| self.players[idx].active)
            .filter(|_| self.owner_of(&auction.property_id).is_none());

        match winner {
            Some(idx) => {
                let amount = auction.highest_bid;
                self.players[idx].balance -= amount;
                let user = self.players[idx].user_id.clone();
                self.ownership.insert(auction.property_id.clone(), user.clone());
                let name = self.players[idx].name.clone();
                self.push_log(
                    LogKind::Success,
                    format!("{} won the auction for {} with {}", name, tile_name, amount),
                    now,
                );
                vec![GameEvent::AuctionWon {
                    user_id: user,
                    property_id: auction.property_id,
                    amount,
                }]
            }
            None => {
                self.push_log(
                    LogKind::Info,
                    format!("Auction for {} closed without a sale", tile_name),
                    now,
                );
                vec![GameEvent::AuctionClosed {
                    property_id: auction.property_id,
                }]
            }
        }
    }

    // ==================== Trading ====================

    fn initiate_trade(&mut self, user: &str, proposal: TradeProposal, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        if self.trade.is_some() {
            return Err(GameError::TradeInProgress);
        }
        if proposal.target_id == user {
            return Err(GameError::CannotTradeWithSelf);
        }
        let target = self
            .player(&proposal.target_id)
            .filter(|p| p.active)
            .ok_or(GameError::UnknownPlayer)?;
        if proposal.offer_cash < 0 || proposal.request_cash < 0 {
            return Err(GameError::InvalidAmount);
        }

        let target_name = target.name.clone();
        let offerer_name = self.name_of(user);
        let offer = TradeOffer::from_proposal(
            format!("trade-{}", now),
            user.to_string(),
            offerer_name.clone(),
            target_name.clone(),
            proposal,
        );
        let trade_id = offer.id.clone();
        self.trade = Some(offer);

        self.push_log(
            LogKind::Action,
            format!("{} proposed a trade to {}", offerer_name, target_name),
            now,
        );
        Ok(vec![GameEvent::TradeProposed { trade_id }])
    }

    fn accept_trade(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let trade = self.trade.as_ref().ok_or(GameError::NoActiveTrade)?;
        if trade.target_id != user {
            return Err(GameError::NotTradeTarget);
        }
        let offerer = self.player_index(&trade.offerer_id)?;
        let target = self.player_index(&trade.target_id)?;
        let Some(trade) = self.trade.take() else {
            return Err(GameError::NoActiveTrade);
        };

        let affordable = self.players[offerer].balance >= trade.offer_cash
            && self.players[target].balance >= trade.request_cash;
        if !affordable {
            self.push_log(
                LogKind::Alert,
                format!(
                    "Trade between {} and {} failed: insufficient funds",
                    trade.offerer_name, trade.target_name
                ),
                now,
            );
            return Ok(vec![GameEvent::TradeCancelled { trade_id: trade.id }]);
        }

        self.players[offerer].balance += trade.request_cash - trade.offer_cash;
        self.players[target].balance += trade.offer_cash - trade.request_cash;

        for id in &trade.offer_properties {
            if self.owner_of(id) == Some(&trade.offerer_id) {
                self.ownership.insert(id.clone(), trade.target_id.clone());
            }
        }
        for id in &trade.request_properties {
            if self.owner_of(id) == Some(&trade.target_id) {
                self.ownership.insert(id.clone(), trade.offerer_id.clone());
            }
        }

        self.push_log(
            LogKind::Success,
            format!("{} accepted the trade from {}", trade.target_name, trade.offerer_name),
            now,
        );
        Ok(vec![GameEvent::TradeCompleted { trade_id: trade.id }])
    }

    fn reject_trade(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        let trade = self.trade.as_ref().ok_or(GameError::NoActiveTrade)?;
        if !trade.involves(user) {
            return Err(GameError::NotTradeParty);
        }
        let Some(trade) = self.trade.take() else {
            return Err(GameError::NoActiveTrade);
        };
        let name = self.name_of(user);
        self.push_log(
            LogKind::Alert,
            format!("{} rejected the trade", name),
            now,
        );
        Ok(vec![GameEvent::TradeCancelled { trade_id: trade.id }])
    }

    // ==================== Credit ====================

    fn take_loan(&mut self, user: &str, amount: Money, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let owned = self.count_owned(user);
        let idx = self.player_index(user)?;
        let rate = economy::take_loan(&mut self.players[idx], amount, owned)?;

        let name = self.players[idx].name.clone();
        self.push_log(
            LogKind::Success,
            format!("{} took a loan of {} at {}%", name, amount, rate),
            now,
        );
        Ok(vec![GameEvent::LoanTaken {
            user_id: user.to_string(),
            amount,
            rate,
        }])
    }

    fn pay_loan(&mut self, user: &str, amount: Money, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let owned = self.count_owned(user);
        let idx = self.player_index(user)?;
        let on_time = economy::repay_loan(&mut self.players[idx], amount, owned)?;

        let name = self.players[idx].name.clone();
        let message = if on_time {
            format!("{} repaid their loan on time", name)
        } else {
            format!("{} repaid {} of their loan", name, amount)
        };
        self.push_log(LogKind::Success, message, now);
        Ok(vec![GameEvent::LoanRepaid {
            user_id: user.to_string(),
            amount,
            on_time,
        }])
    }

    fn declare_bankruptcy(&mut self, user: &str, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.check_active_game()?;
        let idx = self.player_index(user)?;
        self.players[idx].active = false;

        for property_id in self.properties_of(user) {
            if let Some(tile) = self.board.property_tile_mut(&property_id) {
                tile.building_level = 0;
                tile.mortgaged = false;
            }
            self.ownership.remove(&property_id);
        }
        if self
            .pending_rent
            .as_ref()
            .is_some_and(|r| r.debtor_id == user || r.creditor_id == user)
        {
            self.pending_rent = None;
        }
        if self.trade.as_ref().is_some_and(|t| t.involves(user)) {
            self.trade = None;
        }

        let name = self.players[idx].name.clone();
        self.push_log(LogKind::Alert, format!("{} declared bankruptcy", name), now);
        let mut events = vec![GameEvent::PlayerBankrupt {
            user_id: user.to_string(),
        }];

        let survivors: Vec<UserId> = self.active_players().map(|p| p.user_id.clone()).collect();
        if survivors.len() <= 1 {
            self.status = GameStatus::Finished;
            self.winner = survivors.into_iter().next();
            self.auction = None;
            let message = match &self.winner {
                Some(winner) => format!("{} wins the game!", self.name_of(winner)),
                None => "The game is over".to_string(),
            };
            self.push_log(LogKind::Success, message, now);
            events.push(GameEvent::GameFinished {
                winner: self.winner.clone(),
            });
            return Ok(events);
        }

        if self.is_current(user) {
            match self.next_active_after(user) {
                Some(next) => events.push(self.hand_turn_to(next, now)),
                None => self.push_log(LogKind::Alert, "No active player can take the turn", now),
            }
        }
        Ok(events)
    }

    // ==================== Valid Actions ====================

    /// Every action `user` could legally take right now (building and
    /// mortgage actions are enumerated per property)
    pub fn valid_actions(&self, user: &str) -> Vec<GameAction> {
        let mut actions = Vec::new();
        let Some(player) = self.player(user) else {
            return actions;
        };

        match self.status {
            GameStatus::Waiting => {
                if self.players.len() >= MIN_PLAYERS {
                    actions.push(GameAction::StartGame(StartGame::default()));
                }
                if user == self.host_id && self.players.len() < MAX_PLAYERS {
                    actions.push(GameAction::AddBot(AddBot::default()));
                }
                return actions;
            }
            GameStatus::RollingOrder => {
                if !self.order_rolls.iter().any(|(id, _)| id == user) {
                    actions.push(GameAction::RollOrder);
                }
                return actions;
            }
            GameStatus::Finished => return actions,
            GameStatus::Active => {}
        }
        if !player.active {
            return actions;
        }

        if let Some(rent) = &self.pending_rent {
            if rent.creditor_id == user {
                actions.push(GameAction::CollectRent);
            }
        }
        if let Some(auction) = &self.auction {
            if !auction.has_passed(user) && !auction.is_highest_bidder(user) {
                let next_bid = auction.highest_bid + 10;
                if player.balance >= next_bid {
                    actions.push(GameAction::bid(next_bid));
                }
                actions.push(GameAction::PassAuction);
            }
        }
        if let Some(trade) = &self.trade {
            if trade.target_id == user {
                actions.push(GameAction::AcceptTrade);
            }
            if trade.involves(user) {
                actions.push(GameAction::RejectTrade);
            }
        }

        if self.is_current(user) {
            if self.card_pending.is_some() {
                actions.push(GameAction::DrawCard);
            }
            if self.can_roll(user) {
                actions.push(GameAction::RollDice);
            }
            if let Ok(tile) = self.landed_unowned(user, &TileTarget::default()) {
                if player.balance >= tile.price {
                    actions.push(GameAction::buy_here());
                }
                if self.auction.is_none() && !self.landing_auctioned {
                    actions.push(GameAction::auction_here());
                }
            }
            for id in self.properties_of(user) {
                if self.check_buy_building(user, &id).is_ok() {
                    actions.push(GameAction::buy_building(id.clone()));
                }
                if self.check_sell_building(user, &id).is_ok() {
                    actions.push(GameAction::sell_building(id));
                }
            }
            let owes_rent = self
                .pending_rent
                .as_ref()
                .is_some_and(|r| r.debtor_id == user);
            if !owes_rent && self.card_pending.is_none() && self.dice != (0, 0) {
                actions.push(GameAction::EndTurn);
            }
        }

        for id in self.properties_of(user) {
            if self.check_mortgage(user, &id).is_ok() {
                actions.push(GameAction::mortgage(id));
            }
        }
        actions.push(GameAction::DeclareBankruptcy);
        actions
    }
}
