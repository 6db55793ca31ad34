//! Tycoon - a multiplayer property-trading board game engine
//!
//! This crate provides the authoritative game logic for Tycoon, including:
//! - Reference data (property catalog, board layout, card decks)
//! - A 64-tile board with ownership kept in one place
//! - Rent, building, mortgage and credit rules
//! - Timed auctions with anti-sniping and player-to-player trades
//! - The game state machine with full rule enforcement
//! - Rule-based bots and parsing of advisor decisions
//!
//! # Architecture
//!
//! The engine is synchronous and free of I/O. Time and randomness are
//! injected through [`game::ActionContext`], so the same code runs in the
//! server and in deterministic tests.
//!
//! # Modules
//!
//! - [`catalog`]: Property definitions, layout and card decks
//! - [`board`]: Tiles and board navigation
//! - [`player`]: Seats, credit profiles and bot personalities
//! - [`economy`]: Rent, building, mortgage and loan rules
//! - [`auction`] / [`trade`]: Auction timing and trade offers
//! - [`actions`]: Inbound commands and resulting events
//! - [`game`]: Game state machine
//! - [`bot`] / [`advice`]: Automated players

pub mod actions;
pub mod advice;
pub mod auction;
pub mod board;
pub mod bot;
pub mod cards;
pub mod catalog;
pub mod dice;
pub mod economy;
pub mod game;
pub mod player;
pub mod trade;

// Re-export commonly used types
pub use actions::{ActionEnvelope, GameAction, GameEvent, PayloadError};
pub use advice::{AdvisorReply, Decision, DecisionError};
pub use auction::Auction;
pub use board::{Board, Money, Position, PropertyId, Tile, TileKind, UserId};
pub use bot::{next_bot_task, Bot, BotTask, BotTaskKind};
pub use cards::{Card, CardDeck, CardEffect};
pub use catalog::{Catalog, CatalogError};
pub use dice::{DiceSource, LoadedDice, RandomDice};
pub use game::{ActionContext, GameError, GameState, GameStatus, LogEntry, LogKind, PendingRent, Timestamp};
pub use player::{BotPersonality, Player, TokenColor};
pub use trade::{TradeOffer, TradeProposal};
