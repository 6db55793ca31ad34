//! Game actions that players can take.
//!
//! This module defines every command a player (or bot) can submit and the
//! events that result from applying them. Inbound messages arrive as an
//! envelope `{ "action": <VERB>, "payload": <object> }`; the envelope is
//! turned into a typed [`GameAction`] once, at the boundary.

use crate::board::{Money, PropertyId, UserId};
use crate::cards::CardDeck;
use crate::player::TokenColor;
use crate::trade::TradeProposal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A recognised verb whose payload did not match its shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed payload for {verb}: {reason}")]
pub struct PayloadError {
    pub verb: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartGame {
    #[serde(default)]
    pub initial_balance: Option<Money>,
}

/// Optional property reference; defaults to the tile the actor stands on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileTarget {
    #[serde(default)]
    pub property_id: Option<PropertyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTarget {
    pub property_id: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentConfirmation {
    pub target_id: UserId,
    pub property_id: PropertyId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddBot {
    #[serde(default)]
    pub personality_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub token_color: Option<TokenColor>,
    #[serde(default)]
    pub token_shape: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub message: String,
}

/// All possible actions a player can take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameAction {
    // ==================== Lobby ====================
    /// Announce presence; seating itself goes through the registry
    JoinGame,
    StartGame(StartGame),
    AddBot(AddBot),
    UpdatePlayerConfig(PlayerConfig),
    SendChat(ChatLine),

    // ==================== Turn Flow ====================
    /// One 2d6 roll to decide turn order
    RollOrder,
    RollDice,
    DrawCard,
    EndTurn,

    // ==================== Property ====================
    BuyProperty(TileTarget),
    BuyBuilding(PropertyTarget),
    SellBuilding(PropertyTarget),
    MortgageProperty(PropertyTarget),
    UnmortgageProperty(PropertyTarget),
    SellProperty(PropertyTarget),

    // ==================== Rent ====================
    /// Creditor confirms a specific pending charge
    PayRent(RentConfirmation),
    CollectRent,

    // ==================== Auctions ====================
    StartAuction(TileTarget),
    Bid(Amount),
    PassAuction,
    FinalizeAuction,

    // ==================== Trading ====================
    InitiateTrade(TradeProposal),
    AcceptTrade,
    RejectTrade,

    // ==================== Credit ====================
    TakeLoan(Amount),
    PayLoan(Amount),
    DeclareBankruptcy,
}

impl GameAction {
    /// Every verb the engine understands
    pub const VERBS: [&'static str; 27] = [
        "JOIN_GAME",
        "START_GAME",
        "ROLL_ORDER",
        "ROLL_DICE",
        "END_TURN",
        "START_AUCTION",
        "BID",
        "PASS_AUCTION",
        "FINALIZE_AUCTION",
        "BUY_PROPERTY",
        "TAKE_LOAN",
        "PAY_LOAN",
        "INITIATE_TRADE",
        "ACCEPT_TRADE",
        "REJECT_TRADE",
        "DRAW_CARD",
        "PAY_RENT",
        "COLLECT_RENT",
        "BUY_BUILDING",
        "SELL_BUILDING",
        "MORTGAGE_PROPERTY",
        "UNMORTGAGE_PROPERTY",
        "SELL_PROPERTY",
        "ADD_BOT",
        "DECLARE_BANKRUPTCY",
        "UPDATE_PLAYER_CONFIG",
        "SEND_CHAT",
    ];

    /// Parse an envelope. Unknown verbs yield `Ok(None)`; a known verb with a
    /// payload of the wrong shape is an error.
    pub fn from_envelope(envelope: &ActionEnvelope) -> Result<Option<GameAction>, PayloadError> {
        Self::from_parts(&envelope.action, &envelope.payload)
    }

    pub fn from_parts(verb: &str, payload: &serde_json::Value) -> Result<Option<GameAction>, PayloadError> {
        let action = match verb {
            "JOIN_GAME" => GameAction::JoinGame,
            "START_GAME" => GameAction::StartGame(lenient(verb, payload)?),
            "ADD_BOT" => GameAction::AddBot(lenient(verb, payload)?),
            "UPDATE_PLAYER_CONFIG" => GameAction::UpdatePlayerConfig(lenient(verb, payload)?),
            "SEND_CHAT" => GameAction::SendChat(strict(verb, payload)?),
            "ROLL_ORDER" => GameAction::RollOrder,
            "ROLL_DICE" => GameAction::RollDice,
            "DRAW_CARD" => GameAction::DrawCard,
            "END_TURN" => GameAction::EndTurn,
            "BUY_PROPERTY" => GameAction::BuyProperty(lenient(verb, payload)?),
            "BUY_BUILDING" => GameAction::BuyBuilding(strict(verb, payload)?),
            "SELL_BUILDING" => GameAction::SellBuilding(strict(verb, payload)?),
            "MORTGAGE_PROPERTY" => GameAction::MortgageProperty(strict(verb, payload)?),
            "UNMORTGAGE_PROPERTY" => GameAction::UnmortgageProperty(strict(verb, payload)?),
            "SELL_PROPERTY" => GameAction::SellProperty(strict(verb, payload)?),
            "PAY_RENT" => GameAction::PayRent(strict(verb, payload)?),
            "COLLECT_RENT" => GameAction::CollectRent,
            "START_AUCTION" => GameAction::StartAuction(lenient(verb, payload)?),
            "BID" => GameAction::Bid(strict(verb, payload)?),
            "PASS_AUCTION" => GameAction::PassAuction,
            "FINALIZE_AUCTION" => GameAction::FinalizeAuction,
            "INITIATE_TRADE" => GameAction::InitiateTrade(strict(verb, payload)?),
            "ACCEPT_TRADE" => GameAction::AcceptTrade,
            "REJECT_TRADE" => GameAction::RejectTrade,
            "TAKE_LOAN" => GameAction::TakeLoan(strict(verb, payload)?),
            "PAY_LOAN" => GameAction::PayLoan(strict(verb, payload)?),
            "DECLARE_BANKRUPTCY" => GameAction::DeclareBankruptcy,
            _ => return Ok(None),
        };
        Ok(Some(action))
    }

    /// Wire verb for this action
    pub fn verb(&self) -> &'static str {
        match self {
            GameAction::JoinGame => "JOIN_GAME",
            GameAction::StartGame(_) => "START_GAME",
            GameAction::AddBot(_) => "ADD_BOT",
            GameAction::UpdatePlayerConfig(_) => "UPDATE_PLAYER_CONFIG",
            GameAction::SendChat(_) => "SEND_CHAT",
            GameAction::RollOrder => "ROLL_ORDER",
            GameAction::RollDice => "ROLL_DICE",
            GameAction::DrawCard => "DRAW_CARD",
            GameAction::EndTurn => "END_TURN",
            GameAction::BuyProperty(_) => "BUY_PROPERTY",
            GameAction::BuyBuilding(_) => "BUY_BUILDING",
            GameAction::SellBuilding(_) => "SELL_BUILDING",
            GameAction::MortgageProperty(_) => "MORTGAGE_PROPERTY",
            GameAction::UnmortgageProperty(_) => "UNMORTGAGE_PROPERTY",
            GameAction::SellProperty(_) => "SELL_PROPERTY",
            GameAction::PayRent(_) => "PAY_RENT",
            GameAction::CollectRent => "COLLECT_RENT",
            GameAction::StartAuction(_) => "START_AUCTION",
            GameAction::Bid(_) => "BID",
            GameAction::PassAuction => "PASS_AUCTION",
            GameAction::FinalizeAuction => "FINALIZE_AUCTION",
            GameAction::InitiateTrade(_) => "INITIATE_TRADE",
            GameAction::AcceptTrade => "ACCEPT_TRADE",
            GameAction::RejectTrade => "REJECT_TRADE",
            GameAction::TakeLoan(_) => "TAKE_LOAN",
            GameAction::PayLoan(_) => "PAY_LOAN",
            GameAction::DeclareBankruptcy => "DECLARE_BANKRUPTCY",
        }
    }

    /// Shorthand constructors used by bots and tests
    pub fn buy_building(property_id: impl Into<PropertyId>) -> Self {
        GameAction::BuyBuilding(PropertyTarget {
            property_id: property_id.into(),
        })
    }

    pub fn sell_building(property_id: impl Into<PropertyId>) -> Self {
        GameAction::SellBuilding(PropertyTarget {
            property_id: property_id.into(),
        })
    }

    pub fn mortgage(property_id: impl Into<PropertyId>) -> Self {
        GameAction::MortgageProperty(PropertyTarget {
            property_id: property_id.into(),
        })
    }

    pub fn bid(amount: Money) -> Self {
        GameAction::Bid(Amount { amount })
    }

    pub fn buy_here() -> Self {
        GameAction::BuyProperty(TileTarget::default())
    }

    pub fn auction_here() -> Self {
        GameAction::StartAuction(TileTarget::default())
    }
}

/// Missing or null payloads are treated as `{}`
fn lenient<T: DeserializeOwned + Default>(verb: &str, payload: &serde_json::Value) -> Result<T, PayloadError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    strict(verb, payload)
}

fn strict<T: DeserializeOwned>(verb: &str, payload: &serde_json::Value) -> Result<T, PayloadError> {
    serde_json::from_value(payload.clone()).map_err(|e| PayloadError {
        verb: verb.to_string(),
        reason: e.to_string(),
    })
}

/// Events that occur as a result of actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameEvent {
    GameStarted { initial_balance: Money },
    OrderRolled { user_id: UserId, roll: u8 },
    TurnOrderDecided { order: Vec<UserId> },
    DiceRolled { user_id: UserId, dice: (u8, u8) },
    PlayerMoved { user_id: UserId, from: u8, to: u8 },
    PassedGo { user_id: UserId, credit: Money },
    LoanInterestCharged { user_id: UserId, interest: Money, payment: Money, covered: bool },
    TaxPaid { user_id: UserId, amount: Money },
    SentToJail { user_id: UserId },
    RentCharged { debtor: UserId, creditor: UserId, property_id: PropertyId, amount: Money },
    RentCollected { debtor: UserId, creditor: UserId, amount: Money },
    CardDrawn { user_id: UserId, deck: CardDeck, card_id: u32, title: String },
    CashChanged { user_id: UserId, delta: Money },
    PropertyBought { user_id: UserId, property_id: PropertyId, price: Money },
    BuildingBought { property_id: PropertyId, level: u8, cost: Money },
    BuildingSold { property_id: PropertyId, level: u8, refund: Money },
    PropertyMortgaged { property_id: PropertyId, amount: Money },
    PropertyUnmortgaged { property_id: PropertyId, amount: Money },
    PropertySold { property_id: PropertyId, amount: Money },
    AuctionStarted { property_id: PropertyId, end_time: u64 },
    BidPlaced { user_id: UserId, amount: Money, extended: bool },
    AuctionPassed { user_id: UserId },
    AuctionWon { user_id: UserId, property_id: PropertyId, amount: Money },
    AuctionClosed { property_id: PropertyId },
    TradeProposed { trade_id: String },
    TradeCompleted { trade_id: String },
    TradeCancelled { trade_id: String },
    LoanTaken { user_id: UserId, amount: Money, rate: Money },
    LoanRepaid { user_id: UserId, amount: Money, on_time: bool },
    PlayerBankrupt { user_id: UserId },
    BotAdded { user_id: UserId },
    PlayerUpdated { user_id: UserId },
    ChatPosted { user_id: UserId },
    TurnChanged { user_id: UserId },
    GameFinished { winner: Option<UserId> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(verb: &str, payload: serde_json::Value) -> Result<Option<GameAction>, PayloadError> {
        GameAction::from_envelope(&ActionEnvelope {
            action: verb.to_string(),
            payload,
        })
    }

    #[test]
    fn test_unit_verbs_ignore_payload() {
        assert_eq!(parse("ROLL_DICE", json!({})), Ok(Some(GameAction::RollDice)));
        assert_eq!(parse("END_TURN", json!(null)), Ok(Some(GameAction::EndTurn)));
    }

    #[test]
    fn test_unknown_verb_is_ignored() {
        assert_eq!(parse("FLY_TO_MOON", json!({})), Ok(None));
    }

    #[test]
    fn test_typed_payloads() {
        assert_eq!(
            parse("BID", json!({"amount": 120})),
            Ok(Some(GameAction::bid(120)))
        );
        assert_eq!(
            parse("BUY_PROPERTY", json!(null)),
            Ok(Some(GameAction::buy_here()))
        );
        assert_eq!(
            parse("START_GAME", json!({"initial_balance": 2000})),
            Ok(Some(GameAction::StartGame(StartGame {
                initial_balance: Some(2000)
            })))
        );
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let err = parse("BID", json!({"amount": "lots"})).unwrap_err();
        assert_eq!(err.verb, "BID");
        assert!(parse("BUY_BUILDING", json!({})).is_err());
    }

    #[test]
    fn test_verbs_match_wire_names() {
        for verb in GameAction::VERBS {
            let payload = match verb {
                "BID" | "TAKE_LOAN" | "PAY_LOAN" => json!({"amount": 1}),
                "SEND_CHAT" => json!({"message": "hi"}),
                "PAY_RENT" => json!({"target_id": "a", "property_id": "p"}),
                "INITIATE_TRADE" => json!({"target_id": "a"}),
                "BUY_BUILDING" | "SELL_BUILDING" | "MORTGAGE_PROPERTY" | "UNMORTGAGE_PROPERTY"
                | "SELL_PROPERTY" => json!({"property_id": "p"}),
                _ => json!({}),
            };
            let action = parse(verb, payload).unwrap().unwrap();
            assert_eq!(action.verb(), verb);
        }
    }

    #[test]
    fn test_action_serializes_as_envelope() {
        let value = serde_json::to_value(GameAction::bid(75)).unwrap();
        assert_eq!(value, json!({"action": "BID", "payload": {"amount": 75}}));
    }
}
