//! Player state.
//!
//! This module contains:
//! - Player struct with balance, position, loan and credit profile
//! - Token colour palette used when seating players
//! - Bot personalities and strategy tags

use crate::board::{Money, Position, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balance every player starts with unless START_GAME overrides it
pub const STARTING_BALANCE: Money = 1500;

/// Score assigned the first time a player touches credit
pub const INITIAL_CREDIT_SCORE: i64 = 700;

/// Token colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Cyan,
    Pink,
    /// Fallback once the palette is exhausted
    Gray,
}

impl TokenColor {
    /// Seat colours in assignment order
    pub const PALETTE: [TokenColor; 8] = [
        TokenColor::Red,
        TokenColor::Blue,
        TokenColor::Green,
        TokenColor::Yellow,
        TokenColor::Purple,
        TokenColor::Orange,
        TokenColor::Cyan,
        TokenColor::Pink,
    ];

    /// First palette colour nobody is using yet
    pub fn first_unused<'a>(taken: impl IntoIterator<Item = &'a TokenColor>) -> TokenColor {
        let taken: Vec<TokenColor> = taken.into_iter().copied().collect();
        Self::PALETTE
            .into_iter()
            .find(|c| !taken.contains(c))
            .unwrap_or(TokenColor::Gray)
    }
}

/// Credit history used for scoring, interest and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditProfile {
    /// 300-850
    pub score: i64,
    pub loans_taken: u32,
    pub loans_paid_on_time: u32,
    /// Consecutive GO passes with an outstanding loan
    pub rounds_in_debt: u32,
    pub last_loan_round: u32,
    /// Incremented on every GO pass
    pub current_round: u32,
}

impl Default for CreditProfile {
    fn default() -> Self {
        Self {
            score: INITIAL_CREDIT_SCORE,
            loans_taken: 0,
            loans_paid_on_time: 0,
            rounds_in_debt: 0,
            last_loan_round: 0,
            current_round: 0,
        }
    }
}

/// How a bot reaches its decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStrategy {
    /// Fixed rule ladder, no collaborator call
    Heuristic,
    /// Asks the decision advisor
    Advisor,
}

/// Bot personality parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotPersonality {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// 0.0 conservative .. 1.0 gambler
    pub risk_tolerance: f64,
    /// 0.0 passive .. 1.0 monopolist
    pub aggression: f64,
    pub negotiation: f64,
    pub strategy: BotStrategy,
}

/// Every personality a host can add
pub static BOT_PERSONALITIES: [BotPersonality; 5] = [
    BotPersonality {
        id: "classic",
        name: "Classic Bot",
        description: "Plays the numbers with a fixed rulebook.",
        risk_tolerance: 0.5,
        aggression: 0.5,
        negotiation: 0.0,
        strategy: BotStrategy::Heuristic,
    },
    BotPersonality {
        id: "balanced",
        name: "The Accountant",
        description: "Looks for fair deals without overreaching.",
        risk_tolerance: 0.5,
        aggression: 0.5,
        negotiation: 0.5,
        strategy: BotStrategy::Advisor,
    },
    BotPersonality {
        id: "tycoon",
        name: "The Tycoon",
        description: "Wants monopolies and spends hard to get them.",
        risk_tolerance: 0.8,
        aggression: 0.9,
        negotiation: 0.7,
        strategy: BotStrategy::Advisor,
    },
    BotPersonality {
        id: "saver",
        name: "The Saver",
        description: "Buys only what it must and avoids debt.",
        risk_tolerance: 0.2,
        aggression: 0.3,
        negotiation: 0.4,
        strategy: BotStrategy::Advisor,
    },
    BotPersonality {
        id: "speculator",
        name: "The Speculator",
        description: "Loves auctions and trades.",
        risk_tolerance: 0.9,
        aggression: 0.6,
        negotiation: 0.9,
        strategy: BotStrategy::Advisor,
    },
];

impl BotPersonality {
    /// Look up a personality, falling back to `classic`
    pub fn by_id(id: &str) -> &'static BotPersonality {
        BOT_PERSONALITIES
            .iter()
            .find(|p| p.id == id)
            .unwrap_or(&BOT_PERSONALITIES[0])
    }

    /// Whether this personality leans towards accepting close trades
    pub fn is_agreeable(&self) -> bool {
        self.negotiation > 0.5 || self.risk_tolerance > 0.6
    }
}

/// Bot-specific seat data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSeat {
    pub personality_id: String,
    pub strategy: BotStrategy,
}

impl BotSeat {
    pub fn personality(&self) -> &'static BotPersonality {
        BotPersonality::by_id(&self.personality_id)
    }
}

/// A seated player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub user_id: UserId,
    pub name: String,
    pub token_color: TokenColor,
    #[serde(default)]
    pub token_shape: Option<String>,
    pub balance: Money,
    pub position: Position,
    pub in_jail: bool,
    /// False once bankrupt
    pub active: bool,
    pub loan: Money,
    /// Created lazily on first credit use
    #[serde(default)]
    pub credit: Option<CreditProfile>,
    #[serde(default)]
    pub bot: Option<BotSeat>,
    /// Landings per board position
    #[serde(default)]
    pub tile_visits: BTreeMap<Position, u32>,
}

impl Player {
    pub fn new(user_id: impl Into<UserId>, name: impl Into<String>, token_color: TokenColor) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            token_color,
            token_shape: None,
            balance: STARTING_BALANCE,
            position: 0,
            in_jail: false,
            active: true,
            loan: 0,
            credit: None,
            bot: None,
            tile_visits: BTreeMap::new(),
        }
    }

    pub fn new_bot(
        user_id: impl Into<UserId>,
        name: impl Into<String>,
        token_color: TokenColor,
        personality: &BotPersonality,
    ) -> Self {
        let mut player = Self::new(user_id, name, token_color);
        player.bot = Some(BotSeat {
            personality_id: personality.id.to_string(),
            strategy: personality.strategy,
        });
        player
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }

    /// Credit profile, creating it on first use
    pub fn credit_mut(&mut self) -> &mut CreditProfile {
        self.credit.get_or_insert_with(CreditProfile::default)
    }

    pub fn credit_score(&self) -> i64 {
        self.credit
            .as_ref()
            .map(|c| c.score)
            .unwrap_or(INITIAL_CREDIT_SCORE)
    }

    pub fn record_visit(&mut self, position: Position) {
        *self.tile_visits.entry(position).or_insert(0) += 1;
    }
}
