//! Chance and community cards.
//!
//! Cards carry a small effect code such as `pay:200` or `move:JAIL`. The code
//! is parsed into a [`CardEffect`] when the card is drawn; codes the engine
//! does not understand parse to [`CardEffect::Unknown`] and do nothing.

use crate::board::Money;
use serde::{Deserialize, Serialize};

/// Bonus paid by the `jail_free` card
pub const JAIL_FREE_BONUS: Money = 50;

/// Which deck a card belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardDeck {
    Chance,
    Community,
}

/// A reference card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: u32,
    pub deck: CardDeck,
    pub title: String,
    pub description: String,
    pub effect: String,
}

impl Card {
    pub fn parsed_effect(&self) -> CardEffect {
        CardEffect::parse(&self.effect)
    }
}

/// Where a movement card sends the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    /// Straight to GO, collecting the given amount
    Go { bonus: Money },
    Jail,
    /// Relative move; negative goes backwards
    Relative(i32),
    NearestRailroad,
    NearestUtility,
    RandomProperty,
    LastProperty,
}

/// Parsed card effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEffect {
    Collect(Money),
    Pay(Money),
    /// Every other active player pays the drawer
    CollectFromAll(Money),
    /// The drawer pays every other active player
    PayToAll(Money),
    Repairs { per_house: Money, per_hotel: Money },
    Move(MoveTarget),
    JailFree,
    Unknown(String),
}

impl CardEffect {
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        let unknown = || CardEffect::Unknown(code.to_string());

        if code == "jail_free" {
            return CardEffect::JailFree;
        }

        let Some((verb, arg)) = code.split_once(':') else {
            return unknown();
        };
        let amount = || arg.trim().parse::<Money>().ok().filter(|n| *n >= 0);

        match verb {
            "collect" => amount().map(CardEffect::Collect).unwrap_or_else(unknown),
            "pay" => amount().map(CardEffect::Pay).unwrap_or_else(unknown),
            "collect_all" => amount()
                .map(CardEffect::CollectFromAll)
                .unwrap_or_else(unknown),
            "pay_all" => amount().map(CardEffect::PayToAll).unwrap_or_else(unknown),
            "repair" => {
                let mut parts = arg.split(':').map(|p| p.trim().parse::<Money>());
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(per_house)), Some(Ok(per_hotel)), None) => CardEffect::Repairs {
                        per_house,
                        per_hotel,
                    },
                    _ => unknown(),
                }
            }
            "move" => match arg.trim() {
                "GO" => CardEffect::Move(MoveTarget::Go { bonus: 200 }),
                "GO_BONUS" => CardEffect::Move(MoveTarget::Go { bonus: 500 }),
                "JAIL" => CardEffect::Move(MoveTarget::Jail),
                "nearest_railroad" => CardEffect::Move(MoveTarget::NearestRailroad),
                "nearest_utility" => CardEffect::Move(MoveTarget::NearestUtility),
                "random_property" => CardEffect::Move(MoveTarget::RandomProperty),
                "last_property" => CardEffect::Move(MoveTarget::LastProperty),
                other => other
                    .parse::<i32>()
                    .ok()
                    .filter(|steps| *steps != 0)
                    .map(|steps| CardEffect::Move(MoveTarget::Relative(steps)))
                    .unwrap_or_else(unknown),
            },
            _ => unknown(),
        }
    }
}
