//! Player-to-player trade offers. A session holds at most one.

use crate::board::{Money, PropertyId, UserId};
use serde::{Deserialize, Serialize};

/// Value a bot assigns to each property in an offer
pub const BOT_PROPERTY_VALUE: Money = 200;

/// Resolved offers are cleared from the session, so a stored offer is always pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
}

/// What the proposer sends with INITIATE_TRADE
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub target_id: UserId,
    #[serde(default)]
    pub offer_properties: Vec<PropertyId>,
    #[serde(default)]
    pub offer_cash: Money,
    #[serde(default)]
    pub request_properties: Vec<PropertyId>,
    #[serde(default)]
    pub request_cash: Money,
}

/// A pending trade between two players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub id: String,
    pub offerer_id: UserId,
    pub offerer_name: String,
    pub target_id: UserId,
    pub target_name: String,
    pub offer_properties: Vec<PropertyId>,
    pub offer_cash: Money,
    pub request_properties: Vec<PropertyId>,
    pub request_cash: Money,
    pub status: TradeStatus,
}

impl TradeOffer {
    pub fn from_proposal(
        id: String,
        offerer_id: UserId,
        offerer_name: String,
        target_name: String,
        proposal: TradeProposal,
    ) -> Self {
        Self {
            id,
            offerer_id,
            offerer_name,
            target_id: proposal.target_id,
            target_name,
            offer_properties: proposal.offer_properties,
            offer_cash: proposal.offer_cash,
            request_properties: proposal.request_properties,
            request_cash: proposal.request_cash,
            status: TradeStatus::Pending,
        }
    }

    pub fn involves(&self, user: &str) -> bool {
        self.offerer_id == user || self.target_id == user
    }

    /// Rough value of what the target receives
    pub fn offered_value(&self) -> Money {
        self.offer_cash + self.offer_properties.len() as Money * BOT_PROPERTY_VALUE
    }

    /// Rough value of what the target gives up
    pub fn requested_value(&self) -> Money {
        self.request_cash + self.request_properties.len() as Money * BOT_PROPERTY_VALUE
    }
}
