//! Timed property auctions.
//!
//! An auction runs for [`AUCTION_DURATION_MS`]. A bid landing with less than
//! [`ANTI_SNIPE_WINDOW_MS`] left pushes the end to `now + ANTI_SNIPE_WINDOW_MS`.
//! Once somebody has bid, [`SILENCE_WINDOW_MS`] without another bid also
//! closes the auction. Both limits are folded into a single
//! [`Auction::deadline`] used by bids, explicit finalization and the server's
//! periodic sweep.

use crate::board::{Money, PropertyId, UserId};
use crate::game::{GameError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const AUCTION_DURATION_MS: u64 = 30_000;
pub const ANTI_SNIPE_WINDOW_MS: u64 = 10_000;
pub const SILENCE_WINDOW_MS: u64 = 5_000;

/// Floor a first bid has to beat
pub const STARTING_BID: Money = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub property_id: PropertyId,
    pub highest_bid: Money,
    pub highest_bidder: Option<UserId>,
    pub highest_bidder_name: Option<String>,
    pub end_time: Timestamp,
    pub last_bid_time: Option<Timestamp>,
    pub passed: BTreeSet<UserId>,
}

impl Auction {
    pub fn open(property_id: PropertyId, now: Timestamp) -> Self {
        Self {
            property_id,
            highest_bid: STARTING_BID,
            highest_bidder: None,
            highest_bidder_name: None,
            end_time: now + AUCTION_DURATION_MS,
            last_bid_time: None,
            passed: BTreeSet::new(),
        }
    }

    /// When the auction stops accepting bids
    pub fn deadline(&self) -> Timestamp {
        match self.last_bid_time {
            Some(last) => self.end_time.min(last + SILENCE_WINDOW_MS),
            None => self.end_time,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        now >= self.deadline()
    }

    pub fn has_passed(&self, user: &str) -> bool {
        self.passed.contains(user)
    }

    pub fn is_highest_bidder(&self, user: &str) -> bool {
        self.highest_bidder.as_deref() == Some(user)
    }

    /// Record a bid. Funds are checked by the caller. Returns true when the
    /// anti-snipe rule extended the end time.
    pub fn place_bid(
        &mut self,
        bidder: &str,
        bidder_name: &str,
        amount: Money,
        now: Timestamp,
    ) -> Result<bool, GameError> {
        if self.is_due(now) {
            return Err(GameError::AuctionClosed);
        }
        if self.has_passed(bidder) {
            return Err(GameError::AlreadyPassed);
        }
        if amount <= self.highest_bid {
            return Err(GameError::BidTooLow {
                highest: self.highest_bid,
            });
        }

        self.highest_bid = amount;
        self.highest_bidder = Some(bidder.to_string());
        self.highest_bidder_name = Some(bidder_name.to_string());
        self.last_bid_time = Some(now);

        let remaining = self.end_time.saturating_sub(now);
        let extended = remaining < ANTI_SNIPE_WINDOW_MS;
        if extended {
            self.end_time = now + ANTI_SNIPE_WINDOW_MS;
        }

        Ok(extended)
    }

    /// Record a pass. Returns false if the player had already passed.
    pub fn pass(&mut self, user: &str) -> Result<bool, GameError> {
        if self.is_highest_bidder(user) {
            return Err(GameError::HighestBidderCannotPass);
        }
        Ok(self.passed.insert(user.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T0: Timestamp = 1_000_000;

    #[test]
    fn test_open_auction() {
        let mut auction = Auction::open("1.1.1".into(), T0);
        assert_eq!(auction.highest_bid, STARTING_BID);
        assert_eq!(auction.deadline(), T0 + 30_000);
        assert!(!auction.is_due(T0 + 29_999));
        assert!(auction.is_due(T0 + 30_000));
        assert_eq!(
            auction.pass("a"),
            Ok(true),
            "passing is still recorded once the window closes"
        );
    }

    #[test]
    fn test_bid_must_beat_highest() {
        let mut auction = Auction::open("1.1.1".into(), T0);
        assert_eq!(
            auction.place_bid("a", "Alice", 10, T0),
            Err(GameError::BidTooLow { highest: 10 })
        );
        assert_eq!(auction.place_bid("a", "Alice", 50, T0), Ok(false));
        assert_eq!(
            auction.place_bid("b", "Bob", 40, T0 + 1_000),
            Err(GameError::BidTooLow { highest: 50 })
        );
        assert_eq!(auction.highest_bidder.as_deref(), Some("a"));
    }

    #[test]
    fn test_late_bid_extends_end_time() {
        let mut auction = Auction::open("1.1.1".into(), T0);
        let bid_at = T0 + 22_000; // 8 seconds left

        assert_eq!(auction.place_bid("a", "Alice", 50, bid_at), Ok(true));
        assert_eq!(auction.end_time, bid_at + 10_000);
        // silence window still applies
        assert_eq!(auction.deadline(), bid_at + 5_000);
    }

    #[test]
    fn test_silence_closes_auction() {
        let mut auction = Auction::open("1.1.1".into(), T0);
        auction.place_bid("a", "Alice", 50, T0 + 1_000).unwrap();

        assert!(!auction.is_due(T0 + 5_999));
        assert!(auction.is_due(T0 + 6_000));
        assert_eq!(
            auction.place_bid("b", "Bob", 60, T0 + 6_000),
            Err(GameError::AuctionClosed)
        );
    }

    #[test]
    fn test_pass_rules() {
        let mut auction = Auction::open("1.1.1".into(), T0);
        auction.place_bid("a", "Alice", 50, T0).unwrap();

        assert_eq!(auction.pass("a"), Err(GameError::HighestBidderCannotPass));
        assert_eq!(auction.pass("b"), Ok(true));
        assert_eq!(auction.pass("b"), Ok(false));
        assert_eq!(
            auction.place_bid("b", "Bob", 80, T0 + 1_000),
            Err(GameError::AlreadyPassed)
        );
    }
}
