//! Economic rules: rent, building and mortgage values, credit scoring and
//! loan settlement.
//!
//! Everything here is a pure function of the inputs it is given. The game
//! state gathers ownership facts (how many railroads an owner holds, whether
//! a group is complete) and passes them in.

use crate::board::{Money, Tile, TileKind, MAX_BUILD_LEVEL};
use crate::game::GameError;
use crate::player::{CreditProfile, Player};

/// Credited every time a player wraps past GO
pub const PASS_GO_CREDIT: Money = 200;

/// Minimum rent on parks and attractions
pub const MIN_FLAT_RENT: Money = 25;

/// Railroad rent by number of railroads the owner holds
const RAILROAD_RENT: [Money; 4] = [25, 50, 100, 200];

/// Ownership facts needed to price rent on a tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RentContext {
    pub dice_total: u32,
    pub owner_railroads: usize,
    pub owner_utilities: usize,
    pub owner_has_full_group: bool,
}

/// Rent owed for landing on `tile`. Callers skip mortgaged tiles.
pub fn rent(tile: &Tile, ctx: &RentContext) -> Money {
    match tile.kind {
        TileKind::Park | TileKind::Attraction => tile.rent.base.max(MIN_FLAT_RENT),
        TileKind::Utility => {
            let multiplier = if ctx.owner_utilities >= 2 { 10 } else { 4 };
            ctx.dice_total as Money * multiplier
        }
        TileKind::Railroad => {
            let idx = ctx.owner_railroads.clamp(1, RAILROAD_RENT.len()) - 1;
            RAILROAD_RENT[idx]
        }
        TileKind::Property => match tile.building_level {
            0 if ctx.owner_has_full_group => {
                if tile.rent.full_group > 0 {
                    tile.rent.full_group
                } else {
                    tile.rent.base * 2
                }
            }
            0 => tile.rent.base,
            level if level >= MAX_BUILD_LEVEL => tile.rent.hotel,
            level => tile.rent.houses[(level - 1) as usize],
        },
        _ => 0,
    }
}

/// Cost of raising `tile` one level, or None at the cap
pub fn building_cost(tile: &Tile) -> Option<Money> {
    match tile.building_level {
        level if level >= MAX_BUILD_LEVEL => None,
        4 => Some(tile.hotel_cost),
        _ => Some(tile.house_cost),
    }
}

/// Refund for removing the top building level, or None when empty
pub fn building_refund(tile: &Tile) -> Option<Money> {
    match tile.building_level {
        0 => None,
        level if level >= MAX_BUILD_LEVEL => Some(tile.hotel_cost / 2),
        _ => Some(tile.house_cost / 2),
    }
}

/// Cash credited when mortgaging
pub fn mortgage_payout(tile: &Tile) -> Money {
    if tile.mortgage_value > 0 {
        tile.mortgage_value
    } else {
        tile.price / 2
    }
}

/// Cash required to lift a mortgage
pub fn unmortgage_cost(tile: &Tile) -> Money {
    if tile.unmortgage_value > 0 {
        tile.unmortgage_value
    } else {
        let value = mortgage_payout(tile);
        value + value / 10
    }
}

/// Refund when selling a building-free tile back to the bank
pub fn bank_sale_value(tile: &Tile) -> Money {
    let refund = tile.price / 2;
    if tile.mortgaged {
        (refund - mortgage_payout(tile)).max(0)
    } else {
        refund
    }
}

// ==================== Credit ====================

/// Recompute a credit score from history and current finances
pub fn credit_score(
    profile: &CreditProfile,
    balance: Money,
    loan: Money,
    properties_owned: usize,
) -> i64 {
    let mut score: i64 = 550;

    score += (profile.loans_paid_on_time as i64 * 30).min(150);

    if profile.rounds_in_debt > 3 {
        score -= (profile.rounds_in_debt as i64 - 3) * 50;
    }

    score += (properties_owned as i64 * 5).min(50);

    let total = balance + loan;
    if total > 0 && loan > total / 2 {
        score -= 20;
    }

    score.clamp(300, 850)
}

/// Interest rate (percent per GO pass) for a score
pub fn interest_rate(score: i64) -> Money {
    match score {
        s if s >= 750 => 5,
        s if s >= 700 => 10,
        s if s >= 650 => 15,
        s if s >= 550 => 25,
        _ => 35,
    }
}

/// Maximum outstanding loan for a score
pub fn credit_limit(score: i64) -> Money {
    match score {
        s if s >= 750 => 8000,
        s if s >= 700 => 6000,
        s if s >= 650 => 4000,
        s if s >= 550 => 2000,
        _ => 500,
    }
}

/// Store a freshly computed score on the player's profile
pub fn refresh_credit_score(player: &mut Player, properties_owned: usize) -> i64 {
    let (balance, loan) = (player.balance, player.loan);
    let profile = player.credit_mut();
    profile.score = credit_score(profile, balance, loan, properties_owned);
    profile.score
}

/// Borrow `amount`. Returns the interest rate the loan was taken at.
pub fn take_loan(player: &mut Player, amount: Money, properties_owned: usize) -> Result<Money, GameError> {
    if amount <= 0 {
        return Err(GameError::InvalidAmount);
    }

    let profile = player.credit.clone().unwrap_or_default();
    let score = credit_score(&profile, player.balance, player.loan, properties_owned);
    let limit = credit_limit(score);
    if player.loan + amount > limit {
        return Err(GameError::CreditLimitExceeded { limit });
    }

    player.balance += amount;
    player.loan += amount;
    let profile = player.credit_mut();
    profile.score = score;
    profile.loans_taken += 1;
    profile.last_loan_round = profile.current_round;

    Ok(interest_rate(score))
}

/// Repay `amount` of principal. Returns true when the loan was cleared
/// within three rounds of the last borrowing.
pub fn repay_loan(player: &mut Player, amount: Money, properties_owned: usize) -> Result<bool, GameError> {
    if amount <= 0 {
        return Err(GameError::InvalidAmount);
    }
    if amount > player.loan {
        return Err(GameError::RepaymentExceedsLoan);
    }
    if amount > player.balance {
        return Err(GameError::InsufficientFunds);
    }

    player.balance -= amount;
    player.loan -= amount;

    let loan_cleared = player.loan == 0;
    let profile = player.credit_mut();
    let on_time = loan_cleared && profile.current_round.saturating_sub(profile.last_loan_round) <= 3;
    if on_time {
        profile.loans_paid_on_time += 1;
        profile.rounds_in_debt = 0;
    }

    refresh_credit_score(player, properties_owned);
    Ok(on_time)
}

/// What happened to a loan when its holder passed GO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanSettlement {
    pub interest: Money,
    pub minimum_payment: Money,
    /// False when the balance could not cover interest plus the minimum
    pub covered: bool,
    pub loan_cleared: bool,
}

/// Advance the player's round counter and, if they carry a loan, charge
/// interest and the minimum amortization. The pass-GO credit must already
/// be on the balance.
pub fn settle_loan_at_go(player: &mut Player, properties_owned: usize) -> Option<LoanSettlement> {
    player.credit_mut().current_round += 1;

    if player.loan <= 0 {
        return None;
    }

    let profile = player.credit_mut();
    profile.rounds_in_debt += 1;
    let mut rate = interest_rate(profile.score);
    if profile.rounds_in_debt > 3 {
        rate += 10;
    }

    let loan = player.loan;
    let interest = loan * rate / 100;
    let minimum_payment = (loan * 15 / 100).max(50).min(loan);

    let covered = player.balance >= interest + minimum_payment;
    let mut loan_cleared = false;
    if covered {
        player.balance -= interest + minimum_payment;
        player.loan -= minimum_payment;
        if player.loan <= 0 {
            player.loan = 0;
            loan_cleared = true;
            let profile = player.credit_mut();
            profile.loans_paid_on_time += 1;
            profile.rounds_in_debt = 0;
        }
    } else {
        player.balance -= interest;
        player.loan += interest;
    }

    refresh_credit_score(player, properties_owned);
    if !covered {
        let profile = player.credit_mut();
        profile.score = (profile.score - 25).max(300);
    }

    Some(LoanSettlement {
        interest,
        minimum_payment,
        covered,
        loan_cleared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::catalog::Catalog;
    use crate::player::TokenColor;
    use pretty_assertions::assert_eq;

    fn board() -> Board {
        Board::from_catalog(&Catalog::standard()).unwrap()
    }

    fn street() -> Tile {
        board().tile(1).unwrap().clone()
    }

    #[test]
    fn test_street_rent_tiers() {
        let mut tile = street();
        let lone = RentContext::default();
        let full = RentContext {
            owner_has_full_group: true,
            ..RentContext::default()
        };

        assert_eq!(rent(&tile, &lone), 6);
        assert_eq!(rent(&tile, &full), 12);

        tile.rent.full_group = 0;
        assert_eq!(rent(&tile, &full), 12);

        tile.building_level = 2;
        assert_eq!(rent(&tile, &full), 90);
        tile.building_level = 5;
        assert_eq!(rent(&tile, &full), 420);
    }

    #[test]
    fn test_railroad_and_utility_rent() {
        let board = board();
        let railroad = board.tile(8).unwrap();
        let utility = board.tile(18).unwrap();

        let ctx = |railroads, utilities| RentContext {
            dice_total: 7,
            owner_railroads: railroads,
            owner_utilities: utilities,
            owner_has_full_group: false,
        };

        assert_eq!(rent(railroad, &ctx(1, 0)), 25);
        assert_eq!(rent(railroad, &ctx(3, 0)), 100);
        assert_eq!(rent(railroad, &ctx(4, 0)), 200);
        assert_eq!(rent(utility, &ctx(0, 1)), 28);
        assert_eq!(rent(utility, &ctx(0, 2)), 70);
        assert_eq!(rent(utility, &ctx(0, 5)), 70);
    }

    #[test]
    fn test_flat_rent_has_floor() {
        let mut park = board().tile(11).unwrap().clone();
        park.rent.base = 5;
        assert_eq!(rent(&park, &RentContext::default()), 25);
        park.rent.base = 40;
        assert_eq!(rent(&park, &RentContext::default()), 40);
    }

    #[test]
    fn test_building_cost_and_refund() {
        let mut tile = street();
        assert_eq!(building_cost(&tile), Some(50));
        assert_eq!(building_refund(&tile), None);

        tile.building_level = 4;
        assert_eq!(building_cost(&tile), Some(100));
        assert_eq!(building_refund(&tile), Some(25));

        tile.building_level = 5;
        assert_eq!(building_cost(&tile), None);
        assert_eq!(building_refund(&tile), Some(50));
    }

    #[test]
    fn test_mortgage_values_fall_back_to_price() {
        let mut tile = street();
        tile.mortgage_value = 0;
        tile.unmortgage_value = 0;
        assert_eq!(mortgage_payout(&tile), 30);
        assert_eq!(unmortgage_cost(&tile), 33);
    }

    #[test]
    fn test_bank_sale_subtracts_mortgage() {
        let mut tile = board().tile(8).unwrap().clone();
        assert_eq!(bank_sale_value(&tile), 100);
        tile.mortgaged = true;
        assert_eq!(bank_sale_value(&tile), 0);
        tile.mortgage_value = 40;
        assert_eq!(bank_sale_value(&tile), 60);
    }

    #[test]
    fn test_credit_score_factors() {
        let mut profile = CreditProfile::default();
        assert_eq!(credit_score(&profile, 1500, 0, 0), 550);

        profile.loans_paid_on_time = 10;
        assert_eq!(credit_score(&profile, 1500, 0, 20), 750);

        profile.rounds_in_debt = 5;
        assert_eq!(credit_score(&profile, 1500, 0, 20), 650);

        assert_eq!(credit_score(&profile, 100, 500, 20), 630);

        profile.loans_paid_on_time = 0;
        profile.rounds_in_debt = 20;
        assert_eq!(credit_score(&profile, 0, 100, 0), 300);
    }

    #[test]
    fn test_rate_and_limit_steps() {
        assert_eq!((interest_rate(850), credit_limit(850)), (5, 8000));
        assert_eq!((interest_rate(700), credit_limit(700)), (10, 6000));
        assert_eq!((interest_rate(650), credit_limit(650)), (15, 4000));
        assert_eq!((interest_rate(550), credit_limit(550)), (25, 2000));
        assert_eq!((interest_rate(549), credit_limit(549)), (35, 500));
    }

    #[test]
    fn test_take_loan_respects_limit() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);

        // Fresh player scores 550 -> limit 2000
        assert_eq!(take_loan(&mut player, 1500, 0), Ok(25));
        assert_eq!(player.balance, 3000);
        assert_eq!(player.loan, 1500);

        assert_eq!(
            take_loan(&mut player, 600, 0),
            Err(GameError::CreditLimitExceeded { limit: 2000 })
        );
        assert_eq!(take_loan(&mut player, 0, 0), Err(GameError::InvalidAmount));
        assert_eq!(player.credit.as_ref().unwrap().loans_taken, 1);
    }

    #[test]
    fn test_repay_loan_on_time() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        take_loan(&mut player, 500, 0).unwrap();

        assert_eq!(
            repay_loan(&mut player, 600, 0),
            Err(GameError::RepaymentExceedsLoan)
        );
        assert_eq!(repay_loan(&mut player, 200, 0), Ok(false));
        assert_eq!(repay_loan(&mut player, 300, 0), Ok(true));

        let profile = player.credit.as_ref().unwrap();
        assert_eq!(profile.loans_paid_on_time, 1);
        assert_eq!(profile.score, 580);
        assert_eq!(player.balance, 1500);
    }

    #[test]
    fn test_repay_loan_needs_cash() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        player.loan = 500;
        player.balance = 100;
        assert_eq!(
            repay_loan(&mut player, 200, 0),
            Err(GameError::InsufficientFunds)
        );
    }

    #[test]
    fn test_go_settlement_with_funds() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        player.loan = 1000;
        player.balance = 1500 + PASS_GO_CREDIT;

        let settlement = settle_loan_at_go(&mut player, 0).unwrap();

        assert_eq!(
            settlement,
            LoanSettlement {
                interest: 100,
                minimum_payment: 150,
                covered: true,
                loan_cleared: false,
            }
        );
        assert_eq!(player.balance, 1450);
        assert_eq!(player.loan, 850);
        assert_eq!(player.credit.as_ref().unwrap().rounds_in_debt, 1);
    }

    #[test]
    fn test_go_settlement_capitalizes_when_short() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        player.loan = 1000;
        player.balance = 200;

        let settlement = settle_loan_at_go(&mut player, 0).unwrap();

        assert!(!settlement.covered);
        assert_eq!(player.balance, 100);
        assert_eq!(player.loan, 1100);
        // 550 base - 20 for the debt ratio, then the missed-payment penalty
        assert_eq!(player.credit_score(), 505);
    }

    #[test]
    fn test_go_settlement_clears_small_loan() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        player.loan = 40;

        let settlement = settle_loan_at_go(&mut player, 0).unwrap();

        assert_eq!(settlement.minimum_payment, 40);
        assert!(settlement.loan_cleared);
        assert_eq!(player.loan, 0);
        assert_eq!(player.credit.as_ref().unwrap().loans_paid_on_time, 1);
    }

    #[test]
    fn test_go_without_loan_only_counts_round() {
        let mut player = Player::new("u1", "Alice", TokenColor::Red);
        assert_eq!(settle_loan_at_go(&mut player, 0), None);
        assert_eq!(player.credit.as_ref().unwrap().current_round, 1);
        assert_eq!(player.balance, 1500);
    }
}
