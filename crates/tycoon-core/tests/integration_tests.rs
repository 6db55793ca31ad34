//! Integration tests for the Tycoon game engine.
//!
//! These tests drive complete flows through `GameState::apply_action`, the
//! same entry point the server uses.

use std::collections::{BTreeSet, HashMap};
use tycoon_core::actions::{Amount, PropertyTarget};
use tycoon_core::player::BotSeat;
use tycoon_core::*;

const T0: Timestamp = 1_700_000_000_000;

struct Session {
    game: GameState,
    catalog: Catalog,
    dice: LoadedDice,
    now: Timestamp,
}

impl Session {
    /// Started session; players roll order in the given sequence, first
    /// listed moves first
    fn started(players: &[(&str, &str)]) -> Self {
        let catalog = Catalog::standard();
        let (host_id, host_name) = players[0];
        let mut game = GameState::new("TEST", host_id, host_name, &catalog, T0).unwrap();
        for (id, name) in &players[1..] {
            game.seat(id, name, T0).unwrap();
        }
        let mut session = Self {
            game,
            catalog,
            dice: LoadedDice::new(),
            now: T0,
        };

        session.apply(host_id, GameAction::StartGame(Default::default())).unwrap();
        for (rank, (id, _)) in players.iter().enumerate() {
            let roll = 6 - rank as u8;
            session.dice.push_roll(roll, roll);
            session.apply(id, GameAction::RollOrder).unwrap();
        }
        assert_eq!(session.game.status, GameStatus::Active);
        session
    }

    fn apply(&mut self, user: &str, action: GameAction) -> Result<Vec<GameEvent>, GameError> {
        let mut ctx = ActionContext::new(&self.catalog, &mut self.dice, self.now);
        self.game.apply_action(user, action, &mut ctx)
    }

    fn roll(&mut self, user: &str, d1: u8, d2: u8) -> Result<Vec<GameEvent>, GameError> {
        self.dice.push_roll(d1, d2);
        self.apply(user, GameAction::RollDice)
    }

    fn property_at(&self, position: Position) -> PropertyId {
        self.game
            .board
            .tile(position)
            .and_then(|t| t.property_id.clone())
            .unwrap()
    }

    fn give(&mut self, user: &str, positions: &[Position]) {
        for &position in positions {
            let id = self.property_at(position);
            self.game.ownership.insert(id, user.to_string());
        }
    }

    fn player(&self, user: &str) -> &Player {
        self.game.player(user).unwrap()
    }
}

#[test]
fn test_buy_after_roll() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);

    session.roll("host", 3, 4).unwrap();
    assert_eq!(session.player("host").position, 7);

    session.apply("host", GameAction::buy_here()).unwrap();
    let mall = session.property_at(7);
    assert_eq!(session.player("host").balance, 1300);
    assert_eq!(session.game.owner_of(&mall).map(String::as_str), Some("host"));
}

#[test]
fn test_build_evenly_across_group() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.give("host", &[1, 3, 4]);
    session.game.board.tile_mut(1).unwrap().building_level = 1;
    session.game.board.tile_mut(3).unwrap().building_level = 1;

    let first = session.property_at(1);
    assert_eq!(
        session.apply("host", GameAction::buy_building(first)),
        Err(GameError::UnevenBuild)
    );

    let last = session.property_at(4);
    session.apply("host", GameAction::buy_building(last)).unwrap();
    let levels: Vec<u8> = [1, 3, 4]
        .iter()
        .map(|&p| session.game.board.tile(p).unwrap().building_level)
        .collect();
    assert_eq!(levels, vec![1, 1, 1]);
    check_invariants(&session.game);
}

#[test]
fn test_auction_flow() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.roll("host", 2, 4).unwrap();
    session.apply("host", GameAction::auction_here()).unwrap();
    assert_eq!(session.game.auction.as_ref().unwrap().highest_bid, 10);

    // eight seconds left
    session.now = T0 + 22_000;
    let events = session.apply("guest", GameAction::bid(50)).unwrap();
    assert!(events.contains(&GameEvent::BidPlaced {
        user_id: "guest".into(),
        amount: 50,
        extended: true,
    }));
    assert_eq!(session.game.auction.as_ref().unwrap().end_time, T0 + 32_000);

    session.now = T0 + 23_000;
    assert_eq!(
        session.apply("host", GameAction::bid(40)),
        Err(GameError::BidTooLow { highest: 50 })
    );
    assert_eq!(
        session.apply("host", GameAction::FinalizeAuction),
        Err(GameError::AuctionStillRunning)
    );

    // five seconds of silence close it
    session.now = T0 + 27_000;
    session.apply("host", GameAction::FinalizeAuction).unwrap();
    let tile = session.property_at(6);
    assert_eq!(session.game.owner_of(&tile).map(String::as_str), Some("guest"));
    assert_eq!(session.player("guest").balance, 1450);
    assert!(session.game.auction.is_none());
    assert_eq!(
        session.apply("host", GameAction::auction_here()),
        Err(GameError::AuctionAlreadyHeld)
    );
}

#[test]
fn test_sweep_closes_unsold_auction() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.roll("host", 2, 4).unwrap();
    session.apply("host", GameAction::auction_here()).unwrap();

    assert!(session.game.sweep_auction(T0 + 29_000).is_none());
    let events = session.game.sweep_auction(T0 + 30_000).unwrap();
    assert_eq!(
        events,
        vec![GameEvent::AuctionClosed {
            property_id: session.property_at(6)
        }]
    );
    assert!(session.game.ownership.is_empty());
}

#[test]
fn test_loan_settles_when_passing_go() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    {
        let host = session.game.player_mut("host").unwrap();
        host.loan = 1000;
        host.position = 60;
    }
    assert_eq!(session.player("host").credit_score(), 700);

    // 60 + 7 wraps to Tanner Street
    session.roll("host", 3, 4).unwrap();
    let host = session.player("host");
    assert_eq!(host.position, 3);
    assert_eq!(host.balance, 1450);
    assert_eq!(host.loan, 850);
}

#[test]
fn test_bankruptcy_releases_holdings_and_passes_turn() {
    let mut session = Session::started(&[("ann", "Ann"), ("bo", "Bo"), ("cy", "Cy")]);
    session.give("ann", &[8, 24]);
    for position in [8, 24] {
        session.game.board.tile_mut(position).unwrap().mortgaged = true;
    }

    session.apply("ann", GameAction::DeclareBankruptcy).unwrap();

    for position in [8, 24] {
        let tile = session.game.board.tile(position).unwrap();
        assert!(!tile.mortgaged);
        assert_eq!(tile.building_level, 0);
        assert!(session.game.owner_of(&session.property_at(position)).is_none());
    }
    assert!(!session.player("ann").active);
    assert_eq!(session.game.current_turn.as_deref(), Some("bo"));
    assert_eq!(session.game.status, GameStatus::Active);
    assert_eq!(session.roll("ann", 1, 2), Err(GameError::PlayerBankrupt));

    // ann is skipped from now on
    session.roll("bo", 1, 2).unwrap();
    session.apply("bo", GameAction::EndTurn).unwrap();
    session.roll("cy", 1, 2).unwrap();
    session.apply("cy", GameAction::EndTurn).unwrap();
    assert_eq!(session.game.current_turn.as_deref(), Some("bo"));
}

#[test]
fn test_rent_must_be_collected_before_turn_ends() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.give("guest", &[6, 9, 10]);

    session.roll("host", 2, 4).unwrap();
    let rent = session.game.pending_rent.clone().unwrap();
    // full group doubles base rent
    assert_eq!(rent.amount, 16);
    assert_eq!(session.apply("host", GameAction::EndTurn), Err(GameError::RentOutstanding));
    assert_eq!(session.roll("host", 1, 1), Err(GameError::RentOutstanding));

    session.apply("guest", GameAction::CollectRent).unwrap();
    session.apply("host", GameAction::EndTurn).unwrap();
    assert_eq!(session.game.current_turn.as_deref(), Some("guest"));
}

#[test]
fn test_rejected_actions_leave_state_untouched() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.roll("host", 2, 4).unwrap();
    let before = session.game.clone();

    let attempts = vec![
        ("guest", GameAction::RollDice),
        ("host", GameAction::RollDice),
        ("guest", GameAction::EndTurn),
        ("host", GameAction::CollectRent),
        ("host", GameAction::buy_building(session.property_at(6))),
        ("host", GameAction::TakeLoan(Amount { amount: 1_000_000 })),
        ("host", GameAction::PayLoan(Amount { amount: 10 })),
        (
            "guest",
            GameAction::MortgageProperty(PropertyTarget {
                property_id: session.property_at(6),
            }),
        ),
        ("host", GameAction::AcceptTrade),
        ("host", GameAction::bid(20)),
        ("stranger", GameAction::RollDice),
    ];
    for (user, action) in attempts {
        assert!(session.apply(user, action).is_err());
        assert_eq!(session.game, before);
    }
}

#[test]
fn test_envelope_drives_game() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    let envelope: ActionEnvelope = serde_json::from_str(r#"{"action": "ROLL_DICE"}"#).unwrap();
    let action = GameAction::from_envelope(&envelope).unwrap().unwrap();
    session.dice.push_roll(3, 4);
    session.apply("host", action).unwrap();

    let envelope: ActionEnvelope =
        serde_json::from_str(r#"{"action": "BUY_PROPERTY", "payload": {}}"#).unwrap();
    let action = GameAction::from_envelope(&envelope).unwrap().unwrap();
    session.apply("host", action).unwrap();
    assert_eq!(session.player("host").balance, 1300);
}

#[test]
fn test_snapshot_round_trip() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    session.roll("host", 3, 4).unwrap();
    session.apply("host", GameAction::buy_here()).unwrap();

    let json = serde_json::to_string(&session.game).unwrap();
    let restored: GameState = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, session.game);
}

#[test]
fn test_version_counts_applied_actions() {
    let mut session = Session::started(&[("host", "Hana"), ("guest", "Gus")]);
    let version = session.game.version;
    session.roll("host", 3, 4).unwrap();
    let _ = session.apply("host", GameAction::EndTurn);
    let _ = session.apply("guest", GameAction::EndTurn);
    // only the roll and the host's end of turn applied
    assert_eq!(session.game.version, version + 2);
}

fn make_bot(player: &mut Player, personality: &str) {
    let personality = BotPersonality::by_id(personality);
    player.bot = Some(BotSeat {
        personality_id: personality.id.to_string(),
        strategy: personality.strategy,
    });
}

fn check_invariants(game: &GameState) {
    for (property_id, owner) in &game.ownership {
        let tile = game.board.property_tile(property_id).unwrap();
        assert!(tile.kind.is_ownable());
        assert!(game.player(owner).unwrap().active, "{} owned by a bankrupt player", property_id);
    }
    for tile in game.board.tiles() {
        assert!(tile.building_level <= 5);
        if tile.building_level > 0 {
            assert!(!tile.mortgaged);
            let id = tile.property_id.as_deref().unwrap();
            assert!(game.owner_of(id).is_some());
        }
    }
    let groups: BTreeSet<&str> = game.board.tiles().iter().filter_map(|t| t.group_id.as_deref()).collect();
    for group in groups {
        let owners: BTreeSet<Option<&str>> = game
            .board
            .group_tiles(group)
            .map(|t| t.property_id.as_deref().and_then(|id| game.owner_of(id)).map(String::as_str))
            .collect();
        if owners.len() != 1 || owners.contains(&None) {
            continue;
        }
        let levels: Vec<u8> = game.board.group_tiles(group).map(|t| t.building_level).collect();
        let spread = levels.iter().max().unwrap() - levels.iter().min().unwrap();
        assert!(spread <= 1, "uneven build in group {}: {:?}", group, levels);
    }
    assert!(game.event_log.len() <= 100);
    assert!(game.chat.len() <= 50);
    if let Some(rent) = &game.pending_rent {
        assert_ne!(rent.debtor_id, rent.creditor_id);
    }
}

#[test]
fn test_bots_play_without_breaking_invariants() {
    let catalog = Catalog::standard();
    let mut game = GameState::new("BOTS", "BOT_A", "[BOT] A", &catalog, T0).unwrap();
    game.seat("BOT_B", "[BOT] B", T0).unwrap();
    game.seat("BOT_C", "[BOT] C", T0).unwrap();
    make_bot(&mut game.players[0], "classic");
    make_bot(&mut game.players[1], "tycoon");
    make_bot(&mut game.players[2], "saver");

    let mut dice = RandomDice::with_seed(7);
    let mut now = T0;
    {
        let mut ctx = ActionContext::new(&catalog, &mut dice, now);
        game.apply_action("BOT_A", GameAction::StartGame(Default::default()), &mut ctx)
            .unwrap();
    }

    let mut bots: HashMap<UserId, Bot> = HashMap::new();
    let mut last_version = game.version;
    for _ in 0..3_000 {
        now += 500;
        if game.sweep_auction(now).is_some() {
            check_invariants(&game);
            continue;
        }
        let Some(task) = next_bot_task(&game) else {
            break;
        };
        let seed = bots.len() as u64;
        let bot = bots.entry(task.bot_id.clone()).or_insert_with(|| {
            let personality = game.player(&task.bot_id).unwrap().bot.as_ref().unwrap().personality();
            Bot::with_seed(task.bot_id.clone(), personality, seed)
        });
        let Some(action) = bot.decide(&game, task.kind) else {
            continue;
        };

        let before = game.clone();
        let mut ctx = ActionContext::new(&catalog, &mut dice, now);
        match game.apply_action(&task.bot_id, action, &mut ctx) {
            Ok(_) => {
                assert!(game.version > last_version);
                last_version = game.version;
            }
            Err(_) => assert_eq!(game, before),
        }
        check_invariants(&game);

        if game.is_finished() {
            assert!(game.winner.is_some());
            break;
        }
    }
}
