use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;

use trio_engine::rules;
use trio_ws::config::Config;
use trio_ws::delay::DelayQueue;
use trio_ws::error::GameError;
use trio_ws::ledger::{BetKind, MemLedger, RecordEntry, UserLedger, UserProfile};
use trio_ws::model::{DELAY_AUTO_BET, DELAY_GIVE_UP, DelayMsg, Room, RoomPhase, SeatState};
use trio_ws::protocol::CreateGameReq;
use trio_ws::registry::RoomRegistry;
use trio_ws::session::GameSession;
use trio_ws::store::{MemStore, SnapshotStore};

struct TestTable {
    session: Arc<GameSession>,
    store: Arc<MemStore>,
    ledger: Arc<MemLedger>,
    delay: Arc<DelayQueue>,
    game_id: String,
    _registry: Arc<RoomRegistry>,
}

impl TestTable {
    fn room(&self) -> Room {
        self.store.room(&self.game_id).unwrap()
    }

    fn seat_of(&self, user_id: i64, round: i32) -> trio_ws::model::JoinUser {
        self.store.seat(&self.game_id, user_id, round).unwrap()
    }
}

fn profile(id: i64) -> UserProfile {
    UserProfile {
        id,
        nickname: format!("p{id}"),
        head_pic: String::new(),
    }
}

/// Build a room with the first player as its dealer and everyone else
/// seated ready.
async fn table(minimum: usize, low: i64, top: i64, rounds: i32, players: &[i64]) -> TestTable {
    let store = Arc::new(MemStore::new(Duration::from_secs(24 * 3600)));
    let ledger = Arc::new(MemLedger::new());
    for &id in players {
        ledger.add_user(profile(id), 10_000);
    }
    let delay = DelayQueue::new();
    let registry = RoomRegistry::new(
        store.clone(),
        ledger.clone(),
        delay.clone(),
        Config::default(),
    );
    let _dispatcher = registry.start_dispatcher();

    let req = CreateGameReq {
        minimum,
        low_bet_chips: low,
        top_bet_chips: top,
        total_rounds: rounds,
    };
    let game_id = registry
        .create_room(&req, &profile(players[0]))
        .await
        .unwrap();
    let session = registry.get(&game_id).unwrap();
    for &id in &players[1..] {
        session.join(&profile(id), true).await.unwrap();
    }

    TestTable {
        session,
        store,
        ledger,
        delay,
        game_id,
        _registry: registry,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            if let Ok(value) = serde_json::from_str(&text) {
                frames.push(value);
            }
        }
    }
    frames
}

#[tokio::test(start_paused = true)]
async fn fold_hands_pot_to_survivor() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;
    t.session.start(1).await.unwrap();

    let room = t.room();
    assert_eq!(room.state, RoomPhase::Playing);
    assert_eq!(room.total_bet_chips, 20);
    // the seat after the dealer acts first
    assert_eq!(room.curr_location, 1);

    t.session.give_up(2, 1, None).await.unwrap();

    let room = t.room();
    assert_eq!(room.state, RoomPhase::Ended);
    assert_eq!(room.curr_location, 0);
    assert_eq!(t.seat_of(1, 1).state, SeatState::Won);
    assert_eq!(t.seat_of(2, 1).state, SeatState::Folded);

    let rows = t.ledger.history();
    assert_eq!(
        rows.iter().filter(|row| row.state == BetKind::Ante).count(),
        2
    );
    let wins: Vec<_> = rows
        .iter()
        .filter(|row| row.state == BetKind::Win)
        .collect();
    assert_eq!(wins.len(), 1);
    assert_eq!(wins[0].amount, 20);
    assert_eq!(
        t.ledger.round_net(&t.game_id, 1),
        vec![
            RecordEntry {
                user_id: 1,
                amount: 10
            },
            RecordEntry {
                user_id: 2,
                amount: -10
            },
        ]
    );

    // a single-round game never rotates
    sleep(Duration::from_secs(4)).await;
    let room = t.room();
    assert_eq!(room.state, RoomPhase::Ended);
    assert_eq!(room.curr_round, 1);
}

#[tokio::test(start_paused = true)]
async fn floors_follow_blind_and_looked_rules() {
    let t = table(3, 10, 100, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();
    assert_eq!(t.room().curr_location, 1);

    // blind raise at the blind floor
    t.session.bet(2, 0, 1, 10).await.unwrap();
    assert_eq!(t.room().concealed_bet_chips, 10);

    // after looking the floor doubles the blind floor
    t.session.look(3, 1).await.unwrap();
    assert_eq!(
        t.session.bet(3, 0, 1, 15).await,
        Err(GameError::RaiseInsufficient { floor: 20 })
    );
    t.session.bet(3, 0, 1, 20).await.unwrap();
    assert_eq!(t.room().exposed_bet_chips, 20);

    // a blind player owes half the exposed floor
    assert_eq!(
        t.session.bet(1, 0, 1, 5).await,
        Err(GameError::RaiseInsufficient { floor: 10 })
    );
    t.session.bet(1, 0, 1, 10).await.unwrap();

    // the pot always equals the ante and raise rows
    let room = t.room();
    let rows_total: i64 = t
        .ledger
        .history()
        .iter()
        .filter(|row| matches!(row.state, BetKind::Ante | BetKind::Raise))
        .map(|row| row.amount)
        .sum();
    assert_eq!(room.total_bet_chips, rows_total);
    assert_eq!(room.total_bet_chips, 70);
}

#[tokio::test(start_paused = true)]
async fn pot_reaching_cap_forces_showdown() {
    let t = table(2, 10, 30, 1, &[1, 2]).await;
    t.session.start(1).await.unwrap();
    assert_eq!(t.room().total_bet_chips, 20);

    let hand1 = t.store.hand(&t.game_id, 1, 1).unwrap();
    let hand2 = t.store.hand(&t.game_id, 2, 1).unwrap();
    let expected_winner = if rules::beats(&hand2, &hand1) { 2 } else { 1 };
    let expected_loser = 3 - expected_winner;

    // the raise lifts the pot to 35, past the cap of 30
    t.session.bet(2, 0, 1, 15).await.unwrap();

    let room = t.room();
    assert_eq!(room.state, RoomPhase::Ended);
    assert_eq!(t.seat_of(expected_winner, 1).state, SeatState::Won);
    assert_eq!(t.seat_of(expected_loser, 1).state, SeatState::PkLost);

    // cap showdown grants full mutual visibility
    assert!(room.records[&1].contains(&2));
    assert!(room.records[&2].contains(&1));

    let wins: Vec<_> = t
        .ledger
        .history()
        .into_iter()
        .filter(|row| row.state == BetKind::Win)
        .collect();
    assert_eq!(wins.len(), 1);
    assert_eq!(wins[0].user_id, expected_winner);
    assert_eq!(wins[0].amount, 35);
}

#[tokio::test(start_paused = true)]
async fn compare_knocks_out_the_loser() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();

    let hand2 = t.store.hand(&t.game_id, 2, 1).unwrap();
    let hand3 = t.store.hand(&t.game_id, 3, 1).unwrap();
    let expected_loser = if rules::beats(&hand2, &hand3) { 3 } else { 2 };

    t.session.bet(2, 3, 1, 10).await.unwrap();

    let room = t.room();
    assert_eq!(room.state, RoomPhase::Playing);
    assert_eq!(t.seat_of(expected_loser, 1).state, SeatState::PkLost);

    // compare visibility is symmetric
    assert_eq!(room.records[&2], vec![3]);
    assert_eq!(room.records[&3], vec![2]);
}

#[tokio::test(start_paused = true)]
async fn compare_guards_reject_bad_requests() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();

    assert_eq!(
        t.session.bet(2, 2, 1, 10).await,
        Err(GameError::CompareSelf)
    );
    assert_eq!(
        t.session.bet(2, 99, 1, 10).await,
        Err(GameError::CompareInvalid)
    );
    assert_eq!(t.session.bet(3, 0, 1, 10).await, Err(GameError::NotYourTurn));
    assert_eq!(t.session.look(2, 2).await, Err(GameError::RoundStale));

    // rejected operations leave the pot untouched
    assert_eq!(t.room().total_bet_chips, 30);
}

#[tokio::test(start_paused = true)]
async fn stale_tick_on_settled_seat_is_retired() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;
    t.session.start(1).await.unwrap();
    let room = t.room();
    let tick = DelayMsg {
        game_id: t.game_id.clone(),
        delay_type: DELAY_AUTO_BET,
        user_id: 2,
        curr_round: 1,
        timestamp: room.set_location_time,
        bet_chips: 0,
    };

    // the actor folds before the tick fires
    t.session.give_up(2, 1, None).await.unwrap();
    let pot_before = t.room().total_bet_chips;

    assert!(t.session.handle_delay(tick).await);
    assert_eq!(t.room().total_bet_chips, pot_before);
    assert_eq!(t.seat_of(2, 1).state, SeatState::Folded);
}

#[tokio::test(start_paused = true)]
async fn expired_timestamp_tick_is_dropped() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();
    let room = t.room();

    let tick = DelayMsg {
        game_id: t.game_id.clone(),
        delay_type: DELAY_GIVE_UP,
        user_id: 2,
        curr_round: 1,
        timestamp: room.set_location_time - 5,
        bet_chips: 0,
    };
    assert_eq!(
        t.session.give_up(2, 1, Some(&tick)).await,
        Err(GameError::DelayExpired)
    );
    assert_eq!(t.seat_of(2, 1).state, SeatState::Playing);
    assert_eq!(t.room(), room);
}

#[tokio::test(start_paused = true)]
async fn timeout_with_auto_call_reenqueues_instead_of_folding() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();
    let room = t.room();

    // flip the flag on the stored seat directly; the public toggle would
    // arm an immediate tick and follow before the timeout fires
    let mut seat = t.seat_of(2, 1);
    seat.is_auto_bet = true;
    t.store.put_seat(&t.game_id, 1, &seat).unwrap();

    let pending_before = t.delay.pending();
    let tick = DelayMsg {
        game_id: t.game_id.clone(),
        delay_type: DELAY_GIVE_UP,
        user_id: 2,
        curr_round: 1,
        timestamp: room.set_location_time,
        bet_chips: 0,
    };
    assert_eq!(
        t.session.give_up(2, 1, Some(&tick)).await,
        Err(GameError::UserSetAutoBetting)
    );
    assert_eq!(t.seat_of(2, 1).state, SeatState::Playing);
    assert_eq!(t.delay.pending(), pending_before + 1);
}

#[tokio::test(start_paused = true)]
async fn auto_call_follows_at_the_floor() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    t.session.start(1).await.unwrap();

    // the actor turns auto-call on; a tick is armed right away
    t.session.set_auto_bet(2, true, 1).await.unwrap();
    sleep(Duration::from_secs(2)).await;

    let room = t.room();
    assert_eq!(room.total_bet_chips, 40);
    assert_eq!(room.curr_location, 2);
    assert_eq!(t.seat_of(2, 1).total_bet_chips, 20);
    assert!(t.seat_of(2, 1).is_auto_bet);
}

#[tokio::test(start_paused = true)]
async fn winner_anchors_next_round_seating() {
    let t = table(4, 10, 1000, 2, &[1, 2, 3, 4]).await;
    t.session.start(1).await.unwrap();

    t.session.give_up(3, 1, None).await.unwrap();
    t.session.give_up(4, 1, None).await.unwrap();
    t.session.give_up(1, 1, None).await.unwrap();
    assert_eq!(t.room().state, RoomPhase::Ended);

    // the two-second rotation fires
    sleep(Duration::from_secs(3)).await;

    let room = t.room();
    assert_eq!(room.state, RoomPhase::Wait);
    assert_eq!(room.curr_round, 2);
    assert_eq!(room.curr_banker_id, 2);
    assert_eq!(room.total_bet_chips, 0);
    assert!(room.records.is_empty());

    // winner first, the rest keep their relative order wrapped around it
    let seating: Vec<(i64, i32)> = [2, 3, 4, 1]
        .iter()
        .map(|&id| (id, t.seat_of(id, 2).location))
        .collect();
    assert_eq!(seating, vec![(2, 0), (3, 1), (4, 2), (1, 3)]);
    assert!(t.seat_of(2, 2).is_banker);
    for id in [1, 2, 3, 4] {
        assert_eq!(t.seat_of(id, 2).state, SeatState::Joined);
        assert_eq!(t.seat_of(id, 2).total_bet_chips, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn rejoining_is_idempotent() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;

    t.session.join(&profile(2), true).await.unwrap();
    let room = t.room();
    assert_eq!(room.join_users.len(), 2);
    assert_eq!(t.seat_of(2, 1).location, 1);
    assert_eq!(t.seat_of(2, 1).state, SeatState::Ready);

    // strangers cannot join a running hand
    t.session.start(1).await.unwrap();
    t.ledger.add_user(profile(9), 10_000);
    assert_eq!(
        t.session.join(&profile(9), false).await,
        Err(GameError::CannotJoinMidHand)
    );
}

#[tokio::test(start_paused = true)]
async fn ready_requires_the_ante() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;
    t.ledger.add_user(profile(5), 3);
    assert_eq!(
        t.session.join(&profile(5), true).await,
        Err(GameError::UserInsufficientBalance)
    );
}

#[tokio::test(start_paused = true)]
async fn broadcasts_reach_every_connection() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    // one user, two tabs
    t.session.attach(1, "conn-a", tx_a);
    t.session.attach(1, "conn-b", tx_b);

    t.session.start(1).await.unwrap();

    let frames = drain(&mut rx_a);
    assert!(!frames.is_empty());
    let playing = &frames[0];
    assert_eq!(playing["event"]["type"], 2);
    assert_eq!(playing["room"]["totalBetChips"], 20);
    assert_eq!(playing["users"].as_array().unwrap().len(), 2);
    assert!(!drain(&mut rx_b).is_empty());
}

#[tokio::test(start_paused = true)]
async fn look_reveals_privately_then_notifies() {
    let t = table(2, 10, 1000, 1, &[1, 2]).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    t.session.attach(2, "conn", tx);
    t.session.start(1).await.unwrap();
    drain(&mut rx);

    t.session.look(2, 1).await.unwrap();

    // the private frame carries the cards and the looked floor
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["msgType"], 6);
    assert_eq!(
        frames[0]["card"],
        t.store.hand(&t.game_id, 2, 1).unwrap().to_wire()
    );
    assert_eq!(frames[0]["betChips"], 20);

    // the room-wide notification lags a second and hides the cards
    sleep(Duration::from_secs(2)).await;
    let frames = drain(&mut rx);
    let notice = frames
        .iter()
        .find(|frame| frame["event"]["type"] == 6)
        .expect("look notification");
    assert!(notice["event"].get("myselfCard").is_none());
    assert!(notice.get("card").is_none());
}

#[tokio::test(start_paused = true)]
async fn showdown_reveals_follow_compare_visibility() {
    let t = table(3, 10, 1000, 1, &[1, 2, 3]).await;
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    t.session.attach(1, "conn", tx1);
    t.session.start(1).await.unwrap();
    drain(&mut rx1);

    // P2 compares with P3, then everyone else folds down to one seat
    t.session.bet(2, 3, 1, 10).await.unwrap();
    let survivor = if t.seat_of(2, 1).state == SeatState::Playing {
        2
    } else {
        3
    };
    t.session.give_up(1, 1, None).await.unwrap();

    assert_eq!(t.room().state, RoomPhase::Ended);
    assert_eq!(t.seat_of(survivor, 1).state, SeatState::Won);

    // P1 never compared: its reveal map holds only its own cards
    let frames = drain(&mut rx1);
    let reveal = frames
        .iter()
        .find(|frame| frame.get("cards").is_some())
        .expect("showdown reveal");
    let cards = reveal["cards"].as_object().unwrap();
    assert_eq!(cards.len(), 1);
    assert!(cards.contains_key("1"));
}
