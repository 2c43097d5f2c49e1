use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use trio_engine::{Deck, Hand, rules};

use crate::config::Config;
use crate::delay::DelayQueue;
use crate::error::GameError;
use crate::ledger::{UserLedger, UserProfile};
use crate::model::{
    DELAY_AUTO_BET, DELAY_GIVE_UP, DELAY_RETRIES, DelayMsg, JoinUser, Room, RoomPhase, SeatState,
    unix_now,
};
use crate::protocol::{
    AutoBetMsg, BroadcastMsg, CardMsg, Envelope, EventMsg, ShowdownMsg, encode, event,
};
use crate::store::SnapshotStore;

pub type ClientTx = mpsc::UnboundedSender<Message>;

/// Deferred I/O produced inside the critical section and performed after
/// the room lock is released.
enum Effect {
    Broadcast {
        room: Room,
        event: EventMsg,
    },
    Unicast {
        user_id: i64,
        frame: String,
    },
    DelayedBroadcast {
        room: Room,
        event: EventMsg,
        after: Duration,
    },
    AnnounceTurn {
        room: Room,
        actor: JoinUser,
    },
    ScheduleRotation {
        winner_id: i64,
    },
}

/// One live room. Every mutating operation serializes on `guard`; snapshot
/// reads and writes happen inside it, outbound traffic after it.
pub struct GameSession {
    pub game_id: String,
    guard: Mutex<()>,
    clients: StdMutex<HashMap<i64, HashMap<String, ClientTx>>>,
    store: Arc<dyn SnapshotStore>,
    ledger: Arc<dyn UserLedger>,
    delay: Arc<DelayQueue>,
    config: Config,
}

impl GameSession {
    pub fn new(
        game_id: String,
        store: Arc<dyn SnapshotStore>,
        ledger: Arc<dyn UserLedger>,
        delay: Arc<DelayQueue>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(GameSession {
            game_id,
            guard: Mutex::new(()),
            clients: StdMutex::new(HashMap::new()),
            store,
            ledger,
            delay,
            config,
        })
    }

    /// Register one connection of a user. A user may hold several
    /// connections; each (user, token) pair is a distinct writer.
    pub fn attach(&self, user_id: i64, token: &str, tx: ClientTx) {
        self.clients_locked()
            .entry(user_id)
            .or_default()
            .insert(token.to_string(), tx);
    }

    pub fn detach(&self, user_id: i64, token: &str) {
        let mut clients = self.clients_locked();
        if let Some(writers) = clients.get_mut(&user_id) {
            writers.remove(token);
            if writers.is_empty() {
                clients.remove(&user_id);
            }
        }
    }

    /// Join the room, or resync an existing member.
    pub async fn join(
        self: &Arc<Self>,
        user: &UserProfile,
        as_ready: bool,
    ) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let mut room = self.load_room()?;

            match room.state {
                RoomPhase::Ended => {
                    effects.push(Effect::Unicast {
                        user_id: user.id,
                        frame: self.leaderboard_frame(&room),
                    });
                }
                RoomPhase::Playing => match room.join_users.get(&user.id) {
                    Some(&round) if round == room.curr_round => {
                        effects.push(Effect::Unicast {
                            user_id: user.id,
                            frame: self.resync_frame(&room, user.id)?,
                        });
                    }
                    Some(_) => {
                        // a watcher from an earlier round only gets a refresh
                        effects.push(Effect::Unicast {
                            user_id: user.id,
                            frame: self.frame_with(&room, None),
                        });
                    }
                    None => return Err(GameError::CannotJoinMidHand),
                },
                RoomPhase::Wait => {
                    if as_ready {
                        let balances = self.ledger.balances(&[user.id])?;
                        if balances.get(&user.id).copied().unwrap_or(0) < room.low_bet_chips {
                            return Err(GameError::UserInsufficientBalance);
                        }
                    }

                    let state = if as_ready {
                        SeatState::Ready
                    } else {
                        SeatState::Joined
                    };

                    match self.store.seat(&self.game_id, user.id, room.curr_round) {
                        Some(mut seat) => {
                            if seat.state == state || seat.state == SeatState::Ready {
                                // re-join is idempotent
                                effects.push(Effect::Unicast {
                                    user_id: user.id,
                                    frame: self.frame_with(&room, None),
                                });
                            } else {
                                seat.state = state;
                                room.join_users.insert(user.id, room.curr_round);
                                self.store
                                    .put_round(&room, std::slice::from_ref(&seat), &[])?;
                                effects.push(Effect::Broadcast {
                                    room: room.clone(),
                                    event: EventMsg {
                                        user_id: Some(user.id),
                                        ..EventMsg::new(state.event_code())
                                    },
                                });
                            }
                        }
                        None => {
                            let seat = JoinUser {
                                user_id: user.id,
                                state,
                                nickname: user.nickname.clone(),
                                head_pic: user.head_pic.clone(),
                                is_banker: room.curr_banker_id == user.id,
                                is_look_card: false,
                                is_auto_bet: false,
                                location: room.join_users.len() as i32,
                                total_bet_chips: 0,
                                account_bet_chips: 0,
                            };
                            room.join_users.insert(user.id, room.curr_round);
                            self.store.put_round(&room, &[seat], &[])?;
                            effects.push(Effect::Broadcast {
                                room: room.clone(),
                                event: EventMsg {
                                    user_id: Some(user.id),
                                    ..EventMsg::new(state.event_code())
                                },
                            });
                        }
                    }
                }
            }
        }
        self.execute(effects);
        Ok(())
    }

    /// Deal a new hand. Dealer only, and only with enough ready seats.
    pub async fn start(self: &Arc<Self>, user_id: i64) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let mut room = self.load_room()?;
            match room.state {
                RoomPhase::Ended => return Err(GameError::GameOver),
                RoomPhase::Playing => return Err(GameError::AlreadyPlaying),
                RoomPhase::Wait => {}
            }
            if room.curr_banker_id != user_id {
                return Err(GameError::NotDealer);
            }

            // ready seats plus the dealer's own
            let mut seats: Vec<JoinUser> = room
                .current_members()
                .into_iter()
                .filter_map(|member| self.store.seat(&self.game_id, member, room.curr_round))
                .filter(|seat| {
                    seat.state == SeatState::Ready || seat.user_id == room.curr_banker_id
                })
                .collect();
            if seats.len() < room.minimum {
                return Err(GameError::NotEnoughPlayers);
            }
            seats.sort_by_key(|seat| seat.location);

            for seat in &mut seats {
                seat.state = SeatState::Playing;
                seat.is_look_card = false;
                seat.is_auto_bet = false;
            }
            let user_ids: Vec<i64> = seats.iter().map(|seat| seat.user_id).collect();

            let mut deck = Deck::shuffled();
            deck.cut();
            let hands: Vec<(i64, Hand)> = deck.deal(&user_ids).into_iter().collect();

            let antes =
                self.ledger
                    .debit_ante(&self.game_id, room.curr_round, &user_ids, room.low_bet_chips)?;
            let mut pot = 0;
            for seat in &mut seats {
                let amount = antes.get(&seat.user_id).copied().unwrap_or(0);
                seat.total_bet_chips += amount;
                room.bet_chips.push(amount);
                pot += amount;
            }

            room.total_bet_chips = pot;
            room.exposed_bet_chips = room.low_bet_chips;
            room.concealed_bet_chips = room.low_bet_chips;
            room.curr_location = 0;
            room.state = RoomPhase::Playing;
            self.store.put_round(&room, &seats, &hands)?;

            effects.push(Effect::Broadcast {
                room: room.clone(),
                event: EventMsg::new(event::PLAYING_USER),
            });
            self.advance(&mut room, 0, &mut effects)?;
        }
        self.execute(effects);
        Ok(())
    }

    /// Peek at one's own cards. The room-wide notification lags one second
    /// so the client can animate the flip before others learn.
    pub async fn look(self: &Arc<Self>, user_id: i64, curr_round: i32) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let (room, mut seat) = self.check_playing(user_id, curr_round)?;
            let hand = self.store.hand(&self.game_id, user_id, room.curr_round)?;

            if !seat.is_look_card {
                seat.is_look_card = true;
                seat.is_auto_bet = false;
                self.store.put_seat(&self.game_id, room.curr_round, &seat)?;
            }

            let floor = room.floor_for(&seat);
            effects.push(Effect::Unicast {
                user_id,
                frame: encode(&CardMsg {
                    msg: Envelope::new(event::LOOK_CARD),
                    card: hand.to_wire(),
                    bet_chips: Some(floor),
                }),
            });
            effects.push(Effect::DelayedBroadcast {
                room: room.clone(),
                event: EventMsg {
                    user_id: Some(user_id),
                    ..EventMsg::new(event::LOOK_CARD)
                },
                after: Duration::from_secs(1),
            });
        }
        self.execute(effects);
        Ok(())
    }

    /// Fold. When `fresh` carries a timed-out tick and the seat has
    /// auto-call set, the fold is reinterpreted as an auto-call instead.
    pub async fn give_up(
        self: &Arc<Self>,
        user_id: i64,
        curr_round: i32,
        fresh: Option<&DelayMsg>,
    ) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let (mut room, mut seat) = self.check_playing(user_id, curr_round)?;

            if let Some(tick) = fresh {
                if room.curr_location != seat.location || room.set_location_time != tick.timestamp
                {
                    return Err(GameError::DelayExpired);
                }
                if seat.is_auto_bet {
                    let tick = DelayMsg {
                        game_id: self.game_id.clone(),
                        delay_type: DELAY_AUTO_BET,
                        user_id,
                        curr_round: room.curr_round,
                        timestamp: room.set_location_time,
                        bet_chips: 0,
                    };
                    self.delay
                        .enqueue(tick.to_bytes(), Duration::from_secs(1), DELAY_RETRIES);
                    return Err(GameError::UserSetAutoBetting);
                }
            }

            seat.state = SeatState::Folded;
            seat.is_auto_bet = false;
            self.store.put_seat(&self.game_id, room.curr_round, &seat)?;

            // the folding client gets its own cards back for the reveal
            if let Ok(hand) = self.store.hand(&self.game_id, user_id, room.curr_round) {
                effects.push(Effect::Unicast {
                    user_id,
                    frame: encode(&CardMsg {
                        msg: Envelope::new(event::GIVE_UP_USER),
                        card: hand.to_wire(),
                        bet_chips: None,
                    }),
                });
            }
            effects.push(Effect::Broadcast {
                room: room.clone(),
                event: EventMsg {
                    user_id: Some(user_id),
                    ..EventMsg::new(event::GIVE_UP_USER)
                },
            });
            self.advance(&mut room, seat.location, &mut effects)?;
        }
        self.execute(effects);
        Ok(())
    }

    /// Raise, optionally comparing against another seat.
    pub async fn bet(
        self: &Arc<Self>,
        user_id: i64,
        compare_id: i64,
        curr_round: i32,
        amount: i64,
    ) -> Result<(), GameError> {
        self.betting(user_id, compare_id, curr_round, Some(amount), None)
            .await
    }

    async fn betting(
        self: &Arc<Self>,
        user_id: i64,
        compare_id: i64,
        curr_round: i32,
        amount: Option<i64>,
        fresh: Option<&DelayMsg>,
    ) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let (mut room, mut seat) = self.check_playing(user_id, curr_round)?;
            if seat.location != room.curr_location {
                return Err(GameError::NotYourTurn);
            }
            if let Some(tick) = fresh {
                if room.set_location_time != tick.timestamp {
                    return Err(GameError::DelayExpired);
                }
            }

            let floor = room.floor_for(&seat);
            // an auto-call follows at exactly the floor
            let amount = amount.unwrap_or(floor);
            if amount < floor {
                return Err(GameError::RaiseInsufficient { floor });
            }

            // A raise that lifts the pot to the cap is settled by the cap
            // showdown; the two-player compare only runs below it.
            let is_pk = compare_id > 0 && room.total_bet_chips + amount < room.top_bet_chips;
            let mut target = None;
            if is_pk {
                if compare_id == user_id {
                    return Err(GameError::CompareSelf);
                }
                let other = self
                    .store
                    .seat(&self.game_id, compare_id, room.curr_round)
                    .ok_or(GameError::CompareInvalid)?;
                if other.state != SeatState::Playing {
                    return Err(GameError::CompareInvalid);
                }
                target = Some(other);
            }

            let debited = self
                .ledger
                .debit_raise(&self.game_id, room.curr_round, user_id, amount)?;
            if seat.is_look_card {
                room.exposed_bet_chips = debited;
            } else {
                room.concealed_bet_chips = debited;
            }
            room.bet_chips.push(debited);
            room.total_bet_chips += debited;
            seat.total_bet_chips += debited;

            match target {
                Some(mut other) => {
                    let mine = self.store.hand(&self.game_id, user_id, room.curr_round)?;
                    let theirs =
                        self.store
                            .hand(&self.game_id, other.user_id, room.curr_round)?;
                    let won = rules::beats(&mine, &theirs);
                    room.add_compare_record(user_id, other.user_id);

                    let (loser_id, loser_hand) = if won {
                        other.state = SeatState::PkLost;
                        (other.user_id, theirs)
                    } else {
                        seat.state = SeatState::PkLost;
                        (user_id, mine)
                    };
                    let winner_id = if won { user_id } else { other.user_id };
                    self.store.put_round(&room, &[seat.clone(), other], &[])?;

                    // the loser sees its own cards as they flip
                    effects.push(Effect::Unicast {
                        user_id: loser_id,
                        frame: encode(&CardMsg {
                            msg: Envelope::new(event::COMPARE_LOSE_USER),
                            card: loser_hand.to_wire(),
                            bet_chips: None,
                        }),
                    });
                    effects.push(Effect::Broadcast {
                        room: room.clone(),
                        event: EventMsg {
                            user_id: Some(user_id),
                            compare_id: Some(compare_id),
                            win_user_id: Some(winner_id),
                            bet_chips: Some(debited),
                            animation_second: Some(self.config.animation_seconds),
                            ..EventMsg::new(event::COMPARE_LOSE_USER)
                        },
                    });
                }
                None => {
                    self.store
                        .put_round(&room, std::slice::from_ref(&seat), &[])?;
                    effects.push(Effect::Broadcast {
                        room: room.clone(),
                        event: EventMsg {
                            user_id: Some(user_id),
                            bet_chips: Some(debited),
                            ..EventMsg::new(event::BET_CHIPS)
                        },
                    });
                }
            }

            self.advance(&mut room, seat.location, &mut effects)?;
        }
        self.execute(effects);
        Ok(())
    }

    /// Toggle auto-call. If it is already this seat's turn the follow-up
    /// tick is scheduled right away.
    pub async fn set_auto_bet(
        self: &Arc<Self>,
        user_id: i64,
        enabled: bool,
        curr_round: i32,
    ) -> Result<(), GameError> {
        let mut effects = Vec::new();
        {
            let _guard = self.guard.lock().await;
            let room = self.load_room()?;
            if room.state == RoomPhase::Ended {
                return Err(GameError::GameOver);
            }
            self.member_of_current_round(&room, user_id)?;
            if room.curr_round != curr_round {
                return Err(GameError::RoundStale);
            }
            let mut seat = self
                .store
                .seat(&self.game_id, user_id, room.curr_round)
                .ok_or(GameError::NotInRound)?;
            seat.is_auto_bet = enabled;
            self.store.put_seat(&self.game_id, room.curr_round, &seat)?;

            if enabled
                && room.state == RoomPhase::Playing
                && seat.state == SeatState::Playing
                && seat.location == room.curr_location
            {
                let tick = DelayMsg {
                    game_id: self.game_id.clone(),
                    delay_type: DELAY_AUTO_BET,
                    user_id,
                    curr_round: room.curr_round,
                    timestamp: room.set_location_time,
                    bet_chips: 0,
                };
                self.delay
                    .enqueue(tick.to_bytes(), Duration::from_secs(1), DELAY_RETRIES);
            }

            effects.push(Effect::Unicast {
                user_id,
                frame: encode(&AutoBetMsg {
                    msg: Envelope::new(event::AUTO_BETTING),
                    is_auto_bet: enabled,
                }),
            });
        }
        self.execute(effects);
        Ok(())
    }

    /// Deliver a delay-queue tick. Returns true to retire the message.
    pub async fn handle_delay(self: &Arc<Self>, msg: DelayMsg) -> bool {
        match msg.delay_type {
            DELAY_AUTO_BET => {
                match self
                    .betting(msg.user_id, 0, msg.curr_round, None, Some(&msg))
                    .await
                {
                    Ok(()) => {}
                    Err(GameError::UserInsufficientBalance) => {
                        // a failed auto-call turns the flag back off
                        if let Err(err) =
                            self.set_auto_bet(msg.user_id, false, msg.curr_round).await
                        {
                            warn!(game_id = %self.game_id, user_id = msg.user_id, %err,
                                "auto-bet reset failed");
                        }
                    }
                    Err(err) => {
                        debug!(game_id = %self.game_id, user_id = msg.user_id, %err,
                            "auto-bet tick dropped");
                    }
                }
                true
            }
            DELAY_GIVE_UP => {
                if let Err(err) = self.give_up(msg.user_id, msg.curr_round, Some(&msg)).await {
                    debug!(game_id = %self.game_id, user_id = msg.user_id, %err,
                        "give-up tick dropped");
                }
                true
            }
            other => {
                warn!(game_id = %self.game_id, delay_type = other, "unknown delay message");
                true
            }
        }
    }

    /// Rebuild the table for the next hand: the winner becomes the dealer
    /// at location 0 and the other participants keep their relative order,
    /// wrapping around the winner. Runs without the room lock; nothing
    /// else writes the room inside the rotation window.
    fn rotate(&self, winner_id: i64) {
        let mut room = match self.load_room() {
            Ok(room) => room,
            Err(err) => {
                error!(game_id = %self.game_id, %err, "rotation aborted");
                return;
            }
        };
        if room.state != RoomPhase::Ended || room.curr_round >= room.total_rounds {
            return;
        }

        // seats that sat out must re-join explicitly
        let mut members: Vec<JoinUser> = room
            .current_members()
            .into_iter()
            .filter_map(|member| self.store.seat(&self.game_id, member, room.curr_round))
            .filter(|seat| seat.state != SeatState::Joined)
            .collect();
        members.sort_by_key(|seat| seat.location);
        let Some(winner_index) = members.iter().position(|seat| seat.user_id == winner_id)
        else {
            error!(game_id = %self.game_id, winner_id, "winner missing from rotation");
            return;
        };
        members.rotate_left(winner_index);

        room.curr_round += 1;
        room.curr_location = 0;
        room.state = RoomPhase::Wait;
        room.curr_banker_id = winner_id;
        room.set_location_time = 0;
        room.total_bet_chips = 0;
        room.exposed_bet_chips = room.low_bet_chips;
        room.concealed_bet_chips = room.low_bet_chips;
        room.bet_chips.clear();
        room.records.clear();
        room.join_users.clear();

        let mut seats = Vec::with_capacity(members.len());
        for (index, member) in members.into_iter().enumerate() {
            room.join_users.insert(member.user_id, room.curr_round);
            seats.push(JoinUser {
                user_id: member.user_id,
                state: SeatState::Joined,
                nickname: member.nickname,
                head_pic: member.head_pic,
                is_banker: index == 0,
                is_look_card: false,
                is_auto_bet: false,
                location: index as i32,
                total_bet_chips: 0,
                account_bet_chips: 0,
            });
        }

        if let Err(err) = self.store.put_round(&room, &seats, &[]) {
            error!(game_id = %self.game_id, %err, "rotation write failed");
            return;
        }
        self.broadcast(
            &room,
            Some(EventMsg {
                user_id: Some(winner_id),
                ..EventMsg::new(event::JOIN_USER)
            }),
        );
    }

    /// Runs after every state change. Resolves the hand when it is over,
    /// otherwise hands the turn to the next playing seat.
    fn advance(
        &self,
        room: &mut Room,
        from_location: i32,
        effects: &mut Vec<Effect>,
    ) -> Result<(), GameError> {
        if room.state != RoomPhase::Playing {
            return Ok(());
        }

        let playing = self.playing_seats(room);
        if playing.is_empty() {
            return Ok(());
        }
        if playing.len() == 1 || room.total_bet_chips >= room.top_bet_chips {
            return self.resolve(room, playing, effects);
        }

        // someone else's turn continues untouched
        if room.curr_location != from_location {
            return Ok(());
        }

        let next = playing
            .iter()
            .find(|seat| seat.location > room.curr_location)
            .unwrap_or(&playing[0])
            .clone();
        room.curr_location = next.location;
        room.set_location_time = unix_now();
        self.store.put_room(room)?;
        effects.push(Effect::AnnounceTurn {
            room: room.clone(),
            actor: next,
        });
        Ok(())
    }

    /// Settle the hand: credit the winner, reveal per the visibility set,
    /// and either end the game or schedule the next-hand rotation.
    fn resolve(
        &self,
        room: &mut Room,
        playing: Vec<JoinUser>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), GameError> {
        let winner_id = if playing.len() == 1 {
            // the sole survivor sees nothing extra
            playing[0].user_id
        } else {
            // cap showdown: best hand takes the pot, everyone left sees everyone
            let mut best: Option<(i64, Hand)> = None;
            for seat in &playing {
                let hand = self
                    .store
                    .hand(&self.game_id, seat.user_id, room.curr_round)?;
                best = Some(match best {
                    None => (seat.user_id, hand),
                    Some((best_id, best_hand)) => {
                        if rules::beats(&hand, &best_hand) {
                            (seat.user_id, hand)
                        } else {
                            (best_id, best_hand)
                        }
                    }
                });
            }
            let Some((winner_id, _)) = best else {
                return Ok(());
            };
            let ids: Vec<i64> = playing.iter().map(|seat| seat.user_id).collect();
            for (index, &a) in ids.iter().enumerate() {
                for &b in &ids[index + 1..] {
                    room.add_compare_record(a, b);
                }
            }
            winner_id
        };

        let mut settled = Vec::with_capacity(playing.len());
        for mut seat in playing {
            seat.state = if seat.user_id == winner_id {
                SeatState::Won
            } else {
                SeatState::PkLost
            };
            settled.push(seat);
        }

        let credited =
            self.ledger
                .credit_win(&self.game_id, room.curr_round, winner_id, room.total_bet_chips)?;
        room.curr_location = 0;
        room.state = RoomPhase::Ended;
        self.store.put_round(room, &settled, &[])?;

        // selective reveals go out before the WIN broadcast
        for participant in self.participants(room) {
            let mut cards = HashMap::new();
            if let Ok(hand) =
                self.store
                    .hand(&self.game_id, participant.user_id, room.curr_round)
            {
                cards.insert(participant.user_id, hand.to_wire());
            }
            for opponent in room
                .records
                .get(&participant.user_id)
                .cloned()
                .unwrap_or_default()
            {
                if let Ok(hand) = self.store.hand(&self.game_id, opponent, room.curr_round) {
                    cards.insert(opponent, hand.to_wire());
                }
            }
            effects.push(Effect::Unicast {
                user_id: participant.user_id,
                frame: encode(&ShowdownMsg {
                    msg: Envelope::new(event::WIN_USER),
                    cards,
                }),
            });
        }

        let game_over = room.curr_round >= room.total_rounds;
        effects.push(Effect::Broadcast {
            room: room.clone(),
            event: EventMsg {
                user_id: Some(winner_id),
                win_user_id: Some(winner_id),
                bet_chips: Some(credited),
                is_game_over: Some(game_over),
                records: Some(self.ledger.round_net(&self.game_id, room.curr_round)),
                ..EventMsg::new(event::WIN_USER)
            },
        });

        if game_over {
            effects.push(Effect::Broadcast {
                room: room.clone(),
                event: EventMsg {
                    is_game_over: Some(true),
                    records: Some(self.ledger.game_net(&self.game_id)),
                    ..EventMsg::new(event::OVER)
                },
            });
        } else {
            effects.push(Effect::ScheduleRotation { winner_id });
        }
        Ok(())
    }

    /// Perform deferred I/O. Must be called after the room lock is
    /// released; delayed work re-enters through fresh lock acquisitions.
    fn execute(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast { room, event } => self.broadcast(&room, Some(event)),
                Effect::Unicast { user_id, frame } => self.send_to_user(user_id, &frame),
                Effect::DelayedBroadcast { room, event, after } => {
                    let session = Arc::clone(self);
                    tokio::spawn(async move {
                        sleep(after).await;
                        session.broadcast(&room, Some(event));
                    });
                }
                Effect::AnnounceTurn { room, actor } => {
                    let session = Arc::clone(self);
                    tokio::spawn(async move {
                        sleep(Duration::from_secs(1)).await;
                        session.announce_turn(&room, &actor);
                    });
                }
                Effect::ScheduleRotation { winner_id } => {
                    let session = Arc::clone(self);
                    tokio::spawn(async move {
                        sleep(Duration::from_secs(2)).await;
                        session.rotate(winner_id);
                    });
                }
            }
        }
    }

    /// Announce the acting seat and arm its timeout tick.
    fn announce_turn(&self, room: &Room, actor: &JoinUser) {
        let floor = room.floor_for(actor);
        let countdown = self.config.countdown_seconds;
        self.broadcast(
            room,
            Some(EventMsg {
                user_id: Some(actor.user_id),
                location: Some(actor.location),
                bet_chips: Some(floor),
                list_bet_chips: Some(room.bet_ladder(floor)),
                countdown_second: Some(countdown),
                total_second: Some(countdown),
                ..EventMsg::new(event::CURRENT_USER)
            }),
        );

        let auto = actor.is_auto_bet;
        let tick = DelayMsg {
            game_id: self.game_id.clone(),
            delay_type: if auto { DELAY_AUTO_BET } else { DELAY_GIVE_UP },
            user_id: actor.user_id,
            curr_round: room.curr_round,
            timestamp: room.set_location_time,
            bet_chips: 0,
        };
        let due = if auto {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(countdown.max(0) as u64)
        };
        self.delay.enqueue(tick.to_bytes(), due, DELAY_RETRIES);
    }

    fn load_room(&self) -> Result<Room, GameError> {
        self.store.room(&self.game_id)
    }

    fn member_of_current_round(&self, room: &Room, user_id: i64) -> Result<(), GameError> {
        match room.join_users.get(&user_id) {
            Some(&round) if round == room.curr_round => Ok(()),
            _ => Err(GameError::NotInRound),
        }
    }

    fn check_playing(&self, user_id: i64, curr_round: i32) -> Result<(Room, JoinUser), GameError> {
        let room = self.load_room()?;
        self.member_of_current_round(&room, user_id)?;
        if room.curr_round != curr_round {
            return Err(GameError::RoundStale);
        }
        let seat = self
            .store
            .seat(&self.game_id, user_id, room.curr_round)
            .ok_or(GameError::NotInRound)?;
        if seat.state != SeatState::Playing {
            return Err(GameError::BadState);
        }
        Ok((room, seat))
    }

    fn member_seats(&self, room: &Room) -> Vec<JoinUser> {
        let mut seats: Vec<JoinUser> = room
            .current_members()
            .into_iter()
            .filter_map(|member| self.store.seat(&self.game_id, member, room.curr_round))
            .collect();
        seats.sort_by_key(|seat| seat.location);
        seats
    }

    fn playing_seats(&self, room: &Room) -> Vec<JoinUser> {
        let mut seats = self.member_seats(room);
        seats.retain(|seat| seat.state == SeatState::Playing);
        seats
    }

    fn participants(&self, room: &Room) -> Vec<JoinUser> {
        let mut seats = self.member_seats(room);
        seats.retain(|seat| seat.state != SeatState::Joined);
        seats
    }

    /// Snapshot frame for this room. Seat balances are refreshed from the
    /// ledger on every build.
    fn frame_with(&self, room: &Room, event: Option<EventMsg>) -> String {
        let mut users = self.member_seats(room);
        let ids: Vec<i64> = users.iter().map(|user| user.user_id).collect();
        if let Ok(balances) = self.ledger.balances(&ids) {
            for user in &mut users {
                if let Some(balance) = balances.get(&user.user_id) {
                    user.account_bet_chips = *balance;
                }
            }
        }

        encode(&BroadcastMsg {
            msg: Envelope::new(event::JOIN_USER),
            room: room.clone(),
            users,
            event,
            bet_chips: room.bet_chips.clone(),
            timestamp: unix_now(),
        })
    }

    /// Private catch-up for a member reconnecting mid-hand.
    fn resync_frame(&self, room: &Room, user_id: i64) -> Result<String, GameError> {
        let seat = self
            .store
            .seat(&self.game_id, user_id, room.curr_round)
            .ok_or(GameError::NotInRound)?;
        let members = self.member_seats(room);
        let actor = members
            .iter()
            .find(|s| s.location == room.curr_location && s.state == SeatState::Playing);

        let countdown = self.config.countdown_seconds;
        let remaining = (countdown - (unix_now() - room.set_location_time)).max(0) + 1;
        let myself_card = if seat.is_look_card || seat.state == SeatState::Folded {
            self.store
                .hand(&self.game_id, user_id, room.curr_round)
                .ok()
                .map(|hand| hand.to_wire())
        } else {
            None
        };

        let event = EventMsg {
            user_id: actor.map(|s| s.user_id),
            location: Some(room.curr_location),
            bet_chips: actor.map(|s| room.floor_for(s)),
            list_bet_chips: actor.map(|s| room.bet_ladder(room.floor_for(s))),
            countdown_second: Some(remaining),
            total_second: Some(countdown),
            myself_card,
            ..EventMsg::new(event::CURRENT_USER)
        };
        Ok(self.frame_with(room, Some(event)))
    }

    /// Final standings, shown to anyone knocking on an ended room.
    fn leaderboard_frame(&self, room: &Room) -> String {
        self.frame_with(
            room,
            Some(EventMsg {
                is_game_over: Some(room.curr_round >= room.total_rounds),
                records: Some(self.ledger.game_net(&self.game_id)),
                ..EventMsg::new(event::OVER)
            }),
        )
    }

    fn broadcast(&self, room: &Room, event: Option<EventMsg>) {
        let frame = self.frame_with(room, event);
        let mut clients = self.clients_locked();
        for writers in clients.values_mut() {
            // dead writers are dropped lazily on the first failed send
            writers.retain(|_, tx| tx.send(Message::Text(frame.clone())).is_ok());
        }
        clients.retain(|_, writers| !writers.is_empty());
    }

    fn send_to_user(&self, user_id: i64, frame: &str) {
        let mut clients = self.clients_locked();
        if let Some(writers) = clients.get_mut(&user_id) {
            writers.retain(|_, tx| tx.send(Message::Text(frame.to_string())).is_ok());
            if writers.is_empty() {
                clients.remove(&user_id);
            }
        }
    }

    fn clients_locked(&self) -> MutexGuard<'_, HashMap<i64, HashMap<String, ClientTx>>> {
        self.clients.lock().unwrap_or_else(|err| err.into_inner())
    }
}
