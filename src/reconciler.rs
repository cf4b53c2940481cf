//! Match state as the local client sees it.
//!
//! Two layers live here. The mirrored layer is whatever the server last said
//! (players, active seat, roll, doubles count, outcome). The predicted layer
//! is local bookkeeping the server never sends back explicitly: faces spent
//! this turn, re-roll permission, the awaiting-next-turn latch, selection and
//! an in-flight roll request. Board snapshots overwrite the mirrored layer
//! wholesale and pull the predicted layer back in line with it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Rejection;
use crate::model::{CaptureInfo, Color, ConsumedFaces, DiceRoll, DieChoice, Outcome, PieceId, Player, SeatInfo, SeatName};
use crate::protocol::{BoardSnapshot, ClientMsg, EligiblePiece, MoveConfirmed, ServerMsg};
use crate::router::{Inbound, InboundHandler};
use crate::rules::{self, MovePolicy};
use crate::transport::Outbox;

pub const DEFAULT_RELEASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveKind {
    Move,
    Release,
    SentHome,
}

/// The most recent confirmed piece movement, kept for transient feedback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastMove {
    pub actor: SeatName,
    pub color: Color,
    pub piece_id: Option<PieceId>,
    pub from: i32,
    pub to: Option<i32>,
    pub kind: MoveKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BonusOffer {
    pub actor: Option<SeatName>,
    pub eligible: Vec<EligiblePiece>,
    pub message: Option<String>,
}

/// A pending automatic release-all, due once the roll has had time to show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledRelease {
    pub due: Instant,
    pub roll: DiceRoll,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchView {
    pub players: Vec<Player>,
    pub active: Option<SeatInfo>,
    pub is_my_turn: bool,
    pub roll: Option<DiceRoll>,
    pub consumed: ConsumedFaces,
    pub reroll_permitted: bool,
    pub awaiting_next_turn: bool,
    pub can_roll: bool,
    pub can_release: bool,
    pub can_move: bool,
    pub selectable: Vec<PieceId>,
    pub selected: Option<PieceId>,
    pub last_move: Option<LastMove>,
    pub last_capture: Option<CaptureInfo>,
    pub bonus: Option<BonusOffer>,
    pub outcome: Outcome,
    pub version: u64,
}

#[derive(Debug)]
pub struct MatchReconciler {
    local: SeatInfo,
    policy: MovePolicy,
    release_delay: Duration,

    players: Vec<Player>,
    turn_index: usize,
    active: Option<SeatInfo>,
    roll: Option<DiceRoll>,
    consecutive_doubles: u8,
    outcome: Outcome,
    last_move: Option<LastMove>,
    last_capture: Option<CaptureInfo>,
    bonus: Option<BonusOffer>,
    version: u64,
    // arrival seq of the newest applied turn or dice event
    roll_seq: u64,
    // arrival seq of the pending bonus offer
    bonus_seq: u64,

    consumed: ConsumedFaces,
    reroll: bool,
    awaiting_next_turn: bool,
    selected: Option<PieceId>,
    roll_pending: bool,

    // bumped per turn and per local roll request; a dice event is a
    // re-delivery when (epoch, faces) repeats
    roll_epoch: u64,
    last_dice: Option<(u64, DiceRoll)>,
    release_key: Option<(u64, DiceRoll)>,
    scheduled: Option<ScheduledRelease>,
}

impl MatchReconciler {
    pub fn new(local: SeatInfo) -> Self {
        MatchReconciler {
            local,
            policy: MovePolicy::default(),
            release_delay: DEFAULT_RELEASE_DELAY,
            players: Vec::new(),
            turn_index: 0,
            active: None,
            roll: None,
            consecutive_doubles: 0,
            outcome: Outcome::InProgress,
            last_move: None,
            last_capture: None,
            bonus: None,
            version: 0,
            roll_seq: 0,
            bonus_seq: 0,
            consumed: ConsumedFaces::none(),
            reroll: false,
            awaiting_next_turn: false,
            selected: None,
            roll_pending: false,
            roll_epoch: 0,
            last_dice: None,
            release_key: None,
            scheduled: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: MovePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn local(&self) -> &SeatInfo { &self.local }
    pub fn players(&self) -> &[Player] { &self.players }
    pub fn turn_index(&self) -> usize { self.turn_index }
    pub fn active(&self) -> Option<&SeatInfo> { self.active.as_ref() }
    pub fn roll(&self) -> Option<DiceRoll> { self.roll }
    pub fn consecutive_doubles(&self) -> u8 { self.consecutive_doubles }
    pub fn outcome(&self) -> &Outcome { &self.outcome }
    pub fn consumed(&self) -> ConsumedFaces { self.consumed }
    pub fn reroll_permitted(&self) -> bool { self.reroll }
    pub fn awaiting_next_turn(&self) -> bool { self.awaiting_next_turn }
    pub fn selected(&self) -> Option<PieceId> { self.selected }
    pub fn bonus(&self) -> Option<&BonusOffer> { self.bonus.as_ref() }
    pub fn version(&self) -> u64 { self.version }

    pub fn is_my_turn(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.color == self.local.color)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.outcome, Outcome::Won { .. })
    }

    fn local_player(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.color == self.local.color)
    }

    fn bonus_is_mine(&self) -> bool {
        match &self.bonus {
            Some(BonusOffer { actor: Some(actor), .. }) => *actor == self.local.name,
            Some(BonusOffer { actor: None, .. }) => self.is_my_turn(),
            None => false,
        }
    }

    // ---- inbound ----

    fn on_turn(&mut self, seq: u64, name: SeatName, color: Color) {
        info!(%name, %color, "turn");
        self.active = Some(SeatInfo { name, color, seat: None });
        self.roll = None;
        self.roll_seq = seq;
        self.roll_epoch += 1;
        self.last_dice = None;
        self.cancel_scheduled();
        self.consumed = ConsumedFaces::none();
        self.reroll = false;
        self.awaiting_next_turn = false;
        self.roll_pending = false;
        self.selected = None;
    }

    fn on_dice(&mut self, seq: u64, first: u8, second: u8) {
        let face = 1..=6;
        if !face.contains(&first) || !face.contains(&second) {
            warn!(first, second, "dice out of range, ignored");
            return;
        }
        let roll = DiceRoll::new(first, second);
        let key = (self.roll_epoch, roll);
        if self.last_dice == Some(key) {
            debug!(?roll, "duplicate dice event");
            return;
        }
        self.last_dice = Some(key);
        self.roll = Some(roll);
        self.roll_seq = seq;
        self.consumed = ConsumedFaces::none();
        self.reroll = false;
        self.roll_pending = false;
        if self.scheduled.take().is_some() {
            debug!("superseding roll cancels pending release");
        }
        self.maybe_schedule_release();
    }

    /// Arms the automatic release-all for the current roll if every local
    /// piece is jailed. Runs on dice events and again after snapshots, since
    /// the board that shows the jailed pieces may land after the dice.
    fn maybe_schedule_release(&mut self) {
        let Some(key) = self.last_dice else { return };
        let (_, roll) = key;
        if self.roll != Some(roll) || self.release_key == Some(key) {
            return;
        }
        let all_jailed = self.local_player().is_some_and(Player::all_jailed);
        if roll.is_doubles() && self.is_my_turn() && all_jailed {
            let due = Instant::now() + self.release_delay;
            debug!(?roll, delay_ms = self.release_delay.as_millis() as u64, "scheduling release-all");
            self.scheduled = Some(ScheduledRelease { due, roll });
            self.release_key = Some(key);
        }
    }

    fn on_snapshot(&mut self, seq: u64, snap: BoardSnapshot) {
        let roll = snap.roll();
        self.players = snap.players;
        self.turn_index = snap.turn_index;
        self.consecutive_doubles = snap.consecutive_doubles;
        self.clear_bonus_before(seq);
        if self.active.is_none() {
            self.active = self.players.get(self.turn_index).map(|p| SeatInfo { name: p.name.clone(), color: p.color, seat: p.seat });
        }

        if seq > self.roll_seq {
            if roll != self.roll {
                if roll.is_some() {
                    self.roll_pending = false;
                }
                self.consumed = ConsumedFaces::none();
                self.reroll = false;
            }
            self.roll = roll;
        } else {
            debug!(seq, newer = self.roll_seq, "stale snapshot, keeping current roll");
        }

        self.maybe_schedule_release();

        let still_mine = self
            .selected
            .and_then(|id| self.local_player().and_then(|p| p.piece(id)))
            .is_some();
        if !still_mine {
            self.selected = None;
        }
    }

    fn on_move_confirmed(&mut self, seq: u64, m: MoveConfirmed) {
        let kind = if m.is_release() { MoveKind::Release } else { MoveKind::Move };
        debug!(actor = %m.actor, from = m.from, to = m.to, ?kind, "move confirmed");
        if let Some(first) = m.captures.first() {
            self.last_capture = Some(first.clone());
        }
        self.last_move = Some(LastMove { actor: m.actor, color: m.color, piece_id: m.piece_id, from: m.from, to: Some(m.to), kind });
        self.selected = None;
        self.clear_bonus_before(seq);
    }

    /// Drops the bonus offer unless it arrived after the event at `seq`. A
    /// snapshot replayed at the end of a burst may predate the offer.
    fn clear_bonus_before(&mut self, seq: u64) {
        if self.bonus.is_some() && seq > self.bonus_seq {
            self.bonus = None;
        }
    }

    fn on_bonus(&mut self, seq: u64, actor: Option<SeatName>, eligible: Vec<EligiblePiece>, message: Option<String>) {
        info!(actor = ?actor, pieces = eligible.len(), "bonus offered");
        self.bonus = Some(BonusOffer { actor, eligible, message });
        self.bonus_seq = seq;
        self.selected = None;
    }

    fn on_sent_home(&mut self, actor: SeatName, color: Color, piece_id: PieceId, from: i32) {
        self.last_move = Some(LastMove { actor, color, piece_id: Some(piece_id), from, to: None, kind: MoveKind::SentHome });
        self.bonus = None;
    }

    fn on_victory(&mut self, winner: SeatName, color: Color) {
        info!(%winner, %color, "match over");
        self.outcome = Outcome::Won { name: winner, color };
        self.cancel_scheduled();
        self.selected = None;
    }

    // ---- scheduled release ----

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.map(|s| s.due)
    }

    pub fn scheduled(&self) -> Option<ScheduledRelease> {
        self.scheduled
    }

    /// Sends the pending release-all if it is due. Fires at most once.
    pub fn fire_due(&mut self, now: Instant, out: &mut impl Outbox) -> bool {
        match self.scheduled {
            Some(s) if s.due <= now => {
                self.scheduled = None;
                info!(roll = ?s.roll, "all pieces jailed on doubles, releasing all");
                out.send(ClientMsg::ReleaseAllFromJail);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_scheduled(&mut self) {
        if self.scheduled.take().is_some() {
            debug!("pending release cancelled");
        }
    }

    // ---- actions ----

    fn rejected(&self, action: &'static str, why: Rejection) -> Result<(), Rejection> {
        debug!(action, %why, "intent dropped");
        Err(why)
    }

    fn check_roll(&self) -> Result<(), Rejection> {
        if !self.is_my_turn() { return Err(Rejection::NotYourTurn); }
        if self.roll_pending { return Err(Rejection::RollPending); }
        if self.awaiting_next_turn { return Err(Rejection::AwaitingNextTurn); }
        if self.bonus_is_mine() { return Err(Rejection::BonusPending); }
        if self.roll.is_some() && !self.reroll { return Err(Rejection::AlreadyRolled); }
        Ok(())
    }

    fn check_release(&self) -> Result<(), Rejection> {
        if !self.is_my_turn() { return Err(Rejection::NotYourTurn); }
        match self.roll {
            None => Err(Rejection::NoRoll),
            Some(r) if !r.is_doubles() => Err(Rejection::NotDoubles),
            Some(_) => Ok(()),
        }
    }

    fn check_move(&self, piece_id: PieceId, die: DieChoice) -> Result<(), Rejection> {
        if !self.is_my_turn() { return Err(Rejection::NotYourTurn); }
        let Some(roll) = self.roll else { return Err(Rejection::NoRoll) };
        if self.awaiting_next_turn { return Err(Rejection::AwaitingNextTurn); }
        if self.bonus_is_mine() { return Err(Rejection::BonusPending); }
        if self.consumed.is_consumed(die) { return Err(Rejection::FaceConsumed(die)); }
        // unknown board: let the server decide
        if let Some(player) = self.local_player() {
            let piece = player.piece(piece_id).ok_or(Rejection::NotSelectable(piece_id))?;
            if !rules::allows(self.policy, piece, roll.value(die)) {
                return Err(Rejection::IllegalMove(piece_id));
            }
        }
        Ok(())
    }

    pub fn roll_dice(&mut self, out: &mut impl Outbox) -> Result<(), Rejection> {
        if let Err(why) = self.check_roll() {
            return self.rejected("roll", why);
        }
        out.send(ClientMsg::RollDice);
        self.roll_pending = true;
        self.reroll = false;
        self.roll_epoch += 1;
        self.cancel_scheduled();
        Ok(())
    }

    pub fn release_from_jail(&mut self, out: &mut impl Outbox) -> Result<(), Rejection> {
        if let Err(why) = self.check_release() {
            return self.rejected("release", why);
        }
        out.send(ClientMsg::ReleaseFromJail);
        Ok(())
    }

    pub fn release_all_from_jail(&mut self, out: &mut impl Outbox) -> Result<(), Rejection> {
        if let Err(why) = self.check_release() {
            return self.rejected("release_all", why);
        }
        self.cancel_scheduled();
        out.send(ClientMsg::ReleaseAllFromJail);
        Ok(())
    }

    /// Spends `die` on `piece_id`. The face is marked before the server
    /// answers; once both faces are gone the turn either offers a re-roll
    /// (doubles) or waits for the next turn announcement.
    pub fn move_piece(&mut self, piece_id: PieceId, die: DieChoice, out: &mut impl Outbox) -> Result<(), Rejection> {
        if let Err(why) = self.check_move(piece_id, die) {
            return self.rejected("move", why);
        }
        out.send(ClientMsg::MovePiece { piece_id, die });
        self.consumed.mark(die);
        self.selected = None;
        if self.consumed.settle() {
            if self.roll.is_some_and(|r| r.is_doubles()) {
                self.reroll = true;
            } else {
                self.awaiting_next_turn = true;
            }
        }
        Ok(())
    }

    pub fn choose_bonus_piece(&mut self, piece_id: PieceId, out: &mut impl Outbox) -> Result<(), Rejection> {
        if !self.bonus_is_mine() {
            return self.rejected("bonus", Rejection::NoBonus);
        }
        let eligible = self.bonus.as_ref().is_some_and(|b| b.eligible.iter().any(|p| p.id == piece_id));
        if !eligible {
            return self.rejected("bonus", Rejection::NotSelectable(piece_id));
        }
        out.send(ClientMsg::ChooseBonusPiece { piece_id });
        Ok(())
    }

    pub fn select_piece(&mut self, piece_id: PieceId) -> Result<(), Rejection> {
        if !self.is_my_turn() {
            return self.rejected("select", Rejection::NotYourTurn);
        }
        if self.local_player().and_then(|p| p.piece(piece_id)).is_none() {
            return self.rejected("select", Rejection::NotSelectable(piece_id));
        }
        self.selected = Some(piece_id);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    // ---- view ----

    fn selectable(&self) -> Vec<PieceId> {
        if !self.is_my_turn() || self.is_finished() {
            return Vec::new();
        }
        if self.bonus_is_mine() {
            return self.bonus.iter().flat_map(|b| b.eligible.iter().map(|p| p.id)).collect();
        }
        let (Some(roll), Some(player)) = (self.roll, self.local_player()) else { return Vec::new() };
        if self.awaiting_next_turn {
            return Vec::new();
        }
        player
            .pieces
            .iter()
            .filter(|p| rules::die_options(p, &roll, self.consumed, self.policy).any())
            .map(|p| p.id)
            .collect()
    }

    pub fn view(&self) -> MatchView {
        let live = !self.is_finished();
        MatchView {
            players: self.players.clone(),
            active: self.active.clone(),
            is_my_turn: self.is_my_turn(),
            roll: self.roll,
            consumed: self.consumed,
            reroll_permitted: self.reroll,
            awaiting_next_turn: self.awaiting_next_turn,
            can_roll: live && self.check_roll().is_ok(),
            can_release: live && self.check_release().is_ok() && !self.awaiting_next_turn,
            can_move: live && DieChoice::ALL.iter().any(|d| self.check_move_any(*d)),
            selectable: self.selectable(),
            selected: self.selected,
            last_move: self.last_move.clone(),
            last_capture: self.last_capture.clone(),
            bonus: self.bonus.clone(),
            outcome: self.outcome.clone(),
            version: self.version,
        }
    }

    fn check_move_any(&self, die: DieChoice) -> bool {
        match self.local_player() {
            Some(player) => player.pieces.iter().any(|p| self.check_move(p.id, die).is_ok()),
            None => false,
        }
    }
}

impl InboundHandler for MatchReconciler {
    fn handle(&mut self, inbound: Inbound) {
        let Inbound { seq, msg } = inbound;
        match msg {
            ServerMsg::Turn { name, color } => self.on_turn(seq, name, color),
            ServerMsg::Dice { first, second, .. } => self.on_dice(seq, first, second),
            ServerMsg::Board(snap) => self.on_snapshot(seq, snap),
            ServerMsg::MoveConfirmed(m) => self.on_move_confirmed(seq, m),
            ServerMsg::Capture { captured } => self.last_capture = Some(captured),
            ServerMsg::BonusEligible { actor, eligible, message } => self.on_bonus(seq, actor, eligible, message),
            ServerMsg::PieceSentHome { actor, color, piece_id, from } => self.on_sent_home(actor, color, piece_id, from),
            ServerMsg::Victory { winner, color } => self.on_victory(winner, color),
            _ => return,
        }
        self.version += 1;
    }
}
