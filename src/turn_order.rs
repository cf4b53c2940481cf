//! Pre-match seating order. Every seat rolls once, ties roll again among
//! themselves, and the server announces the final order.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::debug;

use crate::error::Rejection;
use crate::model::{Color, DiceRoll, SeatInfo, SeatName};
use crate::protocol::{ClientMsg, TiedSeat};
use crate::transport::Outbox;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOrderPhase {
    AwaitingStart,
    ActingSeatRolling,
    AwaitingNextSeat,
    TieBreak,
    Resolved,
}

#[derive(Debug)]
pub struct TurnOrderResolver {
    local: SeatInfo,
    phase: TurnOrderPhase,
    acting: Option<SeatName>,
    tied: Vec<Color>,
    tie_value: Option<u8>,
    rolls: BTreeMap<Color, DiceRoll>,
    rolled: bool,
    order: Vec<SeatInfo>,
}

impl TurnOrderResolver {
    pub fn new(local: SeatInfo) -> Self {
        TurnOrderResolver {
            local,
            phase: TurnOrderPhase::AwaitingStart,
            acting: None,
            tied: Vec::new(),
            tie_value: None,
            rolls: BTreeMap::new(),
            rolled: false,
            order: Vec::new(),
        }
    }

    pub fn phase(&self) -> TurnOrderPhase { self.phase }
    pub fn acting(&self) -> Option<&str> { self.acting.as_deref() }
    pub fn tied(&self) -> &[Color] { &self.tied }
    pub fn tie_value(&self) -> Option<u8> { self.tie_value }
    pub fn rolls(&self) -> &BTreeMap<Color, DiceRoll> { &self.rolls }
    pub fn order(&self) -> &[SeatInfo] { &self.order }

    /// With no seat named, seat 0 goes first.
    pub fn on_start(&mut self, first: Option<SeatName>) {
        let first = first.filter(|n| !n.is_empty()).or_else(|| (self.local.seat == Some(0)).then(|| self.local.name.clone()));
        self.phase = if first.is_some() { TurnOrderPhase::ActingSeatRolling } else { TurnOrderPhase::AwaitingNextSeat };
        self.acting = first;
        self.tied.clear();
        self.tie_value = None;
        self.rolls.clear();
        self.rolled = false;
        self.order.clear();
    }

    pub fn on_result(&mut self, color: Color, faces: DiceRoll, next: Option<SeatName>) {
        if self.phase == TurnOrderPhase::Resolved { return; }
        self.rolls.insert(color, faces);
        if color == self.local.color {
            self.rolled = true;
        }
        self.acting = next.filter(|n| !n.is_empty());
        self.phase = match (&self.acting, self.tied.is_empty()) {
            (Some(_), false) => TurnOrderPhase::TieBreak,
            (Some(_), true) => TurnOrderPhase::ActingSeatRolling,
            (None, _) => TurnOrderPhase::AwaitingNextSeat,
        };
    }

    /// Only the tied seats roll again; earlier rolls are wiped.
    pub fn on_tie(&mut self, tied: &[TiedSeat], value: u8) {
        if self.phase == TurnOrderPhase::Resolved { return; }
        self.tied = tied.iter().map(|s| s.color).collect();
        self.tie_value = Some(value);
        self.rolls.clear();
        self.rolled = false;
        self.acting = None;
        self.phase = TurnOrderPhase::TieBreak;
    }

    pub fn on_winner(&mut self, order: Vec<SeatInfo>) {
        self.order = order;
        self.acting = None;
        self.tied.clear();
        self.phase = TurnOrderPhase::Resolved;
    }

    pub fn can_roll(&self) -> bool {
        self.check_roll().is_ok()
    }

    fn check_roll(&self) -> Result<(), Rejection> {
        let named = match self.phase {
            TurnOrderPhase::Resolved => return Err(Rejection::TurnOrderResolved),
            TurnOrderPhase::AwaitingStart | TurnOrderPhase::AwaitingNextSeat => return Err(Rejection::NotYourTurn),
            TurnOrderPhase::ActingSeatRolling => self.acting.as_deref() == Some(self.local.name.as_str()),
            TurnOrderPhase::TieBreak => self.acting.as_deref().map_or(true, |a| a == self.local.name),
        };
        let in_tie = self.tied.is_empty() || self.tied.contains(&self.local.color);
        if !named || !in_tie {
            return Err(Rejection::NotYourTurn);
        }
        if self.rolled {
            return Err(Rejection::AlreadyActed);
        }
        Ok(())
    }

    pub fn submit_roll(&mut self, faces: DiceRoll, out: &mut impl Outbox) -> Result<(), Rejection> {
        if let Err(why) = self.check_roll() {
            debug!(%why, color = %self.local.color, "turn-order roll rejected");
            return Err(why);
        }
        out.send(ClientMsg::TurnOrderRoll { first: faces.first, second: faces.second });
        self.rolled = true;
        Ok(())
    }

    /// Rolls two dice locally and submits them.
    pub fn roll<R: Rng>(&mut self, rng: &mut R, out: &mut impl Outbox) -> Result<DiceRoll, Rejection> {
        self.check_roll()?;
        let faces = DiceRoll::new(rng.gen_range(1..=6), rng.gen_range(1..=6));
        self.submit_roll(faces, out)?;
        Ok(faces)
    }
}
