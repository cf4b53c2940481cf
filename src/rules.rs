use serde::{Deserialize, Serialize};

use crate::model::{ConsumedFaces, DiceRoll, DieChoice, Piece, PieceState};
use crate::topology::{steps_to_home_entry, HOME_STRETCH_LEN, HOME_STRETCH_TO_GOAL};

/// Local pre-check applied before a move intent is sent. The server decides
/// either way; this only saves a round trip.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovePolicy {
    #[default]
    Unrestricted,
    /// Near the home entry, a die must not carry the piece past the goal.
    ExactEntry,
}

/// Steps left to the center goal, or `None` when the piece is far enough from
/// its entry that no die can overshoot.
pub fn steps_to_goal(piece: &Piece) -> Option<u8> {
    match piece.state {
        PieceState::HomeStretch => {
            let at = piece.home_stretch_index().unwrap_or(0);
            Some(HOME_STRETCH_LEN.saturating_sub(at))
        }
        PieceState::OnTrack => {
            let steps = steps_to_home_entry(piece.track_index()?, piece.color);
            (steps <= HOME_STRETCH_TO_GOAL).then_some(steps + HOME_STRETCH_TO_GOAL)
        }
        PieceState::Jailed | PieceState::Home => None,
    }
}

pub fn allows(policy: MovePolicy, piece: &Piece, value: u8) -> bool {
    if !piece.is_movable() { return false; }
    match policy {
        MovePolicy::Unrestricted => true,
        MovePolicy::ExactEntry => steps_to_goal(piece).map_or(true, |left| value <= left),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DieOptions {
    pub first: bool,
    pub second: bool,
    pub sum: bool,
}

impl DieOptions {
    pub fn get(&self, choice: DieChoice) -> bool {
        match choice {
            DieChoice::First => self.first,
            DieChoice::Second => self.second,
            DieChoice::Sum => self.sum,
        }
    }

    pub fn any(&self) -> bool { self.first || self.second || self.sum }
}

/// Which dice the player could still spend on `piece`.
pub fn die_options(piece: &Piece, roll: &DiceRoll, consumed: ConsumedFaces, policy: MovePolicy) -> DieOptions {
    let open = |c: DieChoice| !consumed.is_consumed(c) && allows(policy, piece, roll.value(c));
    DieOptions { first: open(DieChoice::First), second: open(DieChoice::Second), sum: open(DieChoice::Sum) }
}
