//! Board geometry and derived cell rules.
//!
//! Everything here is compile-time data plus pure functions. Placements are
//! 1-based cells on the 19x19 board grid.

use std::collections::BTreeMap;

use crate::model::{Color, PieceId, PieceState, Player};

pub const TRACK_LEN: u8 = 68;
pub const PIECES_PER_PLAYER: usize = 4;
pub const HOME_STRETCH_LEN: u8 = 7;
/// Steps from the home entry cell to the center goal.
pub const HOME_STRETCH_TO_GOAL: u8 = 8;
pub const SAFE_CELLS: [u8; 8] = [11, 16, 28, 33, 45, 50, 62, 67];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placement {
    pub row: u8,
    pub col: u8,
    pub row_span: u8,
    pub col_span: u8,
}

const fn cell(row: u8, col: u8) -> Placement {
    Placement { row, col, row_span: 1, col_span: 1 }
}

const fn area(row: u8, col: u8, row_span: u8, col_span: u8) -> Placement {
    Placement { row, col, row_span, col_span }
}

pub const CENTER: Placement = area(9, 9, 3, 3);

static TRACK: [Placement; TRACK_LEN as usize] = [
    // yellow arm, right column going up
    cell(19, 11), cell(18, 11), cell(17, 11), cell(16, 11),
    cell(15, 11), cell(14, 11), cell(13, 11), cell(12, 11),
    // blue arm
    cell(11, 12), cell(11, 13), cell(11, 14), cell(11, 15),
    cell(11, 16), cell(11, 17), cell(11, 18), cell(11, 19),
    cell(10, 19), cell(9, 19), cell(9, 18), cell(9, 17),
    cell(9, 16), cell(9, 15), cell(9, 14), cell(9, 13),
    cell(9, 12),
    // red arm
    cell(8, 11), cell(7, 11), cell(6, 11), cell(5, 11),
    cell(4, 11), cell(3, 11), cell(2, 11), cell(1, 11),
    cell(1, 10), cell(1, 9), cell(2, 9), cell(3, 9),
    cell(4, 9), cell(5, 9), cell(6, 9), cell(7, 9),
    cell(8, 9),
    // green arm
    cell(9, 8), cell(9, 7), cell(9, 6), cell(9, 5),
    cell(9, 4), cell(9, 3), cell(9, 2), cell(9, 1),
    cell(10, 1), cell(11, 1), cell(11, 2), cell(11, 3),
    cell(11, 4), cell(11, 5), cell(11, 6), cell(11, 7),
    cell(11, 8),
    // yellow arm, left column going down
    cell(12, 9), cell(13, 9), cell(14, 9), cell(15, 9),
    cell(16, 9), cell(17, 9), cell(18, 9), cell(19, 9),
    cell(19, 10),
];

// indexed by Color::index()
static JAIL_SLOTS: [[Placement; PIECES_PER_PLAYER]; 4] = [
    [cell(3, 3), cell(3, 6), cell(6, 3), cell(6, 6)],
    [cell(3, 14), cell(3, 17), cell(6, 14), cell(6, 17)],
    [cell(14, 3), cell(14, 6), cell(17, 3), cell(17, 6)],
    [cell(14, 14), cell(14, 17), cell(17, 14), cell(17, 17)],
];

static JAIL_REGIONS: [Placement; 4] = [
    area(1, 1, 8, 8),
    area(1, 12, 8, 8),
    area(12, 1, 8, 8),
    area(12, 12, 8, 8),
];

static HOME_STRETCH: [[Placement; HOME_STRETCH_LEN as usize]; 4] = [
    [cell(2, 10), cell(3, 10), cell(4, 10), cell(5, 10), cell(6, 10), cell(7, 10), cell(8, 10)],
    [cell(10, 18), cell(10, 17), cell(10, 16), cell(10, 15), cell(10, 14), cell(10, 13), cell(10, 12)],
    [cell(10, 2), cell(10, 3), cell(10, 4), cell(10, 5), cell(10, 6), cell(10, 7), cell(10, 8)],
    [cell(18, 10), cell(17, 10), cell(16, 10), cell(15, 10), cell(14, 10), cell(13, 10), cell(12, 10)],
];

pub fn exit_cell(color: Color) -> u8 {
    match color {
        Color::Red => 38,
        Color::Blue => 21,
        Color::Green => 55,
        Color::Yellow => 4,
    }
}

/// The safe cell right before a color turns off the track into its home stretch.
pub fn home_entry(color: Color) -> u8 {
    match color {
        Color::Red => 33,
        Color::Blue => 16,
        Color::Green => 50,
        Color::Yellow => 67,
    }
}

pub fn is_safe_cell(index: u8) -> bool {
    SAFE_CELLS.contains(&index)
}

pub fn is_exit_cell(index: u8, color: Color) -> bool {
    exit_cell(color) == index
}

/// Steps along the track until `color`'s home entry, wrapping past cell 67.
/// Callers add [`HOME_STRETCH_TO_GOAL`] when asking whether a die can carry a
/// piece all the way to the center.
pub fn steps_to_home_entry(index: u8, color: Color) -> u8 {
    debug_assert!(index < TRACK_LEN, "track index {index} out of range");
    let index = index % TRACK_LEN;
    let entry = home_entry(color);
    if index <= entry {
        entry - index
    } else {
        (TRACK_LEN - index) + entry
    }
}

pub fn track_placement(index: u8) -> Option<Placement> {
    TRACK.get(index as usize).copied()
}

pub fn jail_placement(color: Color, slot: u8) -> Option<Placement> {
    JAIL_SLOTS[color.index()].get(slot as usize).copied()
}

pub fn jail_region(color: Color) -> Placement {
    JAIL_REGIONS[color.index()]
}

pub fn home_stretch_placement(color: Color, home_index: u8) -> Option<Placement> {
    HOME_STRETCH[color.index()].get(home_index as usize).copied()
}

/// Grid cell for a piece. Home-stretch indices 0 through 6 are drawn, one per
/// stretch cell; anything past that has no placement.
pub fn placement_for(
    state: PieceState,
    position: i32,
    home_index: Option<i32>,
    color: Color,
    slot: PieceId,
) -> Option<Placement> {
    match state {
        PieceState::Jailed => jail_placement(color, slot),
        PieceState::OnTrack => u8::try_from(position).ok().and_then(track_placement),
        PieceState::HomeStretch => home_index
            .filter(|i| (0..HOME_STRETCH_LEN as i32).contains(i))
            .and_then(|i| home_stretch_placement(color, i as u8)),
        PieceState::Home => Some(CENTER),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedPiece {
    pub color: Color,
    pub id: PieceId,
    pub state: PieceState,
}

/// Pieces that share a placement, for stacked display. Pieces without a
/// valid placement are left out.
pub fn group_by_placement(players: &[Player]) -> BTreeMap<Placement, Vec<PlacedPiece>> {
    let mut groups: BTreeMap<Placement, Vec<PlacedPiece>> = BTreeMap::new();
    for player in players {
        for piece in &player.pieces {
            let Some(at) = placement_for(piece.state, piece.position, piece.home_index, player.color, piece.id) else {
                continue;
            };
            groups.entry(at).or_default().push(PlacedPiece { color: player.color, id: piece.id, state: piece.state });
        }
    }
    groups
}
