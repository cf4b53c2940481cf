use std::fmt;

use serde::{Deserialize, Serialize};

pub type SeatName = String;
pub type PieceId = u8;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    #[serde(rename = "rojo")]
    Red,
    #[serde(rename = "azul")]
    Blue,
    #[serde(rename = "verde")]
    Green,
    #[serde(rename = "amarillo")]
    Yellow,
}

impl Color {
    pub const ALL: [Color; 4] = [Color::Red, Color::Blue, Color::Green, Color::Yellow];

    pub fn wire_name(self) -> &'static str {
        match self {
            Color::Red => "rojo",
            Color::Blue => "azul",
            Color::Green => "verde",
            Color::Yellow => "amarillo",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Color> {
        Color::ALL.into_iter().find(|c| c.wire_name() == raw.trim())
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PieceState {
    #[serde(rename = "BLOQUEADO")]
    Jailed,
    #[serde(rename = "EN_JUEGO")]
    OnTrack,
    #[serde(rename = "CAMINO_META")]
    HomeStretch,
    #[serde(rename = "META")]
    Home,
}

/// A piece as the server reports it. `position` is the track index (the
/// server sends -1 while jailed); `home_index` is only meaningful in the
/// home stretch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Piece {
    pub id: PieceId,
    pub color: Color,
    #[serde(rename = "estado")]
    pub state: PieceState,
    #[serde(rename = "posicion")]
    pub position: i32,
    #[serde(rename = "posicion_meta", default, skip_serializing_if = "Option::is_none")]
    pub home_index: Option<i32>,
}

impl Piece {
    pub fn jailed(id: PieceId, color: Color) -> Self {
        Piece { id, color, state: PieceState::Jailed, position: -1, home_index: None }
    }

    pub fn track_index(&self) -> Option<u8> {
        match self.state {
            PieceState::OnTrack => u8::try_from(self.position).ok(),
            _ => None,
        }
    }

    pub fn home_stretch_index(&self) -> Option<u8> {
        match (self.state, self.home_index) {
            (PieceState::HomeStretch, Some(i)) => u8::try_from(i).ok(),
            _ => None,
        }
    }

    pub fn is_movable(&self) -> bool {
        matches!(self.state, PieceState::OnTrack | PieceState::HomeStretch)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    #[serde(rename = "nombre")]
    pub name: SeatName,
    pub color: Color,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<u32>,
    #[serde(rename = "fichas", default)]
    pub pieces: Vec<Piece>,
    #[serde(rename = "bloqueadas", default)]
    pub jailed: u8,
    #[serde(rename = "en_juego", default)]
    pub on_track: u8,
    #[serde(rename = "en_meta", default)]
    pub home: u8,
}

impl Player {
    pub fn piece(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.iter().find(|p| p.id == id)
    }

    pub fn all_jailed(&self) -> bool {
        self.pieces.len() == crate::topology::PIECES_PER_PLAYER
            && self.pieces.iter().all(|p| p.state == PieceState::Jailed)
    }
}

/// Seat identity as announced by the server (turn order, lobby roster,
/// victory).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatInfo {
    #[serde(rename = "nombre")]
    pub name: SeatName,
    pub color: Color,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<u32>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiceRoll {
    pub first: u8,
    pub second: u8,
}

impl DiceRoll {
    pub fn new(first: u8, second: u8) -> Self {
        debug_assert!((1..=6).contains(&first) && (1..=6).contains(&second), "die face out of range");
        DiceRoll { first, second }
    }

    pub fn sum(&self) -> u8 { self.first + self.second }

    pub fn is_doubles(&self) -> bool { self.first == self.second }

    pub fn value(&self, choice: DieChoice) -> u8 {
        match choice {
            DieChoice::First => self.first,
            DieChoice::Second => self.second,
            DieChoice::Sum => self.sum(),
        }
    }
}

/// Which die a move spends. Serialized as the numeric code the server expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DieChoice {
    First,
    Second,
    Sum,
}

impl DieChoice {
    pub const ALL: [DieChoice; 3] = [DieChoice::First, DieChoice::Second, DieChoice::Sum];

    pub fn code(self) -> u8 {
        match self {
            DieChoice::First => 1,
            DieChoice::Second => 2,
            DieChoice::Sum => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<DieChoice> {
        match code {
            1 => Some(DieChoice::First),
            2 => Some(DieChoice::Second),
            3 => Some(DieChoice::Sum),
            _ => None,
        }
    }
}

impl Serialize for DieChoice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for DieChoice {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        DieChoice::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid die choice {code}")))
    }
}

/// Faces spent this turn. `SUM` marks that both faces were closed out together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumedFaces(u8);

impl ConsumedFaces {
    const FIRST: u8 = 0b001;
    const SECOND: u8 = 0b010;
    const SUM: u8 = 0b100;

    pub fn none() -> Self { ConsumedFaces(0) }

    pub fn is_empty(&self) -> bool { self.0 == 0 }

    pub fn first(&self) -> bool { self.0 & Self::FIRST != 0 }

    pub fn second(&self) -> bool { self.0 & Self::SECOND != 0 }

    pub fn both(&self) -> bool { self.first() && self.second() }

    /// A face is spent if it was used directly or through the sum; the sum is
    /// spent as soon as either face is.
    pub fn is_consumed(&self, choice: DieChoice) -> bool {
        match choice {
            DieChoice::First => self.first(),
            DieChoice::Second => self.second(),
            DieChoice::Sum => self.first() || self.second(),
        }
    }

    pub(crate) fn mark(&mut self, choice: DieChoice) {
        self.0 |= match choice {
            DieChoice::First => Self::FIRST,
            DieChoice::Second => Self::SECOND,
            DieChoice::Sum => Self::FIRST | Self::SECOND | Self::SUM,
        };
    }

    /// Deferred step after `mark`: two single faces close the pair the same
    /// way the sum does.
    pub(crate) fn settle(&mut self) -> bool {
        if self.both() {
            self.0 |= Self::SUM;
        }
        self.both()
    }

    pub fn len(&self) -> usize {
        (self.0 & (Self::FIRST | Self::SECOND)).count_ones() as usize
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureInfo {
    #[serde(rename = "nombre")]
    pub name: SeatName,
    pub color: Color,
    #[serde(rename = "ficha_id")]
    pub piece_id: PieceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Won { name: SeatName, color: Color },
}
