use thiserror::Error;

use crate::model::{DieChoice, PieceId};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed before the channel opened")]
    ClosedEarly,
    #[error("socket error: {0}")]
    Socket(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid {tipo} payload: {source}")]
    InvalidPayload {
        tipo: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unknown color {0:?}")]
    UnknownColor(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid account id {0:?}")]
    InvalidAccountId(String),
}

/// Why an intent was dropped before reaching the server. Not an error: the
/// server would have refused it anyway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("not this seat's turn")]
    NotYourTurn,
    #[error("dice already rolled this turn")]
    AlreadyRolled,
    #[error("a roll is already on its way")]
    RollPending,
    #[error("no dice rolled yet")]
    NoRoll,
    #[error("jail release needs doubles")]
    NotDoubles,
    #[error("die {0:?} already used")]
    FaceConsumed(DieChoice),
    #[error("turn is over, waiting for the next turn")]
    AwaitingNextTurn,
    #[error("bonus choice pending")]
    BonusPending,
    #[error("no bonus to claim")]
    NoBonus,
    #[error("piece {0} is not selectable")]
    NotSelectable(PieceId),
    #[error("piece {0} cannot move with that die")]
    IllegalMove(PieceId),
    #[error("this seat has already acted")]
    AlreadyActed,
    #[error("turn order is already decided")]
    TurnOrderResolved,
    #[error("no match in progress")]
    NotPlaying,
    #[error("session is not running")]
    SessionStopped,
}
