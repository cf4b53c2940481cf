//! Client-side match synchronization for four-color parchís.
//!
//! The server decides every rule. This crate keeps a local mirror of its
//! broadcasts, predicts just enough (spent dice, re-roll rights, selection)
//! to keep the board responsive, and maps logical positions to board cells.

pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reconciler;
pub mod reorder;
pub mod router;
pub mod rules;
pub mod session;
pub mod topology;
pub mod transport;
pub mod turn_order;

pub use config::ClientConfig;
pub use error::{ConfigError, ConnectionError, ProtocolError, Rejection};
pub use model::{Color, ConsumedFaces, DiceRoll, DieChoice, Outcome, Piece, PieceId, PieceState, Player, SeatInfo};
pub use protocol::{ClientMsg, Identity, ServerMsg};
pub use reconciler::{MatchReconciler, MatchView};
pub use session::{Intent, Session, SessionHandle, SessionPhase};
pub use transport::{ChannelEvent, Outbox, Transport, TransportChannel};
pub use turn_order::{TurnOrderPhase, TurnOrderResolver};
