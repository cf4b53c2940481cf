use tracing::debug;

use crate::protocol::ServerMsg;
use crate::router::{Inbound, InboundHandler};

/// Collapses a burst of board snapshots and move confirmations so that only
/// the latest truth is applied once the burst ends.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    held: Vec<Inbound>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn priority(msg: &ServerMsg) -> Option<u8> {
        match msg {
            ServerMsg::Board(_) => Some(2),
            ServerMsg::MoveConfirmed(_) => Some(1),
            _ => None,
        }
    }

    pub fn accepts(msg: &ServerMsg) -> bool {
        Self::priority(msg).is_some()
    }

    /// Holds allow-listed messages. Anything else is handed back for
    /// immediate handling.
    pub fn retain(&mut self, inbound: Inbound) -> Result<(), Inbound> {
        if Self::accepts(&inbound.msg) {
            self.held.push(inbound);
            Ok(())
        } else {
            Err(inbound)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Replays the newest message of the highest-priority kind held, then
    /// forgets the rest. Returns whether anything was replayed.
    pub fn drain<H: InboundHandler + ?Sized>(&mut self, handler: &mut H) -> bool {
        let held = std::mem::take(&mut self.held);
        let dropped = held.len().saturating_sub(1);
        let winner = held
            .into_iter()
            .filter_map(|i| Self::priority(&i.msg).map(|p| (p, i.seq, i)))
            .max_by_key(|(p, seq, _)| (*p, *seq));
        match winner {
            Some((_, seq, inbound)) => {
                debug!(seq, kind = inbound.msg.kind(), dropped, "replaying latest from burst");
                handler.handle(inbound);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Color;
    use crate::protocol::{BoardSnapshot, MoveConfirmed};

    #[derive(Default)]
    struct Recorder(Vec<Inbound>);

    impl InboundHandler for Recorder {
        fn handle(&mut self, inbound: Inbound) {
            self.0.push(inbound);
        }
    }

    fn board(seq: u64, turn_index: usize) -> Inbound {
        let snap = BoardSnapshot {
            players: vec![], turn_index, dice_rolled: false, last_first: 0, last_second: 0,
            last_sum: 0, last_doubles: false, consecutive_doubles: 0,
        };
        Inbound { seq, msg: ServerMsg::Board(snap) }
    }

    fn moved(seq: u64, to: i32) -> Inbound {
        let m = MoveConfirmed {
            actor: "Ana".into(), color: Color::Red, piece_id: Some(0), from: 38, to,
            action: Some("mover".into()), captures: vec![],
        };
        Inbound { seq, msg: ServerMsg::MoveConfirmed(m) }
    }

    #[test]
    fn snapshot_beats_later_move() {
        let mut buf = ReorderBuffer::new();
        buf.retain(board(1, 0)).unwrap();
        buf.retain(moved(2, 41)).unwrap();
        buf.retain(board(3, 1)).unwrap();
        buf.retain(moved(4, 44)).unwrap();
        assert_eq!(buf.len(), 4);

        let mut rec = Recorder::default();
        assert!(buf.drain(&mut rec));
        assert_eq!(rec.0, vec![board(3, 1)]);
        assert!(buf.is_empty());
        assert!(!buf.drain(&mut rec));
        assert_eq!(rec.0.len(), 1);
    }

    #[test]
    fn newest_move_when_no_snapshot() {
        let mut buf = ReorderBuffer::new();
        buf.retain(moved(5, 41)).unwrap();
        buf.retain(moved(6, 44)).unwrap();
        let mut rec = Recorder::default();
        buf.drain(&mut rec);
        assert_eq!(rec.0, vec![moved(6, 44)]);
    }

    #[test]
    fn other_messages_pass_through() {
        let mut buf = ReorderBuffer::new();
        let turn = Inbound { seq: 1, msg: ServerMsg::Turn { name: "Ana".into(), color: Color::Red } };
        assert_eq!(buf.retain(turn.clone()), Err(turn));
        assert!(buf.is_empty());
    }
}
