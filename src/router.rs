use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::ServerMsg;

/// A parsed server message tagged with its arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub seq: u64,
    pub msg: ServerMsg,
}

pub trait InboundHandler {
    fn handle(&mut self, inbound: Inbound);
}

#[derive(Debug, Default)]
pub struct MessageRouter {
    next_seq: u64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one text frame. Unknown discriminators are `Ok(None)`; they
    /// neither consume a sequence number nor reach a handler.
    pub fn parse(&mut self, frame: &str) -> Result<Option<Inbound>, ProtocolError> {
        let value: Value = serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let tipo = match value.get("tipo") {
            Some(Value::String(t)) => t.clone(),
            Some(_) => return Err(ProtocolError::Malformed("`tipo` is not a string".into())),
            None => return Err(ProtocolError::Malformed("missing `tipo`".into())),
        };
        let msg = serde_json::from_value::<ServerMsg>(value)
            .map_err(|source| ProtocolError::InvalidPayload { tipo: tipo.clone(), source })?;
        if msg == ServerMsg::Unknown {
            debug!(%tipo, "ignoring unknown message");
            return Ok(None);
        }
        self.next_seq += 1;
        Ok(Some(Inbound { seq: self.next_seq, msg }))
    }

    /// Parses and dispatches. A bad frame is logged and dropped whole.
    pub fn route<H: InboundHandler + ?Sized>(&mut self, frame: &str, handler: &mut H) -> Result<(), ProtocolError> {
        match self.parse(frame) {
            Ok(Some(inbound)) => {
                debug!(seq = inbound.seq, kind = inbound.msg.kind(), "inbound");
                handler.handle(inbound);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(error = %err, "dropping frame");
                Err(err)
            }
        }
    }
}
