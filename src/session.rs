//! One connection's worth of client state: lobby, turn-order phase and the
//! match itself, fed by a single event loop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ConnectionError, Rejection};
use crate::model::{Color, DiceRoll, DieChoice, PieceId, SeatInfo};
use crate::protocol::{ClientMsg, Identity, ServerMsg};
use crate::reconciler::{MatchReconciler, MatchView};
use crate::reorder::ReorderBuffer;
use crate::router::{Inbound, InboundHandler, MessageRouter};
use crate::rules::MovePolicy;
use crate::transport::{ChannelEvent, Outbox, TransportChannel};
use crate::turn_order::TurnOrderResolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Lobby,
    TurnOrder,
    Playing,
    Finished,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbyState {
    /// Seat the server assigned us.
    pub welcome: Option<SeatInfo>,
    pub connected: u32,
    pub required: u32,
    pub roster: Vec<SeatInfo>,
    pub available_colors: Vec<Color>,
    pub admin: bool,
    /// Final seating order, once decided.
    pub seating: Vec<SeatInfo>,
    pub last_info: Option<String>,
    pub last_error: Option<String>,
}

/// An action requested through a [`SessionHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    RollDice,
    ReleaseFromJail,
    ReleaseAllFromJail,
    MovePiece { piece_id: PieceId, die: DieChoice },
    ChooseBonusPiece(PieceId),
    SelectPiece(PieceId),
    ClearSelection,
    TurnOrderRoll,
    RequestColors,
    Ready,
}

#[derive(Debug)]
enum Command {
    Intent(Intent, oneshot::Sender<Result<(), Rejection>>),
    Close,
}

/// Cloneable way in to a session while [`Session::run`] owns it. Commands
/// queue until the loop picks them up.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Applies `intent` on the session loop and returns its verdict.
    pub async fn send(&self, intent: Intent) -> Result<(), Rejection> {
        let (reply, verdict) = oneshot::channel();
        self.cmd_tx.send(Command::Intent(intent, reply)).map_err(|_| Rejection::SessionStopped)?;
        verdict.await.unwrap_or(Err(Rejection::SessionStopped))
    }

    pub fn close(&self) {
        if self.cmd_tx.send(Command::Close).is_err() {
            debug!("close on a stopped session ignored");
        }
    }
}

pub struct Session<O: Outbox = TransportChannel> {
    identity: Identity,
    policy: MovePolicy,
    release_delay: std::time::Duration,
    outbox: O,
    connected: bool,
    router: MessageRouter,
    buffer: ReorderBuffer,
    lobby: LobbyState,
    phase: SessionPhase,
    turn_order: Option<TurnOrderResolver>,
    game: Option<MatchReconciler>,
    rng: StdRng,
    cmd_tx: mpsc::UnboundedSender<Command>,
    // taken by `run` while the loop is active
    cmd_rx: Option<mpsc::UnboundedReceiver<Command>>,
}

impl Session<TransportChannel> {
    /// Opens the connection described by `config`. Pointing at another server
    /// means building another session.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), ConnectionError> {
        let url = url::Url::parse(&config.server_url)?;
        let (channel, events) = TransportChannel::open(&url, config.identity()).await?;
        Ok((Session::new(config, channel), events))
    }
}

impl<O: Outbox> Session<O> {
    pub fn new(config: &ClientConfig, outbox: O) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Session {
            identity: config.identity(),
            policy: config.move_policy,
            release_delay: config.auto_release_delay(),
            outbox,
            connected: false,
            router: MessageRouter::new(),
            buffer: ReorderBuffer::new(),
            lobby: LobbyState::default(),
            phase: SessionPhase::Lobby,
            turn_order: None,
            game: None,
            rng: StdRng::from_entropy(),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
        }
    }

    /// Seeds the generator behind [`Intent::TurnOrderRoll`].
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { cmd_tx: self.cmd_tx.clone() }
    }

    pub fn phase(&self) -> SessionPhase { self.phase }
    pub fn lobby(&self) -> &LobbyState { &self.lobby }
    pub fn connected(&self) -> bool { self.connected }
    pub fn turn_order(&self) -> Option<&TurnOrderResolver> { self.turn_order.as_ref() }
    pub fn game(&self) -> Option<&MatchReconciler> { self.game.as_ref() }
    pub fn outbox(&self) -> &O { &self.outbox }

    pub fn view(&self) -> Option<MatchView> {
        self.game.as_ref().map(MatchReconciler::view)
    }

    /// Our seat: the server's welcome if it came, else what we asked for.
    pub fn local_seat(&self) -> Option<SeatInfo> {
        self.lobby.welcome.clone().or_else(|| {
            self.identity.color.map(|color| SeatInfo { name: self.identity.name.clone(), color, seat: None })
        })
    }

    // ---- event loop ----

    pub fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                info!(name = %self.identity.name, "connected");
                self.connected = true;
            }
            ChannelEvent::Message(frame) => self.on_frame(&frame),
            ChannelEvent::Closed { reason } => {
                info!(?reason, "disconnected");
                self.connected = false;
                self.cancel_scheduled();
            }
            ChannelEvent::Error(e) => {
                warn!("transport error: {e}");
                self.lobby.last_error = Some(e);
            }
        }
    }

    fn on_frame(&mut self, frame: &str) {
        let inbound = match self.router.parse(frame) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "dropping frame");
                return;
            }
        };
        if let Err(inbound) = self.buffer.retain(inbound) {
            self.handle(inbound);
        }
    }

    /// Applies whatever the reorder buffer collected during the burst.
    pub fn end_burst(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.drain(self);
        self.buffer = buffer;
    }

    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.game.as_mut() {
            Some(game) => game.fire_due(now, &mut self.outbox),
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.game.as_ref().and_then(MatchReconciler::next_deadline)
    }

    /// Drives the session until the channel closes. Each wake-up handles every
    /// event already queued, then drains the reorder buffer once. Intents sent
    /// through a [`SessionHandle`] are applied between bursts.
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<ChannelEvent>) {
        let Some(mut commands) = self.cmd_rx.take() else {
            warn!("session loop already running");
            return;
        };
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        self.end_burst();
                        self.cancel_scheduled();
                        break;
                    };
                    let mut closed = matches!(event, ChannelEvent::Closed { .. });
                    self.on_event(event);
                    while let Ok(event) = events.try_recv() {
                        closed |= matches!(event, ChannelEvent::Closed { .. });
                        self.on_event(event);
                    }
                    self.end_burst();
                    if closed {
                        // a board drained after the close may have re-armed a release
                        self.cancel_scheduled();
                        break;
                    }
                }
                Some(cmd) = commands.recv() => self.on_command(cmd),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due(Instant::now());
                }
            }
        }
        self.cmd_rx = Some(commands);
        debug!("session loop finished");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Intent(intent, reply) => {
                let verdict = self.apply(intent);
                if reply.send(verdict).is_err() {
                    debug!(?intent, "caller went away before the verdict");
                }
            }
            Command::Close => self.close(),
        }
    }

    fn cancel_scheduled(&mut self) {
        if let Some(game) = self.game.as_mut() {
            game.cancel_scheduled();
        }
    }

    /// Cancels any pending automatic action and closes the channel.
    pub fn close(&mut self) {
        self.cancel_scheduled();
        self.outbox.close();
        self.connected = false;
    }

    // ---- phase bookkeeping ----

    fn ensure_game(&mut self) -> Option<&mut MatchReconciler> {
        if self.game.is_none() {
            let Some(local) = self.local_seat() else {
                warn!("match started before we know our seat");
                return None;
            };
            info!(name = %local.name, color = %local.color, "match started");
            self.game = Some(
                MatchReconciler::new(local)
                    .with_policy(self.policy)
                    .with_release_delay(self.release_delay),
            );
            self.turn_order = None;
            if self.phase != SessionPhase::Finished {
                self.phase = SessionPhase::Playing;
            }
        }
        self.game.as_mut()
    }

    fn on_turn_order(&mut self, msg: ServerMsg) {
        if let ServerMsg::TurnOrderStart { first } = msg {
            let Some(local) = self.local_seat() else {
                warn!("turn order started before we know our seat");
                return;
            };
            let mut resolver = TurnOrderResolver::new(local);
            resolver.on_start(first);
            self.turn_order = Some(resolver);
            self.phase = SessionPhase::TurnOrder;
            return;
        }
        let Some(resolver) = self.turn_order.as_mut() else {
            debug!(kind = msg.kind(), "turn-order message outside the turn-order phase");
            return;
        };
        match msg {
            ServerMsg::TurnOrderResult { name, color, first, second, next, .. } => {
                if !(1..=6).contains(&first) || !(1..=6).contains(&second) {
                    warn!(%name, first, second, "turn-order dice out of range");
                    return;
                }
                resolver.on_result(color, DiceRoll::new(first, second), next);
            }
            ServerMsg::TurnOrderTie { tied, value } => resolver.on_tie(&tied, value),
            ServerMsg::TurnOrderWinner { winner, order } => {
                info!(winner = %winner.name, "seating decided");
                self.lobby.seating = order.clone();
                resolver.on_winner(order);
            }
            _ => {}
        }
    }

    // ---- actions ----

    fn with_game<T>(
        &mut self,
        f: impl FnOnce(&mut MatchReconciler, &mut O) -> Result<T, Rejection>,
    ) -> Result<T, Rejection> {
        match self.game.as_mut() {
            Some(game) => f(game, &mut self.outbox),
            None => Err(Rejection::NotPlaying),
        }
    }

    pub fn roll_dice(&mut self) -> Result<(), Rejection> {
        self.with_game(|g, out| g.roll_dice(out))
    }

    pub fn release_from_jail(&mut self) -> Result<(), Rejection> {
        self.with_game(|g, out| g.release_from_jail(out))
    }

    pub fn release_all_from_jail(&mut self) -> Result<(), Rejection> {
        self.with_game(|g, out| g.release_all_from_jail(out))
    }

    pub fn move_piece(&mut self, piece_id: PieceId, die: DieChoice) -> Result<(), Rejection> {
        self.with_game(|g, out| g.move_piece(piece_id, die, out))
    }

    pub fn choose_bonus_piece(&mut self, piece_id: PieceId) -> Result<(), Rejection> {
        self.with_game(|g, out| g.choose_bonus_piece(piece_id, out))
    }

    pub fn select_piece(&mut self, piece_id: PieceId) -> Result<(), Rejection> {
        self.with_game(|g, _| g.select_piece(piece_id))
    }

    pub fn clear_selection(&mut self) {
        if let Some(game) = self.game.as_mut() {
            game.clear_selection();
        }
    }

    /// Rolls for seating order with locally generated faces.
    pub fn turn_order_roll<R: Rng>(&mut self, rng: &mut R) -> Result<DiceRoll, Rejection> {
        match self.turn_order.as_mut() {
            Some(resolver) => resolver.roll(rng, &mut self.outbox),
            None => Err(Rejection::NotPlaying),
        }
    }

    pub fn apply(&mut self, intent: Intent) -> Result<(), Rejection> {
        match intent {
            Intent::RollDice => self.roll_dice(),
            Intent::ReleaseFromJail => self.release_from_jail(),
            Intent::ReleaseAllFromJail => self.release_all_from_jail(),
            Intent::MovePiece { piece_id, die } => self.move_piece(piece_id, die),
            Intent::ChooseBonusPiece(piece_id) => self.choose_bonus_piece(piece_id),
            Intent::SelectPiece(piece_id) => self.select_piece(piece_id),
            Intent::ClearSelection => {
                self.clear_selection();
                Ok(())
            }
            Intent::TurnOrderRoll => match self.turn_order.as_mut() {
                Some(resolver) => resolver.roll(&mut self.rng, &mut self.outbox).map(|_| ()),
                None => Err(Rejection::NotPlaying),
            },
            Intent::RequestColors => {
                self.request_colors();
                Ok(())
            }
            Intent::Ready => self.ready(),
        }
    }

    pub fn request_colors(&mut self) {
        self.outbox.send(ClientMsg::RequestColors);
    }

    /// Asks the server to start the match. Only meaningful from the lobby.
    pub fn ready(&mut self) -> Result<(), Rejection> {
        if self.phase != SessionPhase::Lobby {
            debug!(phase = ?self.phase, "ready outside the lobby dropped");
            return Err(Rejection::AlreadyActed);
        }
        self.outbox.send(ClientMsg::Ready);
        Ok(())
    }
}

impl<O: Outbox> InboundHandler for Session<O> {
    fn handle(&mut self, inbound: Inbound) {
        match inbound.msg {
            ServerMsg::Welcome { color, seat, name } => {
                info!(%name, %color, seat, "welcome");
                self.lobby.welcome = Some(SeatInfo { name, color, seat: Some(seat) });
            }
            ServerMsg::Waiting { connected, required, roster } => {
                self.lobby.connected = connected;
                self.lobby.required = required;
                if !roster.is_empty() {
                    self.lobby.roster = roster;
                }
            }
            ServerMsg::AvailableColors { colors } => self.lobby.available_colors = colors,
            ServerMsg::PlayerJoined { name, color } => {
                if !self.lobby.roster.iter().any(|s| s.name == name) {
                    self.lobby.roster.push(SeatInfo { name, color, seat: None });
                }
            }
            ServerMsg::PlayerLeft { name, .. } => {
                info!(%name, "player left");
                self.lobby.roster.retain(|s| s.name != name);
            }
            ServerMsg::Info { message, admin, host } => {
                if let Some(flag) = admin.or(host) {
                    self.lobby.admin = flag;
                }
                self.lobby.last_info = Some(message);
            }
            ServerMsg::Error { message } => {
                warn!(%message, "server error");
                self.lobby.last_error = Some(message);
            }
            msg @ (ServerMsg::TurnOrderStart { .. }
            | ServerMsg::TurnOrderResult { .. }
            | ServerMsg::TurnOrderTie { .. }
            | ServerMsg::TurnOrderWinner { .. }) => self.on_turn_order(msg),
            ServerMsg::GameStarted { roster } => {
                if !roster.is_empty() {
                    self.lobby.roster = roster;
                }
                self.ensure_game();
            }
            ServerMsg::Unknown => {}
            msg => {
                let creates = matches!(msg, ServerMsg::Turn { .. } | ServerMsg::Board(_));
                let finished = matches!(msg, ServerMsg::Victory { .. });
                let game = if creates { self.ensure_game() } else { self.game.as_mut() };
                match game {
                    Some(game) => game.handle(Inbound { seq: inbound.seq, msg }),
                    None => debug!(kind = msg.kind(), "match message before the match"),
                }
                if finished && self.game.is_some() {
                    self.phase = SessionPhase::Finished;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn_order::TurnOrderPhase;
    use rand::{rngs::StdRng, SeedableRng};

    fn session() -> Session<Vec<ClientMsg>> {
        let cfg = ClientConfig::new("ws://127.0.0.1:8001", "Ana");
        Session::new(&cfg, Vec::new())
    }

    fn frames(s: &mut Session<Vec<ClientMsg>>, raw: &[&str]) {
        for f in raw {
            s.on_event(ChannelEvent::Message(f.to_string()));
        }
        s.end_burst();
    }

    const WELCOME: &str = r#"{"tipo":"BIENVENIDA","color":"rojo","jugador_id":0,"nombre":"Ana"}"#;

    #[test]
    fn lobby_tracks_roster_and_flags() {
        let mut s = session();
        s.on_event(ChannelEvent::Opened);
        frames(&mut s, &[
            WELCOME,
            r#"{"tipo":"ESPERANDO","conectados":1,"requeridos":4,"jugadores":[{"nombre":"Ana","color":"rojo"}]}"#,
            r#"{"tipo":"JUGADOR_CONECTADO","nombre":"Luis","color":"azul"}"#,
            r#"{"tipo":"INFO","mensaje":"eres admin","es_admin":true}"#,
            r#"{"tipo":"COLORES_DISPONIBLES","colores":["verde","amarillo"]}"#,
            r#"{"tipo":"JUGADOR_DESCONECTADO","nombre":"Ana"}"#,
        ]);
        let lobby = s.lobby();
        assert!(s.connected());
        assert_eq!(lobby.welcome.as_ref().map(|w| w.color), Some(Color::Red));
        assert_eq!(lobby.required, 4);
        assert_eq!(lobby.roster.len(), 1);
        assert_eq!(lobby.roster[0].name, "Luis");
        assert!(lobby.admin);
        assert_eq!(lobby.available_colors, vec![Color::Green, Color::Yellow]);
        assert_eq!(s.phase(), SessionPhase::Lobby);
    }

    #[test]
    fn bad_frames_are_dropped() {
        let mut s = session();
        frames(&mut s, &["{", r#"{"tipo":"TURNO"}"#, r#"{"tipo":"NUEVO"}"#, WELCOME]);
        assert!(s.lobby().welcome.is_some());
    }

    #[test]
    fn turn_order_then_match() {
        let mut s = session();
        frames(&mut s, &[WELCOME, r#"{"tipo":"DETERMINACION_INICIO","jugador_actual":""}"#]);
        assert_eq!(s.phase(), SessionPhase::TurnOrder);
        assert_eq!(s.turn_order().map(|t| t.phase()), Some(TurnOrderPhase::ActingSeatRolling));

        let mut rng = StdRng::seed_from_u64(1);
        let faces = s.turn_order_roll(&mut rng).unwrap();
        assert_eq!(s.outbox().last(), Some(&ClientMsg::TurnOrderRoll { first: faces.first, second: faces.second }));
        assert_eq!(s.turn_order_roll(&mut rng), Err(Rejection::AlreadyActed));

        frames(&mut s, &[
            r#"{"tipo":"DETERMINACION_GANADOR","ganador":{"nombre":"Ana","color":"rojo"},"orden":[{"nombre":"Ana","color":"rojo"},{"nombre":"Luis","color":"azul"}]}"#,
            r#"{"tipo":"INICIO_JUEGO"}"#,
        ]);
        assert_eq!(s.phase(), SessionPhase::Playing);
        assert!(s.turn_order().is_none());
        assert_eq!(s.lobby().seating.len(), 2);
        assert_eq!(s.roll_dice(), Err(Rejection::NotYourTurn));
    }

    #[test]
    fn intents_map_onto_actions() {
        let mut s = session().with_seed(7);
        assert_eq!(s.apply(Intent::TurnOrderRoll), Err(Rejection::NotPlaying));
        frames(&mut s, &[WELCOME, r#"{"tipo":"DETERMINACION_INICIO","jugador_actual":"Ana"}"#]);
        s.apply(Intent::TurnOrderRoll).unwrap();
        assert!(matches!(s.outbox().last(), Some(ClientMsg::TurnOrderRoll { .. })));
        assert_eq!(s.apply(Intent::TurnOrderRoll), Err(Rejection::AlreadyActed));
        assert_eq!(s.apply(Intent::ChooseBonusPiece(0)), Err(Rejection::NotPlaying));
        s.apply(Intent::RequestColors).unwrap();
        assert_eq!(s.outbox().last(), Some(&ClientMsg::RequestColors));
    }

    #[test]
    fn actions_before_match_are_rejected() {
        let mut s = session();
        assert_eq!(s.roll_dice(), Err(Rejection::NotPlaying));
        assert_eq!(s.move_piece(0, DieChoice::First), Err(Rejection::NotPlaying));
        s.ready().unwrap();
        s.request_colors();
        assert_eq!(s.outbox(), &vec![ClientMsg::Ready, ClientMsg::RequestColors]);
    }

    #[test]
    fn burst_collapses_to_latest_board() {
        let mut s = session();
        frames(&mut s, &[WELCOME]);
        let board = |pos: i32| {
            format!(
                r#"{{"tipo":"TABLERO","jugadores":[{{"nombre":"Ana","color":"rojo","fichas":[{{"id":0,"color":"rojo","estado":"EN_JUEGO","posicion":{pos}}}]}}],"turno_actual":0,"dados_lanzados":false}}"#
            )
        };
        let (b1, b2) = (board(40), board(45));
        frames(&mut s, &[&b1, r#"{"tipo":"MOVIMIENTO_OK","nombre":"Ana","color":"rojo","ficha_id":0,"desde":40,"hasta":45}"#, &b2]);
        let game = s.game().unwrap();
        assert_eq!(game.players()[0].pieces[0].position, 45);
        // one snapshot applied for the whole burst
        assert_eq!(game.version(), 1);
        assert_eq!(s.view().unwrap().last_move, None);
    }

    #[test]
    fn close_cancels_pending_release() {
        let mut s = session();
        frames(&mut s, &[
            WELCOME,
            r#"{"tipo":"TURNO","nombre":"Ana","color":"rojo"}"#,
            r#"{"tipo":"TABLERO","jugadores":[{"nombre":"Ana","color":"rojo","fichas":[
                {"id":0,"color":"rojo","estado":"BLOQUEADO","posicion":-1},
                {"id":1,"color":"rojo","estado":"BLOQUEADO","posicion":-1},
                {"id":2,"color":"rojo","estado":"BLOQUEADO","posicion":-1},
                {"id":3,"color":"rojo","estado":"BLOQUEADO","posicion":-1}]}],
              "turno_actual":0,"dados_lanzados":false}"#,
        ]);
        frames(&mut s, &[r#"{"tipo":"DADOS","dado1":6,"dado2":6,"suma":12,"es_doble":true}"#]);
        let due = s.game().and_then(|g| g.next_deadline()).expect("scheduled");
        s.close();
        assert!(!s.fire_due(due + std::time::Duration::from_secs(1)));
        assert!(s.outbox().is_empty());
        assert!(!s.connected());
    }

    #[test]
    fn victory_finishes_the_session() {
        let mut s = session();
        frames(&mut s, &[
            WELCOME,
            r#"{"tipo":"TURNO","nombre":"Ana","color":"rojo"}"#,
            r#"{"tipo":"VICTORIA","ganador":"Ana","color":"rojo"}"#,
        ]);
        assert_eq!(s.phase(), SessionPhase::Finished);
        assert!(!s.view().unwrap().can_roll);
    }
}
