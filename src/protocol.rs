//! Wire messages. Every frame is a JSON object whose `tipo` field names the
//! variant.

use serde::{Deserialize, Serialize};

use crate::model::{CaptureInfo, Color, DiceRoll, DieChoice, PieceId, PieceState, Player, SeatInfo, SeatName};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tipo")]
pub enum ClientMsg {
    #[serde(rename = "CONECTAR")]
    Connect {
        #[serde(rename = "nombre")]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
        #[serde(rename = "usuario_id", default, skip_serializing_if = "Option::is_none")]
        account_id: Option<i64>,
    },
    #[serde(rename = "LISTO")]
    Ready,
    #[serde(rename = "LANZAR_DADOS")]
    RollDice,
    #[serde(rename = "SACAR_CARCEL")]
    ReleaseFromJail,
    #[serde(rename = "SACAR_TODAS")]
    ReleaseAllFromJail,
    #[serde(rename = "MOVER_FICHA")]
    MovePiece {
        #[serde(rename = "ficha_id")]
        piece_id: PieceId,
        #[serde(rename = "dado_elegido")]
        die: DieChoice,
    },
    #[serde(rename = "ELEGIR_FICHA_PREMIO")]
    ChooseBonusPiece {
        #[serde(rename = "ficha_id")]
        piece_id: PieceId,
    },
    #[serde(rename = "DETERMINACION_TIRADA")]
    TurnOrderRoll {
        #[serde(rename = "dado1")]
        first: u8,
        #[serde(rename = "dado2")]
        second: u8,
    },
    #[serde(rename = "SOLICITAR_COLORES")]
    RequestColors,
}

/// Who we are, sent once as the first frame of every connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub color: Option<Color>,
    pub account_id: Option<i64>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Identity { name: name.into(), color: None, account_id: None }
    }

    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    #[must_use]
    pub fn with_account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn announcement(&self) -> ClientMsg {
        ClientMsg::Connect { name: self.name.clone(), color: self.color, account_id: self.account_id }
    }
}

/// Full board as broadcast after every state change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardSnapshot {
    #[serde(rename = "jugadores")]
    pub players: Vec<Player>,
    #[serde(rename = "turno_actual", default)]
    pub turn_index: usize,
    #[serde(rename = "dados_lanzados", default)]
    pub dice_rolled: bool,
    #[serde(rename = "ultimo_dado1", default)]
    pub last_first: u8,
    #[serde(rename = "ultimo_dado2", default)]
    pub last_second: u8,
    #[serde(rename = "ultima_suma", default)]
    pub last_sum: u8,
    #[serde(rename = "ultimo_es_doble", default)]
    pub last_doubles: bool,
    #[serde(rename = "dobles_consecutivos", default)]
    pub consecutive_doubles: u8,
}

impl BoardSnapshot {
    /// The roll still in play, if the server says dice are on the table.
    pub fn roll(&self) -> Option<DiceRoll> {
        let face = 1..=6;
        (self.dice_rolled && face.contains(&self.last_first) && face.contains(&self.last_second))
            .then(|| DiceRoll::new(self.last_first, self.last_second))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveConfirmed {
    #[serde(rename = "nombre")]
    pub actor: SeatName,
    pub color: Color,
    #[serde(rename = "ficha_id", default, skip_serializing_if = "Option::is_none")]
    pub piece_id: Option<PieceId>,
    #[serde(rename = "desde")]
    pub from: i32,
    #[serde(rename = "hasta")]
    pub to: i32,
    #[serde(rename = "accion", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(rename = "capturas", default, skip_serializing_if = "Vec::is_empty")]
    pub captures: Vec<CaptureInfo>,
}

impl MoveConfirmed {
    pub fn is_release(&self) -> bool {
        self.action.as_deref() == Some("liberar_ficha") || self.from < 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EligiblePiece {
    pub id: PieceId,
    #[serde(rename = "estado")]
    pub state: PieceState,
    pub color: Color,
    #[serde(rename = "posicion")]
    pub position: i32,
    #[serde(rename = "posicion_meta", default)]
    pub home_index: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TiedSeat {
    #[serde(rename = "nombre")]
    pub name: SeatName,
    pub color: Color,
    #[serde(rename = "suma", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tipo")]
pub enum ServerMsg {
    #[serde(rename = "BIENVENIDA")]
    Welcome {
        color: Color,
        #[serde(rename = "jugador_id")]
        seat: u32,
        #[serde(rename = "nombre")]
        name: SeatName,
    },
    #[serde(rename = "ESPERANDO")]
    Waiting {
        #[serde(rename = "conectados")]
        connected: u32,
        #[serde(rename = "requeridos")]
        required: u32,
        #[serde(rename = "jugadores", default)]
        roster: Vec<SeatInfo>,
    },
    #[serde(rename = "INICIO_JUEGO")]
    GameStarted {
        #[serde(rename = "jugadores", default)]
        roster: Vec<SeatInfo>,
    },
    #[serde(rename = "TURNO")]
    Turn {
        #[serde(rename = "nombre")]
        name: SeatName,
        color: Color,
    },
    #[serde(rename = "DADOS")]
    Dice {
        #[serde(rename = "dado1")]
        first: u8,
        #[serde(rename = "dado2")]
        second: u8,
        #[serde(rename = "suma")]
        sum: u8,
        #[serde(rename = "es_doble")]
        doubles: bool,
    },
    #[serde(rename = "TABLERO")]
    Board(BoardSnapshot),
    #[serde(rename = "MOVIMIENTO_OK")]
    MoveConfirmed(MoveConfirmed),
    #[serde(rename = "CAPTURA")]
    Capture {
        #[serde(rename = "capturado")]
        captured: CaptureInfo,
    },
    #[serde(rename = "PREMIO_TRES_DOBLES")]
    BonusEligible {
        #[serde(rename = "nombre", default)]
        actor: Option<SeatName>,
        #[serde(rename = "fichas_elegibles")]
        eligible: Vec<EligiblePiece>,
        #[serde(rename = "mensaje", default)]
        message: Option<String>,
    },
    #[serde(rename = "FICHA_A_META")]
    PieceSentHome {
        #[serde(rename = "nombre")]
        actor: SeatName,
        color: Color,
        #[serde(rename = "ficha_id")]
        piece_id: PieceId,
        #[serde(rename = "desde", default)]
        from: i32,
    },
    #[serde(rename = "VICTORIA")]
    Victory {
        #[serde(rename = "ganador")]
        winner: SeatName,
        color: Color,
    },
    #[serde(rename = "INFO")]
    Info {
        #[serde(rename = "mensaje", default)]
        message: String,
        #[serde(rename = "es_admin", default)]
        admin: Option<bool>,
        #[serde(rename = "es_host", default)]
        host: Option<bool>,
    },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(rename = "mensaje", default)]
        message: String,
    },
    #[serde(rename = "DETERMINACION_INICIO")]
    TurnOrderStart {
        #[serde(rename = "jugador_actual", default)]
        first: Option<SeatName>,
    },
    #[serde(rename = "DETERMINACION_RESULTADO")]
    TurnOrderResult {
        #[serde(rename = "nombre")]
        name: SeatName,
        color: Color,
        #[serde(rename = "dado1")]
        first: u8,
        #[serde(rename = "dado2")]
        second: u8,
        #[serde(rename = "suma", default)]
        sum: u8,
        #[serde(rename = "siguiente", default)]
        next: Option<SeatName>,
    },
    #[serde(rename = "DETERMINACION_EMPATE")]
    TurnOrderTie {
        #[serde(rename = "jugadores")]
        tied: Vec<TiedSeat>,
        #[serde(rename = "valor")]
        value: u8,
    },
    #[serde(rename = "DETERMINACION_GANADOR")]
    TurnOrderWinner {
        #[serde(rename = "ganador")]
        winner: SeatInfo,
        #[serde(rename = "orden")]
        order: Vec<SeatInfo>,
    },
    #[serde(rename = "COLORES_DISPONIBLES")]
    AvailableColors {
        #[serde(rename = "colores")]
        colors: Vec<Color>,
    },
    #[serde(rename = "JUGADOR_CONECTADO")]
    PlayerJoined {
        #[serde(rename = "nombre")]
        name: SeatName,
        color: Color,
    },
    #[serde(rename = "JUGADOR_DESCONECTADO")]
    PlayerLeft {
        #[serde(rename = "nombre")]
        name: SeatName,
        #[serde(default)]
        color: Option<Color>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Welcome { .. } => "BIENVENIDA",
            ServerMsg::Waiting { .. } => "ESPERANDO",
            ServerMsg::GameStarted { .. } => "INICIO_JUEGO",
            ServerMsg::Turn { .. } => "TURNO",
            ServerMsg::Dice { .. } => "DADOS",
            ServerMsg::Board(_) => "TABLERO",
            ServerMsg::MoveConfirmed(_) => "MOVIMIENTO_OK",
            ServerMsg::Capture { .. } => "CAPTURA",
            ServerMsg::BonusEligible { .. } => "PREMIO_TRES_DOBLES",
            ServerMsg::PieceSentHome { .. } => "FICHA_A_META",
            ServerMsg::Victory { .. } => "VICTORIA",
            ServerMsg::Info { .. } => "INFO",
            ServerMsg::Error { .. } => "ERROR",
            ServerMsg::TurnOrderStart { .. } => "DETERMINACION_INICIO",
            ServerMsg::TurnOrderResult { .. } => "DETERMINACION_RESULTADO",
            ServerMsg::TurnOrderTie { .. } => "DETERMINACION_EMPATE",
            ServerMsg::TurnOrderWinner { .. } => "DETERMINACION_GANADOR",
            ServerMsg::AvailableColors { .. } => "COLORES_DISPONIBLES",
            ServerMsg::PlayerJoined { .. } => "JUGADOR_CONECTADO",
            ServerMsg::PlayerLeft { .. } => "JUGADOR_DESCONECTADO",
            ServerMsg::Unknown => "?",
        }
    }
}
