// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use crate::game::Variant;
use crate::{Appearance, BgsId, BotId, ClientId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name and version a bot client reports about itself at attach.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Inclusive board-dimension range a bot supports.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DimRange {
    pub min: u8,
    pub max: u8,
}

impl DimRange {
    pub fn contains(&self, value: u8) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedBoard {
    pub board_width: u8,
    pub board_height: u8,
}

/// What a bot declares about one variant.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSupport {
    pub board_width: DimRange,
    pub board_height: DimRange,
    #[serde(default)]
    pub recommended: Vec<RecommendedBoard>,
}

impl VariantSupport {
    pub fn supports_board(&self, width: u8, height: u8) -> bool {
        self.board_width.contains(width) && self.board_height.contains(height)
    }
}

/// One playable identity in an `attach` batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub bot_id: BotId,
    pub name: String,
    /// Compared against the server's secret to mark the bot official.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_token: Option<String>,
    /// `None` makes the bot public; otherwise only this user sees it.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    pub variants: HashMap<Variant, VariantSupport>,
}

impl BotConfig {
    const MAX_ID_LEN: usize = 64;
    const MAX_NAME_LEN: usize = 32;

    /// Schema validation applied to each bot of an `attach`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.bot_id.as_str().is_empty() {
            return Err("botId must be non-empty");
        }
        if self.bot_id.as_str().len() > Self::MAX_ID_LEN {
            return Err("botId too long");
        }
        if !self
            .bot_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("botId must be alphanumeric");
        }
        if self.name.trim().is_empty() {
            return Err("name must be non-empty");
        }
        if self.name.len() > Self::MAX_NAME_LEN {
            return Err("name too long");
        }
        if self.variants.is_empty() {
            return Err("at least one variant is required");
        }
        for support in self.variants.values() {
            if support.board_width.min == 0
                || support.board_height.min == 0
                || support.board_width.min > support.board_width.max
                || support.board_height.min > support.board_height.max
            {
                return Err("invalid board dimension range");
            }
            for board in &support.recommended {
                if !support.supports_board(board.board_width, board.board_height) {
                    return Err("recommended board outside declared range");
                }
            }
        }
        Ok(())
    }
}

/// Why an `attach` was refused. Listed in validation order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachRejectCode {
    ProtocolUnsupported,
    InvalidMessage,
    NoBots,
    InvalidBotConfig,
    DuplicateBotId,
    InvalidOfficialToken,
    TooManyClients,
}

/// Per-connection limits advertised in `attached`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachLimits {
    pub max_message_bytes: usize,
    pub min_client_message_interval_ms: u64,
}

/// What a bot game session is about: enough for the bot to set up its
/// engine without ever seeing the human-facing session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgsConfig {
    pub variant: Variant,
    pub board_width: u8,
    pub board_height: u8,
}

/// Frames a bot client sends. UTF-8 JSON, one per WebSocket text frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotClientMessage {
    #[serde(rename_all = "camelCase")]
    Attach {
        protocol_version: u32,
        client_id: ClientId,
        bots: Vec<BotConfig>,
        client: ClientInfo,
    },
    #[serde(rename_all = "camelCase")]
    GameSessionStarted {
        bgs_id: BgsId,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GameSessionEnded {
        bgs_id: BgsId,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    EvaluateResponse {
        bgs_id: BgsId,
        ply: u32,
        best_move: String,
        /// Clamped to [-1, +1] on receipt.
        evaluation: f32,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MoveApplied {
        bgs_id: BgsId,
        ply: u32,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Frames the server sends to a bot client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BotServerMessage {
    #[serde(rename = "attached", rename_all = "camelCase")]
    Attached {
        protocol_version: u32,
        /// Milliseconds since the Unix epoch.
        server_time: u64,
        server: ClientInfo,
        limits: AttachLimits,
    },
    #[serde(rename = "attach-rejected")]
    AttachRejected {
        code: AttachRejectCode,
        message: String,
    },
    #[serde(rename = "start_game_session", rename_all = "camelCase")]
    StartGameSession {
        bgs_id: BgsId,
        bot_id: BotId,
        config: BgsConfig,
    },
    #[serde(rename = "end_game_session", rename_all = "camelCase")]
    EndGameSession { bgs_id: BgsId },
    #[serde(rename = "evaluate_position", rename_all = "camelCase")]
    EvaluatePosition { bgs_id: BgsId, expected_ply: u32 },
    #[serde(rename = "apply_move", rename_all = "camelCase")]
    ApplyMove {
        bgs_id: BgsId,
        expected_ply: u32,
        #[serde(rename = "move")]
        mv: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support() -> VariantSupport {
        VariantSupport {
            board_width: DimRange { min: 3, max: 9 },
            board_height: DimRange { min: 3, max: 9 },
            recommended: vec![RecommendedBoard {
                board_width: 5,
                board_height: 5,
            }],
        }
    }

    fn config() -> BotConfig {
        BotConfig {
            bot_id: BotId::new("wallbot"),
            name: "Wallbot".to_owned(),
            official_token: None,
            username: None,
            appearance: None,
            variants: [(Variant::Standard, support())].into_iter().collect(),
        }
    }

    #[test]
    fn valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_bad_configs() {
        let mut c = config();
        c.bot_id = BotId::new("");
        assert!(c.validate().is_err());

        let mut c = config();
        c.name = "  ".to_owned();
        assert!(c.validate().is_err());

        let mut c = config();
        c.variants.get_mut(&Variant::Standard).unwrap().board_width = DimRange { min: 9, max: 3 };
        assert!(c.validate().is_err());

        let mut c = config();
        c.variants
            .get_mut(&Variant::Standard)
            .unwrap()
            .recommended
            .push(RecommendedBoard {
                board_width: 19,
                board_height: 19,
            });
        assert!(c.validate().is_err());
    }

    #[test]
    fn attach_wire_format() {
        let json = r#"{
            "type": "attach",
            "protocolVersion": 3,
            "clientId": "acme",
            "bots": [],
            "client": {"name": "acme-runner", "version": "1.2.0"}
        }"#;
        let msg: BotClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            BotClientMessage::Attach {
                protocol_version,
                client_id,
                bots,
                client,
            } => {
                assert_eq!(protocol_version, 3);
                assert_eq!(client_id, ClientId::new("acme"));
                assert!(bots.is_empty());
                assert_eq!(client.name, "acme-runner");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reject_codes_are_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&AttachRejectCode::ProtocolUnsupported).unwrap(),
            "\"PROTOCOL_UNSUPPORTED\""
        );
        assert_eq!(
            serde_json::to_string(&AttachRejectCode::TooManyClients).unwrap(),
            "\"TOO_MANY_CLIENTS\""
        );
    }

    #[test]
    fn apply_move_uses_move_key() {
        let msg = BotServerMessage::ApplyMove {
            bgs_id: BgsId::new("g1"),
            expected_ply: 4,
            mv: "c3".to_owned(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "apply_move");
        assert_eq!(json["expectedPly"], 4);
        assert_eq!(json["move"], "c3");
    }

    #[test]
    fn attach_rejected_is_kebab_tagged() {
        let msg = BotServerMessage::AttachRejected {
            code: AttachRejectCode::NoBots,
            message: "bots must be non-empty".to_owned(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "attach-rejected");
        assert_eq!(json["code"], "NO_BOTS");
    }
}
