//! Status and disconnect payloads.
//!
//! Builds the JSON documents sent to clients: the server-list status for
//! status handshakes and the disconnect reason for login attempts.

use base64::{engine::general_purpose, Engine};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Config, UpstreamAddr};
use crate::protocol::{encode_string_packet, STRING_PACKET_ID};
use crate::reflector::{PlayerCountReflector, ReflectorSettings};

/// Status document. Field names and nesting are fixed by game clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    pub version: VersionInfo,
    pub players: PlayersInfo,
    pub description: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionInfo {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayersInfo {
    pub max: i32,
    pub online: i32,
    pub sample: Vec<PlayerSample>,
}

/// Entry of the hover player list. Never populated by this server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

/// Interpret `text` as a chat component.
///
/// Text starting with `{` that parses as JSON is used as-is; anything else
/// becomes a plain text component.
pub fn parse_chat_component(text: &str) -> Value {
    if text.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return value;
        }
    }
    json!({ "text": text })
}

/// Resolve the configured favicon into a data URI.
///
/// Values starting with `data:` are used verbatim; anything else is read as
/// a PNG file. An unreadable file disables the favicon.
pub fn load_favicon(source: Option<&str>) -> Option<String> {
    let source = source?;
    if source.starts_with("data:") {
        return Some(source.to_string());
    }

    match std::fs::read(Path::new(source)) {
        Ok(png) => {
            debug!(path = source, bytes = png.len(), "Loaded favicon");
            Some(format!(
                "data:image/png;base64,{}",
                general_purpose::STANDARD.encode(png)
            ))
        }
        Err(e) => {
            warn!(path = source, error = %e, "Cannot read favicon");
            None
        }
    }
}

/// Upstream whose player count is reported, and the cache in front of it.
struct Reflection {
    upstream: UpstreamAddr,
    reflector: Arc<PlayerCountReflector>,
}

/// Builds the packets sent in reply to a handshake.
pub struct Responder {
    version_name: String,
    protocol_version: i32,
    max_players: i32,
    description: Value,
    favicon: Option<String>,
    kick_packet: Bytes,
    reflection: Option<Reflection>,
}

impl Responder {
    /// Build a responder from configuration. The favicon is loaded once here.
    pub fn from_config(config: &Config) -> Self {
        let reflection = config.reflected_server.clone().map(|upstream| Reflection {
            upstream,
            reflector: Arc::new(PlayerCountReflector::new(ReflectorSettings::from_config(
                config,
            ))),
        });

        Self::new(config, reflection)
    }

    /// Build a responder that reflects through an existing reflector.
    #[cfg(test)]
    pub fn with_reflector(
        config: &Config,
        upstream: UpstreamAddr,
        reflector: Arc<PlayerCountReflector>,
    ) -> Self {
        Self::new(config, Some(Reflection { upstream, reflector }))
    }

    fn new(config: &Config, reflection: Option<Reflection>) -> Self {
        let kick = parse_chat_component(&config.kick_message).to_string();

        Self {
            version_name: config.protocol_name.clone(),
            protocol_version: config.protocol_version,
            max_players: config.max_players,
            description: parse_chat_component(&config.motd),
            favicon: load_favicon(config.favicon.as_deref()),
            kick_packet: encode_string_packet(STRING_PACKET_ID, &kick).freeze(),
            reflection,
        }
    }

    /// Disconnect packet sent to login attempts.
    pub fn kick_packet(&self) -> Bytes {
        self.kick_packet.clone()
    }

    /// Status document for a given online count.
    pub fn status_payload(&self, online: i32) -> StatusPayload {
        StatusPayload {
            version: VersionInfo {
                name: self.version_name.clone(),
                protocol: self.protocol_version,
            },
            players: PlayersInfo {
                max: self.max_players,
                online,
                sample: Vec::new(),
            },
            description: self.description.clone(),
            favicon: self.favicon.clone(),
        }
    }

    /// Online count to report: reflected when configured, otherwise 0.
    pub async fn online_players(&self) -> i32 {
        match &self.reflection {
            Some(Reflection {
                upstream,
                reflector,
            }) => reflector.player_count(upstream).await,
            None => 0,
        }
    }

    /// Framed status response packet.
    pub async fn status_packet(&self) -> BytesMut {
        let payload = self.status_payload(self.online_players().await);
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Cannot serialize status payload");
                "{}".to_string()
            }
        };
        encode_string_packet(STRING_PACKET_ID, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::varint::encoded_size;
    use crate::protocol::{CursorBuffer, ReadResult};
    use std::io::Write;

    fn decode_string_packet(packet: &[u8]) -> String {
        let mut buf = CursorBuffer::new();
        buf.append(packet);
        match (
            buf.read_varint(5, false),
            buf.read_varint(5, false),
            buf.read_string(5, usize::MAX),
        ) {
            (ReadResult::Complete(len), ReadResult::Complete(0), ReadResult::Complete(s)) => {
                assert_eq!(len as usize, packet.len() - encoded_size(len));
                s
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_plain_chat_component() {
        assert_eq!(parse_chat_component("§eHello"), json!({ "text": "§eHello" }));
    }

    #[test]
    fn test_json_chat_component() {
        let value = parse_chat_component(r#"{"text":"Hi","color":"gold"}"#);
        assert_eq!(value, json!({ "text": "Hi", "color": "gold" }));
    }

    #[test]
    fn test_broken_json_is_plain_text() {
        assert_eq!(parse_chat_component("{oops"), json!({ "text": "{oops" }));
    }

    #[test]
    fn test_favicon_data_uri_passthrough() {
        let uri = "data:image/png;base64,AAAA";
        assert_eq!(load_favicon(Some(uri)).as_deref(), Some(uri));
        assert_eq!(load_favicon(None), None);
    }

    #[test]
    fn test_favicon_from_file() {
        let path = std::env::temp_dir().join(format!("favicon-{}.png", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0x89, b'P', b'N', b'G'])
            .unwrap();

        let favicon = load_favicon(path.to_str()).unwrap();
        assert_eq!(favicon, "data:image/png;base64,iVBORw==");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_favicon_missing_file() {
        assert_eq!(load_favicon(Some("/nonexistent/favicon.png")), None);
    }

    #[test]
    fn test_status_json_shape() {
        let responder = Responder::from_config(&Config::default());
        let value = serde_json::to_value(responder.status_payload(0)).unwrap();

        assert_eq!(
            value,
            json!({
                "version": { "name": "1.20.1", "protocol": 763 },
                "players": { "max": 100, "online": 0, "sample": [] },
                "description": { "text": "§eHello World!" },
            })
        );
    }

    #[test]
    fn test_status_json_with_favicon() {
        let config = Config {
            favicon: Some("data:image/png;base64,AAAA".to_string()),
            ..Config::default()
        };
        let payload = Responder::from_config(&config).status_payload(3);
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.ends_with(r#""favicon":"data:image/png;base64,AAAA"}"#));
    }

    #[tokio::test]
    async fn test_status_packet_without_reflector() {
        let responder = Responder::from_config(&Config::default());
        let packet = responder.status_packet().await;

        let payload: StatusPayload = serde_json::from_str(&decode_string_packet(&packet)).unwrap();
        assert_eq!(payload.players.online, 0);
        assert_eq!(payload.players.max, 100);
        assert!(payload.players.sample.is_empty());
    }

    #[test]
    fn test_kick_packet() {
        let config = Config {
            kick_message: "Come back later".to_string(),
            ..Config::default()
        };
        let responder = Responder::from_config(&config);
        let text = decode_string_packet(&responder.kick_packet());
        assert_eq!(text, r#"{"text":"Come back later"}"#);
    }
}
