//! Types shared by the session server and its clients: the wire protocol,
//! synchronized field tables, input packages and the admission handshake.

pub mod admission;
pub mod input;
pub mod schema;

pub use admission::{AdmissionError, Credentials, JoinRequest, PlayerIdentity};
pub use input::{InputPackage, Payload};
pub use schema::{EntitySnapshot, FieldDecl, FieldKind, FieldMap, FieldValue, Schema, Synced};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 8192;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Join {
        game: String,
        protocol_version: u32,
        fields: BTreeMap<String, String>,
    },
    Input(InputPackage),
    Leave,

    Joined {
        session: String,
        player_id: u32,
        entity: Option<u32>,
    },
    State {
        tick: u64,
        timestamp: u64,
        last_processed_input: HashMap<u32, u32>,
        entities: Vec<EntitySnapshot>,
    },
    Rejected {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
}

/// Milliseconds since the Unix epoch
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serialization_join() {
        let mut fields = BTreeMap::new();
        fields.insert("playerId".to_string(), "7".to_string());

        let packet = Packet::Join {
            game: "grazer".into(),
            protocol_version: PROTOCOL_VERSION,
            fields,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Join {
                game,
                protocol_version,
                fields,
            } => {
                assert_eq!(game, "grazer");
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(fields.get("playerId").map(String::as_str), Some("7"));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_state() {
        let mut fields = FieldMap::new();
        fields.insert("x".into(), FieldValue::Float(10.0));
        fields.insert("score".into(), FieldValue::Int(3));

        let mut last_processed_input = HashMap::new();
        last_processed_input.insert(1, 10);

        let packet = Packet::State {
            tick: 42,
            timestamp: 123456789,
            last_processed_input,
            entities: vec![EntitySnapshot {
                id: 5,
                schema: "Grazer".into(),
                is_bot: true,
                fields,
            }],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::State {
                tick,
                timestamp,
                last_processed_input,
                entities,
            } => {
                assert_eq!(tick, 42);
                assert_eq!(timestamp, 123456789);
                assert_eq!(last_processed_input.get(&1), Some(&10));
                assert_eq!(entities.len(), 1);
                assert!(entities[0].is_bot);
                assert_eq!(entities[0].float("x"), Some(10.0));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_timestamp_advances() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }
}
