use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the authenticated connection is live
    Ready { user_id: Uuid },

    /// A direct message was sent to this user
    NewMessage { message: MessageResponse },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn new_message_wire_tag_is_camel_case() {
        let event = GatewayEvent::NewMessage {
            message: MessageResponse {
                id: Uuid::new_v4(),
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                text: Some("hey".into()),
                image: None,
                created_at: Utc::now(),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "newMessage");
        assert_eq!(json["data"]["message"]["text"], "hey");
    }

    #[test]
    fn presence_update_roundtrip() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: Uuid::new_v4(),
            online: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("presenceUpdate"));

        let back: GatewayEvent = serde_json::from_str(&json).unwrap();
        match back {
            GatewayEvent::PresenceUpdate { online, .. } => assert!(online),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
