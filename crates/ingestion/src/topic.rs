//! Topic 解码
//!
//! 将 `<listen_root><client>[/<database>][/<intent>]` 解析为路由意图。
//! 纯函数，不会失败：格式错误的 topic 退化为 `Intent::Invalid`。

use contracts::{DatabaseId, Intent, NodeId};

/// Decoded inbound topic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedTopic {
    pub client_id: NodeId,
    pub database_id: DatabaseId,
    pub intent: Intent,
}

/// Decode an inbound topic
///
/// | segments | result |
/// |---|---|
/// | 1 | client only, `Invalid` |
/// | 2 | client + `Create` if the second segment is `create`, else client + database, `Invalid` |
/// | 3 | client + database + parsed intent |
/// | other | everything empty, `Invalid` |
///
/// `listen_root` is stripped when present.
pub fn decode_topic(topic: &str, listen_root: &str) -> DecodedTopic {
    let rest = topic.strip_prefix(listen_root).unwrap_or(topic);
    let segments: Vec<&str> = rest.split('/').collect();

    match segments.as_slice() {
        [client] => DecodedTopic {
            client_id: NodeId::new(client),
            ..Default::default()
        },
        [client, second] => {
            let intent = Intent::parse_inbound(second);
            if intent == Intent::Create {
                DecodedTopic {
                    client_id: NodeId::new(client),
                    database_id: DatabaseId::default(),
                    intent,
                }
            } else {
                DecodedTopic {
                    client_id: NodeId::new(client),
                    database_id: DatabaseId::new(second),
                    intent: Intent::Invalid,
                }
            }
        }
        [client, database, token] => DecodedTopic {
            client_id: NodeId::new(client),
            database_id: DatabaseId::new(database),
            intent: Intent::parse_inbound(token),
        },
        _ => DecodedTopic::default(),
    }
}
