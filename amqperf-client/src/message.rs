use amqperf_codec::codec::FRAME_OVERHEAD;
use amqperf_codec::frame::{AMQPFrame, ContentBodyFrame, ContentHeaderFrame, FieldTable, BASIC_CLASS};
use bytes::Bytes;

use crate::model::ChannelNumber;

/// A message sent to the server or received from the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub body: Bytes,
    pub properties: MessageProperties,
}

/// Standard set of message properties
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// 1 - non-persistent, 2 - persistent
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

/// A delivered message.
///
/// With the `consumer_tag` and `delivery_tag` a client can send back acknowledgements to the
/// server, saying that the message was successfully arrived.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveredMessage {
    pub message: Message,
    pub channel: ChannelNumber,
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

/// A mandatory message the broker couldn't route.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReturnedMessage {
    pub message: Message,
    pub channel: ChannelNumber,
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message {
            body: Bytes::copy_from_slice(value.as_bytes()),
            properties: MessageProperties::default(),
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Message {
            body: Bytes::from(value),
            properties: MessageProperties::default(),
        }
    }
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Message {
            body: body.into(),
            properties: MessageProperties::default(),
        }
    }

    pub fn content_type(mut self, value: &str) -> Self {
        self.properties.content_type = Some(value.to_string());
        self
    }

    pub fn delivery_mode(mut self, value: u8) -> Self {
        self.properties.delivery_mode = Some(value);
        self
    }
}

/// Content header and body frames of a message.
///
/// The body is cut into frames which fit into `frame_max` together with the frame overhead. An
/// empty body results in a header frame only. `frame_max` 0 means the body goes in one frame.
pub(crate) fn to_content_frames(channel: ChannelNumber, message: &Message, frame_max: u32) -> Vec<AMQPFrame> {
    let props = message.properties.clone();

    let header = ContentHeaderFrame {
        channel,
        class_id: BASIC_CLASS,
        weight: 0,
        body_size: message.body.len() as u64,
        content_type: props.content_type,
        content_encoding: props.content_encoding,
        headers: props.headers,
        delivery_mode: props.delivery_mode,
        priority: props.priority,
        correlation_id: props.correlation_id,
        reply_to: props.reply_to,
        expiration: props.expiration,
        message_id: props.message_id,
        timestamp: props.timestamp,
        message_type: props.message_type,
        user_id: props.user_id,
        app_id: props.app_id,
        cluster_id: None,
    };

    let max_body = match frame_max as usize {
        0 => usize::MAX,
        n => n.saturating_sub(FRAME_OVERHEAD).max(1),
    };

    let mut frames = Vec::with_capacity(2);
    frames.push(header.frame());

    let mut offset = 0;
    while offset < message.body.len() {
        let end = std::cmp::min(message.body.len(), offset.saturating_add(max_body));

        frames.push(
            ContentBodyFrame {
                channel,
                body: message.body.slice(offset..end),
            }
            .frame(),
        );

        offset = end;
    }

    frames
}

impl From<ContentHeaderFrame> for MessageProperties {
    fn from(value: ContentHeaderFrame) -> Self {
        MessageProperties {
            content_type: value.content_type,
            content_encoding: value.content_encoding,
            headers: value.headers,
            delivery_mode: value.delivery_mode,
            priority: value.priority,
            correlation_id: value.correlation_id,
            reply_to: value.reply_to,
            expiration: value.expiration,
            message_id: value.message_id,
            timestamp: value.timestamp,
            message_type: value.message_type,
            user_id: value.user_id,
            app_id: value.app_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_sizes(frames: &[AMQPFrame]) -> Vec<usize> {
        frames
            .iter()
            .filter_map(|f| match f {
                AMQPFrame::ContentBody(b) => Some(b.body.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn body_is_split_at_frame_max() {
        let message = Message::new(vec![b'a'; 10_000]);
        let frames = to_content_frames(3, &message, 4096);

        assert_eq!(body_sizes(&frames), vec![4088, 4088, 1824]);

        match &frames[0] {
            AMQPFrame::ContentHeader(h) => {
                assert_eq!(h.channel, 3);
                assert_eq!(h.class_id, BASIC_CLASS);
                assert_eq!(h.body_size, 10_000);
            }
            other => panic!("Expected content header, got {:?}", other),
        }
    }

    #[test]
    fn empty_body_has_header_only() {
        let frames = to_content_frames(1, &Message::new(Bytes::new()), 4096);

        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn unlimited_frame_max_sends_one_body() {
        let frames = to_content_frames(1, &Message::new(vec![0u8; 300_000]), 0);

        assert_eq!(body_sizes(&frames), vec![300_000]);
    }

    #[test]
    fn properties_survive_header() {
        let message = Message::from("x").content_type("text/plain").delivery_mode(2);
        let frames = to_content_frames(1, &message, 4096);

        let props = match frames.into_iter().next() {
            Some(AMQPFrame::ContentHeader(h)) => MessageProperties::from(h),
            other => panic!("Expected content header, got {:?}", other),
        };

        assert_eq!(props, message.properties);
    }
}
