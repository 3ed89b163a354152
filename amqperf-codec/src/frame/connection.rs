use super::{AMQPFieldValue, AMQPFrame, FieldTable, MethodFrameArgs};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStartArgs {
    pub version_major: u8,
    pub version_minor: u8,
    pub properties: FieldTable,
    pub mechanisms: String,
    pub locales: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStartOkArgs {
    pub properties: FieldTable,
    pub mechanism: String,
    pub response: String,
    pub locale: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionTuneArgs {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionTuneOkArgs {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionOpenArgs {
    pub virtual_host: String,
    pub insist: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionCloseArgs {
    pub code: u16,
    pub text: String,
    pub class_id: u16,
    pub method_id: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionBlockedArgs {
    pub reason: String,
}

impl ConnectionStartArgs {
    /// Server side start frame, fake brokers in tests send this.
    pub fn new() -> Self {
        let mut capabilities = FieldTable::new();

        capabilities.insert("publisher_confirms".into(), AMQPFieldValue::Bool(true));
        capabilities.insert("basic.nack".into(), AMQPFieldValue::Bool(true));
        capabilities.insert("connection.blocked".into(), AMQPFieldValue::Bool(true));
        capabilities.insert("authentication_failure_close".into(), AMQPFieldValue::Bool(true));

        let mut server_properties = FieldTable::new();

        server_properties.insert(
            "capabilities".into(),
            AMQPFieldValue::FieldTable(Box::new(capabilities)),
        );
        server_properties.insert("product".into(), AMQPFieldValue::LongString("amqperf test broker".into()));

        Self {
            version_major: 0,
            version_minor: 9,
            properties: server_properties,
            mechanisms: "PLAIN AMQPLAIN".into(),
            locales: "en_US".into(),
        }
    }

    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::Method(0, super::CONNECTION_START, MethodFrameArgs::ConnectionStart(self))
    }
}

impl ConnectionStartOkArgs {
    /// Start-ok with PLAIN authentication, the response is `\0username\0password`.
    pub fn new(username: &str, password: &str) -> Self {
        let mut caps = FieldTable::new();

        caps.insert("authentication_failure_close".to_string(), AMQPFieldValue::Bool(true));
        caps.insert("publisher_confirms".to_string(), AMQPFieldValue::Bool(true));
        caps.insert("basic.nack".to_string(), AMQPFieldValue::Bool(true));
        caps.insert("connection.blocked".to_string(), AMQPFieldValue::Bool(true));

        let mut client_properties = FieldTable::new();

        client_properties.insert("product".into(), AMQPFieldValue::LongString("amqperf".into()));
        client_properties.insert("platform".into(), AMQPFieldValue::LongString("Rust".into()));
        client_properties.insert("capabilities".into(), AMQPFieldValue::FieldTable(Box::new(caps)));
        client_properties.insert(
            "version".into(),
            AMQPFieldValue::LongString(env!("CARGO_PKG_VERSION").into()),
        );

        Self {
            properties: client_properties,
            mechanism: "PLAIN".into(),
            response: format!("\u{0}{}\u{0}{}", username, password),
            locale: "en_US".into(),
        }
    }

    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::Method(0, super::CONNECTION_START_OK, MethodFrameArgs::ConnectionStartOk(self))
    }
}

impl ConnectionTuneArgs {
    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::Method(0, super::CONNECTION_TUNE, MethodFrameArgs::ConnectionTune(self))
    }
}

impl ConnectionTuneOkArgs {
    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::Method(0, super::CONNECTION_TUNE_OK, MethodFrameArgs::ConnectionTuneOk(self))
    }
}

impl ConnectionOpenArgs {
    pub fn virtual_host(mut self, virtual_host: &str) -> Self {
        self.virtual_host = virtual_host.to_string();
        self
    }

    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::Method(0, super::CONNECTION_OPEN, MethodFrameArgs::ConnectionOpen(self))
    }
}

impl ConnectionCloseArgs {
    pub fn class_method(&self) -> u32 {
        super::unify_class_method(self.class_id, self.method_id)
    }
}

pub fn connection_open_ok() -> AMQPFrame {
    AMQPFrame::Method(0, super::CONNECTION_OPEN_OK, MethodFrameArgs::ConnectionOpenOk)
}

pub fn connection_close(code: u16, text: &str, class_method: u32) -> AMQPFrame {
    let (class_id, method_id) = super::split_class_method(class_method);

    AMQPFrame::Method(
        0,
        super::CONNECTION_CLOSE,
        MethodFrameArgs::ConnectionClose(ConnectionCloseArgs {
            code,
            text: text.into(),
            class_id,
            method_id,
        }),
    )
}

pub fn connection_close_ok() -> AMQPFrame {
    AMQPFrame::Method(0, super::CONNECTION_CLOSE_OK, MethodFrameArgs::ConnectionCloseOk)
}
