use bitflags::bitflags;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use serde::ser::SerializeMap as _;

bitflags! {
    /// Event groups the session subscribes to when identifying.
    ///
    /// Unknown bits are kept as-is so newer gateway intents can be requested with
    /// [`Intents::from_bits_retain`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS = 1;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::GUILDS | Self::GUILD_MESSAGES
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

/// Client description sent with [`Identify`].
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: env!("CARGO_PKG_NAME").to_owned(),
            device: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

/// Payload of [`OpCode::Identify`](super::OpCode::Identify).
///
/// # Security
///
/// When serialized, this struct exposes the session token in plaintext. Only send it over
/// secure transports (`wss://`) and never log the serialized form.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Identify {
    pub token: SecretString,
    pub intents: Intents,
    pub properties: ConnectionProperties,
}

impl Identify {
    #[must_use]
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: SecretString::from(token.into()),
            intents: Intents::default(),
            properties: ConnectionProperties::default(),
        }
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Builds the payload that resumes `session_id` with this identity's token.
    #[must_use]
    pub fn resume(&self, session_id: String, seq: Option<u64>) -> Resume {
        Resume {
            token: self.token.clone(),
            session_id,
            seq,
        }
    }
}

impl Serialize for Identify {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        // SECURITY: the token is revealed here because the gateway requires it in clear text.
        map.serialize_entry("token", self.token.expose_secret())?;
        map.serialize_entry("intents", &self.intents)?;
        map.serialize_entry("properties", &self.properties)?;
        map.end()
    }
}

/// Payload of [`OpCode::Resume`](super::OpCode::Resume).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Resume {
    pub token: SecretString,
    pub session_id: String,
    pub seq: Option<u64>,
}

impl Serialize for Resume {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("token", self.token.expose_secret())?;
        map.serialize_entry("session_id", &self.session_id)?;
        map.serialize_entry("seq", &self.seq)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identify_should_serialize_token_and_intent_bits() {
        let identify = Identify::new("secret-token")
            .with_intents(Intents::GUILDS | Intents::MESSAGE_CONTENT)
            .with_properties(ConnectionProperties {
                os: "linux".to_owned(),
                browser: "gateway-client".to_owned(),
                device: "gateway-client".to_owned(),
            });

        let value = serde_json::to_value(&identify).unwrap();

        assert_eq!(
            value,
            json!({
                "token": "secret-token",
                "intents": 32769,
                "properties": {
                    "os": "linux",
                    "browser": "gateway-client",
                    "device": "gateway-client"
                }
            })
        );
    }

    #[test]
    fn identify_debug_should_redact_token() {
        let identify = Identify::new("secret-token");

        assert!(
            !format!("{identify:?}").contains("secret-token"),
            "token leaked into Debug output"
        );
    }

    #[test]
    fn resume_should_carry_session_and_sequence() {
        let resume = Identify::new("secret-token").resume("abc".to_owned(), Some(42));

        let value = serde_json::to_value(&resume).unwrap();

        assert_eq!(
            value,
            json!({ "token": "secret-token", "session_id": "abc", "seq": 42 })
        );
    }
}
