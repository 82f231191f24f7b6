//! Device self-description announced right after connect.

use serde::Serialize;

use dtx_protocol::{Message, Value};

use crate::error::{Error, Result};

/// Agent version, locale and extension list pushed by the device as an
/// unsolicited `sys`/`info` response immediately after it accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub version: String,
    pub locale: String,
    pub extensions: Vec<String>,
}

impl DeviceInfo {
    pub fn from_message(msg: &Message) -> Result<Self> {
        if msg.status() != Some(true) {
            return Err(Error::Protocol("device info carried status=false".into()));
        }
        let extensions = match msg.param("extensions") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|v| v.as_text().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            version: msg.text_param("version").unwrap_or_default().to_string(),
            locale: msg.text_param("locale").unwrap_or_default().to_string(),
            extensions,
        })
    }

    /// Whether the device agent advertises the named protocol extension.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_protocol::{Message, Target, Value};

    #[test]
    fn parses_the_announcement() {
        let msg = Message::response(Target::System, "info", true)
            .with_param("version", Value::text("2.4.1"))
            .with_param("locale", Value::text("en_US"))
            .with_param(
                "extensions",
                Value::List(vec![Value::text("battery"), Value::text("screenshot")]),
            );
        let info = DeviceInfo::from_message(&msg).unwrap();
        assert_eq!(info.version, "2.4.1");
        assert_eq!(info.locale, "en_US");
        assert!(info.has_extension("battery"));
        assert!(!info.has_extension("gps"));
    }

    #[test]
    fn rejects_failed_announcement() {
        let msg = Message::response(Target::System, "info", false);
        assert!(DeviceInfo::from_message(&msg).is_err());
    }
}
