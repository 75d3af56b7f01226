//! Conversions from declarative settings to channel building blocks

use crate::error::Result;
use crate::transport::framing::{AsciiLengthHeader, BinaryLengthHeader, Endianness, FrameHeader, NoHeader};
use crate::transport::reconnect::ReconnectPolicy;
use link_config::{ByteOrderSetting, HeaderKind, HeaderSettings, ReconnectSettings};
use std::sync::Arc;

/// Frame header described by `settings`
pub fn frame_header(settings: &HeaderSettings) -> Result<Arc<dyn FrameHeader>> {
    Ok(match settings.kind {
        HeaderKind::Binary => {
            let endianness = match settings.byte_order {
                ByteOrderSetting::BigEndian => Endianness::Big,
                ByteOrderSetting::LittleEndian => Endianness::Little,
            };
            Arc::new(BinaryLengthHeader::new(settings.width, endianness)?)
        }
        HeaderKind::Ascii => Arc::new(AsciiLengthHeader::new(settings.width)?),
        HeaderKind::None => Arc::new(NoHeader),
    })
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            enabled: settings.enabled,
            floor: settings.floor(),
            ceiling: settings.ceiling(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_from_settings() {
        let header = frame_header(&HeaderSettings::default()).unwrap();
        assert_eq!(header.header_len(), 4);

        let ascii = frame_header(&HeaderSettings {
            kind: HeaderKind::Ascii,
            width: 3,
            byte_order: ByteOrderSetting::BigEndian,
        })
        .unwrap();
        assert_eq!(ascii.header_len(), 3);
        assert_eq!(ascii.decode(b"025").unwrap(), 25);

        let none = frame_header(&HeaderSettings {
            kind: HeaderKind::None,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(none.header_len(), 0);
    }

    #[test]
    fn test_reconnect_policy_from_settings() {
        let policy = ReconnectPolicy::from(&ReconnectSettings {
            enabled: true,
            floor_ms: 250,
            ceiling_ms: 4_000,
        });
        assert!(policy.enabled);
        assert_eq!(policy.floor, std::time::Duration::from_millis(250));
        assert_eq!(policy.ceiling, std::time::Duration::from_secs(4));
    }
}
