use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A logical pub/sub topic scoped to an org: `org:{org_id}:{suffix}`.
/// Channels aren't persisted rows — they exist implicitly while any
/// session subscribes or any event references them — so this is a parsed
/// newtype over the wire string, not a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelParseError {
    #[error("channel name must be of the form org:{{id}}:suffix")]
    BadFormat,
    #[error("channel belongs to org {found} but caller is in org {expected}")]
    WrongOrg { expected: Uuid, found: String },
}

impl Channel {
    /// Parse a raw channel string, requiring it to belong to `own_org_id`.
    /// This is the channel-authorization check of §4.5 item 2 — reject
    /// anything not prefixed `org:{own_org_id}:`.
    pub fn parse_scoped(raw: &str, own_org_id: Uuid) -> Result<Self, ChannelParseError> {
        let expected_prefix = format!("org:{}:", own_org_id);
        if !raw.starts_with("org:") || !raw.contains(':') {
            return Err(ChannelParseError::BadFormat);
        }
        if !raw.starts_with(&expected_prefix) {
            let found = raw
                .strip_prefix("org:")
                .and_then(|rest| rest.split(':').next())
                .unwrap_or("?")
                .to_string();
            return Err(ChannelParseError::WrongOrg {
                expected: own_org_id,
                found,
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The stream key this channel maps to in the event stream.
    pub fn stream_key(&self) -> String {
        format!("stream:{}", self.0)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_org() {
        let org = Uuid::new_v4();
        let raw = format!("org:{}:chat", org);
        let channel = Channel::parse_scoped(&raw, org).unwrap();
        assert_eq!(channel.as_str(), raw);
    }

    #[test]
    fn rejects_other_org() {
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let raw = format!("org:{}:chat", other);
        let err = Channel::parse_scoped(&raw, mine).unwrap_err();
        assert!(matches!(err, ChannelParseError::WrongOrg { .. }));
    }

    #[test]
    fn rejects_malformed_name() {
        let mine = Uuid::new_v4();
        let err = Channel::parse_scoped("chat", mine).unwrap_err();
        assert_eq!(err, ChannelParseError::BadFormat);
    }
}
