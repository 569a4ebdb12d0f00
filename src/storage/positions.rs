use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;

use crate::service::GatewayResult;

/// Consumer identity: a group name plus an optional generation. Version 0
/// means "unversioned"; committed offsets are keyed by the full identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    name: String,
    version: u32,
}

impl GroupId {
    pub fn new(name: impl Into<String>, version: u32) -> GroupId {
        GroupId {
            name: name.into(),
            version,
        }
    }

    /// Parses the legacy wire form: `<name>-v<digits>` with digits >= 1
    /// splits into `(name, digits)`, anything else is an unversioned group.
    /// Callers canonicalize exactly once on ingress.
    pub fn parse_str(raw: &str) -> GroupId {
        if let Some(idx) = raw.rfind("-v") {
            let (name, suffix) = (&raw[..idx], &raw[idx + 2..]);
            if !name.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(version) = suffix.parse::<u32>() {
                    if version >= 1 {
                        return GroupId::new(name, version);
                    }
                }
            }
        }
        GroupId::new(raw, 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for an unversioned group.
    pub fn version(&self) -> Option<u32> {
        if self.version == 0 {
            None
        } else {
            Some(self.version)
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}-v{}", self.name, self.version)
        }
    }
}

/// All committed offsets of a group name, keyed by ascending version.
pub type VersionedOffsets = BTreeMap<u32, HashMap<u32, u64>>;

/// Capability boundary over the positions backend.
#[async_trait]
pub trait PositionsStorage: Send + Sync {
    /// Upserts the committed offset for one partition. Monotonicity is a
    /// client convention, not enforced here.
    async fn update(
        &self,
        topic: &str,
        group_id: &GroupId,
        partition: u32,
        offset: u64,
    ) -> GatewayResult<()>;

    /// Offsets committed under exactly this group identity.
    async fn find_all(&self, topic: &str, group_id: &GroupId)
        -> GatewayResult<HashMap<u32, u64>>;

    /// Offsets committed under every version of this group name.
    async fn find_all_versions_by_group(
        &self,
        topic: &str,
        group_name: &str,
    ) -> GatewayResult<VersionedOffsets>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_versioned_group() {
        let group = GroupId::parse_str("my-group-v3");
        assert_eq!(group.name(), "my-group");
        assert_eq!(group.version(), Some(3));
    }

    #[test]
    fn test_parse_plain_group() {
        let group = GroupId::parse_str("billing");
        assert_eq!(group.name(), "billing");
        assert_eq!(group.version(), None);
    }

    #[test]
    fn test_version_zero_suffix_is_not_legacy() {
        let group = GroupId::parse_str("g-v0");
        assert_eq!(group.name(), "g-v0");
        assert_eq!(group.version(), None);
    }

    #[test]
    fn test_malformed_suffixes_stay_unversioned() {
        for raw in ["g-v", "-v3", "g-vx3", "g-v3x"] {
            let group = GroupId::parse_str(raw);
            assert_eq!(group.name(), raw);
            assert_eq!(group.version(), None);
        }
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(GroupId::new("g", 2).to_string(), "g-v2");
        assert_eq!(GroupId::new("g", 0).to_string(), "g");
        let reparsed = GroupId::parse_str(&GroupId::new("my-group", 7).to_string());
        assert_eq!(reparsed, GroupId::new("my-group", 7));
    }
}
