//! Memory tool scope gating.
//!
//! Controls where an agent may use its memory tools. The concern is
//! leakage: in group or public channels, recalling facts learned in a
//! private conversation would expose them to the wrong audience.

use serde::{Deserialize, Serialize};

use mnemo_types::ChannelKind;

/// Where memory tools are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScopeMode {
    /// Memory tools are never available.
    Disabled,
    /// Memory tools are available in every channel.
    Always,
    /// Memory tools are available only in private channels.
    #[default]
    PrivateOnly,
}

impl MemoryScopeMode {
    /// Parse a mode from its configuration string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "always" => Some(Self::Always),
            "private_only" | "private-only" => Some(Self::PrivateOnly),
            _ => None,
        }
    }
}

/// Whether memory tools may be used in the given channel.
///
/// An unknown channel kind is treated as non-private: when the privacy of
/// the audience cannot be established, the tools stay off.
pub fn can_use_memory_tools(mode: MemoryScopeMode, channel: Option<ChannelKind>) -> bool {
    match mode {
        MemoryScopeMode::Disabled => false,
        MemoryScopeMode::Always => true,
        MemoryScopeMode::PrivateOnly => channel.map(|kind| kind.is_private()).unwrap_or(false),
    }
}

/// Message shown when a memory tool is invoked out of scope.
pub const MEMORY_SCOPE_DENIAL: &str =
    "Memory tools are not available in this channel. Long-term memory can only be \
     accessed in private conversations.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_denies_everywhere() {
        for kind in [
            ChannelKind::Direct,
            ChannelKind::Agent,
            ChannelKind::External,
            ChannelKind::Group,
            ChannelKind::Public,
        ] {
            assert!(!can_use_memory_tools(MemoryScopeMode::Disabled, Some(kind)));
        }
        assert!(!can_use_memory_tools(MemoryScopeMode::Disabled, None));
    }

    #[test]
    fn test_always_allows_everywhere() {
        assert!(can_use_memory_tools(MemoryScopeMode::Always, Some(ChannelKind::Public)));
        assert!(can_use_memory_tools(MemoryScopeMode::Always, None));
    }

    #[test]
    fn test_private_only_follows_channel_privacy() {
        let mode = MemoryScopeMode::PrivateOnly;
        assert!(can_use_memory_tools(mode, Some(ChannelKind::Direct)));
        assert!(can_use_memory_tools(mode, Some(ChannelKind::Agent)));
        assert!(can_use_memory_tools(mode, Some(ChannelKind::External)));
        assert!(!can_use_memory_tools(mode, Some(ChannelKind::Group)));
        assert!(!can_use_memory_tools(mode, Some(ChannelKind::Public)));
    }

    #[test]
    fn test_private_only_unknown_channel_denied() {
        assert!(!can_use_memory_tools(MemoryScopeMode::PrivateOnly, None));
    }

    #[test]
    fn test_parse() {
        assert_eq!(MemoryScopeMode::parse("always"), Some(MemoryScopeMode::Always));
        assert_eq!(MemoryScopeMode::parse("Private-Only"), Some(MemoryScopeMode::PrivateOnly));
        assert_eq!(MemoryScopeMode::parse("disabled"), Some(MemoryScopeMode::Disabled));
        assert_eq!(MemoryScopeMode::parse("bogus"), None);
    }

    #[test]
    fn test_default_is_private_only() {
        assert_eq!(MemoryScopeMode::default(), MemoryScopeMode::PrivateOnly);
    }
}
