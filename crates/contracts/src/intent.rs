//! Intent - the decoded purpose of a topic

use std::fmt;

/// Topic intent
///
/// Inbound topics may only carry `Write`, `Replay` or `Create`.
/// Outbound topics may only carry `Newest` or `Replay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Intent {
    /// Append statements to a database chain
    Write,
    /// Re-stream a historical transaction range to one client
    Replay,
    /// Create a database (not supported yet)
    Create,
    /// Broadcast of the latest committed block
    Newest,
    /// Anything unrecognised
    #[default]
    Invalid,
}

impl Intent {
    /// Wire token of this intent
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Write => "write",
            Intent::Replay => "replay",
            Intent::Create => "create",
            Intent::Newest => "newest",
            Intent::Invalid => "",
        }
    }

    /// Parse an inbound intent token
    ///
    /// Only `write`, `replay` and `create` are accepted; everything else
    /// (including `newest`) maps to `Invalid`.
    pub fn parse_inbound(token: &str) -> Self {
        match token {
            "write" => Intent::Write,
            "replay" => Intent::Replay,
            "create" => Intent::Create,
            _ => Intent::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Intent::Invalid)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inbound_rejects_outbound_tokens() {
        assert_eq!(Intent::parse_inbound("write"), Intent::Write);
        assert_eq!(Intent::parse_inbound("replay"), Intent::Replay);
        assert_eq!(Intent::parse_inbound("create"), Intent::Create);
        assert_eq!(Intent::parse_inbound("newest"), Intent::Invalid);
        assert_eq!(Intent::parse_inbound("WRITE"), Intent::Invalid);
        assert_eq!(Intent::parse_inbound(""), Intent::Invalid);
    }

    #[test]
    fn test_invalid_renders_empty() {
        assert_eq!(Intent::Invalid.to_string(), "");
        assert!(!Intent::Invalid.is_valid());
    }
}
