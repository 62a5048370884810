//! Network policy for containerised kernels.

use serde::{Deserialize, Serialize};

/// Network access policy for the kernel container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum NetworkPolicy {
    /// No network access
    #[default]
    Deny,
    /// Default bridge network
    AllowAll,
}

impl NetworkPolicy {
    /// Docker `network_mode` for this policy, if it overrides the default.
    pub fn network_mode(self) -> Option<String> {
        match self {
            Self::Deny => Some("none".to_string()),
            Self::AllowAll => None,
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deny => write!(f, "deny"),
            Self::AllowAll => write!(f, "allow-all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_policy_display() {
        assert_eq!(format!("{}", NetworkPolicy::AllowAll), "allow-all");
        assert_eq!(format!("{}", NetworkPolicy::Deny), "deny");
    }

    #[test]
    fn test_deny_disables_networking() {
        assert_eq!(NetworkPolicy::Deny.network_mode().as_deref(), Some("none"));
        assert!(NetworkPolicy::AllowAll.network_mode().is_none());
    }
}
