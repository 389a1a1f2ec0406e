/// Proxy tier and status definitions
use std::fmt;

/// Cost/quality class of a proxy endpoint
///
/// Direct is the absence of a proxy and never appears in the proxies table;
/// it exists so tier preferences can express "no proxy at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyTier {
    Premium,
    Standard,
    Free,
    Direct,
}

impl ProxyTier {
    /// Returns true for tiers that accrue per-request cost
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Premium | Self::Standard)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Standard => "standard",
            Self::Free => "free",
            Self::Direct => "direct",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "premium" => Some(Self::Premium),
            "standard" => Some(Self::Standard),
            "free" => Some(Self::Free),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Health/availability status of a proxy endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStatus {
    /// Passing probes, eligible for selection
    Active,

    /// Manually or automatically parked, not selectable
    Inactive,

    /// Repeated failures or target-site block, not selectable
    Blacklisted,

    /// Newly harvested, probe outstanding
    Testing,

    /// Over its daily-request or bandwidth limit until the next reset
    Exhausted,
}

impl ProxyStatus {
    /// Returns true if the proxy may be handed out for requests
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Blacklisted => "blacklisted",
            Self::Testing => "testing",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "blacklisted" => Some(Self::Blacklisted),
            "testing" => Some(Self::Testing),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Active,
            Self::Inactive,
            Self::Blacklisted,
            Self::Testing,
            Self::Exhausted,
        ]
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
