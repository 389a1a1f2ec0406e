/// Crawl session lifecycle states
///
/// A session is created pending, moves to running when a crawler picks it up,
/// and reaches exactly one terminal state when the run loop exits. Stopped and
/// cancelled can also be set externally as a cooperative stop signal.
use std::fmt;

/// Status of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlStatus {
    /// Created, not yet picked up by a crawler
    Pending,

    /// A crawler owns the session and is working
    Running,

    /// Run loop finished without a fatal error
    Completed,

    /// Run loop aborted on a session-fatal error
    Failed,

    /// Stop requested externally and honored between batches
    Stopped,

    /// Cancelled before or during the run
    Cancelled,
}

impl CrawlStatus {
    /// Returns true once the session can no longer change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if an externally-set value of this status should make the
    /// run loop stop at the next batch boundary
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Cancelled)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Stopped,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Which stage(s) a crawl session covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlType {
    Category,
    ProductList,
    ProductDetail,
    /// Every stage in sequence
    Both,
}

impl CrawlType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::ProductList => "product_list",
            Self::ProductDetail => "product_detail",
            Self::Both => "both",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "category" => Some(Self::Category),
            "product_list" => Some(Self::ProductList),
            "product_detail" => Some(Self::ProductDetail),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
