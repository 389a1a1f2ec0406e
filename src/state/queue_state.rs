/// Work queue lifecycle states and queue kinds
use std::fmt;

/// Which stage a queue item belongs to
///
/// (url_hash, queue_type) is unique, so the same URL may sit in the listing
/// queue and the detail queue at once but never twice in either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Category pages awaiting discovery
    Category,

    /// Category pages awaiting product-tile extraction
    ProductList,

    /// Product pages awaiting detail/nutrition extraction
    ProductDetail,
}

impl QueueType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::ProductList => "product_list",
            Self::ProductDetail => "product_detail",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "category" => Some(Self::Category),
            "product_list" => Some(Self::ProductList),
            "product_detail" => Some(Self::ProductDetail),
            _ => None,
        }
    }

    pub fn all_types() -> Vec<Self> {
        vec![Self::Category, Self::ProductList, Self::ProductDetail]
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Status of a single queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    /// Eligible for claiming
    Pending,

    /// Claimed by a worker, lease timestamp set
    Processing,

    /// Finished successfully (terminal)
    Completed,

    /// Attempts exhausted (terminal)
    Failed,
}

impl QueueStatus {
    /// Returns true once the item can no longer re-enter the queue
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![Self::Pending, Self::Processing, Self::Completed, Self::Failed]
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_type_roundtrip() {
        for ty in QueueType::all_types() {
            assert_eq!(QueueType::from_db_string(ty.to_db_string()), Some(ty));
        }
        assert_eq!(QueueType::from_db_string("nope"), None);
    }

    #[test]
    fn test_queue_status_roundtrip() {
        for status in QueueStatus::all_statuses() {
            assert_eq!(
                QueueStatus::from_db_string(status.to_db_string()),
                Some(status)
            );
        }
        assert_eq!(QueueStatus::from_db_string("nope"), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());

        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
    }
}
