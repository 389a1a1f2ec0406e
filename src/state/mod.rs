//! State enumerations shared across the crate
//!
//! Every persisted lifecycle state lives here with its database string
//! representation, so the storage layer and the crawlers agree on the
//! vocabulary.

mod crawl_status;
mod proxy_state;
mod queue_state;

pub use crawl_status::{CrawlStatus, CrawlType};
pub use proxy_state::{ProxyStatus, ProxyTier};
pub use queue_state::{QueueStatus, QueueType};
