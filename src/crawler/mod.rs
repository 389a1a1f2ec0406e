//! Staged crawlers and the shared run-loop
//!
//! Three stages share one session lifecycle: category discovery maps the
//! taxonomy and seeds the product-list queue; the listing stage paginates
//! category pages into product rows and detail work; the detail stage fills
//! in availability, free-text fields and nutrition. [`CrawlRunner`] owns the
//! session bookkeeping around whichever stages a run asks for.

mod category;
mod detail;
mod listing;
mod runner;

pub use category::CategoryMapper;
pub use detail::ProductDetail;
pub use listing::ProductList;
pub use runner::{CrawlReport, CrawlRunner};
