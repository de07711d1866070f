//! Progressive re-reading of hcloud files
//!
//! [`StreamPageCache`] turns a seekable byte stream into an application
//! controlled page cache: callers mark ranges with priorities, a bounded
//! number of pages is fetched per frame, and reads are pure cache lookups.
//! [`HCloudReader`] sits on top, holding the index tree in memory and
//! fetching node payloads on demand as the camera moves.

mod page_cache;
mod reader;

pub use page_cache::StreamPageCache;
pub use reader::HCloudReader;
