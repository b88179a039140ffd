pub mod json_dir;
pub mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Offer;

/// Result of inserting a record keyed by link
#[derive(Debug)]
pub enum Created {
    /// Stored with a freshly assigned id
    Inserted(Offer),
    /// Another writer stored this link first; carries that record
    Conflict(Offer),
}

/// Persistent offer storage, unique by link
#[async_trait]
pub trait OfferStore: Send + Sync {
    async fn find_by_link(&self, link: &str) -> Result<Option<Offer>>;

    /// Store a new offer, assigning its id. Never creates a second record for
    /// a link that already exists.
    async fn create(&self, offer: Offer) -> Result<Created>;

    /// Replace the stored record with the same id
    async fn update(&self, offer: Offer) -> Result<Offer>;
}
