use crate::browser::RenderedPage;
use crate::models::Source;
use crate::scrapers::types::RawExtraction;

/// Common trait for all marketplace adapters
/// Adding a marketplace means adding an implementation and a `Source` variant
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Extract raw fields from a rendered page. Never fails: anything missing
    /// on the page comes back empty.
    fn extract(&self, page: &RenderedPage) -> RawExtraction;
}
