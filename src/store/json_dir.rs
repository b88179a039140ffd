use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, ScrapeError};
use crate::models::Offer;
use crate::store::{Created, OfferStore};

struct Records {
    next_id: u64,
    by_link: HashMap<String, Offer>,
}

/// One pretty-printed JSON file per offer, named by id.
///
/// The directory is loaded into memory on open. Writes go to a temporary
/// file that is renamed over the target, so a crash never leaves a
/// half-written record behind.
pub struct JsonDirStore {
    dir: PathBuf,
    records: Mutex<Records>,
}

impl JsonDirStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut by_link = HashMap::new();
        let mut next_id = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Offer>(&content) {
                Ok(offer) => {
                    next_id = next_id.max(offer.id);
                    by_link.insert(offer.link.clone(), offer);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable offer file"),
            }
        }

        info!(dir = %dir.display(), offers = by_link.len(), "Opened offer store");
        Ok(Self {
            dir,
            records: Mutex::new(Records { next_id, by_link }),
        })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, offer: &Offer) -> Result<()> {
        let target = self.path_for(offer.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", offer.id));
        let json = serde_json::to_string_pretty(offer)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl OfferStore for JsonDirStore {
    async fn find_by_link(&self, link: &str) -> Result<Option<Offer>> {
        Ok(self.records.lock().await.by_link.get(link).cloned())
    }

    async fn create(&self, mut offer: Offer) -> Result<Created> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.by_link.get(&offer.link) {
            return Ok(Created::Conflict(existing.clone()));
        }
        offer.id = records.next_id + 1;
        self.write(&offer).await?;
        records.next_id = offer.id;
        records.by_link.insert(offer.link.clone(), offer.clone());
        Ok(Created::Inserted(offer))
    }

    async fn update(&self, offer: Offer) -> Result<Offer> {
        let mut records = self.records.lock().await;
        match records.by_link.get(&offer.link) {
            Some(stored) if stored.id == offer.id => {}
            _ => {
                return Err(ScrapeError::Persistence(format!(
                    "no offer {} for {}",
                    offer.id, offer.link
                )))
            }
        }
        self.write(&offer).await?;
        records.by_link.insert(offer.link.clone(), offer.clone());
        Ok(offer)
    }
}
