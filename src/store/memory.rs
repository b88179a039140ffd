use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{Result, ScrapeError};
use crate::models::Offer;
use crate::store::{Created, OfferStore};

#[derive(Default)]
struct Records {
    next_id: u64,
    by_link: HashMap<String, Offer>,
}

/// Offers held in memory, lost on exit
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.lock().by_link.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self.records.lock().by_link.values().cloned().collect();
        offers.sort_by_key(|o| o.id);
        offers
    }
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn find_by_link(&self, link: &str) -> Result<Option<Offer>> {
        Ok(self.records.lock().by_link.get(link).cloned())
    }

    async fn create(&self, mut offer: Offer) -> Result<Created> {
        let mut records = self.records.lock();
        if let Some(existing) = records.by_link.get(&offer.link) {
            return Ok(Created::Conflict(existing.clone()));
        }
        records.next_id += 1;
        offer.id = records.next_id;
        records.by_link.insert(offer.link.clone(), offer.clone());
        Ok(Created::Inserted(offer))
    }

    async fn update(&self, offer: Offer) -> Result<Offer> {
        let mut records = self.records.lock();
        match records.by_link.get_mut(&offer.link) {
            Some(slot) if slot.id == offer.id => {
                *slot = offer.clone();
                Ok(offer)
            }
            _ => Err(ScrapeError::Persistence(format!("no offer {} for {}", offer.id, offer.link))),
        }
    }
}
