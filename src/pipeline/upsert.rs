use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{BuildingType, Location, Offer, Source, UNKNOWN_CITY};
use crate::normalize::OfferDraft;
use crate::pipeline::MatchTrigger;
use crate::store::{Created, OfferStore};

/// Outcome of committing one scrape
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub offer: Offer,
    pub created: bool,
    /// Fields whose stored value changed, empty for a fresh record
    pub changed: Vec<&'static str>,
    /// Alerts matched, `None` when the trigger failed
    pub matches: Option<usize>,
}

type MergeRule = fn(&mut Offer, &OfferDraft) -> bool;

/// How each field combines a stored value with a fresh observation. A rule
/// returns whether it changed the stored record.
const MERGE_RULES: &[(&str, MergeRule)] = &[
    ("title", |o, d| take(&mut o.title, &d.title)),
    ("price", |o, d| take(&mut o.price, &d.price)),
    ("footage", |o, d| take(&mut o.footage, &d.footage)),
    ("city", |o, d| take(&mut o.location.city, &d.city)),
    ("district", |o, d| take_opt(&mut o.location.district, &d.district)),
    ("street", |o, d| take_opt(&mut o.location.street, &d.street)),
    ("streetNumber", |o, d| take_opt(&mut o.location.street_number, &d.street_number)),
    ("latitude", |o, d| take_opt(&mut o.location.latitude, &d.latitude)),
    ("longitude", |o, d| take_opt(&mut o.location.longitude, &d.longitude)),
    ("description", |o, d| take(&mut o.description, &d.description)),
    ("summary", |o, d| take_opt(&mut o.summary, &d.summary)),
    ("rooms", |o, d| take_opt(&mut o.rooms, &d.rooms)),
    ("floor", |o, d| take_opt(&mut o.floor, &d.floor)),
    ("furniture", |o, d| take_opt(&mut o.furniture, &d.furniture)),
    ("elevator", |o, d| take_opt(&mut o.elevator, &d.elevator)),
    ("pets", |o, d| take_opt(&mut o.pets, &d.pets)),
    ("negotiable", |o, d| take(&mut o.negotiable, &d.negotiable)),
    ("ownerType", |o, d| take_opt(&mut o.owner_type, &d.owner_type)),
    ("parkingType", |o, d| take_opt(&mut o.parking_type, &d.parking_type)),
    ("buildingType", |o, d| take_opt(&mut o.building_type, &d.building_type)),
    ("rentAdditional", |o, d| take_opt(&mut o.rent_additional, &d.rent_additional)),
    ("images", |o, d| {
        let fresh = (!d.images.is_empty()).then(|| d.images.clone());
        take(&mut o.images, &fresh)
    }),
    ("contact", |o, d| take_opt(&mut o.contact, &d.contact)),
    ("infoAdditional", |o, d| take_opt(&mut o.info_additional, &d.info_additional)),
    ("furnishing", |o, d| take_opt(&mut o.furnishing, &d.furnishing)),
    ("media", |o, d| take_opt(&mut o.media, &d.media)),
    ("views", merge_views),
];

fn take<T: Clone + PartialEq>(stored: &mut T, fresh: &Option<T>) -> bool {
    match fresh {
        Some(value) if stored != value => {
            *stored = value.clone();
            true
        }
        _ => false,
    }
}

fn take_opt<T: Clone + PartialEq>(stored: &mut Option<T>, fresh: &Option<T>) -> bool {
    match fresh {
        Some(value) if stored.as_ref() != Some(value) => {
            *stored = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Views never decrease, and a marketplace without a counter never touches
/// the stored value.
fn merge_views(stored: &mut Offer, fresh: &OfferDraft) -> bool {
    if fresh.source.reports_views() && fresh.views > stored.views {
        stored.views = fresh.views;
        true
    } else {
        false
    }
}

/// Merge a fresh observation into a stored offer. `updatedAt` is always
/// refreshed; identity, origin and first-seen fields are kept.
pub fn merge_offer(existing: &Offer, draft: &OfferDraft, now: DateTime<Utc>) -> (Offer, Vec<&'static str>) {
    let mut merged = existing.clone();
    let changed = MERGE_RULES
        .iter()
        .filter_map(|(field, rule)| rule(&mut merged, draft).then_some(*field))
        .collect();
    merged.updated_at = now;
    (merged, changed)
}

fn new_offer(draft: &OfferDraft, is_new: bool, now: DateTime<Utc>) -> Offer {
    let building_type = draft.building_type.or(match draft.source {
        Source::Otodom => Some(BuildingType::Apartment),
        Source::Olx => None,
    });
    Offer {
        id: 0,
        link: draft.link.clone(),
        source: draft.source,
        title: draft.title.clone().unwrap_or_default(),
        price: draft.price.unwrap_or(0),
        footage: draft.footage.unwrap_or(0.0),
        location: Location {
            city: draft.city.clone().unwrap_or_else(|| UNKNOWN_CITY.to_string()),
            district: draft.district.clone(),
            street: draft.street.clone(),
            street_number: draft.street_number.clone(),
            latitude: draft.latitude,
            longitude: draft.longitude,
        },
        description: draft.description.clone().unwrap_or_default(),
        summary: draft.summary.clone(),
        rooms: draft.rooms,
        floor: draft.floor,
        furniture: draft.furniture,
        elevator: draft.elevator,
        pets: draft.pets,
        negotiable: draft.negotiable.unwrap_or(false),
        owner_type: draft.owner_type,
        parking_type: draft.parking_type,
        building_type,
        rent_additional: draft.rent_additional,
        views: if draft.source.reports_views() { draft.views } else { 0 },
        images: draft.images.clone(),
        contact: draft.contact.clone(),
        info_additional: draft.info_additional.clone(),
        furnishing: draft.furnishing.clone(),
        media: draft.media.clone(),
        created_at: draft.posted_at.unwrap_or(now),
        updated_at: now,
        is_new,
    }
}

/// Create-or-merge by link, followed by the match trigger
pub struct UpsertEngine {
    store: Arc<dyn OfferStore>,
    trigger: Arc<dyn MatchTrigger>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn OfferStore>, trigger: Arc<dyn MatchTrigger>) -> Self {
        Self { store, trigger }
    }

    /// Commit `draft`. Storage errors propagate; a failing match trigger is
    /// logged and leaves the commit in place.
    pub async fn upsert(&self, draft: OfferDraft, is_new: bool) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let (offer, created, changed) = match self.store.find_by_link(&draft.link).await? {
            Some(existing) => self.merge_into(existing, &draft, now).await?,
            None => match self.store.create(new_offer(&draft, is_new, now)).await? {
                Created::Inserted(offer) => (offer, true, Vec::new()),
                // Lost a race with another job for the same link
                Created::Conflict(existing) => self.merge_into(existing, &draft, now).await?,
            },
        };

        if created {
            info!(offer_id = offer.id, link = %offer.link, "Created offer");
        } else {
            info!(offer_id = offer.id, link = %offer.link, changed = ?changed, "Updated offer");
        }

        let matches = match self.trigger.process_new_offer(offer.id).await {
            Ok(count) => {
                debug!(offer_id = offer.id, matches = count, "Match trigger completed");
                Some(count)
            }
            Err(e) => {
                warn!(offer_id = offer.id, error = %e, "Match trigger failed");
                None
            }
        };

        Ok(UpsertOutcome {
            offer,
            created,
            changed,
            matches,
        })
    }

    async fn merge_into(
        &self,
        existing: Offer,
        draft: &OfferDraft,
        now: DateTime<Utc>,
    ) -> Result<(Offer, bool, Vec<&'static str>)> {
        let (merged, changed) = merge_offer(&existing, draft, now);
        let stored = self.store.update(merged).await?;
        Ok((stored, false, changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::CountingTrigger;

    const LINK: &str = "https://www.olx.pl/d/oferta/a";

    fn first_scrape() -> OfferDraft {
        OfferDraft {
            title: Some("2-room flat".to_string()),
            price: Some(2000),
            views: 15,
            street: Some("Mickiewicza".to_string()),
            street_number: Some("12".to_string()),
            ..OfferDraft::empty(Source::Olx, LINK)
        }
    }

    fn engine(trigger: Arc<CountingTrigger>) -> (Arc<MemoryStore>, UpsertEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = UpsertEngine::new(store.clone(), trigger);
        (store, engine)
    }

    #[tokio::test]
    async fn creates_record_and_fires_trigger_once() {
        let trigger = Arc::new(CountingTrigger::default());
        let (store, engine) = engine(trigger.clone());

        let outcome = engine.upsert(first_scrape(), true).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.matches, Some(1));
        let offer = &outcome.offer;
        assert_eq!(offer.title, "2-room flat");
        assert_eq!(offer.price, 2000);
        assert_eq!(offer.views, 15);
        assert_eq!(offer.location.street.as_deref(), Some("Mickiewicza"));
        assert_eq!(offer.location.street_number.as_deref(), Some("12"));
        assert_eq!(offer.location.city, UNKNOWN_CITY);
        assert!(offer.is_new);
        assert_eq!(trigger.calls(), vec![offer.id]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rescrape_keeps_absent_fields_and_raises_views() {
        let trigger = Arc::new(CountingTrigger::default());
        let (store, engine) = engine(trigger);
        let created = engine.upsert(first_scrape(), true).await.unwrap().offer;

        let second = OfferDraft {
            title: Some("2-room flat".to_string()),
            price: Some(2000),
            views: 40,
            ..OfferDraft::empty(Source::Olx, LINK)
        };
        let outcome = engine.upsert(second, false).await.unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.changed, vec!["views"]);
        let offer = outcome.offer;
        assert_eq!(offer.id, created.id);
        assert_eq!(offer.views, 40);
        assert_eq!(offer.location.street.as_deref(), Some("Mickiewicza"));
        assert!(offer.is_new);
        assert!(offer.updated_at >= created.updated_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let now = Utc::now();
        let stored = new_offer(&first_scrape(), true, now);
        let draft = OfferDraft {
            price: Some(2100),
            rooms: Some(2),
            ..first_scrape()
        };

        let (once, changed) = merge_offer(&stored, &draft, now);
        assert_eq!(changed, vec!["price", "rooms"]);
        let (twice, changed_again) = merge_offer(&once, &draft, now);
        assert!(changed_again.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn views_never_decrease() {
        let now = Utc::now();
        let stored = new_offer(&OfferDraft { views: 50, ..first_scrape() }, true, now);
        let (merged, changed) = merge_offer(&stored, &OfferDraft { views: 30, ..first_scrape() }, now);
        assert_eq!(merged.views, 50);
        assert!(!changed.contains(&"views"));
    }

    #[test]
    fn silent_source_keeps_stored_views() {
        let now = Utc::now();
        let mut stored = new_offer(&OfferDraft::empty(Source::Otodom, "https://www.otodom.pl/pl/oferta/b"), false, now);
        stored.views = 7;

        let draft = OfferDraft {
            title: Some("Nowe mieszkanie".to_string()),
            ..OfferDraft::empty(Source::Otodom, "https://www.otodom.pl/pl/oferta/b")
        };
        let (merged, _) = merge_offer(&stored, &draft, now);
        assert_eq!(merged.views, 7);
        assert_eq!(merged.title, "Nowe mieszkanie");
    }

    #[test]
    fn otodom_offers_default_to_apartment_buildings() {
        let offer = new_offer(&OfferDraft::empty(Source::Otodom, "https://www.otodom.pl/pl/oferta/c"), true, Utc::now());
        assert_eq!(offer.building_type, Some(BuildingType::Apartment));
        assert_eq!(offer.views, 0);
    }

    #[tokio::test]
    async fn trigger_failure_keeps_commit() {
        let trigger = Arc::new(CountingTrigger::failing());
        let (store, engine) = engine(trigger.clone());

        let outcome = engine.upsert(first_scrape(), true).await.unwrap();

        assert_eq!(outcome.matches, None);
        assert_eq!(trigger.calls().len(), 1);
        assert!(store.find_by_link(LINK).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_first_sightings_share_one_record() {
        let trigger = Arc::new(CountingTrigger::default());
        let (store, engine) = engine(trigger);
        let engine = Arc::new(engine);

        let jobs: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let draft = OfferDraft {
                        views: 10 + i,
                        ..first_scrape()
                    };
                    engine.upsert(draft, true).await.unwrap()
                })
            })
            .collect();
        for job in jobs {
            job.await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].views, 17);
    }
}
