use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::address::{AddressHints, AddressResolver};
use crate::browser::{BrowserPool, BrowserSession, PageFetcher, SessionFactory};
use crate::error::{Result, ScrapeError};
use crate::models::Source;
use crate::normalize::{normalize, OfferDraft};
use crate::pipeline::upsert::{UpsertEngine, UpsertOutcome};
use crate::pipeline::Summarizer;
use crate::scheduler::{Job, JobHandler};
use crate::scrapers::{adapter_for, canonical_link, RawExtraction};

/// Runs a single offer through fetch, extraction, enrichment and upsert on
/// a pooled browser session.
pub struct OfferProcessor<F: SessionFactory> {
    pool: Arc<BrowserPool<F>>,
    fetcher: PageFetcher,
    resolver: AddressResolver,
    summarizer: Option<Arc<dyn Summarizer>>,
    upsert: UpsertEngine,
}

impl<F: SessionFactory> OfferProcessor<F> {
    pub fn new(pool: Arc<BrowserPool<F>>, fetcher: PageFetcher, resolver: AddressResolver, upsert: UpsertEngine) -> Self {
        Self {
            pool,
            fetcher,
            resolver,
            summarizer: None,
            upsert,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Scrape `url` and commit the result. The session goes back to the pool
    /// afterwards, unless the failure means it can no longer be trusted.
    pub async fn process(&self, url: &str, source: Source, is_new: bool) -> Result<UpsertOutcome> {
        let lease = match self.pool.try_acquire().await {
            Err(ScrapeError::PoolExhausted) => {
                debug!(url, "Browser pool exhausted, waiting for a session");
                self.pool.acquire().await?
            }
            lease => lease?,
        };
        debug!(session = lease.id(), url, "Acquired browser session");

        let result = self.scrape(&*lease, url, source, is_new).await;
        match &result {
            Err(e) if e.poisons_session() || !lease.is_healthy() => self.pool.discard(lease),
            _ => self.pool.release(lease),
        }
        result
    }

    async fn scrape(&self, session: &F::Session, url: &str, source: Source, is_new: bool) -> Result<UpsertOutcome> {
        let page = self.fetcher.fetch(session, url).await?;

        // OLX forwards some listings to Otodom; parse what was actually served
        let served_by = Source::from_url(&page.final_url).unwrap_or(source);
        if served_by != source {
            info!(%url, final_url = %page.final_url, from = %source, to = %served_by, "Listing redirected to another marketplace");
        }
        let landing = if page.final_url.is_empty() {
            page.requested_url.as_str()
        } else {
            page.final_url.as_str()
        };
        let link = canonical_link(landing);

        let adapter = adapter_for(served_by);
        let raw = adapter.extract(&page);
        if raw.title.is_none() {
            warn!(%link, error = %ScrapeError::ExtractionIncomplete("title"), "Persisting partial extraction");
        }

        let mut draft = normalize(adapter.source(), &link, &raw);
        self.resolve_address(&mut draft, &raw).await;
        self.summarize(&mut draft).await;

        self.upsert.upsert(draft, is_new).await
    }

    async fn resolve_address(&self, draft: &mut OfferDraft, raw: &RawExtraction) {
        let hints = AddressHints {
            title: draft.title.as_deref(),
            description: draft.description.as_deref(),
            city: draft.city.as_deref(),
            district: draft.district.as_deref(),
            location_line: match draft.source {
                Source::Otodom => raw.address.as_deref(),
                Source::Olx => None,
            },
        };
        let resolved = self.resolver.resolve(hints).await;
        draft.street = resolved.street;
        draft.street_number = resolved.street_number;
        draft.latitude = resolved.latitude;
        draft.longitude = resolved.longitude;
    }

    async fn summarize(&self, draft: &mut OfferDraft) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        let (Some(title), Some(description)) = (&draft.title, &draft.description) else {
            return;
        };
        match summarizer.summarize(title, description).await {
            Ok(summary) => draft.summary = summary,
            Err(e) => warn!(link = %draft.link, error = %e, "Summary generation failed"),
        }
    }
}

#[async_trait]
impl<F: SessionFactory> JobHandler for OfferProcessor<F> {
    async fn handle(&self, job: &Job) -> Result<()> {
        let outcome = self.process(&job.url, job.source, job.is_new()).await?;
        debug!(
            job_id = job.id,
            offer_id = outcome.offer.id,
            created = outcome.created,
            changed = outcome.changed.len(),
            matches = ?outcome.matches,
            "Job committed offer"
        );
        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ProposedAddress;
    use crate::config::{FetchConfig, QueuesConfig};
    use crate::models::UNKNOWN_CITY;
    use crate::scheduler::QueueScheduler;
    use crate::store::{MemoryStore, OfferStore};
    use crate::testing::{CountingTrigger, FakeFactory, FixedAddress, Navigation, RecordingGeocoder};

    const OLX_URL: &str = "https://www.olx.pl/d/oferta/2-pokoje-mokotow-CID3-ID1.html";
    const OTODOM_URL: &str = "https://www.otodom.pl/pl/oferta/2-pokoje-wola-ID4a";

    fn olx_page(views: u32) -> String {
        format!(
            r#"<html><body>
              <div data-testid="offer_title"><h4>2-room flat</h4></div>
              <div data-testid="ad-price-container"><h3>2 000 zł</h3></div>
              <div data-cy="ad_description"><div class="css-19duwlz">Blisko metra</div></div>
              <p class="css-9pna1a">Warszawa, Mokotów</p>
              <span data-testid="page-view-counter">Wyświetlenia: {views}</span>
            </body></html>"#
        )
    }

    const OTODOM_PAGE: &str = r##"<html><body>
        <h1 data-cy="adPageAdTitle">Mieszkanie na Woli</h1>
        <strong data-cy="adPageHeaderPrice">3 900 zł</strong>
        <a href="#map">Wola, Warszawa, mazowieckie</a>
    </body></html>"##;

    fn quiet_fetch() -> FetchConfig {
        FetchConfig {
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            settle_ms: 0,
            ..FetchConfig::default()
        }
    }

    struct Harness {
        processor: OfferProcessor<FakeFactory>,
        pool: Arc<BrowserPool<FakeFactory>>,
        store: Arc<MemoryStore>,
        geocoder: Arc<RecordingGeocoder>,
        trigger: Arc<CountingTrigger>,
    }

    fn harness(factory: FakeFactory, street: Option<&str>, geocoder: RecordingGeocoder) -> Harness {
        let pool = Arc::new(BrowserPool::new(factory, 2));
        let store = Arc::new(MemoryStore::new());
        let geocoder = Arc::new(geocoder);
        let trigger = Arc::new(CountingTrigger::default());
        let proposal = ProposedAddress {
            street: street.map(str::to_string),
            street_number: street.map(|_| "12".to_string()),
            confidence: 0.9,
        };
        let resolver = AddressResolver::new(Arc::new(FixedAddress(proposal)), geocoder.clone());
        let upsert = UpsertEngine::new(store.clone(), trigger.clone());
        Harness {
            processor: OfferProcessor::new(pool.clone(), PageFetcher::new(quiet_fetch()), resolver, upsert),
            pool,
            store,
            geocoder,
            trigger,
        }
    }

    #[tokio::test]
    async fn first_sighting_creates_offer() {
        let page = olx_page(15);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let geocoder = RecordingGeocoder::answering(vec![("Mickiewicza 12, Warszawa", 52.26, 20.98)]);
        let h = harness(factory, Some("Mickiewicza"), geocoder);

        let outcome = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap();

        assert!(outcome.created);
        let offer = outcome.offer;
        assert_eq!(offer.link, OLX_URL);
        assert_eq!(offer.title, "2-room flat");
        assert_eq!(offer.price, 2000);
        assert_eq!(offer.views, 15);
        assert_eq!(offer.location.city, "Warszawa");
        assert_eq!(offer.location.street.as_deref(), Some("Mickiewicza"));
        assert_eq!(offer.location.street_number.as_deref(), Some("12"));
        assert_eq!(offer.location.latitude, Some(52.26));
        assert!(offer.is_new);
        assert_eq!(h.trigger.calls(), vec![offer.id]);

        let status = h.pool.status();
        assert_eq!((status.in_use, status.idle), (0, 1));
    }

    #[tokio::test]
    async fn rescrape_without_address_keeps_street_and_raises_views() {
        let page = olx_page(15);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let h = harness(factory, Some("Mickiewicza"), RecordingGeocoder::default());
        let first = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap().offer;

        let page = olx_page(40);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let pool = Arc::new(BrowserPool::new(factory, 1));
        let rescan = OfferProcessor::new(
            pool,
            PageFetcher::new(quiet_fetch()),
            AddressResolver::new(Arc::new(FixedAddress(ProposedAddress::default())), h.geocoder.clone()),
            UpsertEngine::new(h.store.clone(), h.trigger.clone()),
        );
        let second = rescan.process(OLX_URL, Source::Olx, false).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.offer.id, first.id);
        assert_eq!(second.offer.views, 40);
        assert_eq!(second.offer.location.street.as_deref(), Some("Mickiewicza"));
        assert!(second.offer.is_new);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn invalid_street_falls_back_to_district_geocoding() {
        let page = olx_page(3);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let geocoder = RecordingGeocoder::answering(vec![("Mokotów, Warszawa", 52.19, 21.04)]);
        let h = harness(factory, Some("x1"), geocoder);

        let offer = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap().offer;

        assert_eq!(offer.location.street, None);
        assert_eq!(offer.location.latitude, Some(52.19));
        assert_eq!(h.geocoder.queries(), vec!["Mokotów, Warszawa"]);
    }

    #[tokio::test]
    async fn redirect_to_otodom_uses_otodom_adapter() {
        let factory = FakeFactory::serving(vec![(OLX_URL, OTODOM_URL, OTODOM_PAGE)]);
        let h = harness(factory, None, RecordingGeocoder::default());

        let offer = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap().offer;

        assert_eq!(offer.source, Source::Otodom);
        assert_eq!(offer.link, OTODOM_URL);
        assert_eq!(offer.title, "Mieszkanie na Woli");
        assert_eq!(offer.price, 3900);
        assert_eq!(offer.location.city, "Warszawa");
        assert_eq!(h.geocoder.queries(), vec!["Wola, Warszawa, mazowieckie"]);
    }

    #[tokio::test]
    async fn blank_page_is_persisted_with_defaults() {
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, "<html><body></body></html>")]);
        let h = harness(factory, None, RecordingGeocoder::default());

        let offer = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap().offer;

        assert_eq!(offer.title, "");
        assert_eq!(offer.location.city, UNKNOWN_CITY);
        assert!(h.store.find_by_link(OLX_URL).await.unwrap().is_some());
    }

    struct FirstSentence;

    #[async_trait]
    impl Summarizer for FirstSentence {
        async fn summarize(&self, _title: &str, description: &str) -> Result<Option<String>> {
            Ok(description.split('.').next().map(|s| s.trim().to_string()))
        }
    }

    #[tokio::test]
    async fn summary_is_attached_when_configured() {
        let page = olx_page(1);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let h = harness(factory, None, RecordingGeocoder::default());
        let processor = h.processor.with_summarizer(Arc::new(FirstSentence));

        let offer = processor.process(OLX_URL, Source::Olx, true).await.unwrap().offer;

        assert_eq!(offer.summary.as_deref(), Some("Blisko metra"));
    }

    #[tokio::test]
    async fn navigation_failure_discards_session() {
        let factory = FakeFactory::default();
        factory.set_navigation(Navigation::Fail("net::ERR_CONNECTION_RESET".to_string()));
        let h = harness(factory, None, RecordingGeocoder::default());

        let err = h.processor.process(OLX_URL, Source::Olx, true).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Navigation { .. }));
        assert_eq!(h.pool.status().live, 0);
        assert!(h.store.is_empty());
        assert!(h.trigger.calls().is_empty());
    }

    #[tokio::test]
    async fn exhausted_pool_waits_for_a_released_session() {
        let page = olx_page(2);
        let factory = FakeFactory::serving(vec![(OLX_URL, OLX_URL, page.as_str())]);
        let h = harness(factory, None, RecordingGeocoder::default());
        let first = h.pool.acquire().await.unwrap();
        let second = h.pool.acquire().await.unwrap();

        let processor = Arc::new(h.processor);
        let task = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.process(OLX_URL, Source::Olx, true).await })
        };
        while h.pool.status().waiting == 0 {
            tokio::task::yield_now().await;
        }
        h.pool.release(first);

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.created);
        let status = h.pool.status();
        assert_eq!((status.live, status.in_use, status.idle), (2, 1, 1));
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn job_timeout_discards_the_held_session() {
        let factory = FakeFactory::default();
        factory.set_navigation(Navigation::Hang);
        let h = harness(factory, None, RecordingGeocoder::default());
        let mut queues = QueuesConfig::default();
        queues.new.attempts = 1;
        queues.new.job_timeout_secs = 1;
        let scheduler = QueueScheduler::new(Arc::new(h.processor), &queues);

        scheduler.enqueue(Source::Olx, OLX_URL, true).unwrap();
        scheduler.start();
        scheduler.wait_idle().await;

        let failed = scheduler.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].error.as_deref(),
            Some(ScrapeError::JobTimeout(std::time::Duration::from_secs(1)).to_string().as_str())
        );
        let status = h.pool.status();
        assert_eq!((status.live, status.in_use, status.idle), (0, 0, 0));
        assert!(h.store.is_empty());
        assert!(h.trigger.calls().is_empty());
    }
}
