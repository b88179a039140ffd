pub mod parse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BuildingType, OwnerType, ParkingType, Source};
use crate::scrapers::RawExtraction;

/// Typed offer fields from one scrape, before merging with the stored record.
///
/// `None` means "not observed on this page"; the upsert engine keeps the
/// stored value for such fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDraft {
    pub link: String,
    pub source: Source,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub footage: Option<f64>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub rooms: Option<i32>,
    pub floor: Option<i32>,
    pub furniture: Option<bool>,
    pub elevator: Option<bool>,
    pub pets: Option<bool>,
    pub negotiable: Option<bool>,
    pub owner_type: Option<OwnerType>,
    pub parking_type: Option<ParkingType>,
    pub building_type: Option<BuildingType>,
    pub rent_additional: Option<i64>,
    pub views: u64,
    pub images: Vec<String>,
    pub contact: Option<String>,
    pub info_additional: Option<String>,
    pub furnishing: Option<String>,
    pub media: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl OfferDraft {
    pub fn empty(source: Source, link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            source,
            title: None,
            price: None,
            footage: None,
            city: None,
            district: None,
            street: None,
            street_number: None,
            latitude: None,
            longitude: None,
            description: None,
            summary: None,
            rooms: None,
            floor: None,
            furniture: None,
            elevator: None,
            pets: None,
            negotiable: None,
            owner_type: None,
            parking_type: None,
            building_type: None,
            rent_additional: None,
            views: 0,
            images: Vec::new(),
            contact: None,
            info_additional: None,
            furnishing: None,
            media: None,
            posted_at: None,
        }
    }
}

/// Parameter labels each marketplace uses for a field, tried in order
struct Labels {
    footage: &'static [&'static str],
    rooms: &'static [&'static str],
    floor: &'static [&'static str],
    furniture: &'static [&'static str],
    elevator: &'static [&'static str],
    pets: &'static [&'static str],
    parking: &'static [&'static str],
    building: &'static [&'static str],
    rent: &'static [&'static str],
    owner: &'static [&'static str],
    contact: &'static [&'static str],
    info: &'static [&'static str],
    furnishing: &'static [&'static str],
    media: &'static [&'static str],
}

const OLX_LABELS: Labels = Labels {
    footage: &["powierzchnia"],
    rooms: &["liczba pokoi", "pokoi"],
    floor: &["poziom", "piętro"],
    furniture: &["umeblowane"],
    elevator: &["winda"],
    pets: &["zwierzęta", "zwierz"],
    parking: &["parking", "miejsce parkingowe"],
    building: &["rodzaj zabudowy", "typ budynku"],
    rent: &["czynsz"],
    owner: &["typ ogłoszeniodawcy"],
    contact: &["kontakt"],
    info: &["informacje dodatkowe"],
    furnishing: &["wyposażenie"],
    media: &["media"],
};

const OTODOM_LABELS: Labels = Labels {
    footage: &["powierzchnia"],
    rooms: &["liczba pokoi"],
    floor: &["piętro"],
    furniture: &["umeblowane"],
    elevator: &["winda"],
    pets: &["zwierzęta"],
    parking: &["miejsce parkingowe"],
    building: &["typ budynku"],
    rent: &["czynsz dodatkowy"],
    owner: &["typ ogłoszeniodawcy"],
    contact: &["kontakt"],
    info: &["informacje dodatkowe"],
    furnishing: &["wyposażenie"],
    media: &["media"],
};

fn labels(source: Source) -> &'static Labels {
    match source {
        Source::Olx => &OLX_LABELS,
        Source::Otodom => &OTODOM_LABELS,
    }
}

fn lookup<'a>(raw: &'a RawExtraction, candidates: &[&str]) -> Option<&'a str> {
    candidates.iter().find_map(|label| raw.param(label))
}

/// Turn raw page fields into typed values. Address fields other than city
/// and district are left for the address resolver.
pub fn normalize(source: Source, link: &str, raw: &RawExtraction) -> OfferDraft {
    let labels = labels(source);
    let param = |candidates: &[&str]| lookup(raw, candidates);

    let owner_type = param(labels.owner).and_then(parse::owner_type).or_else(|| {
        // OLX shows the seller kind as a bare flag row
        if raw.has_param("prywatne") {
            Some(OwnerType::Private)
        } else if raw.has_param("firmowe") {
            Some(OwnerType::Agency)
        } else {
            None
        }
    });

    OfferDraft {
        title: raw.title.as_deref().and_then(parse::text),
        price: raw.price.as_deref().and_then(parse::price),
        footage: raw
            .footage
            .as_deref()
            .and_then(parse::footage)
            .or_else(|| param(labels.footage).and_then(parse::footage)),
        city: raw.city.as_deref().and_then(parse::text),
        district: raw.district.as_deref().and_then(parse::text),
        description: raw.description.as_deref().and_then(parse::text),
        rooms: param(labels.rooms).and_then(parse::rooms),
        floor: param(labels.floor).and_then(parse::floor),
        furniture: param(labels.furniture).and_then(parse::yes_no),
        elevator: param(labels.elevator).and_then(parse::yes_no),
        pets: param(labels.pets).and_then(parse::yes_no),
        negotiable: raw.negotiable,
        owner_type,
        parking_type: param(labels.parking).and_then(parse::parking_type),
        building_type: param(labels.building).and_then(parse::building_type),
        rent_additional: param(labels.rent).and_then(parse::price),
        views: if raw.inactive { 0 } else { raw.views },
        images: raw.images.clone(),
        contact: raw
            .contact
            .as_deref()
            .and_then(parse::text)
            .or_else(|| param(labels.contact).and_then(parse::text)),
        info_additional: param(labels.info).and_then(parse::text),
        furnishing: param(labels.furnishing).and_then(parse::text),
        media: param(labels.media).and_then(parse::text),
        posted_at: raw.posted_at,
        ..OfferDraft::empty(source, link)
    }
}
