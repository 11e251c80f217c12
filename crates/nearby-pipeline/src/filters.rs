use std::collections::HashSet;

use nearby_core::Place;

/// Brand fragments matched against the lower-cased name. Trailing spaces keep
/// short brands from matching inside longer words.
const BLOCKED_NAME_FRAGMENTS: [&str; 17] = [
    "mcdonald",
    "burger king",
    "wendy",
    "taco bell",
    "kfc",
    "subway",
    "arbys",
    "papa john",
    "little caesars",
    "domino",
    "bp ",
    "shell ",
    "mobil ",
    "exxon",
    "circle k",
    "7-eleven",
    "7 eleven",
];

/// Prefixes of normalized category tokens that disqualify a place.
const BLOCKED_CATEGORY_PREFIXES: [&str; 12] = [
    "gasstation",
    "fuel",
    "petrol",
    "servicestation",
    "convenience",
    "pharmac",
    "drugstore",
    "chemist",
    "carwash",
    "carrepair",
    "autorepair",
    "automotive",
];

/// Lower-case alphanumerics in any script, matching category token normalization.
pub fn normalize_name(name: &str) -> String {
    crate::categories::normalize_token(name)
}

pub fn is_blacklisted(place: &Place) -> bool {
    let name = place.name.to_lowercase();
    if BLOCKED_NAME_FRAGMENTS.iter().any(|fragment| name.contains(fragment)) {
        return true;
    }
    place.categories.iter().any(|token| {
        let key = crate::categories::normalize_token(token);
        key == "gas" || BLOCKED_CATEGORY_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
    })
}

/// Drops disallowed chains and categories, preserving order.
pub fn filter_blacklisted(places: Vec<Place>) -> Vec<Place> {
    places.into_iter().filter(|p| !is_blacklisted(p)).collect()
}

/// Normalized name plus coordinates snapped to a ~100 m grid.
pub fn exact_dedup_key(place: &Place) -> String {
    let mut name = normalize_name(&place.name);
    if name.is_empty() {
        name = place.name.trim().to_lowercase();
    }
    format!(
        "{}|{}|{}",
        name,
        (place.location.lat * 1000.0).round() as i64,
        (place.location.lng * 1000.0).round() as i64
    )
}

/// Keeps the first place per [`exact_dedup_key`], preserving order.
pub fn dedup_exact(places: Vec<Place>) -> Vec<Place> {
    let mut seen = HashSet::new();
    places
        .into_iter()
        .filter(|p| seen.insert(exact_dedup_key(p)))
        .collect()
}

/// Blacklist then exact-key dedup.
pub fn filter_places(places: Vec<Place>) -> Vec<Place> {
    dedup_exact(filter_blacklisted(places))
}
