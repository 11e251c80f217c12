use nearby_core::Place;
use strsim::levenshtein;

use crate::filters::normalize_name;

#[derive(Debug, Clone, Copy)]
pub struct FuzzyDedupConfig {
    pub max_edit_distance: usize,
    pub max_distance_m: f64,
}

impl Default for FuzzyDedupConfig {
    fn default() -> Self {
        Self {
            max_edit_distance: 2,
            max_distance_m: 50.0,
        }
    }
}

/// Near-duplicate removal across providers: similar normalized names at
/// (almost) the same spot are one venue.
#[derive(Debug, Clone, Default)]
pub struct FuzzyDeduplicator {
    config: FuzzyDedupConfig,
}

impl FuzzyDeduplicator {
    pub fn new(config: FuzzyDedupConfig) -> Self {
        Self { config }
    }

    /// Same venue when names are within the edit budget and, if both places
    /// carry usable coordinates, closer than the distance budget. Without
    /// coordinates on either side the name alone decides.
    pub fn is_same_venue(&self, a: &Place, b: &Place) -> bool {
        let (name_a, name_b) = (normalize_name(&a.name), normalize_name(&b.name));
        if name_a.is_empty() || name_b.is_empty() {
            return false;
        }
        if levenshtein(&name_a, &name_b) > self.config.max_edit_distance {
            return false;
        }
        match (a.location.finite(), b.location.finite()) {
            (Some(pa), Some(pb)) => pa.distance_m(&pb) < self.config.max_distance_m,
            _ => true,
        }
    }

    /// Keeps the first of every near-duplicate group, preserving order.
    pub fn apply(&self, places: Vec<Place>) -> Vec<Place> {
        let mut accepted: Vec<Place> = Vec::with_capacity(places.len());
        for candidate in places {
            if !accepted.iter().any(|kept| self.is_same_venue(kept, &candidate)) {
                accepted.push(candidate);
            }
        }
        accepted
    }
}
