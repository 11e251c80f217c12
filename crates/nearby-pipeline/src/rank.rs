use std::cmp::Ordering;

use nearby_core::Place;

fn missing_last(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::INFINITY)
}

/// Cascade: open first, not-closing-soon first, then shortest drive, walk
/// and straight-line distance. Unknown flags count as false, unknown
/// measurements as infinitely far.
pub fn compare_places(a: &Place, b: &Place) -> Ordering {
    let a_open = a.open_now.unwrap_or(false);
    let b_open = b.open_now.unwrap_or(false);
    b_open
        .cmp(&a_open)
        .then_with(|| a.closing_soon.unwrap_or(false).cmp(&b.closing_soon.unwrap_or(false)))
        .then_with(|| missing_last(a.drive_min()).total_cmp(&missing_last(b.drive_min())))
        .then_with(|| missing_last(a.walk_min()).total_cmp(&missing_last(b.walk_min())))
        .then_with(|| missing_last(a.distance_m).total_cmp(&missing_last(b.distance_m)))
}

/// Stable sort by [`compare_places`]; true ties keep their input order.
pub fn rank_places(mut places: Vec<Place>) -> Vec<Place> {
    places.sort_by(compare_places);
    places
}
