use chrono::{DateTime, Timelike, Utc};
use nearby_core::{CategoryBucket, Place};

/// Minutes before close at which a place is flagged `closing_soon`.
pub const CLOSING_SOON_FLAG_MINUTES: u32 = 45;
/// Minutes before close at or under which a place is dropped.
pub const CLOSING_SOON_EXCLUDE_MINUTES: u32 = 30;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Daily opening window in UTC minutes-of-day, `[open, close)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenWindow {
    pub open: u32,
    pub close: u32,
}

impl OpenWindow {
    const fn hours(open: u32, close: u32) -> Self {
        Self {
            open: open * 60,
            close: close * 60,
        }
    }
}

pub fn window_for(bucket: CategoryBucket) -> Option<OpenWindow> {
    match bucket {
        CategoryBucket::FoodDrink => Some(OpenWindow::hours(11, 22)),
        CategoryBucket::CoffeeWfh => Some(OpenWindow::hours(7, 18)),
        CategoryBucket::Outdoors => Some(OpenWindow::hours(7, 20)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Closed,
    Open,
    OpenClosingSoon { minutes_until_close: u32 },
    /// No window known; treated as open and never excluded.
    Unknown,
}

impl Availability {
    pub fn is_open(&self) -> bool {
        !matches!(self, Availability::Closed)
    }

    pub fn is_closing_soon(&self) -> bool {
        matches!(self, Availability::OpenClosingSoon { .. })
    }

    fn minutes_until_close(&self) -> Option<u32> {
        match self {
            Availability::OpenClosingSoon { minutes_until_close } => Some(*minutes_until_close),
            _ => None,
        }
    }
}

pub fn minute_of_day(now: DateTime<Utc>) -> u32 {
    now.hour() * 60 + now.minute()
}

pub fn availability_at(bucket: CategoryBucket, minute: u32) -> Availability {
    let Some(window) = window_for(bucket) else {
        return Availability::Unknown;
    };
    if minute < window.open || minute >= window.close {
        return Availability::Closed;
    }
    let minutes_until_close = window.close - minute;
    if minutes_until_close <= CLOSING_SOON_FLAG_MINUTES {
        Availability::OpenClosingSoon { minutes_until_close }
    } else {
        Availability::Open
    }
}

/// Sets `open_now` and `closing_soon` from each place's bucket window.
pub fn apply_availability(places: &mut [Place], now: DateTime<Utc>) {
    let minute = minute_of_day(now);
    for place in places.iter_mut() {
        let state = availability_at(place.category_bucket, minute);
        place.open_now = Some(state.is_open());
        place.closing_soon = Some(state.is_closing_soon());
    }
}

/// Keeps places not known to be closed.
pub fn filter_open_now(places: Vec<Place>) -> Vec<Place> {
    places.into_iter().filter(|p| p.open_now != Some(false)).collect()
}

/// Drops places at most [`CLOSING_SOON_EXCLUDE_MINUTES`] from closing.
/// Closed places and places without a window are kept.
pub fn filter_closing_soon(places: Vec<Place>, now: DateTime<Utc>) -> Vec<Place> {
    let minute = minute_of_day(now);
    places
        .into_iter()
        .filter(|p| {
            availability_at(p.category_bucket, minute)
                .minutes_until_close()
                .map_or(true, |left| left > CLOSING_SOON_EXCLUDE_MINUTES)
        })
        .collect()
}
