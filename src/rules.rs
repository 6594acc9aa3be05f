//! Validation rules shared by user sign-up, event publishing and registration.

use axum::http::StatusCode;
use itertools::Itertools;
use regex::Regex;

pub const MAX_CATEGORIES: usize = 50;

lazy_static::lazy_static! {
    static ref EMAIL_LIKE: Regex = Regex::new(r"[^\s@]+@[^\s@]+\.[^\s@]+").unwrap();
    static ref UPI_ID: Regex = Regex::new(r"^[a-zA-Z0-9.\-_]{2,256}@[a-zA-Z]{2,64}$").unwrap();
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuleViolation {
    #[error("Username must be a campus e-mail address")]
    InvalidUsername,
    #[error("Username already exists")]
    DuplicateUsername,
    #[error("UPI ID must be provided for club accounts")]
    MissingUpi,
    #[error("Invalid UPI ID")]
    InvalidUpi,
    #[error("Event name already exists")]
    DuplicateEventName,
    #[error("Event name must not be empty")]
    EmptyEventName,
    #[error("Start time is invalid")]
    StartInPast,
    #[error("End time must be after start time")]
    EndBeforeStart,
    #[error("Event duration is too long")]
    TooLong,
    #[error("Limit must be greater than 0")]
    NoSeats,
    #[error("Price must not be negative")]
    NegativePrice,
    #[error("Too many categories")]
    TooManyCategories,
    #[error("Category `{0}` contains invalid characters")]
    InvalidCategory(String),
    #[error("{venue} only seats {capacity}")]
    OverVenueCapacity { venue: String, capacity: i32 },
    #[error("{venue} is already booked for that time")]
    VenueTaken { venue: String },
    #[error("Already registered for this event")]
    AlreadyRegistered,
    #[error("Time slot collides with another event")]
    TimeClash,
    #[error("Registration is closed for this event")]
    RegistrationClosed,
    #[error("Rating must be between 1 and 5")]
    RatingOutOfRange,
}

impl RuleViolation {
    pub fn status(&self) -> StatusCode {
        match self {
            RuleViolation::DuplicateUsername
            | RuleViolation::DuplicateEventName
            | RuleViolation::VenueTaken { .. }
            | RuleViolation::AlreadyRegistered
            | RuleViolation::TimeClash => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

pub type RuleResult<T> = Result<T, RuleViolation>;

/// A half-open interval of unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: i64,
    pub end: i64,
}

impl Slot {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Returns the id of the first slot in `booked` that overlaps `slot`.
pub fn find_clash<I>(slot: &Slot, booked: I) -> Option<i32>
where
    I: IntoIterator<Item = (i32, Slot)>,
{
    booked
        .into_iter()
        .find(|(_, other)| slot.overlaps(other))
        .map(|(id, _)| id)
}

fn seconds(name: &str, value: u64, unit: u64) -> anyhow::Result<i64> {
    value
        .checked_mul(unit)
        .and_then(|secs| i64::try_from(secs).ok())
        .ok_or_else(|| anyhow::anyhow!("{name} is out of range: {value}"))
}

pub struct Policy {
    username: Regex,
    pub offer_window: i64,
    pub max_event_secs: i64,
    pub leaderboard_window: i64,
}

impl Policy {
    pub fn new(
        campus_domain: &str,
        offer_window_secs: u64,
        max_event_hours: u64,
        leaderboard_window_days: u64,
    ) -> anyhow::Result<Self> {
        let username = Regex::new(&format!(
            r"^[a-zA-Z]+(?:\d{{8}})?@{}$",
            regex::escape(campus_domain)
        ))?;
        Ok(Self {
            username,
            offer_window: seconds("OFFER_WINDOW_SECS", offer_window_secs, 1)?,
            max_event_secs: seconds("MAX_EVENT_HOURS", max_event_hours, 60 * 60)?,
            leaderboard_window: seconds(
                "LEADERBOARD_WINDOW_DAYS",
                leaderboard_window_days,
                24 * 60 * 60,
            )?,
        })
    }

    pub fn check_username(&self, username: &str) -> RuleResult<()> {
        if self.username.is_match(username) {
            Ok(())
        } else {
            Err(RuleViolation::InvalidUsername)
        }
    }

    /// Checks an event's time window against `now`.
    pub fn check_schedule(&self, slot: &Slot, now: i64) -> RuleResult<()> {
        if slot.start <= now {
            return Err(RuleViolation::StartInPast);
        }
        if slot.end <= slot.start {
            return Err(RuleViolation::EndBeforeStart);
        }
        if slot.end - slot.start > self.max_event_secs {
            return Err(RuleViolation::TooLong);
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::new("snuchennai.edu.in", 3600, 12, 180).unwrap()
    }
}

pub fn check_upi(upi_id: &str) -> RuleResult<()> {
    if UPI_ID.is_match(upi_id) {
        Ok(())
    } else {
        Err(RuleViolation::InvalidUpi)
    }
}

pub fn check_seating(limit: i32, price: f64) -> RuleResult<()> {
    if limit <= 0 {
        return Err(RuleViolation::NoSeats);
    }
    if price.is_nan() || price < 0.0 {
        return Err(RuleViolation::NegativePrice);
    }
    Ok(())
}

pub fn check_rating(rating: i32) -> RuleResult<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(RuleViolation::RatingOutOfRange)
    }
}

/// Trims, drops blanks and de-duplicates categories, keeping first-seen order.
pub fn normalize_categories(categories: Vec<String>) -> RuleResult<Vec<String>> {
    let categories: Vec<String> = categories
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unique()
        .collect();

    if categories.len() > MAX_CATEGORIES {
        return Err(RuleViolation::TooManyCategories);
    }
    if let Some(bad) = categories.iter().find(|c| EMAIL_LIKE.is_match(c)) {
        return Err(RuleViolation::InvalidCategory(bad.clone()));
    }
    Ok(categories)
}
