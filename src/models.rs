use crate::{rules::Slot, schema::*};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Club,
    Student,
}

impl Role {
    pub fn code(self) -> i16 {
        match self {
            Role::Admin => 0,
            Role::Club => 1,
            Role::Student => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Role> {
        match code {
            0 => Some(Role::Admin),
            1 => Some(Role::Club),
            2 => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Confirmed,
    Pending,
    Waiting,
}

impl RegistrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Waiting => "waiting",
        }
    }

    pub fn parse(s: &str) -> Option<RegistrationStatus> {
        match s {
            "confirmed" => Some(RegistrationStatus::Confirmed),
            "pending" => Some(RegistrationStatus::Pending),
            "waiting" => Some(RegistrationStatus::Waiting),
            _ => None,
        }
    }

    /// Confirmed seats and open offers both count against capacity.
    pub fn holds_seat(self) -> bool {
        !matches!(self, RegistrationStatus::Waiting)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub user_type: i16,
    pub interests: Vec<String>,
    pub suspended: bool,
    pub created_at: NaiveDateTime,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_code(self.user_type).unwrap_or(Role::Student)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
pub struct Club {
    pub id: i32,
    pub club_name: String,
    pub club_email: Option<String>,
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
pub struct Venue {
    pub id: i32,
    pub venue_name: String,
    pub capacity: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Club))]
pub struct Event {
    pub id: i32,
    pub club_id: i32,
    pub event_name: String,
    pub description: Option<String>,
    pub event_location: String,
    pub categories: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub capacity_limit: i32,
    pub price: f64,
    pub on_duty: bool,
    pub rating_sum: i32,
    pub rating_count: i32,
    pub cancelled: bool,
}

impl Event {
    pub fn slot(&self) -> Slot {
        Slot::new(self.start_time, self.end_time)
    }

    pub fn is_paid(&self) -> bool {
        self.price > 0.0
    }

    pub fn average_rating(&self) -> Option<f64> {
        (self.rating_count > 0).then(|| f64::from(self.rating_sum) / f64::from(self.rating_count))
    }

    /// Registration stays open until the event starts.
    pub fn accepts_registrations(&self, now: i64) -> bool {
        !self.cancelled && self.start_time > now
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Event))]
pub struct Registration {
    pub id: i32,
    pub user_id: i32,
    pub event_id: i32,
    pub status: String,
    pub queued_at: i64,
    pub order_id: Option<String>,
}

impl Registration {
    pub fn state(&self) -> anyhow::Result<RegistrationStatus> {
        RegistrationStatus::parse(&self.status).ok_or_else(|| {
            anyhow::anyhow!(
                "registration {} has unknown status `{}`",
                self.id,
                self.status
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_codes_round_trip() {
        for role in [Role::Admin, Role::Club, Role::Student] {
            assert_eq!(Role::from_code(role.code()), Some(role));
        }
        assert_eq!(Role::from_code(7), None);
    }

    #[test]
    fn only_waiting_registrations_leave_the_seat_free() {
        assert!(RegistrationStatus::Confirmed.holds_seat());
        assert!(RegistrationStatus::Pending.holds_seat());
        assert!(!RegistrationStatus::Waiting.holds_seat());
        assert_eq!(RegistrationStatus::parse("pending"), Some(RegistrationStatus::Pending));
        assert_eq!(RegistrationStatus::parse("cancelled"), None);
    }

    #[test]
    fn event_rating_is_the_mean() {
        let mut event = crate::test_support::event(1, 1, 0, 10);
        assert_eq!(event.average_rating(), None);
        event.rating_sum = 9;
        event.rating_count = 2;
        assert_eq!(event.average_rating(), Some(4.5));
    }
}
