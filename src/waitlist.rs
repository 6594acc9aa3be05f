//! Seat allocation for a single event.
//!
//! Every registration is `confirmed`, `pending` (a freed seat has been offered
//! and is held for the offer window) or `waiting`. Confirmed and pending
//! registrations hold a seat. The waiting queue is ordered by `queued_at`,
//! ties broken by registration id.

use std::collections::HashSet;

use crate::models::RegistrationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub id: i32,
    pub status: RegistrationStatus,
    pub queued_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub id: i32,
    pub to: RegistrationStatus,
    pub queued_at: i64,
}

fn capacity(limit: i32) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

pub fn held(seats: &[Seat]) -> usize {
    seats.iter().filter(|s| s.status.holds_seat()).count()
}

pub fn offer_expired(offered_at: i64, now: i64, window: i64) -> bool {
    now - offered_at > window
}

/// Where a new registrant lands. Nobody jumps the waiting queue.
pub fn place(seats: &[Seat], limit: i32) -> RegistrationStatus {
    let queue_empty = !seats
        .iter()
        .any(|s| s.status == RegistrationStatus::Waiting);
    if queue_empty && held(seats) < capacity(limit) {
        RegistrationStatus::Confirmed
    } else {
        RegistrationStatus::Waiting
    }
}

/// 1-based position in the waiting queue.
pub fn queue_position(seats: &[Seat], id: i32) -> Option<usize> {
    waiting_queue(seats.iter())
        .iter()
        .position(|s| s.id == id)
        .map(|p| p + 1)
}

fn waiting_queue<'a>(seats: impl Iterator<Item = &'a Seat>) -> Vec<&'a Seat> {
    let mut queue: Vec<&Seat> = seats
        .filter(|s| s.status == RegistrationStatus::Waiting)
        .collect();
    queue.sort_by_key(|s| (s.queued_at, s.id));
    queue
}

/// Expires stale offers and offers every free seat to the head of the queue.
///
/// Expired offers go to the back of the queue with `queued_at = now` and are
/// not re-offered within the same pass.
pub fn refill(seats: &[Seat], limit: i32, now: i64, window: i64) -> Vec<Transition> {
    let mut transitions = Vec::new();
    let mut demoted = HashSet::new();

    for seat in seats {
        if seat.status == RegistrationStatus::Pending && offer_expired(seat.queued_at, now, window) {
            transitions.push(Transition {
                id: seat.id,
                to: RegistrationStatus::Waiting,
                queued_at: now,
            });
            demoted.insert(seat.id);
        }
    }

    let mut taken = held(seats) - demoted.len();
    let queue = waiting_queue(seats.iter());
    for seat in queue {
        if taken >= capacity(limit) {
            break;
        }
        transitions.push(Transition {
            id: seat.id,
            to: RegistrationStatus::Pending,
            queued_at: now,
        });
        taken += 1;
    }

    transitions
}
