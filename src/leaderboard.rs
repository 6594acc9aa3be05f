use std::cmp::Ordering;

use itertools::Itertools;
use serde::Serialize;

use crate::models::Event;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClubStanding {
    pub rank: usize,
    pub club_id: i32,
    #[serde(rename = "name")]
    pub club_name: String,
    pub events_conducted: usize,
    pub average_rating: f64,
}

/// Ranks clubs by the events they finished in `[now - window, now]`.
///
/// A club's score is the mean of its rated events' average ratings; clubs
/// without a rated event score 0.
pub fn rank_clubs(
    clubs: &[(i32, String)],
    events: &[Event],
    now: i64,
    window: i64,
    limit: usize,
) -> Vec<ClubStanding> {
    let conducted = events
        .iter()
        .filter(|e| !e.cancelled && e.end_time <= now && e.end_time >= now - window)
        .into_group_map_by(|e| e.club_id);

    clubs
        .iter()
        .map(|(club_id, club_name)| {
            let held = conducted.get(club_id).map(Vec::as_slice).unwrap_or(&[]);
            let ratings: Vec<f64> = held.iter().filter_map(|e| e.average_rating()).collect();
            let average_rating = if ratings.is_empty() {
                0.0
            } else {
                ratings.iter().sum::<f64>() / ratings.len() as f64
            };
            ClubStanding {
                rank: 0,
                club_id: *club_id,
                club_name: club_name.clone(),
                events_conducted: held.len(),
                average_rating,
            }
        })
        .sorted_by(|a, b| {
            b.average_rating
                .partial_cmp(&a.average_rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.events_conducted.cmp(&a.events_conducted))
                .then_with(|| a.club_name.cmp(&b.club_name))
        })
        .take(limit)
        .enumerate()
        .map(|(i, standing)| ClubStanding {
            rank: i + 1,
            ..standing
        })
        .collect()
}
