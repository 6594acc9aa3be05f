use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    routing::get,
    Extension, Json, Router,
};
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;

use crate::{
    api::{find_event, find_user, EventResponse},
    auth::AuthUser,
    error::{AppError, AppResult},
    leaderboard::{self, ClubStanding},
    models::{Event, Venue},
    schema::*,
    AppContext, DbPool,
};

const DEFAULT_LEADERBOARD_SIZE: usize = 10;
const DEFAULT_UPCOMING: usize = 20;

async fn get_events(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<i32>>> {
    let conn = &mut pool.get().await?;
    let ids = events::table
        .select(events::id)
        .order(events::id)
        .load::<i32>(conn)
        .await?;
    Ok(Json(ids))
}

async fn get_event(
    Extension(pool): Extension<DbPool>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<EventResponse>> {
    let conn = &mut pool.get().await?;
    Ok(Json(find_event(conn, event_id).await?.into()))
}

#[derive(Deserialize)]
struct SearchQuery {
    event_id: Option<i32>,
    event_name: Option<String>,
    event_location: Option<String>,
    categories: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    limit: Option<i32>,
    club_id: Option<i32>,
}

/// Splits a comma separated category filter, dropping blanks.
fn category_filter(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

async fn search_event(
    Extension(pool): Extension<DbPool>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let mut found = events::table.into_boxed();

    if let Some(id) = query.event_id {
        found = found.filter(events::id.eq(id));
    }
    if let Some(name) = query.event_name.as_deref().map(str::trim) {
        found = found.filter(events::event_name.ilike(like_pattern(name)));
    }
    if let Some(location) = query.event_location.as_deref().map(str::trim) {
        found = found.filter(events::event_location.eq(location));
    }
    if let Some(categories) = query.categories.as_deref().map(category_filter) {
        if !categories.is_empty() {
            found = found.filter(events::categories.contains(categories));
        }
    }
    if let Some(start) = query.start_time {
        found = found.filter(events::start_time.ge(start));
    }
    if let Some(end) = query.end_time {
        found = found.filter(events::end_time.le(end));
    }
    if let Some(limit) = query.limit {
        found = found.filter(events::capacity_limit.eq(limit));
    }
    if let Some(club_id) = query.club_id {
        found = found.filter(events::club_id.eq(club_id));
    }

    let conn = &mut pool.get().await?;
    let found = found
        .order(events::start_time)
        .load::<Event>(conn)
        .await?;
    Ok(Json(found.into_iter().map(EventResponse::from).collect()))
}

/// Unix bounds of a UTC calendar month, end exclusive.
fn month_bounds(year: i32, month: u32) -> Option<(i64, i64)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((
        first.and_hms_opt(0, 0, 0)?.timestamp(),
        next.and_hms_opt(0, 0, 0)?.timestamp(),
    ))
}

#[derive(Deserialize)]
struct CalendarQuery {
    year: i32,
    month: u32,
}

async fn calendar(
    Extension(pool): Extension<DbPool>,
    Query(query): Query<CalendarQuery>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let (from, until) = month_bounds(query.year, query.month)
        .ok_or_else(|| AppError::bad_request("invalid year or month"))?;

    let conn = &mut pool.get().await?;
    let found = events::table
        .filter(events::cancelled.eq(false))
        .filter(events::start_time.ge(from))
        .filter(events::start_time.lt(until))
        .order(events::start_time)
        .load::<Event>(conn)
        .await?;
    Ok(Json(found.into_iter().map(EventResponse::from).collect()))
}

/// Events sharing a category with `interests` first; start order otherwise kept.
fn recommend(mut upcoming: Vec<Event>, interests: &[String]) -> Vec<Event> {
    upcoming.sort_by_key(|e| {
        let relevant = e
            .categories
            .iter()
            .any(|c| interests.iter().any(|i| i.eq_ignore_ascii_case(c)));
        (!relevant, e.start_time)
    });
    upcoming
}

#[derive(Deserialize)]
struct UpcomingQuery {
    limit: Option<usize>,
}

async fn upcoming(
    Extension(pool): Extension<DbPool>,
    caller: AuthUser,
    Query(query): Query<UpcomingQuery>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let conn = &mut pool.get().await?;
    let user = find_user(conn, caller.user_id).await?;

    let found = events::table
        .filter(events::cancelled.eq(false))
        .filter(events::start_time.gt(crate::now()))
        .order(events::start_time)
        .load::<Event>(conn)
        .await?;

    Ok(Json(
        recommend(found, &user.interests)
            .into_iter()
            .take(query.limit.unwrap_or(DEFAULT_UPCOMING))
            .map(EventResponse::from)
            .collect(),
    ))
}

async fn venues(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<Venue>>> {
    let conn = &mut pool.get().await?;
    let all = venues::table
        .order(venues::id)
        .load::<Venue>(conn)
        .await?;
    Ok(Json(all))
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(query): Query<LeaderboardQuery>,
) -> AppResult<Json<Vec<ClubStanding>>> {
    let now = crate::now();
    let window = ctx.policy.leaderboard_window;

    let conn = &mut pool.get().await?;
    let clubs = clubs::table
        .select((clubs::id, clubs::club_name))
        .load::<(i32, String)>(conn)
        .await?;
    let conducted = events::table
        .filter(events::cancelled.eq(false))
        .filter(events::end_time.between(now - window, now))
        .load::<Event>(conn)
        .await?;

    Ok(Json(leaderboard::rank_clubs(
        &clubs,
        &conducted,
        now,
        window,
        query.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE),
    )))
}

pub fn app() -> Router {
    Router::new()
        .route("/get-events", get(get_events))
        .route("/get-event/:id", get(get_event))
        .route("/search-event", get(search_event))
        .route("/calendar", get(calendar))
        .route("/upcoming", get(upcoming))
        .route("/venues", get(venues))
        .route("/leaderboard", get(leaderboard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::http::{Method, StatusCode};

    #[test]
    fn category_filters_split_on_commas() {
        assert_eq!(
            category_filter(" tech, ,music,"),
            vec!["tech".to_string(), "music".to_string()]
        );
        assert!(category_filter("").is_empty());
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("hack"), "%hack%");
        assert_eq!(like_pattern("100%_fun"), "%100\\%\\_fun%");
    }

    #[test]
    fn month_bounds_cover_the_whole_month() {
        // 2024-02-01T00:00:00Z .. 2024-03-01T00:00:00Z
        assert_eq!(month_bounds(2024, 2), Some((1_706_745_600, 1_709_251_200)));
        let (_, end) = month_bounds(2024, 12).unwrap();
        assert_eq!(end, 1_735_689_600);
    }

    #[test]
    fn bad_months_have_no_bounds() {
        assert_eq!(month_bounds(2024, 0), None);
        assert_eq!(month_bounds(2024, 13), None);
    }

    #[test]
    fn interesting_events_come_first() {
        let mut music = test_support::event(1, 1, 300, 400);
        music.categories = vec!["Music".to_string()];
        let talk = test_support::event(2, 1, 100, 200);
        let mut tech = test_support::event(3, 1, 200, 300);
        tech.categories = vec!["tech".to_string(), "ai".to_string()];

        let ordered = recommend(vec![talk, tech, music], &["music".to_string(), "tech".to_string()]);
        let ids: Vec<i32> = ordered.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn without_interests_events_stay_in_start_order() {
        let events = vec![
            test_support::event(1, 1, 100, 200),
            test_support::event(2, 1, 200, 300),
        ];
        let ids: Vec<i32> = recommend(events, &[]).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn calendar_rejects_impossible_months() {
        let (status, _) =
            test_support::send(Method::GET, "/api/events/calendar?year=2024&month=13", None, None)
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upcoming_needs_a_token() {
        let (status, _) = test_support::send(Method::GET, "/api/events/upcoming", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn locations_match_exactly() {
        let Some(db) = test_support::database().await else {
            return;
        };
        let tag = test_support::tag();
        {
            let conn = &mut db.pool.get().await.unwrap();
            let club_id = test_support::insert_club(conn).await;
            let location = format!("Room {tag} 1");
            test_support::insert_event(conn, club_id, crate::now() + 86_400, 10, 0.0, &location)
                .await;
        }

        let hits = |uri: String| {
            let app = test_support::app_with(db.pool.clone());
            async move {
                let (status, body) = test_support::send_to(app, Method::GET, &uri, None, None).await;
                assert_eq!(status, StatusCode::OK);
                body.as_array().map_or(0, Vec::len)
            }
        };
        assert_eq!(
            hits(format!("/api/events/search-event?event_location=Room%20{tag}%201")).await,
            1
        );
        assert_eq!(
            hits(format!("/api/events/search-event?event_location=room%20{tag}")).await,
            0
        );
        assert_eq!(
            hits(format!("/api/events/search-event?event_location=Room%20{tag}")).await,
            0
        );
    }
}
