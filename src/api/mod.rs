use axum::Router;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    models::{Club, Event, Role, User},
    schema,
};

pub mod admin;
pub mod ai;
pub mod events;
pub mod manage;
pub mod registrations;

pub fn app() -> Router {
    Router::new()
        .nest("/manage", manage::app())
        .nest("/events", events::app().merge(registrations::app()))
        .nest("/admin", admin::app())
        .nest("/ai", ai::app())
}

#[derive(Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct EventResponse {
    id: i32,
    club_id: i32,
    event_name: String,
    description: Option<String>,
    event_location: String,
    categories: Vec<String>,
    start_time: i64,
    end_time: i64,
    limit: i32,
    price: f64,
    is_paid: bool,
    on_duty: bool,
    rating: Option<f64>,
    rating_count: i32,
    cancelled: bool,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            is_paid: event.is_paid(),
            rating: event.average_rating(),
            id: event.id,
            club_id: event.club_id,
            event_name: event.event_name,
            description: event.description,
            event_location: event.event_location,
            categories: event.categories,
            start_time: event.start_time,
            end_time: event.end_time,
            limit: event.capacity_limit,
            price: event.price,
            on_duty: event.on_duty,
            rating_count: event.rating_count,
            cancelled: event.cancelled,
        }
    }
}

#[derive(Serialize)]
pub struct UserResponse {
    id: i32,
    username: String,
    role: Role,
    interests: Vec<String>,
    suspended: bool,
    created_at: i64,
    club_name: Option<String>,
    upi_id: Option<String>,
}

impl UserResponse {
    pub fn new(user: User, club: Option<Club>) -> Self {
        Self {
            role: user.role(),
            id: user.id,
            username: user.username,
            interests: user.interests,
            suspended: user.suspended,
            created_at: user.created_at.timestamp(),
            club_name: club.as_ref().map(|c| c.club_name.clone()),
            upi_id: club.and_then(|c| c.upi_id),
        }
    }
}

pub(crate) async fn find_event(conn: &mut AsyncPgConnection, event_id: i32) -> AppResult<Event> {
    schema::events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event not found"))
}

pub(crate) async fn find_user(conn: &mut AsyncPgConnection, user_id: i32) -> AppResult<User> {
    schema::users::table
        .find(user_id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("User not found: id={user_id}")))
}
