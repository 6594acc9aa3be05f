use std::{collections::BTreeSet, sync::Arc};

use axum::{
    extract::Path,
    http::StatusCode,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;

use crate::{
    api::{
        find_event, find_user,
        manage::check_venue,
        registrations::{refill_event, send_offers},
        EventResponse, Message, UserResponse,
    },
    auth::AdminOnly,
    email,
    error::{AppError, AppResult},
    models::{Club, Event, Registration, RegistrationStatus, Role, User},
    rules::Slot,
    schema::*,
    AppContext, DbPool,
};

async fn list_users(
    Extension(pool): Extension<DbPool>,
    _: AdminOnly,
) -> AppResult<Json<Vec<UserResponse>>> {
    let conn = &mut pool.get().await?;
    let all = users::table
        .left_join(clubs::table)
        .order(users::id)
        .load::<(User, Option<Club>)>(conn)
        .await?;
    Ok(Json(
        all.into_iter()
            .map(|(user, club)| UserResponse::new(user, club))
            .collect(),
    ))
}

async fn set_suspended(pool: &DbPool, admin_id: i32, user_id: i32, suspended: bool) -> AppResult<()> {
    if admin_id == user_id {
        return Err(AppError::bad_request("admins cannot suspend themselves"));
    }
    let conn = &mut pool.get().await?;
    let updated = diesel::update(users::table.find(user_id))
        .set(users::suspended.eq(suspended))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(AppError::not_found(format!("User not found: id={user_id}")));
    }
    tracing::info!(user_id, suspended, by = admin_id, "suspension changed");
    Ok(())
}

async fn suspend_user(
    Extension(pool): Extension<DbPool>,
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Message>> {
    set_suspended(&pool, admin.user_id, user_id, true).await?;
    Ok(Json(Message {
        message: "User suspended",
    }))
}

async fn unsuspend_user(
    Extension(pool): Extension<DbPool>,
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Message>> {
    set_suspended(&pool, admin.user_id, user_id, false).await?;
    Ok(Json(Message {
        message: "User unsuspended",
    }))
}

async fn delete_user(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Message>> {
    let conn = &mut pool.get().await?;
    let user = find_user(conn, user_id).await?;
    match user.role() {
        Role::Admin => {
            return Err(AppError::from(
                StatusCode::CONFLICT,
                "admin accounts cannot be deleted",
            ))
        }
        Role::Club => {
            let owned: i64 = events::table
                .filter(events::club_id.eq(user_id))
                .count()
                .get_result(conn)
                .await?;
            if owned > 0 {
                return Err(AppError::from(
                    StatusCode::CONFLICT,
                    "club still owns events",
                ));
            }
        }
        Role::Student => {}
    }

    let desk = ctx.desk.lock().await;
    let held = registrations::table
        .filter(registrations::user_id.eq(user_id))
        .load::<Registration>(conn)
        .await?;
    diesel::delete(registrations::table.filter(registrations::user_id.eq(user_id)))
        .execute(conn)
        .await?;
    diesel::delete(users::table.find(user_id))
        .execute(conn)
        .await?;

    let mut freed = BTreeSet::new();
    for registration in &held {
        if registration.state()?.holds_seat() {
            freed.insert(registration.event_id);
        }
    }

    let now = crate::now();
    let mut offers = Vec::new();
    for event_id in freed {
        let event = find_event(conn, event_id).await?;
        let offered = refill_event(conn, &ctx, &event, now).await?;
        offers.push((event, offered));
    }
    drop(desk);

    for (event, offered) in offers {
        send_offers(conn, &ctx, &event, &offered, now).await;
    }
    tracing::info!(user_id, by = admin.user_id, "user deleted");
    Ok(Json(Message {
        message: "User deleted",
    }))
}

async fn cancel_event(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    AdminOnly(admin): AdminOnly,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Message>> {
    let conn = &mut pool.get().await?;
    let desk = ctx.desk.lock().await;

    let event = find_event(conn, event_id).await?;
    if event.cancelled {
        return Err(AppError::from(
            StatusCode::CONFLICT,
            "Event already cancelled",
        ));
    }

    diesel::update(events::table.find(event_id))
        .set(events::cancelled.eq(true))
        .execute(conn)
        .await?;
    let dropped = registrations::table
        .inner_join(users::table)
        .filter(registrations::event_id.eq(event_id))
        .select((registrations::status, users::username))
        .load::<(String, String)>(conn)
        .await?;
    diesel::delete(registrations::table.filter(registrations::event_id.eq(event_id)))
        .execute(conn)
        .await?;
    drop(desk);

    tracing::info!(event_id, by = admin.user_id, dropped = dropped.len(), "event cancelled");
    for (status, username) in dropped {
        if status == RegistrationStatus::Waiting.as_str() {
            continue;
        }
        let (subject, body) =
            email::cancellation_notice(&username, &event.event_name, event.start_time);
        email::notify(ctx.mailer.as_ref(), &username, &subject, body).await;
    }

    Ok(Json(Message {
        message: "Event cancelled",
    }))
}

#[derive(Deserialize)]
struct RescheduleRequest {
    start_time: i64,
    end_time: i64,
}

async fn reschedule_event(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    AdminOnly(admin): AdminOnly,
    Path(event_id): Path<i32>,
    Json(req): Json<RescheduleRequest>,
) -> AppResult<Json<EventResponse>> {
    let slot = Slot::new(req.start_time, req.end_time);
    ctx.policy
        .check_schedule(&slot, crate::now())
        .map_err(AppError::rejected)?;

    let conn = &mut pool.get().await?;
    let _desk = ctx.desk.lock().await;

    let event = find_event(conn, event_id).await?;
    if event.cancelled {
        return Err(AppError::from(
            StatusCode::CONFLICT,
            "Event is cancelled",
        ));
    }
    check_venue(
        conn,
        &event.event_location,
        event.capacity_limit,
        &slot,
        Some(event.id),
    )
    .await?;

    let event = diesel::update(events::table.find(event_id))
        .set((
            events::start_time.eq(slot.start),
            events::end_time.eq(slot.end),
        ))
        .get_result::<Event>(conn)
        .await?;

    tracing::info!(event_id, by = admin.user_id, "event rescheduled");
    Ok(Json(EventResponse::from(event)))
}

pub fn app() -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/suspend", post(suspend_user))
        .route("/users/:id/unsuspend", post(unsuspend_user))
        .route("/users/:id", delete(delete_user))
        .route("/events/:id/cancel", post(cancel_event))
        .route("/events/:id/reschedule", post(reschedule_event))
}
