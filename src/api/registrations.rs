use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::{
    api::{find_event, find_user, Message},
    auth::{AuthUser, ClubOnly},
    email,
    error::{AppError, AppResult},
    models::{Event, Registration, RegistrationStatus},
    payments,
    rules::{self, RuleViolation},
    schema::*,
    waitlist::{self, Seat},
    AppContext, DbPool,
};

#[derive(Insertable)]
#[diesel(table_name = registrations)]
struct NewRegistration<'a> {
    user_id: i32,
    event_id: i32,
    status: &'a str,
    queued_at: i64,
    order_id: Option<String>,
}

#[derive(Serialize)]
struct RegistrationResponse {
    registration_id: i32,
    user_id: i32,
    event_id: i32,
    event_name: String,
    start_time: i64,
    status: RegistrationStatus,
    queued_at: i64,
    order_id: Option<String>,
}

impl RegistrationResponse {
    fn new(registration: Registration, event: &Event) -> anyhow::Result<Self> {
        Ok(Self {
            status: registration.state()?,
            registration_id: registration.id,
            user_id: registration.user_id,
            event_id: registration.event_id,
            event_name: event.event_name.clone(),
            start_time: event.start_time,
            queued_at: registration.queued_at,
            order_id: registration.order_id,
        })
    }
}

async fn event_registrations(
    conn: &mut AsyncPgConnection,
    event_id: i32,
) -> anyhow::Result<Vec<Registration>> {
    Ok(registrations::table
        .filter(registrations::event_id.eq(event_id))
        .load::<Registration>(conn)
        .await?)
}

fn seats(rows: &[Registration]) -> anyhow::Result<Vec<Seat>> {
    rows.iter()
        .map(|r| {
            Ok(Seat {
                id: r.id,
                status: r.state()?,
                queued_at: r.queued_at,
            })
        })
        .collect()
}

/// Expires stale offers on `event` and offers freed seats down the waitlist.
/// Returns the users who were just offered a seat.
///
/// Callers hold the desk.
pub(crate) async fn refill_event(
    conn: &mut AsyncPgConnection,
    ctx: &AppContext,
    event: &Event,
    now: i64,
) -> anyhow::Result<Vec<i32>> {
    let rows = event_registrations(conn, event.id).await?;
    let transitions = waitlist::refill(
        &seats(&rows)?,
        event.capacity_limit,
        now,
        ctx.policy.offer_window,
    );

    let mut offered = Vec::new();
    for t in transitions {
        diesel::update(registrations::table.find(t.id))
            .set((
                registrations::status.eq(t.to.as_str()),
                registrations::queued_at.eq(t.queued_at),
            ))
            .execute(conn)
            .await?;

        match t.to {
            RegistrationStatus::Pending => {
                if let Some(row) = rows.iter().find(|r| r.id == t.id) {
                    tracing::info!(registration_id = t.id, event_id = event.id, "seat offered");
                    offered.push(row.user_id);
                }
            }
            _ => tracing::info!(
                registration_id = t.id,
                event_id = event.id,
                "seat offer expired, back on the waitlist"
            ),
        }
    }
    Ok(offered)
}

/// E-mails a seat offer to each user. Never fails.
pub(crate) async fn send_offers(
    conn: &mut AsyncPgConnection,
    ctx: &AppContext,
    event: &Event,
    user_ids: &[i32],
    now: i64,
) {
    if user_ids.is_empty() || ctx.mailer.is_none() {
        return;
    }
    let usernames = match users::table
        .filter(users::id.eq_any(user_ids))
        .select(users::username)
        .load::<String>(conn)
        .await
    {
        Ok(usernames) => usernames,
        Err(e) => {
            tracing::warn!(error = %e, event_id = event.id, "could not look up offer recipients");
            return;
        }
    };

    let expires_at = now + ctx.policy.offer_window;
    for username in usernames {
        let (subject, body) = email::offer_notice(&username, &event.event_name, expires_at);
        email::notify(ctx.mailer.as_ref(), &username, &subject, body).await;
    }
}

async fn create_order(ctx: &AppContext, event: &Event, user_id: i32) -> AppResult<String> {
    let payment_failed = || AppError::from(StatusCode::PAYMENT_REQUIRED, "Payment failed");
    let Some(razorpay) = &ctx.payments else {
        tracing::warn!(event_id = event.id, "paid registration refused, payments are not configured");
        return Err(payment_failed());
    };
    razorpay
        .create_order(event.price, &payments::receipt_for(event.id, user_id))
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, event_id = event.id, user_id, "razorpay order failed");
            payment_failed()
        })
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    registration_id: i32,
    status: RegistrationStatus,
    order_id: Option<String>,
    position: Option<usize>,
}

async fn register_event(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    caller: AuthUser,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    let conn = &mut pool.get().await?;

    let user = find_user(conn, caller.user_id).await?;
    if user.suspended {
        return Err(AppError::forbidden("account suspended"));
    }
    let event = events::table
        .filter(events::event_name.eq(req.name.trim()))
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event not found"))?;

    let now = crate::now();
    if !event.accepts_registrations(now) {
        return Err(AppError::rejected(RuleViolation::RegistrationClosed));
    }

    let desk = ctx.desk.lock().await;

    let mine = registrations::table
        .inner_join(events::table)
        .filter(registrations::user_id.eq(user.id))
        .load::<(Registration, Event)>(conn)
        .await?;
    if mine.iter().any(|(r, _)| r.event_id == event.id) {
        return Err(AppError::rejected(RuleViolation::AlreadyRegistered));
    }
    let booked = mine
        .iter()
        .filter(|(_, e)| !e.cancelled)
        .map(|(_, e)| (e.id, e.slot()));
    if rules::find_clash(&event.slot(), booked).is_some() {
        return Err(AppError::rejected(RuleViolation::TimeClash));
    }

    let offered = refill_event(conn, &ctx, &event, now).await?;
    let placed = place(conn, &ctx, &event, user.id, now).await;
    drop(desk);

    // seats the refill offered stay offered even when this registration fails
    send_offers(conn, &ctx, &event, &offered, now).await;

    let placed = placed?;
    tracing::info!(
        registration_id = placed.registration_id,
        event_id = event.id,
        user_id = user.id,
        status = placed.status.as_str(),
        "registered"
    );
    Ok(Json(placed))
}

/// Seats or queues `user_id` on `event`. Nothing is stored when the payment
/// order cannot be created.
async fn place(
    conn: &mut AsyncPgConnection,
    ctx: &AppContext,
    event: &Event,
    user_id: i32,
    now: i64,
) -> AppResult<RegisterResponse> {
    let mut seats = seats(&event_registrations(conn, event.id).await?)?;
    let status = waitlist::place(&seats, event.capacity_limit);

    let order_id = match status {
        RegistrationStatus::Confirmed if event.is_paid() => {
            Some(create_order(ctx, event, user_id).await?)
        }
        _ => None,
    };

    let registration_id = diesel::insert_into(registrations::table)
        .values(NewRegistration {
            user_id,
            event_id: event.id,
            status: status.as_str(),
            queued_at: now,
            order_id: order_id.clone(),
        })
        .returning(registrations::id)
        .get_result::<i32>(conn)
        .await?;

    seats.push(Seat {
        id: registration_id,
        status,
        queued_at: now,
    });
    Ok(RegisterResponse {
        registration_id,
        status,
        order_id,
        position: waitlist::queue_position(&seats, registration_id),
    })
}

async fn approve_registration(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    caller: AuthUser,
    Path(registration_id): Path<i32>,
) -> AppResult<Json<RegistrationResponse>> {
    let conn = &mut pool.get().await?;
    let desk = ctx.desk.lock().await;

    let registration = registrations::table
        .find(registration_id)
        .first::<Registration>(conn)
        .await
        .optional()?
        .filter(|r| r.status == RegistrationStatus::Pending.as_str())
        .ok_or_else(|| AppError::not_found("Registration not found"))?;
    caller.is_authorized(registration.user_id)?;
    let event = find_event(conn, registration.event_id).await?;

    let now = crate::now();
    if !event.accepts_registrations(now) {
        return Err(AppError::rejected(RuleViolation::RegistrationClosed));
    }
    if waitlist::offer_expired(registration.queued_at, now, ctx.policy.offer_window) {
        let offered = refill_event(conn, &ctx, &event, now).await?;
        drop(desk);
        send_offers(conn, &ctx, &event, &offered, now).await;
        return Err(AppError::from(StatusCode::GONE, "Registration expired"));
    }

    let order_id = if event.is_paid() {
        Some(create_order(&ctx, &event, registration.user_id).await?)
    } else {
        None
    };

    let confirmed = diesel::update(registrations::table.find(registration_id))
        .set((
            registrations::status.eq(RegistrationStatus::Confirmed.as_str()),
            registrations::queued_at.eq(now),
            registrations::order_id.eq(order_id),
        ))
        .get_result::<Registration>(conn)
        .await?;
    drop(desk);

    tracing::info!(registration_id, event_id = event.id, "seat offer accepted");
    Ok(Json(RegistrationResponse::new(confirmed, &event)?))
}

async fn cancel_registration(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    caller: AuthUser,
    Path(registration_id): Path<i32>,
) -> AppResult<Json<Message>> {
    let conn = &mut pool.get().await?;
    let desk = ctx.desk.lock().await;

    let registration = registrations::table
        .find(registration_id)
        .first::<Registration>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Registration not found"))?;
    caller.is_authorized(registration.user_id)?;

    diesel::delete(registrations::table.find(registration_id))
        .execute(conn)
        .await?;

    let now = crate::now();
    let (event, offered) = if registration.state()?.holds_seat() {
        let event = find_event(conn, registration.event_id).await?;
        let offered = refill_event(conn, &ctx, &event, now).await?;
        (Some(event), offered)
    } else {
        (None, Vec::new())
    };
    drop(desk);

    if let Some(event) = event {
        send_offers(conn, &ctx, &event, &offered, now).await;
    }
    tracing::info!(registration_id, user_id = registration.user_id, "registration cancelled");
    Ok(Json(Message {
        message: "Registration cancelled",
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    position: Option<usize>,
}

async fn registration_status(
    Extension(pool): Extension<DbPool>,
    Path(registration_id): Path<i32>,
) -> AppResult<Json<StatusResponse>> {
    let conn = &mut pool.get().await?;
    let Some(registration) = registrations::table
        .find(registration_id)
        .first::<Registration>(conn)
        .await
        .optional()?
    else {
        return Ok(Json(StatusResponse {
            status: "not found",
            position: None,
        }));
    };

    let status = registration.state()?;
    let position = match status {
        RegistrationStatus::Waiting => {
            let rows = event_registrations(conn, registration.event_id).await?;
            waitlist::queue_position(&seats(&rows)?, registration.id)
        }
        _ => None,
    };
    Ok(Json(StatusResponse {
        status: status.as_str(),
        position,
    }))
}

#[derive(Deserialize)]
struct UserFilter {
    user_id: Option<i32>,
}

async fn registered_events(
    Extension(pool): Extension<DbPool>,
    caller: AuthUser,
    Query(query): Query<UserFilter>,
) -> AppResult<Json<Vec<RegistrationResponse>>> {
    let user_id = query.user_id.unwrap_or(caller.user_id);
    caller.is_authorized(user_id)?;

    let conn = &mut pool.get().await?;
    let rows = registrations::table
        .inner_join(events::table)
        .filter(registrations::user_id.eq(user_id))
        .order(events::start_time)
        .load::<(Registration, Event)>(conn)
        .await?;

    let registrations = rows
        .into_iter()
        .map(|(r, e)| RegistrationResponse::new(r, &e))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(registrations))
}

#[derive(Deserialize)]
struct EventFilter {
    event_id: Option<i32>,
}

async fn get_all_registrations(
    Extension(pool): Extension<DbPool>,
    ClubOnly(caller): ClubOnly,
    Query(query): Query<EventFilter>,
) -> AppResult<Json<Vec<RegistrationResponse>>> {
    let mut found = registrations::table.inner_join(events::table).into_boxed();
    if let Some(event_id) = query.event_id {
        found = found.filter(registrations::event_id.eq(event_id));
    }
    if !caller.is_admin() {
        found = found.filter(events::club_id.eq(caller.user_id));
    }

    let conn = &mut pool.get().await?;
    let rows = found
        .order((events::start_time, registrations::queued_at, registrations::id))
        .load::<(Registration, Event)>(conn)
        .await?;

    let registrations = rows
        .into_iter()
        .map(|(r, e)| RegistrationResponse::new(r, &e))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(registrations))
}

#[derive(Serialize)]
struct SeatOffer {
    registration_id: i32,
    event_id: i32,
    event_name: String,
    expires_at: i64,
}

async fn notifications(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    caller: AuthUser,
) -> AppResult<Json<Vec<SeatOffer>>> {
    let conn = &mut pool.get().await?;
    let pending = registrations::table
        .inner_join(events::table)
        .filter(registrations::user_id.eq(caller.user_id))
        .filter(registrations::status.eq(RegistrationStatus::Pending.as_str()))
        .order(registrations::queued_at)
        .load::<(Registration, Event)>(conn)
        .await?;

    let now = crate::now();
    let window = ctx.policy.offer_window;
    let offers = pending
        .into_iter()
        .filter(|(r, _)| !waitlist::offer_expired(r.queued_at, now, window))
        .map(|(r, e)| SeatOffer {
            registration_id: r.id,
            event_id: e.id,
            event_name: e.event_name,
            expires_at: r.queued_at + window,
        })
        .collect();
    Ok(Json(offers))
}

pub fn app() -> Router {
    Router::new()
        .route("/register-event", post(register_event))
        .route("/approve-registration/:id", post(approve_registration))
        .route("/cancel-registration/:id", post(cancel_registration))
        .route("/registration-status/:id", get(registration_status))
        .route("/registered-events", get(registered_events))
        .route("/get-all-registrations", get(get_all_registrations))
        .route("/notifications", get(notifications))
}
