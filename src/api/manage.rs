use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::{
    api::{find_user, Message, UserResponse},
    auth::{self, AuthKeys, AuthUser, ClubOnly, TOKEN_LIFETIME},
    error::{AppError, AppResult},
    models::{Club, Role, User, Venue},
    rules::{self, RuleViolation, Slot},
    schema::*,
    AppContext, DbPool,
};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    #[serde(rename = "type")]
    role: Role,
    #[serde(default)]
    interests: Vec<String>,
    club_name: Option<String>,
    upi_id: Option<String>,
}

#[derive(Serialize)]
struct CreatedUser {
    user_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser {
    username: String,
    password_hash: String,
    user_type: i16,
    interests: Vec<String>,
}

/// Syntax check first, then Razorpay when payments are configured.
async fn verify_upi(ctx: &AppContext, upi_id: &str) -> AppResult<()> {
    rules::check_upi(upi_id).map_err(AppError::rejected)?;
    let Some(payments) = &ctx.payments else {
        return Ok(());
    };
    match payments.validate_vpa(upi_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(AppError::rejected(RuleViolation::InvalidUpi)),
        Err(e) => {
            tracing::warn!(error = %e, "razorpay vpa validation failed");
            Err(AppError::from(
                StatusCode::BAD_GATEWAY,
                "Failed to validate UPI ID",
            ))
        }
    }
}

async fn create_user(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    caller: Option<AuthUser>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<Json<CreatedUser>> {
    let username = req.username.trim().to_string();
    ctx.policy
        .check_username(&username)
        .map_err(AppError::rejected)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(
            "password must be at least 8 characters",
        ));
    }
    let interests = rules::normalize_categories(req.interests).map_err(AppError::rejected)?;

    let upi_id = match req.role {
        Role::Club => {
            let upi_id = req
                .upi_id
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| AppError::rejected(RuleViolation::MissingUpi))?;
            verify_upi(&ctx, upi_id).await?;
            Some(upi_id.to_string())
        }
        _ => None,
    };

    let conn = &mut pool.get().await?;

    // the first admin bootstraps the system; after that only admins mint admins
    if req.role == Role::Admin && !caller.map_or(false, |c| c.is_admin()) {
        let admins: i64 = users::table
            .filter(users::user_type.eq(Role::Admin.code()))
            .count()
            .get_result(conn)
            .await?;
        if admins > 0 {
            return Err(AppError::forbidden("only admins can create admin accounts"));
        }
    }

    let user = diesel::insert_into(users::table)
        .values(NewUser {
            username: username.clone(),
            password_hash: auth::hash_password(req.password)?,
            user_type: req.role.code(),
            interests,
        })
        .on_conflict(users::username)
        .do_nothing()
        .get_result::<User>(conn)
        .await
        .optional()?;

    let Some(user) = user else {
        return Err(AppError::rejected(RuleViolation::DuplicateUsername));
    };

    if req.role == Role::Club {
        let club_name = req
            .club_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| username.clone());
        let inserted = diesel::insert_into(clubs::table)
            .values(Club {
                id: user.id,
                club_name,
                club_email: Some(username),
                upi_id,
            })
            .on_conflict(clubs::club_name)
            .do_nothing()
            .execute(conn)
            .await;

        // a club account never outlives a failed club row
        if !matches!(inserted, Ok(1)) {
            diesel::delete(users::table.find(user.id))
                .execute(conn)
                .await?;
            return Err(match inserted {
                Err(e) => e.into(),
                Ok(_) => AppError::from(StatusCode::CONFLICT, "Club name already exists"),
            });
        }
    }

    tracing::info!(user_id = user.id, role = ?req.role, "user created");
    Ok(Json(CreatedUser { user_id: user.id }))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user_id: i32,
    role: Role,
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Extension(keys): Extension<Arc<AuthKeys>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let conn = &mut pool.get().await?;

    if let Some(user) = users::table
        .filter(users::username.eq(req.username.trim()))
        .first::<User>(conn)
        .await
        .optional()?
    {
        if auth::verify_password(req.password, &user.password_hash)? {
            if user.suspended {
                return Err(AppError::forbidden("account suspended"));
            }
            let role = user.role();
            return Ok(Json(LoginResponse {
                token: keys.generate(user.id, role, TOKEN_LIFETIME)?,
                user_id: user.id,
                role,
            }));
        }
    }
    Err(AppError::from(
        StatusCode::UNAUTHORIZED,
        "invalid username or password",
    ))
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<i32>,
    username: Option<String>,
}

async fn get_user(
    Extension(pool): Extension<DbPool>,
    _: AuthUser,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<UserResponse>> {
    let (user_id, username) = match (query.user_id, query.username) {
        (None, None) => return Err(AppError::bad_request("User ID or username required")),
        pair => pair,
    };

    let conn = &mut pool.get().await?;
    let user = match user_id {
        Some(id) => find_user(conn, id).await?,
        None => {
            let username = username.unwrap_or_default();
            users::table
                .filter(users::username.eq(&username))
                .first::<User>(conn)
                .await
                .optional()?
                .ok_or_else(|| AppError::not_found(format!("User not found: {username}")))?
        }
    };
    let club = clubs::table
        .find(user.id)
        .first::<Club>(conn)
        .await
        .optional()?;

    Ok(Json(UserResponse::new(user, club)))
}

async fn all_user_ids(
    Extension(pool): Extension<DbPool>,
    _: AuthUser,
) -> AppResult<Json<Vec<i32>>> {
    let conn = &mut pool.get().await?;
    let ids = users::table
        .select(users::id)
        .order(users::id)
        .load::<i32>(conn)
        .await?;
    Ok(Json(ids))
}

/// Capacity and double-booking checks for events held at a known venue.
/// Free-form locations are not checked.
pub(crate) async fn check_venue(
    conn: &mut AsyncPgConnection,
    location: &str,
    limit: i32,
    slot: &Slot,
    ignore_event: Option<i32>,
) -> AppResult<()> {
    let Some(venue) = venues::table
        .filter(venues::venue_name.eq(location))
        .first::<Venue>(conn)
        .await
        .optional()?
    else {
        return Ok(());
    };

    if limit > venue.capacity {
        return Err(AppError::rejected(RuleViolation::OverVenueCapacity {
            venue: venue.venue_name,
            capacity: venue.capacity,
        }));
    }

    let booked = events::table
        .filter(events::event_location.eq(location))
        .filter(events::cancelled.eq(false))
        .filter(events::id.ne(ignore_event.unwrap_or(0)))
        .select((events::id, events::start_time, events::end_time))
        .load::<(i32, i64, i64)>(conn)
        .await?;

    let booked = booked
        .into_iter()
        .map(|(id, start, end)| (id, Slot::new(start, end)));
    if let Some(other) = rules::find_clash(slot, booked) {
        tracing::debug!(venue = %venue.venue_name, clashes_with = other, "venue already booked");
        return Err(AppError::rejected(RuleViolation::VenueTaken {
            venue: venue.venue_name,
        }));
    }
    Ok(())
}

#[derive(Deserialize)]
struct AddEventRequest {
    club_id: Option<i32>,
    event_name: String,
    description: Option<String>,
    event_location: String,
    #[serde(default)]
    categories: Vec<String>,
    start_time: i64,
    end_time: i64,
    limit: i32,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    on_duty: bool,
}

#[derive(Serialize)]
struct CreatedEvent {
    event_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewEvent {
    club_id: i32,
    event_name: String,
    description: Option<String>,
    event_location: String,
    categories: Vec<String>,
    start_time: i64,
    end_time: i64,
    capacity_limit: i32,
    price: f64,
    on_duty: bool,
}

async fn add_event(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    ClubOnly(caller): ClubOnly,
    Json(req): Json<AddEventRequest>,
) -> AppResult<Json<CreatedEvent>> {
    let club_id = req.club_id.unwrap_or(caller.user_id);
    caller.is_authorized(club_id)?;

    let event_name = req.event_name.trim().to_string();
    if event_name.is_empty() {
        return Err(AppError::rejected(RuleViolation::EmptyEventName));
    }

    let conn = &mut pool.get().await?;

    // a taken name is reported before any other problem with the request
    let taken: i64 = events::table
        .filter(events::event_name.eq(&event_name))
        .count()
        .get_result(conn)
        .await?;
    if taken > 0 {
        return Err(AppError::rejected(RuleViolation::DuplicateEventName));
    }

    let slot = Slot::new(req.start_time, req.end_time);
    ctx.policy
        .check_schedule(&slot, crate::now())
        .map_err(AppError::rejected)?;
    rules::check_seating(req.limit, req.price).map_err(AppError::rejected)?;
    let categories = rules::normalize_categories(req.categories).map_err(AppError::rejected)?;
    let event_location = req.event_location.trim().to_string();

    clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Club not found"))?;

    let _desk = ctx.desk.lock().await;
    check_venue(conn, &event_location, req.limit, &slot, None).await?;

    let event_id = diesel::insert_into(events::table)
        .values(NewEvent {
            club_id,
            event_name,
            description: req.description.filter(|d| !d.trim().is_empty()),
            event_location,
            categories,
            start_time: slot.start,
            end_time: slot.end,
            capacity_limit: req.limit,
            price: req.price,
            on_duty: req.on_duty,
        })
        .on_conflict(events::event_name)
        .do_nothing()
        .returning(events::id)
        .get_result::<i32>(conn)
        .await
        .optional()?;

    let Some(event_id) = event_id else {
        return Err(AppError::rejected(RuleViolation::DuplicateEventName));
    };

    tracing::info!(event_id, club_id, "event created");
    Ok(Json(CreatedEvent { event_id }))
}

#[derive(Deserialize)]
struct UpiQuery {
    upi_id: String,
}

async fn update_club_upi(
    Extension(pool): Extension<DbPool>,
    Extension(ctx): Extension<Arc<AppContext>>,
    ClubOnly(caller): ClubOnly,
    Path(club_id): Path<i32>,
    Query(query): Query<UpiQuery>,
) -> AppResult<Json<Message>> {
    caller.is_authorized(club_id)?;
    let upi_id = query.upi_id.trim();
    verify_upi(&ctx, upi_id).await?;

    let conn = &mut pool.get().await?;
    let updated = diesel::update(clubs::table.find(club_id))
        .set(clubs::upi_id.eq(upi_id))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(AppError::not_found("Club not found"));
    }

    tracing::info!(club_id, "club upi updated");
    Ok(Json(Message {
        message: "Club UPI updated successfully",
    }))
}

#[derive(Deserialize)]
struct RatingRequest {
    event_id: i32,
    rating: i32,
}

async fn update_event_rating(
    Extension(pool): Extension<DbPool>,
    _: AuthUser,
    Json(req): Json<RatingRequest>,
) -> AppResult<Json<Message>> {
    rules::check_rating(req.rating).map_err(AppError::rejected)?;

    let conn = &mut pool.get().await?;
    let updated = diesel::update(events::table.find(req.event_id))
        .set((
            events::rating_sum.eq(events::rating_sum + req.rating),
            events::rating_count.eq(events::rating_count + 1),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(AppError::not_found("Event not found"));
    }

    Ok(Json(Message {
        message: "Rating recorded",
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/create-user", post(create_user))
        .route("/login", post(login))
        .route("/get-user", get(get_user))
        .route("/all-user-ids", get(all_user_ids))
        .route("/add-event", post(add_event))
        .route("/update-club-upi/:club_id", put(update_club_upi))
        .route("/update-event-rating", put(update_event_rating))
}
