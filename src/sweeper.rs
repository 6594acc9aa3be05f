//! Background task that keeps waitlists moving when nobody touches an event:
//! expired seat offers are passed on without waiting for the next request.

use std::{sync::Arc, time::Duration};

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    api::registrations::{refill_event, send_offers},
    models::{Event, RegistrationStatus},
    schema::*,
    AppContext, DbPool,
};

pub fn spawn(pool: DbPool, ctx: Arc<AppContext>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep(&pool, &ctx).await {
                Ok(0) => {}
                Ok(offers) => tracing::info!(offers, "waitlist sweep offered seats"),
                Err(e) => tracing::warn!(error = ?e, "waitlist sweep failed"),
            }
        }
    })
}

/// Refills every upcoming event that has someone pending or waiting.
/// Returns how many seats were offered.
pub async fn sweep(pool: &DbPool, ctx: &AppContext) -> anyhow::Result<usize> {
    let conn = &mut pool.get().await?;
    let now = crate::now();

    let queued = registrations::table
        .filter(registrations::status.ne(RegistrationStatus::Confirmed.as_str()))
        .select(registrations::event_id)
        .distinct()
        .load::<i32>(conn)
        .await?;
    if queued.is_empty() {
        return Ok(0);
    }

    let open = events::table
        .filter(events::id.eq_any(queued))
        .filter(events::cancelled.eq(false))
        .filter(events::start_time.gt(now))
        .order(events::id)
        .load::<Event>(conn)
        .await?;

    let mut offered = 0;
    for event in open {
        let desk = ctx.desk.lock().await;
        let refilled = refill_event(conn, ctx, &event, now).await;
        drop(desk);

        // one broken event must not hold up the rest
        let users = match refilled {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(error = ?e, event_id = event.id, "waitlist refill failed");
                continue;
            }
        };

        offered += users.len();
        send_offers(conn, ctx, &event, &users, now).await;
    }
    Ok(offered)
}
