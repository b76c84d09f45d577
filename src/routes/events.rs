use axum::{
    extract::{Query, State},
    response::{sse, Sse},
    Json,
};
use futures::Stream;
use tracing::debug;

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    data_model::Event,
    events::{EventBusStats, StreamFrame, SubscriptionItem},
    http_objects::{ApiError, RecentEventsQuery, StreamQuery},
};

/// Snapshot of recent events, newest first
#[utoipa::path(
    get,
    path = "/events/recent",
    tag = "events",
    params(("limit" = Option<usize>, Query, description = "default 50")),
    responses(
        (status = 200, description = "recent events"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn recent_events(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Query(query): Query<RecentEventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.event_bus.recent(query.limit.unwrap_or(50))))
}

/// Event bus counters
#[utoipa::path(
    get,
    path = "/events/stats",
    tag = "events",
    responses(
        (status = 200, description = "bus statistics"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn event_stats(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<EventBusStats>, ApiError> {
    Ok(Json(state.event_bus.stats()))
}

/// Durable push channel: a connection frame, optional replay, then live
/// events and heartbeats. A subscriber that cannot keep up loses its
/// oldest frames, never the publishers.
pub async fn stream_events(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<sse::Event, axum::Error>>> {
    state.metrics.stream_connections.add(1, &[]);
    let mut subscription = state.event_bus.subscribe(query.replay.unwrap_or(0));

    let stream = async_stream::stream! {
        yield sse::Event::default().json_data(StreamFrame::connection());

        let replay = std::mem::take(&mut subscription.replay);
        for event in replay {
            yield sse::Event::default().json_data(StreamFrame::event(event));
        }

        loop {
            match subscription.next_item().await {
                SubscriptionItem::Frame(frame) => {
                    yield sse::Event::default().json_data(frame);
                }
                SubscriptionItem::Lagged(n) => {
                    debug!(dropped = n, "push subscriber lagging, dropped oldest frames");
                }
                SubscriptionItem::Closed => return,
            }
        }
    };
    Sse::new(stream)
}
