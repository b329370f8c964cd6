use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::AppState;
use crate::delivery::http::v1::middleware::{AuthenticatedUser, authenticate};
use crate::delivery::http::v1::requests::{PendingQuery, RequestResponse};
use crate::domain::geo::rank_requests;
use crate::domain::request::{GeoPoint, ServiceRequest};
use crate::domain::user::Role;
use crate::usecase::feed::{FeedError, Snapshot, Subscription};

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

#[derive(Deserialize)]
pub struct PendingWsQuery {
    token: String,
    sort: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    fix_age_secs: Option<i64>,
}

impl PendingWsQuery {
    fn view(&self) -> PendingQuery {
        PendingQuery {
            sort: self.sort.clone(),
            lat: self.lat,
            lng: self.lng,
            fix_age_secs: self.fix_age_secs,
        }
    }
}

/// Frames pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame<T> {
    Snapshot { feed: &'static str, items: Vec<T> },
    Error { feed: &'static str, message: String },
}

fn reject((status, message): (StatusCode, String)) -> Response {
    (status, message).into_response()
}

fn connect(state: &AppState, token: &str, feed: &'static str) -> Result<AuthenticatedUser, Response> {
    authenticate(&state.jwt_service, token).map_err(|e| {
        tracing::warn!(feed, "WS connection rejected: invalid token");
        reject(e)
    })
}

pub async fn pending_requests_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<PendingWsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match connect(&state, &query.token, "pending_requests") {
        Ok(user) => user,
        Err(response) => return response,
    };
    if user.role != Role::Mechanic {
        return reject((StatusCode::FORBIDDEN, "Only mechanics can watch pending requests".to_string()));
    }

    let view = query.view();
    if let Err(e) = view.sort_mode() {
        return e.into_response();
    }

    let subscription = match state.requests_usecase.subscribe_pending().await {
        Ok(subscription) => subscription,
        Err(e) => return e.into_response(),
    };

    tracing::info!(user_id = %user.user_id, "WS pending feed accepted, upgrading");
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        forward_pending(sender, receiver, subscription, view, user, state)
    })
}

pub async fn messages_ws(
    ws: WebSocketUpgrade,
    Path(request_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match connect(&state, &query.token, "messages") {
        Ok(user) => user,
        Err(response) => return response,
    };

    let subscription = match state
        .messages_usecase
        .subscribe(user.user_id, user.role, request_id)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => return e.into_response(),
    };

    tracing::info!(user_id = %user.user_id, %request_id, "WS message feed accepted, upgrading");
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        forward_snapshots(sender, receiver, subscription, "messages", user.user_id)
    })
}

pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match connect(&state, &query.token, "notifications") {
        Ok(user) => user,
        Err(response) => return response,
    };

    let subscription = match state.notifications_usecase.subscribe(user.user_id).await {
        Ok(subscription) => subscription,
        Err(e) => return e.into_response(),
    };

    tracing::info!(user_id = %user.user_id, "WS notification feed accepted, upgrading");
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        forward_snapshots(sender, receiver, subscription, "notifications", user.user_id)
    })
}

async fn send_frame<S, T>(sender: &mut S, frame: &Frame<T>) -> bool
where
    S: Sink<WsMessage> + Unpin,
    T: Serialize,
{
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WS frame");
            return true;
        }
    };
    sender.send(WsMessage::Text(payload.into())).await.is_ok()
}

fn error_frame<T>(feed: &'static str, error: &FeedError) -> Frame<T> {
    Frame::Error {
        feed,
        message: error.to_string(),
    }
}

const PENDING_FEED: &str = "pending_requests";

/// What a client text frame on the pending feed asks for.
#[derive(Debug)]
enum ViewUpdate {
    Apply(PendingQuery),
    Reject(String),
    Ignore,
}

fn parse_view_update(text: &str) -> ViewUpdate {
    match serde_json::from_str::<PendingQuery>(text) {
        Ok(update) => match update.sort_mode() {
            Ok(_) => ViewUpdate::Apply(update),
            Err(e) => ViewUpdate::Reject(e.to_string()),
        },
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed view update");
            ViewUpdate::Ignore
        }
    }
}

fn render_pending(snapshot: &[ServiceRequest], view: &PendingQuery, reference: Option<GeoPoint>) -> Frame<RequestResponse> {
    let mode = view.sort_mode().unwrap_or_default();
    let items = rank_requests(snapshot, mode, reference)
        .into_iter()
        .map(RequestResponse::from)
        .collect();
    Frame::Snapshot {
        feed: PENDING_FEED,
        items,
    }
}

/// Forwards every snapshot of `subscription` until the client goes away or the feed closes.
///
/// Only the newest undelivered frame is kept for a slow client.
async fn forward_snapshots<T, S, R, E>(
    mut sender: S,
    mut receiver: R,
    subscription: Subscription<T>,
    feed: &'static str,
    user_id: Uuid,
) where
    T: Clone + Serialize + Send + Sync + 'static,
    S: Sink<WsMessage> + Unpin,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    tracing::info!(feed, %user_id, "WS client connected");

    let (frames, mut latest) = watch::channel::<Option<Frame<T>>>(None);
    let frames = Arc::new(frames);
    let errors = frames.clone();
    let disposer = subscription.observe(
        move |snapshot| {
            frames.send_replace(Some(Frame::Snapshot {
                feed,
                items: snapshot.as_ref().clone(),
            }));
        },
        move |e| {
            errors.send_replace(Some(error_frame(feed, &e)));
        },
    );

    loop {
        tokio::select! {
            changed = latest.changed() => {
                if changed.is_err() {
                    tracing::info!(feed, %user_id, "feed closed");
                    break;
                }
                let frame = latest.borrow_and_update().clone();
                if let Some(frame) = frame {
                    if !send_frame(&mut sender, &frame).await {
                        tracing::info!(feed, %user_id, "WS send failed, client disconnected");
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!(feed, %user_id, "WS client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(feed, %user_id, error = %e, "WS receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    disposer.dispose();
}

/// Like [`forward_snapshots`], but re-ranks the latest snapshot whenever the client sends
/// a new sort mode or position as a JSON text frame.
async fn forward_pending<S, R, E>(
    mut sender: S,
    mut receiver: R,
    mut subscription: Subscription<ServiceRequest>,
    mut view: PendingQuery,
    user: AuthenticatedUser,
    state: Arc<AppState>,
) where
    S: Sink<WsMessage> + Unpin,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let mut latest: Option<Snapshot<ServiceRequest>> = None;
    tracing::info!(user_id = %user.user_id, "WS client connected to pending feed");

    let render = |snapshot: &Snapshot<ServiceRequest>, view: &PendingQuery| {
        let reference = state.requests_usecase.reference_point(view.position_fix());
        render_pending(snapshot, view, reference)
    };

    loop {
        let frame = tokio::select! {
            delivery = subscription.recv() => match delivery {
                Ok(snapshot) => {
                    let frame = render(&snapshot, &view);
                    latest = Some(snapshot);
                    frame
                }
                Err(e) => {
                    let closed = e == FeedError::Closed;
                    let frame: Frame<RequestResponse> = error_frame(PENDING_FEED, &e);
                    if !send_frame(&mut sender, &frame).await || closed {
                        break;
                    }
                    continue;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match parse_view_update(text.as_str()) {
                    ViewUpdate::Apply(update) => {
                        view = update;
                        match &latest {
                            Some(snapshot) => render(snapshot, &view),
                            None => continue,
                        }
                    }
                    ViewUpdate::Reject(message) => Frame::Error {
                        feed: PENDING_FEED,
                        message,
                    },
                    ViewUpdate::Ignore => continue,
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!(user_id = %user.user_id, "WS client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user.user_id, error = %e, "WS receive error");
                    break;
                }
                Some(Ok(_)) => continue,
            },
        };

        if !send_frame(&mut sender, &frame).await {
            tracing::info!(user_id = %user.user_id, "WS send failed, client disconnected");
            break;
        }
    }

    subscription.dispose();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use futures::channel::mpsc;

    use super::*;
    use crate::domain::request::{Location, RequestStatus, sample_request};
    use crate::usecase::feed::Feed;

    #[test]
    fn test_frame_shapes() {
        let snapshot: Frame<u32> = Frame::Snapshot { feed: "messages", items: vec![1, 2] };
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::json!({ "type": "snapshot", "feed": "messages", "items": [1, 2] })
        );

        let error: Frame<u32> = error_frame("notifications", &FeedError::Source("db down".to_string()));
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "feed source failed: db down");
    }

    fn pending_at(lat: f64, lng: f64, age_secs: i64) -> ServiceRequest {
        let mut request = sample_request(RequestStatus::Pending, None);
        request.location = Location { lat, lng, address: None };
        request.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
        request
    }

    fn frame_ids(frame: &Frame<RequestResponse>) -> Vec<Uuid> {
        match frame {
            Frame::Snapshot { items, .. } => items.iter().map(|r| r.request.id).collect(),
            Frame::Error { message, .. } => panic!("unexpected error frame: {message}"),
        }
    }

    #[test]
    fn test_view_update_reranks_snapshot() {
        let far = pending_at(0.0, 2.0, 10);
        let near = pending_at(0.0, 1.0, 600);
        let snapshot = vec![far.clone(), near.clone()];

        let recent = PendingQuery::default();
        assert_eq!(frame_ids(&render_pending(&snapshot, &recent, None)), vec![far.id, near.id]);

        let ViewUpdate::Apply(nearest) = parse_view_update(r#"{"sort":"nearest","lat":0.0,"lng":0.0}"#) else {
            panic!("expected the view update to apply");
        };
        let reference = nearest.position_fix().map(|fix| fix.point);
        let frame = render_pending(&snapshot, &nearest, reference);

        assert_eq!(frame_ids(&frame), vec![near.id, far.id]);
        let Frame::Snapshot { items, .. } = frame else { unreachable!() };
        assert!((items[0].distance_miles.unwrap() - 69.09).abs() < 0.1);
    }

    #[test]
    fn test_view_update_rejects_unknown_sort_and_ignores_garbage() {
        assert!(matches!(parse_view_update(r#"{"sort":"closest"}"#), ViewUpdate::Reject(_)));
        assert!(matches!(parse_view_update("not json"), ViewUpdate::Ignore));
    }

    #[tokio::test]
    async fn test_client_disconnect_disposes_subscription() {
        let feed: Feed<u8, u32> = Feed::new("test", 8);
        let subscription = feed
            .subscribe(1, || async { Ok::<_, String>(vec![1, 2]) })
            .await
            .unwrap();

        let (outgoing, mut delivered) = mpsc::unbounded::<WsMessage>();
        let (client, incoming) = mpsc::unbounded::<Result<WsMessage, axum::Error>>();
        let session = tokio::spawn(forward_snapshots(outgoing, incoming, subscription, "test", Uuid::new_v4()));

        let Some(WsMessage::Text(text)) = delivered.next().await else {
            panic!("expected the initial snapshot as a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["items"], serde_json::json!([1, 2]));
        assert_eq!(feed.subscriber_count(&1), 1);

        drop(client);
        session.await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.subscriber_count(&1) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription should be released after the client leaves");
    }

    #[tokio::test]
    async fn test_closed_feed_ends_session_with_error_frame() {
        let feed: Feed<u8, u32> = Feed::new("test", 8);
        let subscription = feed.subscribe(1, || async { Ok::<_, String>(vec![]) }).await.unwrap();

        let (outgoing, mut delivered) = mpsc::unbounded::<WsMessage>();
        let (_client, incoming) = mpsc::unbounded::<Result<WsMessage, axum::Error>>();
        let session = tokio::spawn(forward_snapshots(outgoing, incoming, subscription, "test", Uuid::new_v4()));

        assert!(delivered.next().await.is_some());
        drop(feed);

        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .expect("session should end when the feed closes")
            .unwrap();

        let mut last = None;
        while let Some(message) = delivered.next().await {
            last = Some(message);
        }
        let Some(WsMessage::Text(text)) = last else {
            panic!("expected a final error frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "feed closed");
    }
}
