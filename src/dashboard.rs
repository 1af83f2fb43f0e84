use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DashboardConfig;
use crate::frame_source::ImageReference;
use crate::radar::RadarDot;
use crate::relay::{create_relay_router, Relay};
use crate::session::{Message, Notice, SessionHandle, SessionSnapshot};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

#[derive(Clone)]
struct DashboardState {
    session: SessionHandle,
    page: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    since: Option<Uuid>,
}

/// Browser view of a message. Audio is referenced, not inlined, so polls
/// stay small.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    id: Uuid,
    text: String,
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
    radar_dots: Vec<RadarDot>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            audio_url: message
                .audio_url
                .as_ref()
                .map(|_| format!("/api/messages/{}/audio", message.id)),
            id: message.id,
            text: message.text,
            time: message.time,
            radar_dots: message.radar_dots,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    messages: Vec<MessageView>,
    radar_dots: Vec<RadarDot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_frame: Option<String>,
    notices: Vec<Notice>,
}

impl From<SessionSnapshot> for SessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        // Inline frames are served separately; the seq makes each one a new URL
        let current_frame = snapshot.current_frame.map(|frame| match frame {
            ImageReference::Remote(url) => url,
            ImageReference::Inline { .. } => format!("/api/frame?seq={}", snapshot.frame_seq),
        });

        Self {
            messages: snapshot.messages.into_iter().map(MessageView::from).collect(),
            radar_dots: snapshot.radar_dots,
            current_frame,
            notices: snapshot.notices,
        }
    }
}

pub fn create_dashboard_router(session: SessionHandle, config: &DashboardConfig) -> Router {
    let state = DashboardState {
        session,
        page: DASHBOARD_HTML.replace("__REFRESH_MS__", &config.refresh_ms.to_string()),
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/api/session", get(session_handler))
        .route("/api/frame", get(frame_handler))
        .route("/api/messages/:id/audio", get(audio_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Dashboard plus an in-process relay under `/relay`.
pub fn create_standalone_router(session: SessionHandle, relay: Arc<Relay>, config: &DashboardConfig) -> Router {
    create_dashboard_router(session, config).nest("/relay", create_relay_router(relay))
}

async fn index_handler(State(state): State<DashboardState>) -> Html<String> {
    Html(state.page)
}

async fn session_handler(
    State(state): State<DashboardState>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionView> {
    let snapshot = state.session.snapshot_since(query.since);
    debug!("Session poll returning {} new message(s)", snapshot.messages.len());
    Json(snapshot.into())
}

async fn frame_handler(State(state): State<DashboardState>) -> Response {
    match state.session.current_frame() {
        Some(ImageReference::Remote(url)) => Redirect::temporary(&url).into_response(),
        Some(ImageReference::Inline { mime, data }) => match STANDARD.decode(data.as_bytes()) {
            Ok(bytes) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
            Err(e) => {
                warn!("Stored frame is not valid base64: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn audio_handler(State(state): State<DashboardState>, Path(id): Path<Uuid>) -> Response {
    match state.session.message_audio(id).as_deref().and_then(decode_data_url) {
        Some((mime, bytes)) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let (mime, data) = url.strip_prefix("data:")?.split_once(";base64,")?;
    let bytes = STANDARD.decode(data).ok()?;
    Some((mime.to_string(), bytes))
}

pub async fn start_dashboard_server(session: SessionHandle, config: &DashboardConfig) -> anyhow::Result<()> {
    let app = create_dashboard_router(session, config);

    info!("Starting dashboard on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::ObjectType;
    use crate::relay::AnalysisResult;

    #[test]
    fn data_urls_decode() {
        let (mime, bytes) = decode_data_url("data:audio/mpeg;base64,SUQz").unwrap();
        assert_eq!(mime, "audio/mpeg");
        assert_eq!(bytes, b"ID3");
        assert!(decode_data_url("https://a/b.mp3").is_none());
        assert!(decode_data_url("data:audio/mpeg;base64,***").is_none());
    }

    #[test]
    fn view_references_audio_and_inline_frames() {
        let session = SessionHandle::new();
        session.set_frame(ImageReference::Inline {
            mime: "image/jpeg".to_string(),
            data: "AAAA".to_string(),
        });
        let message = session.append_result(AnalysisResult {
            text: "clear".to_string(),
            audio: Some("data:audio/mpeg;base64,SUQz".to_string()),
            radar_dots: vec![RadarDot {
                x: 50.0,
                y: 25.0,
                size: 10.0,
                kind: ObjectType::SmallPlane,
                bounding_box: None,
            }],
        });

        let value = serde_json::to_value(SessionView::from(session.snapshot())).unwrap();
        assert_eq!(value["currentFrame"], "/api/frame?seq=1");
        assert_eq!(value["radarDots"][0]["type"], "SMALL_PLANE");
        assert_eq!(value["messages"][0]["text"], "clear");
        assert_eq!(
            value["messages"][0]["audioUrl"],
            format!("/api/messages/{}/audio", message.id)
        );
    }
}
