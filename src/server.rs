//! ==============================================================================
//! server.rs - web interface
//! ==============================================================================
//!
//! endpoints:
//!     GET /            dashboard page; opens an EventSource on /events
//!     GET /data        current reading as json
//!     GET /events      text/event-stream of readings, one frame per refresh
//!     GET /api/status  mode, subscriber occupancy, last update, validity
//!
//! admission:
//!     /events takes a registry slot for as long as the connection lives.
//!     when every slot is taken the request is refused with 503 right away;
//!     the dashboard's EventSource retries on its own.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::convert::Infallible;
use tower_http::cors::CorsLayer;

use crate::context::{NodeStatus, SharedContext};
use crate::domain::{Reading, TEMPERATURE_FAULT, WATER_LEVEL_FAULT};

pub fn router(context: SharedContext) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/data", get(snapshot_handler))
        .route("/events", get(events_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(context)
}

pub async fn run_server(context: SharedContext, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Dashboard live at http://{}", bind);
    axum::serve(listener, router(context)).await?;
    Ok(())
}

/// json snapshot of the current reading
async fn snapshot_handler(State(context): State<SharedContext>) -> Response {
    let reading = context.lock().await.reading();
    json_reading(&reading)
}

fn json_reading(reading: &Reading) -> Response {
    match reading.to_json() {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            tracing::error!("failed to encode reading: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// push subscription
async fn events_handler(State(context): State<SharedContext>) -> Response {
    let admitted = context.lock().await.subscribe();
    let (slot, rx) = match admitted {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::warn!("refusing event stream: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    tracing::debug!(slot, "event stream opened");

    // the stream ends when the broadcaster drops the sender; a client hang-up
    // drops the receiver, which the next fan-out notices
    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

async fn status_handler(State(context): State<SharedContext>) -> Json<NodeStatus> {
    Json(context.lock().await.status())
}

async fn dashboard_handler(State(context): State<SharedContext>) -> Html<String> {
    let reading = context.lock().await.reading();
    Html(render_dashboard(&reading))
}

// sentinels render as "--" here and in the page script
fn show(value: f32, fault: Option<f32>) -> String {
    if Some(value) == fault {
        "--".to_string()
    } else {
        format!("{:.2}", value)
    }
}

fn render_dashboard(r: &Reading) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Water Quality Monitor</title>
<style>
    body {{ font-family: system-ui, Arial; margin: 20px; }}
    .data {{ margin: 10px 0; padding: 10px; background: #f0f0f0; border-radius: 8px; }}
</style>
<script>
    const fmt = (v, fault) => (v === fault ? '--' : v.toFixed(2));
    const events = new EventSource('/events');
    events.onmessage = (event) => {{
        const d = JSON.parse(event.data);
        document.getElementById('temperature').textContent = fmt(d.temperature, {t_fault}) + ' °C';
        document.getElementById('pH').textContent = fmt(d.pH);
        document.getElementById('turbidity').textContent = fmt(d.turbidity) + ' NTU';
        document.getElementById('waterLevel').textContent = fmt(d.waterLevel, {l_fault}) + ' cm';
        document.getElementById('lastUpdate').textContent = 'Last updated: ' + new Date().toLocaleTimeString();
    }};
</script>
</head>
<body>
<h1>Water Quality Monitoring System</h1>
<div class="data">
    <h2>Current Readings:</h2>
    <p>Temperature: <span id="temperature">{temperature} °C</span></p>
    <p>pH Level: <span id="pH">{ph}</span></p>
    <p>Turbidity: <span id="turbidity">{turbidity} NTU</span></p>
    <p>Water Level: <span id="waterLevel">{level} cm</span></p>
</div>
<p id="lastUpdate">Last updated: Just now</p>
<p><a href="/data">View Raw JSON Data</a></p>
</body>
</html>"#,
        t_fault = TEMPERATURE_FAULT,
        l_fault = WATER_LEVEL_FAULT,
        temperature = show(r.temperature, Some(TEMPERATURE_FAULT)),
        ph = show(r.ph, None),
        turbidity = show(r.turbidity, None),
        level = show(r.water_level, Some(WATER_LEVEL_FAULT)),
    )
}
