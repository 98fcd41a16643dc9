//! HTTP/JSON control surface.
//!
//! A thin projection of the shadow plus write endpoints that drive the
//! sender and compare the device's echoed value.  Also serves the
//! vendor-compat endpoints the device firmware polls over plain HTTP.
//!
//! Writes return `{"message":"OK"}` when the echo matches the requested
//! value and `{"message":"ERROR"}` with status 500 on mismatch or timeout.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cseq::ReplyValue;
use crate::db::Db;
use crate::sender::Sender;
use crate::shadow::{SharedShadow, set_msg_for_param, unix_now};
use crate::weather::Weather;

/// How long a write endpoint waits for the device's echo.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Rooms drop out of the room listing after this many seconds of silence.
const ROOM_STALE_SECS: u32 = 600;

const FIRMWARE_VERSION_LINE: &str =
    "1+0654918011102+http://www.besmart-home.com/fwUpgrade/PR06549/0654918011102.bin";

pub struct AppState {
    pub shadow: SharedShadow,
    pub sender: Sender,
    pub db: Db,
    pub weather: Weather,
    pub reply_timeout: Duration,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/v1.0/peers", get(get_peers))
        .route("/api/v1.0/devices", get(get_devices))
        .route("/api/v1.0/devices/{deviceid}", get(get_device))
        .route("/api/v1.0/devices/{deviceid}/rooms", get(get_rooms))
        .route("/api/v1.0/devices/{deviceid}/rooms/{roomid}", get(get_room))
        .route(
            "/api/v1.0/devices/{deviceid}/rooms/{roomid}/days",
            get(get_days).put(put_days),
        )
        .route(
            "/api/v1.0/devices/{deviceid}/rooms/{roomid}/days/{dayid}",
            get(get_day).put(put_day),
        )
        .route(
            "/api/v1.0/devices/{deviceid}/rooms/{roomid}/history",
            get(get_room_history),
        )
        .route(
            "/api/v1.0/devices/{deviceid}/rooms/{roomid}/{param}",
            get(get_room_param).put(put_room_param),
        )
        .route(
            "/api/v1.0/devices/{deviceid}/time",
            get(get_time).put(put_time),
        )
        .route(
            "/api/v1.0/devices/{deviceid}/outsidetemp",
            put(put_outside_temp),
        )
        .route("/api/v1.0/weather", get(get_weather))
        .route("/api/v1.0/weather/history", get(get_weather_history))
        .route("/fwUpgrade/PR06549/version.txt", get(get_fw_version))
        .route(
            "/WifiBoxInterface_vokera/getWebTemperature.php",
            get(get_web_temperature),
        )
        .route(
            "/BeSMART_test_on_cloudwarm/v1/api/gateway/boilers/records",
            post(post_boiler_records),
        )
        .with_state(state)
}

fn message(status: StatusCode, text: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": text })))
}

fn ok() -> (StatusCode, Json<Value>) {
    message(StatusCode::OK, "OK")
}

fn error_500() -> (StatusCode, Json<Value>) {
    message(StatusCode::INTERNAL_SERVER_ERROR, "ERROR")
}

#[derive(Debug, Deserialize)]
struct HistoryRange {
    from: Option<String>,
    to: Option<String>,
}

// ---------------------------------------------------------------------------
// Shadow projection
// ---------------------------------------------------------------------------

async fn index() -> &'static str {
    "Web server is running"
}

async fn get_peers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    Json(shadow.peers.clone())
}

async fn get_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    Json(shadow.devices.keys().copied().collect::<Vec<u32>>())
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<u32>,
) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    match shadow.devices.get(&deviceid) {
        Some(device) => match serde_json::to_value(device) {
            Ok(value) => Json(value).into_response(),
            Err(_) => error_500().into_response(),
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_rooms(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<u32>,
) -> impl IntoResponse {
    let now = unix_now();
    let shadow = state.shadow.lock().await;
    match shadow.devices.get(&deviceid) {
        Some(device) => {
            let rooms: Vec<u32> = device
                .rooms
                .iter()
                .filter(|(_, room)| now.saturating_sub(room.lastseen) <= ROOM_STALE_SECS)
                .map(|(id, _)| *id)
                .collect();
            Json(rooms).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid)): Path<(u32, u32)>,
) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    match shadow
        .devices
        .get(&deviceid)
        .and_then(|device| device.rooms.get(&roomid))
    {
        Some(room) => Json(serde_json::to_value(room).unwrap_or(Value::Null)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_room_param(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid, param)): Path<(u32, u32, String)>,
) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    match shadow
        .devices
        .get(&deviceid)
        .and_then(|device| device.rooms.get(&roomid))
        .and_then(|room| room.param(&param))
    {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

async fn put_room_param(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid, param)): Path<(u32, u32, String)>,
    Json(value): Json<i64>,
) -> impl IntoResponse {
    let Some(msg_type) = set_msg_for_param(&param) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state
        .sender
        .send_set(
            deviceid,
            roomid,
            msg_type,
            value as u32,
            false,
            true,
            Some(state.reply_timeout),
        )
        .await
    {
        Err(_) => StatusCode::NOT_FOUND.into_response(),
        Ok(Some(ReplyValue::Scalar(echoed))) if i64::from(echoed) == value => ok().into_response(),
        Ok(_) => error_500().into_response(),
    }
}

async fn get_days(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid)): Path<(u32, u32)>,
) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    match shadow
        .devices
        .get(&deviceid)
        .and_then(|device| device.rooms.get(&roomid))
    {
        Some(room) => Json(room.days.keys().copied().collect::<Vec<u16>>()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_day(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid, dayid)): Path<(u32, u32, u16)>,
) -> impl IntoResponse {
    let shadow = state.shadow.lock().await;
    match shadow
        .devices
        .get(&deviceid)
        .and_then(|device| device.rooms.get(&roomid))
        .and_then(|room| room.days.get(&dayid))
    {
        Some(hours) => Json(hours.to_vec()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_day(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid, dayid)): Path<(u32, u32, u16)>,
    Json(hours): Json<Vec<u8>>,
) -> impl IntoResponse {
    let hours: [u8; 24] = match hours.try_into() {
        Ok(hours) => hours,
        Err(_) => return message(StatusCode::BAD_REQUEST, "ERROR").into_response(),
    };
    store_and_send_program(&state, deviceid, roomid, dayid, hours).await
}

/// Replace several days of the weekly program at once; one PROGRAM
/// downlink per day.
async fn put_days(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid)): Path<(u32, u32)>,
    Json(days): Json<std::collections::BTreeMap<u16, Vec<u8>>>,
) -> impl IntoResponse {
    let mut parsed = Vec::with_capacity(days.len());
    for (dayid, hours) in days {
        let hours: [u8; 24] = match hours.try_into() {
            Ok(hours) => hours,
            Err(_) => return message(StatusCode::BAD_REQUEST, "ERROR").into_response(),
        };
        parsed.push((dayid, hours));
    }
    for (dayid, hours) in parsed {
        let response = store_and_send_program(&state, deviceid, roomid, dayid, hours).await;
        if response.status() != StatusCode::OK {
            return response;
        }
    }
    ok().into_response()
}

async fn store_and_send_program(
    state: &AppState,
    deviceid: u32,
    roomid: u32,
    dayid: u16,
    hours: [u8; 24],
) -> axum::response::Response {
    let Ok(addr) = state.sender.device_addr(deviceid).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    {
        let mut shadow = state.shadow.lock().await;
        if let Some(device) = shadow.devices.get_mut(&deviceid) {
            device
                .rooms
                .entry(roomid)
                .or_default()
                .days
                .insert(dayid, hours);
        }
    }
    state
        .sender
        .send_program(addr, deviceid, roomid, dayid, &hours, false, true)
        .await;
    ok().into_response()
}

async fn get_time(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<u32>,
) -> impl IntoResponse {
    match state
        .sender
        .send_device_time(deviceid, 0, false, false, Some(state.reply_timeout))
        .await
    {
        Err(_) => StatusCode::NOT_FOUND.into_response(),
        Ok(Some(ReplyValue::Scalar(value))) => Json(json!(value)).into_response(),
        Ok(_) => Json(Value::Null).into_response(),
    }
}

async fn put_time(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<u32>,
    Json(value): Json<i64>,
) -> impl IntoResponse {
    match state
        .sender
        .send_device_time(
            deviceid,
            value as u8,
            false,
            true,
            Some(state.reply_timeout),
        )
        .await
    {
        Err(_) => StatusCode::NOT_FOUND.into_response(),
        Ok(Some(ReplyValue::Scalar(echoed))) if i64::from(echoed) == value => ok().into_response(),
        Ok(_) => error_500().into_response(),
    }
}

async fn put_outside_temp(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<u32>,
    Json(value): Json<i64>,
) -> impl IntoResponse {
    match state
        .sender
        .send_outside_temp(
            deviceid,
            value as u8,
            false,
            true,
            Some(state.reply_timeout),
        )
        .await
    {
        Err(_) => StatusCode::NOT_FOUND.into_response(),
        Ok(Some(ReplyValue::Scalar(echoed))) if i64::from(echoed) == value => ok().into_response(),
        Ok(_) => error_500().into_response(),
    }
}

// ---------------------------------------------------------------------------
// History and weather
// ---------------------------------------------------------------------------

async fn get_room_history(
    State(state): State<Arc<AppState>>,
    Path((deviceid, roomid)): Path<(u32, u32)>,
    Query(range): Query<HistoryRange>,
) -> impl IntoResponse {
    let thermostat = format!("{deviceid}/{roomid}");
    match state.db.temperature(&thermostat, range.from, range.to) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "room history query failed");
            error_500().into_response()
        }
    }
}

async fn get_weather(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.weather.current().await {
        Ok(temp) => Json(json!({ "temp": temp })).into_response(),
        Err(e) => {
            warn!(error = %e, "weather lookup failed");
            error_500().into_response()
        }
    }
}

async fn get_weather_history(
    State(state): State<Arc<AppState>>,
    Query(range): Query<HistoryRange>,
) -> impl IntoResponse {
    match state.db.outside_temperature(range.from, range.to) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "weather history query failed");
            error_500().into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Vendor compat
// ---------------------------------------------------------------------------

async fn get_fw_version() -> &'static str {
    FIRMWARE_VERSION_LINE
}

async fn get_web_temperature(State(state): State<Arc<AppState>>) -> String {
    match state.weather.current().await {
        Ok(temp) => format!("{}", temp.round() as i64),
        Err(_) => "E_1".to_owned(),
    }
}

async fn post_boiler_records(Json(body): Json<Value>) -> StatusCode {
    // The real cloud stores these; we only acknowledge them.
    debug!(%body, "boiler record");
    StatusCode::OK
}
