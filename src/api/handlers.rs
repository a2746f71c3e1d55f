use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use ulid::Ulid;

use super::views::*;
use super::{parse_id, requester_from_headers, ApiError, SharedState};
use crate::engine::{CancelTarget, EngineError, ReserveRequest};
use crate::engine::RemovalOutcome;
use crate::model::{BuildingUpdate, FloorLayout, NewBuilding, Ownership};
use crate::notifier;
use crate::timefmt;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(b)| b)
        .map_err(|e| ApiError::MalformedBody(e.body_text()))
}

/// For routes whose body may be left out entirely. A body that is present
/// must still parse.
fn optional_body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(b)) => Ok(b),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(e) => Err(ApiError::MalformedBody(e.body_text())),
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Blank strings count as absent; anything else must be RFC 3339.
fn parse_time(raw: Option<String>) -> ApiResult<Option<i64>> {
    match raw.filter(|s| !s.trim().is_empty()) {
        None => Ok(None),
        Some(s) => timefmt::parse_rfc3339(&s)
            .map(Some)
            .map_err(|e| EngineError::InvalidTimestamp(e.to_string()).into()),
    }
}

// ── Buildings ────────────────────────────────────────────

pub async fn list_buildings(
    State(state): State<SharedState>,
    Query(filter): Query<BuildingFilter>,
) -> Json<Vec<BuildingView>> {
    let buildings = if filter.bought == Some(true) {
        state.engine.bought_buildings().await
    } else {
        state.engine.list_buildings().await
    };
    Json(buildings.iter().map(Into::into).collect())
}

pub async fn get_building(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BuildingView>> {
    let b = state.engine.get_building(parse_id(&id)?).await?;
    Ok(Json((&b).into()))
}

pub async fn create_building(
    State(state): State<SharedState>,
    payload: Result<Json<CreateBuildingBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BuildingView>)> {
    let req = body(payload)?;
    let mut missing = Vec::new();
    let name = req.name.filter(|s| !s.trim().is_empty());
    let address = req.address.filter(|s| !s.trim().is_empty());
    if name.is_none() {
        missing.push("name");
    }
    if address.is_none() {
        missing.push("address");
    }
    if req.floors.is_empty() {
        missing.push("floors");
    }
    let (Some(name), Some(address)) = (name, address) else {
        return Err(EngineError::MissingFields(missing).into());
    };
    if !missing.is_empty() {
        return Err(EngineError::MissingFields(missing).into());
    }

    let id = req.id.unwrap_or_else(Ulid::new);
    let new = NewBuilding {
        name,
        address,
        description: req.description,
        price: req.price,
        floors: req
            .floors
            .into_iter()
            .map(|f| FloorLayout {
                number: f.floor_number,
                slots: f.slots,
            })
            .collect(),
    };
    let b = state.engine.create_building(id, new).await?;
    Ok((StatusCode::CREATED, Json((&b).into())))
}

pub async fn update_building(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBuildingBody>, JsonRejection>,
) -> ApiResult<Json<BuildingView>> {
    let id = parse_id(&id)?;
    let req = body(payload)?;
    let update = BuildingUpdate {
        name: non_blank(req.name),
        address: non_blank(req.address),
        description: req.description,
        price: req.price,
    };
    let b = state.engine.update_building(id, update).await?;
    Ok(Json((&b).into()))
}

/// Tell every customer whose booking went away with a floor or slot.
async fn notify_removed(state: &SharedState, out: &RemovalOutcome, reason: &str) {
    let notices: Vec<_> = out
        .cancelled
        .iter()
        .flat_map(|c| notifier::reservation_cancelled(&out.building, c, Some(reason)))
        .collect();
    notifier::deliver_all(state.notifier.as_ref(), &notices).await;
}

pub async fn delete_floor(
    State(state): State<SharedState>,
    Path((id, floor)): Path<(String, u32)>,
) -> ApiResult<Json<RemovalResponse>> {
    let out = state.engine.delete_floor(parse_id(&id)?, floor).await?;
    notify_removed(&state, &out, "the floor was removed from the building").await;
    Ok(Json(RemovalResponse {
        building: (&out.building).into(),
        cancelled: out.cancelled.iter().map(Into::into).collect(),
    }))
}

pub async fn delete_slot(
    State(state): State<SharedState>,
    Path((id, floor, slot)): Path<(String, u32, u32)>,
) -> ApiResult<Json<RemovalResponse>> {
    let out = state.engine.delete_slot(parse_id(&id)?, floor, slot).await?;
    notify_removed(&state, &out, "the slot was removed from the building").await;
    Ok(Json(RemovalResponse {
        building: (&out.building).into(),
        cancelled: out.cancelled.iter().map(Into::into).collect(),
    }))
}

pub async fn delete_building(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.delete_building(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn buy_building(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<BuyBody>, JsonRejection>,
) -> ApiResult<Json<BuildingView>> {
    let id = parse_id(&id)?;
    let who = requester_from_headers(&headers)?;
    let req = optional_body(payload)?;
    let owner = Ownership {
        user_id: who.user_id,
        user_name: who.name,
        provider_name: req.provider_name,
        provider_email: req.provider_email.or(who.email),
        phone_number: req.phone_number,
    };
    let b = state.engine.buy_building(id, owner, req.price).await?;
    Ok(Json((&b).into()))
}

pub async fn buy_floor(
    State(state): State<SharedState>,
    Path((id, floor)): Path<(String, u32)>,
    headers: HeaderMap,
) -> ApiResult<Json<BuildingView>> {
    let id = parse_id(&id)?;
    requester_from_headers(&headers)?;
    let b = state.engine.buy_floor(id, floor).await?;
    Ok(Json((&b).into()))
}

pub async fn leave_building(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<LeaveBody>, JsonRejection>,
) -> ApiResult<Json<LeaveResponse>> {
    let id = parse_id(&id)?;
    let who = requester_from_headers(&headers)?;
    let reason = non_blank(optional_body(payload)?.leave_reason);
    let out = state.engine.leave_building(id, reason.clone(), &who).await?;

    let provider_email = out
        .previous_owner
        .provider_email
        .as_deref()
        .or(who.email.as_deref());
    let notices =
        notifier::building_left(&out.building, &out.cancelled, reason.as_deref(), provider_email);
    notifier::deliver_all(state.notifier.as_ref(), &notices).await;

    Ok(Json(LeaveResponse {
        building: (&out.building).into(),
        cancelled: out.cancelled.iter().map(Into::into).collect(),
    }))
}

pub async fn building_profit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProfitView>> {
    let id = parse_id(&id)?;
    let profit = state.engine.building_profit(id).await?;
    Ok(Json(ProfitView {
        building_id: id,
        profit,
    }))
}

/// Live feed of a building's committed events. Ends when the building is deleted.
pub async fn building_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let id = parse_id(&id)?;
    // Subscribe before the existence check so no event slips between them.
    let rx = state.engine.notify.subscribe(id);
    if let Err(e) = state.engine.get_building(id).await {
        state.engine.notify.remove(&id);
        return Err(e.into());
    }

    let feed = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let entry = FeedEntry::from(&event);
                    let data = serde_json::to_string(&entry).unwrap_or_default();
                    let sse = SseEvent::default().event(entry.event).data(data);
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(n)) => warn!("event feed lagged, skipped {n} events"),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(feed).keep_alive(KeepAlive::default()))
}

// ── Reservations ─────────────────────────────────────────

pub async fn reserve_slot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ReserveBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReserveResponse>)> {
    let id = parse_id(&id)?;
    let who = requester_from_headers(&headers)?;
    let req = body(payload)?;
    let request = ReserveRequest {
        floor: req.floor_number,
        slot: req.slot_number,
        start: parse_time(req.reservation_start_time)?,
        end: parse_time(req.reservation_end_time)?,
        vehicle_type: req.vehicle_type,
        price: req.price,
    };
    let floor = request.floor;
    let slot = request.slot;
    let out = state.engine.reserve_slot(id, request, &who).await?;

    if let (Some(floor), Some(slot)) = (floor, slot) {
        let notices = notifier::reservation_confirmed(&out.building, floor, slot, &out.reservation);
        notifier::deliver_all(state.notifier.as_ref(), &notices).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(ReserveResponse {
            building: (&out.building).into(),
            reservation: (&out.reservation).into(),
        }),
    ))
}

pub async fn cancel_reservation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_id(&id)?;
    let who = requester_from_headers(&headers)?;
    let req = body(payload)?;

    let target = match (req.reservation_id.as_deref(), req.reservation_index) {
        (Some(raw), _) => Some(CancelTarget::Id(parse_id(raw)?)),
        (None, Some(index)) => Some(CancelTarget::Index(index)),
        (None, None) => None,
    };
    let mut missing = Vec::new();
    if req.floor_number.is_none() {
        missing.push("floorNumber");
    }
    if req.slot_number.is_none() {
        missing.push("slotNumber");
    }
    if target.is_none() {
        missing.push("reservationIndex");
    }
    let (Some(floor), Some(slot), Some(target)) = (req.floor_number, req.slot_number, target)
    else {
        return Err(EngineError::MissingFields(missing).into());
    };

    let out = state
        .engine
        .cancel_reservation(id, floor, slot, target, &who)
        .await?;
    let notices = notifier::reservation_cancelled(&out.building, &out.cancelled, req.reason.as_deref());
    notifier::deliver_all(state.notifier.as_ref(), &notices).await;

    Ok(Json(CancelResponse {
        building: (&out.building).into(),
        cancelled: (&out.cancelled).into(),
    }))
}

pub async fn cancel_reservation_by_id(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ProviderCancelBody>, JsonRejection>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_id(&id)?;
    let who = requester_from_headers(&headers)?;
    let reason = non_blank(optional_body(payload)?.cancel_reason);
    let out = state.engine.cancel_reservation_by_id(id, &who).await?;
    let notices = notifier::reservation_cancelled(&out.building, &out.cancelled, reason.as_deref());
    notifier::deliver_all(state.notifier.as_ref(), &notices).await;

    Ok(Json(CancelResponse {
        building: (&out.building).into(),
        cancelled: (&out.cancelled).into(),
    }))
}

pub async fn slots_overview(State(state): State<SharedState>) -> Json<Vec<SlotSummaryView>> {
    let slots = state.engine.slots_overview().await;
    Json(slots.iter().map(Into::into).collect())
}

pub async fn user_reservations(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Json<Vec<UserReservationView>> {
    let found = state.engine.reservations_for_user(&user_id).await;
    Json(found.iter().map(Into::into).collect())
}
