use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Raw reservation request as it arrives from a caller. Every field is
/// optional so absence can be reported as a rejection rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReserveRequest {
    pub floor: Option<u32>,
    pub slot: Option<u32>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub vehicle_type: Option<String>,
    pub price: Option<u64>,
}

/// A request that passed field and interval validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidReserve {
    pub floor: u32,
    pub slot: u32,
    pub span: Span,
    pub vehicle_type: String,
    pub price: Option<u64>,
}

/// Field presence and interval rules, checked in a fixed order so each
/// request gets exactly one, predictable rejection.
pub(crate) fn validate_request(req: ReserveRequest, now: Ms) -> Result<ValidReserve, EngineError> {
    let vehicle_type = req.vehicle_type.filter(|v| !v.trim().is_empty());

    let mut missing = Vec::new();
    if req.floor.is_none() {
        missing.push("floorNumber");
    }
    if req.slot.is_none() {
        missing.push("slotNumber");
    }
    if req.start.is_none() {
        missing.push("reservationStartTime");
    }
    if req.end.is_none() {
        missing.push("reservationEndTime");
    }
    if vehicle_type.is_none() {
        missing.push("vehicleType");
    }
    let (Some(floor), Some(slot), Some(start), Some(end), Some(vehicle_type)) =
        (req.floor, req.slot, req.start, req.end, vehicle_type)
    else {
        return Err(EngineError::MissingFields(missing));
    };

    if start == end {
        return Err(EngineError::DegenerateInterval);
    }
    if start < now {
        return Err(EngineError::StartInPast);
    }
    if end < start {
        return Err(EngineError::InvertedInterval);
    }
    if end - start < MIN_RESERVATION_MS {
        return Err(EngineError::TooShort);
    }

    let span = Span::new(start, end);
    validate_span(&span)?;
    if vehicle_type.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("vehicle type too long"));
    }

    Ok(ValidReserve {
        floor,
        slot,
        span,
        vehicle_type,
        price: req.price,
    })
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

pub(crate) fn check_no_overlap(slot: &Slot, span: &Span) -> Result<(), EngineError> {
    match slot.find_conflict(span) {
        Some(existing) => Err(EngineError::SlotOverlap {
            existing: existing.span,
        }),
        None => Ok(()),
    }
}

pub(crate) fn validate_layout(floors: &[FloorLayout]) -> Result<(), EngineError> {
    if floors.len() > MAX_FLOORS_PER_BUILDING {
        return Err(EngineError::LimitExceeded("too many floors"));
    }
    let mut floor_numbers: Vec<u32> = floors.iter().map(|f| f.number).collect();
    floor_numbers.sort_unstable();
    if let Some(w) = floor_numbers.windows(2).find(|w| w[0] == w[1]) {
        return Err(EngineError::InvalidLayout(format!(
            "duplicate floor number {}",
            w[0]
        )));
    }
    for floor in floors {
        if floor.slots.len() > MAX_SLOTS_PER_FLOOR {
            return Err(EngineError::LimitExceeded("too many slots on floor"));
        }
        let mut slots = floor.slots.clone();
        slots.sort_unstable();
        if let Some(w) = slots.windows(2).find(|w| w[0] == w[1]) {
            return Err(EngineError::InvalidLayout(format!(
                "duplicate slot number {} on floor {}",
                w[0], floor.number
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const NOW: Ms = 1_792_231_200_000; // 2026-10-17T10:00:00Z

    fn request(start: Ms, end: Ms) -> ReserveRequest {
        ReserveRequest {
            floor: Some(1),
            slot: Some(3),
            start: Some(start),
            end: Some(end),
            vehicle_type: Some("car".into()),
            price: None,
        }
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = validate_request(ReserveRequest::default(), NOW).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingFields(vec![
                "floorNumber",
                "slotNumber",
                "reservationStartTime",
                "reservationEndTime",
                "vehicleType",
            ])
        );
    }

    #[test]
    fn blank_vehicle_type_counts_as_missing() {
        let mut req = request(NOW + H, NOW + 2 * H);
        req.vehicle_type = Some("  ".into());
        assert_eq!(
            validate_request(req, NOW).unwrap_err(),
            EngineError::MissingFields(vec!["vehicleType"])
        );
    }

    #[test]
    fn degenerate_checked_before_past() {
        // start == end and in the past: degenerate wins.
        let err = validate_request(request(NOW - H, NOW - H), NOW).unwrap_err();
        assert_eq!(err, EngineError::DegenerateInterval);
    }

    #[test]
    fn past_checked_before_inverted() {
        let err = validate_request(request(NOW - H, NOW - 2 * H), NOW).unwrap_err();
        assert_eq!(err, EngineError::StartInPast);
    }

    #[test]
    fn inverted_interval_rejected() {
        let err = validate_request(request(NOW + 3 * H, NOW + H), NOW).unwrap_err();
        assert_eq!(err, EngineError::InvertedInterval);
    }

    #[test]
    fn under_an_hour_is_too_short() {
        let err = validate_request(request(NOW + H, NOW + H + 59 * 60_000), NOW).unwrap_err();
        assert_eq!(err, EngineError::TooShort);
        assert!(validate_request(request(NOW + H, NOW + 2 * H), NOW).is_ok());
    }

    #[test]
    fn start_exactly_now_is_allowed() {
        assert!(validate_request(request(NOW, NOW + H), NOW).is_ok());
    }

    #[test]
    fn out_of_range_timestamps_rejected() {
        let err = validate_request(request(NOW, NOW + 400 * 24 * H), NOW).unwrap_err();
        assert_eq!(err, EngineError::LimitExceeded("reservation too long"));
    }

    #[test]
    fn layout_rejects_duplicates() {
        let dup_floor = vec![
            FloorLayout { number: 1, slots: vec![1] },
            FloorLayout { number: 1, slots: vec![2] },
        ];
        assert!(matches!(
            validate_layout(&dup_floor),
            Err(EngineError::InvalidLayout(_))
        ));

        let dup_slot = vec![FloorLayout { number: 1, slots: vec![1, 2, 1] }];
        assert!(matches!(
            validate_layout(&dup_slot),
            Err(EngineError::InvalidLayout(_))
        ));

        let ok = vec![
            FloorLayout { number: 1, slots: vec![1, 2] },
            FloorLayout { number: 2, slots: vec![1, 2] },
        ];
        assert!(validate_layout(&ok).is_ok());
    }
}
