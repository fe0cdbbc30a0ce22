//! AX4 Archive - Record Document Validation
//!
//! Serde typing rejects structurally invalid JSON; the checks here cover the
//! relationships between records that typing alone cannot express.

use std::collections::HashSet;

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{Item, SurveyData};

/// Decode and validate a `survey.json` document
pub fn parse_document(bytes: &[u8]) -> ArchiveResult<SurveyData> {
    let data: SurveyData = serde_json::from_slice(bytes)
        .map_err(|e| ArchiveError::SchemaValidationFailure(e.to_string()))?;
    validate(&data)?;
    Ok(data)
}

/// Check identity and ownership rules of a record graph
pub fn validate(data: &SurveyData) -> ArchiveResult<()> {
    let survey_id = data.survey.survey_id.as_str();
    require_id("surveyId", survey_id)?;

    let mut room_ids = HashSet::new();
    for room in &data.rooms {
        require_id("roomId", &room.room_id)?;
        if room.survey_id != survey_id {
            return Err(invalid(format!(
                "room {} belongs to survey {}, not {}",
                room.room_id, room.survey_id, survey_id
            )));
        }
        if !room_ids.insert(room.room_id.as_str()) {
            return Err(invalid(format!("duplicate roomId {}", room.room_id)));
        }
    }

    let mut item_ids = HashSet::new();
    for item in &data.items {
        require_id("itemId", &item.item_id)?;
        if item.survey_id != survey_id {
            return Err(invalid(format!(
                "item {} belongs to survey {}, not {}",
                item.item_id, item.survey_id, survey_id
            )));
        }
        if !item_ids.insert(item.item_id.as_str()) {
            return Err(invalid(format!("duplicate itemId {}", item.item_id)));
        }
        if let Some(room_id) = &item.room_id {
            require_id("roomId", room_id)?;
        }
        for photo_id in item.referenced_photo_ids() {
            validate_photo_id(photo_id)
                .map_err(|reason| invalid(format!("item {}: {}", item.item_id, reason)))?;
        }
        validate_measurements(item)?;
    }

    Ok(())
}

/// Photo IDs become container entry names, so they must be plain path segments
pub fn validate_photo_id(photo_id: &str) -> Result<(), String> {
    if photo_id.trim().is_empty() {
        return Err("empty photo ID".into());
    }
    if photo_id.contains(['/', '\\']) || photo_id == "." || photo_id == ".." {
        return Err(format!("photo ID {:?} is not a plain name", photo_id));
    }
    Ok(())
}

fn validate_measurements(item: &Item) -> ArchiveResult<()> {
    let fields = [
        ("quantity", item.quantity),
        ("length", item.length),
        ("width", item.width),
        ("diameter", item.diameter),
        ("thickness", item.thickness),
    ];

    for (name, value) in fields {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(format!("item {}: invalid {} {}", item.item_id, name, v)));
            }
        }
    }
    Ok(())
}

fn require_id(field: &str, value: &str) -> ArchiveResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn invalid(reason: String) -> ArchiveError {
    ArchiveError::SchemaValidationFailure(reason)
}
