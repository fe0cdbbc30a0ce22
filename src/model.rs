//! AX4 Archive - Record Graph
//!
//! Typed survey records as they appear in `survey.json`. Field names on the
//! wire are camelCase and enum values match the survey forms exactly.
//! Keys this crate does not know, written by newer app versions, are dropped.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurveyType {
    #[serde(rename = "Pre-Sale")]
    PreSale,
    Demolition,
    #[serde(rename = "Re-Inspection")]
    ReInspection,
    Workplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "AMPR")]
    Ampr,
    #[serde(rename = "AMPRU")]
    Ampru,
    #[serde(rename = "ARRA")]
    Arra,
    #[serde(rename = "ARRAU")]
    Arrau,
    #[serde(rename = "HSMR")]
    Hsmr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalInternal {
    External,
    Internal,
    #[serde(rename = "Not Specified")]
    NotSpecified,
    #[serde(rename = "")]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleStatus {
    Sample,
    #[serde(rename = "Similar to Sample")]
    SimilarToSample,
    #[serde(rename = "Not Sampled")]
    NotSampled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementUnit {
    #[serde(rename = "m2")]
    SquareMeters,
    #[serde(rename = "pieces")]
    Pieces,
    #[serde(rename = "lineal meters")]
    LinealMeters,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "")]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Good,
    Medium,
    Poor,
    #[serde(rename = "")]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessibility {
    Accessible,
    #[serde(rename = "Limited Access")]
    LimitedAccess,
    #[serde(rename = "Generally Inaccessible")]
    GenerallyInaccessible,
    #[serde(rename = "")]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════

/// Survey header: job, site and client details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub survey_id: String,
    pub job_id: String,
    pub site_name: String,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_contact_phone: Option<String>,
    pub survey_type: SurveyType,
    pub document_type: DocumentType,
    pub surveyor: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub survey_id: String,
    pub room_name: String,
    pub created_at: DateTime<Utc>,
}

/// One assessed item; the assessment fields are carried through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: String,
    pub survey_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub reference_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_reference: Option<String>,
    pub building_area: String,
    pub external_internal: ExternalInternal,
    pub location1: String,
    pub location2: String,
    pub item_use: String,
    pub material_type: String,
    #[serde(default)]
    pub asbestos_types: Vec<String>,
    pub sample_status: SampleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<MeasurementUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diameter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thickness: Option<f64>,
    pub painted: Option<bool>,
    pub friable: Option<bool>,
    pub condition: Condition,
    pub accessibility: Accessibility,
    pub warning_labels_visible: Option<bool>,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_labels_affixed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_ids: Vec<String>,
    /// Legacy photo list; may hold photo IDs or inline `data:` URLs
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_references: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Photo IDs this item points at, legacy entries included, first occurrence wins
    pub fn referenced_photo_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.photo_ids
            .iter()
            .chain(self.photos.iter().filter(|p| !p.starts_with("data:")))
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// The record document stored as `survey.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyData {
    pub survey: Survey,
    pub rooms: Vec<Room>,
    pub items: Vec<Item>,
}

impl SurveyData {
    /// Unique photo IDs across all items, in first-reference order
    pub fn unique_photo_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .flat_map(Item::referenced_photo_ids)
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PHOTOS
// ═══════════════════════════════════════════════════════════════════════════

/// Raw photo content as held by the photo store
#[derive(Clone, PartialEq)]
pub struct PhotoBlob {
    pub photo_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for PhotoBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoBlob")
            .field("photo_id", &self.photo_id)
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
