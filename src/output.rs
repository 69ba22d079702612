//! Output types: the prescription record, enhancement trace, and run report.
//!
//! [`PrescriptionRecord`] is the fixed-schema result of one run. The parser
//! guarantees that every scalar field and the medication list are present;
//! the export helpers here serialise it verbatim (JSON) or as a three-column
//! medication table (CSV).

use crate::error::{ExtractionFailure, MediscriptError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Value inserted for a scalar field the model omitted entirely.
pub const MISSING_FIELD: &str = "N/A";

/// The eight free-text keys of a record, in schema order.
pub const SCALAR_FIELDS: [&str; 8] = [
    "patient_name",
    "date",
    "address",
    "doctor_name",
    "diagnosis",
    "history_symptoms",
    "remarks",
    "refill",
];

/// Key of the medication list.
pub const MEDICATIONS_FIELD: &str = "medications";

/// Header row of the medication CSV export.
pub const CSV_HEADER: [&str; 3] = ["Medicine Name", "Dosage", "Frequency"];

// ── Prescription record ──────────────────────────────────────────────────

/// One medication line of a prescription.
///
/// Fields stay `None` when the model left them out; render-time helpers
/// substitute an empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Keys the model added beyond the schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MedicationEntry {
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn dosage_or_empty(&self) -> &str {
        self.dosage.as_deref().unwrap_or("")
    }

    pub fn frequency_or_empty(&self) -> &str {
        self.frequency.as_deref().unwrap_or("")
    }
}

/// Structured result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub patient_name: String,
    pub date: String,
    pub address: String,
    pub doctor_name: String,
    pub diagnosis: String,
    pub history_symptoms: String,
    pub medications: Vec<MedicationEntry>,
    pub refill: String,
    pub remarks: String,
    /// Top-level keys the model added beyond the schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PrescriptionRecord {
    /// A record where every scalar is [`MISSING_FIELD`] and no medications
    /// are listed. This is what the parser yields for `{}`.
    fn default() -> Self {
        let na = || MISSING_FIELD.to_string();
        Self {
            patient_name: na(),
            date: na(),
            address: na(),
            doctor_name: na(),
            diagnosis: na(),
            history_symptoms: na(),
            medications: Vec::new(),
            refill: na(),
            remarks: na(),
            extra: Map::new(),
        }
    }
}

impl PrescriptionRecord {
    /// Look up a scalar field by its schema key.
    pub fn field(&self, key: &str) -> Option<&str> {
        let v = match key {
            "patient_name" => &self.patient_name,
            "date" => &self.date,
            "address" => &self.address,
            "doctor_name" => &self.doctor_name,
            "diagnosis" => &self.diagnosis,
            "history_symptoms" => &self.history_symptoms,
            "remarks" => &self.remarks,
            "refill" => &self.refill,
            _ => return None,
        };
        Some(v)
    }

    pub(crate) fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        let v = match key {
            "patient_name" => &mut self.patient_name,
            "date" => &mut self.date,
            "address" => &mut self.address,
            "doctor_name" => &mut self.doctor_name,
            "diagnosis" => &mut self.diagnosis,
            "history_symptoms" => &mut self.history_symptoms,
            "remarks" => &mut self.remarks,
            "refill" => &mut self.refill,
            _ => return None,
        };
        Some(v)
    }

    /// Serialise the full record with 2-space indentation.
    pub fn to_json_pretty(&self) -> Result<String, MediscriptError> {
        serde_json::to_string_pretty(self).map_err(|e| MediscriptError::ExportFailed(e.to_string()))
    }

    /// Serialise the medication list as UTF-8 CSV with the
    /// `Medicine Name,Dosage,Frequency` header.
    ///
    /// `duration` and any extra keys are not exported.
    pub fn medications_csv(&self) -> Result<Vec<u8>, MediscriptError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| MediscriptError::ExportFailed(e.to_string()))?;
        for med in &self.medications {
            writer
                .write_record([med.name_or_empty(), med.dosage_or_empty(), med.frequency_or_empty()])
                .map_err(|e| MediscriptError::ExportFailed(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| MediscriptError::ExportFailed(e.to_string()))
    }
}

// ── Enhancement trace ────────────────────────────────────────────────────

/// A step of the enhancement pipeline, in its fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Original,
    Resized,
    Grayscale,
    Thresholded,
    Denoised,
    EdgeEnhanced,
    ContrastEnhanced,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Original,
        Stage::Resized,
        Stage::Grayscale,
        Stage::Thresholded,
        Stage::Denoised,
        Stage::EdgeEnhanced,
        Stage::ContrastEnhanced,
    ];

    /// Display title of the stage.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Original => "Original Image",
            Stage::Resized => "Resized Image",
            Stage::Grayscale => "Grayscale Conversion",
            Stage::Thresholded => "Adaptive Thresholding",
            Stage::Denoised => "Noise Reduction",
            Stage::EdgeEnhanced => "Edge Enhancement",
            Stage::ContrastEnhanced => "Contrast Enhancement (Final)",
        }
    }

    fn slug(self) -> &'static str {
        match self {
            Stage::Original => "original",
            Stage::Resized => "resized",
            Stage::Grayscale => "grayscale",
            Stage::Thresholded => "threshold",
            Stage::Denoised => "denoised",
            Stage::EdgeEnhanced => "edges",
            Stage::ContrastEnhanced => "final",
        }
    }

    /// Zero-based position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// One captured stage of a traced enhancement run.
#[derive(Debug, Clone)]
pub struct EnhancementStage {
    pub stage: Stage,
    pub image: DynamicImage,
}

impl EnhancementStage {
    pub fn title(&self) -> &'static str {
        self.stage.title()
    }

    /// File stem for saving the stage, e.g. `03-threshold`.
    pub fn file_stem(&self) -> String {
        format!("{:02}-{}", self.stage.index(), self.stage.slug())
    }
}

// ── Run report ───────────────────────────────────────────────────────────

/// Timing and size statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub original_width: u32,
    pub original_height: u32,
    pub enhanced_width: u32,
    pub enhanced_height: u32,
    pub decode_duration_ms: u64,
    pub enhance_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    /// The input path or URL as given.
    pub source: String,
    /// Final-stage image that was sent to the service.
    pub enhanced: DynamicImage,
    /// Captured stages when tracing was requested.
    pub stages: Option<Vec<EnhancementStage>>,
    /// A record, or the reason there is none.
    pub outcome: Result<PrescriptionRecord, ExtractionFailure>,
    pub stats: RunStats,
}

impl ExtractionReport {
    pub fn record(&self) -> Option<&PrescriptionRecord> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&ExtractionFailure> {
        self.outcome.as_ref().err()
    }
}
