//! Extraction prompt sent alongside the enhanced prescription image.
//!
//! The prompt is versioned: any wording change that could alter what the
//! model returns bumps [`EXTRACTION_PROMPT_VERSION`], so logged runs can be
//! traced back to the exact instructions they used.
//!
//! Callers can override the default via [`crate::config::ExtractionConfig::prompt`].

/// Version tag of [`EXTRACTION_PROMPT`].
pub const EXTRACTION_PROMPT_VERSION: &str = "rx-extract/1";

/// Default instruction text for prescription extraction.
///
/// The JSON skeleton at the end is the schema the response parser expects;
/// keep its keys in sync with [`crate::output::SCALAR_FIELDS`].
pub const EXTRACTION_PROMPT: &str = r#"Extract the following information from this medical prescription image with maximum precision:

1. Patient name (first and last name)
2. Date (format as MM/DD/YY)
3. Address (city, state if visible)
4. Doctor's name
5. Diagnosis
6. History or Symptoms
7. Medications with dosage, frequency, and duration
8. Refill information
9. Remarks or additional notes if present

Important notes:
- Maintain original spelling
- Return JSON only in this format:

{
  "patient_name": "Full Name",
  "date": "MM/DD/YY",
  "address": "Complete address as shown",
  "doctor_name": "Doctor's Full Name",
  "diagnosis": "Diagnosis details",
  "history_symptoms": "History or symptoms noted",
  "medications": [
    {
      "name": "Medication name",
      "dosage": "Dosage amount",
      "frequency": "Directions for use",
      "duration": "Duration if specified"
    }
  ],
  "refill": "Refill information if present",
  "remarks": "Additional remarks or notes"
}"#;
