use crate::domain::model::{PatientProfile, ToolReply};
use serde_json::{Map, Value};

/// `predict_icd_code` tool body.
///
/// No model is wired in yet: the profile is validated and acknowledged so that
/// clients can already integrate against the final request shape.
pub fn predict_icd_code(patient_profile: &Map<String, Value>) -> ToolReply {
    tracing::info!("Received prediction request for profile: {:?}", patient_profile);

    let profile: PatientProfile =
        match serde_json::from_value(Value::Object(patient_profile.clone())) {
            Ok(profile) => profile,
            Err(e) => {
                return ToolReply::error(format!("Error: invalid patient_profile: {}", e));
            }
        };
    tracing::debug!(
        age = profile.age,
        gender = %profile.gender,
        vitals = profile.vital_signs.len(),
        labs = profile.lab_results.len(),
        "Validated patient profile"
    );

    let keys: Vec<String> = patient_profile
        .keys()
        .map(|k| format!("'{}'", k))
        .collect();
    ToolReply::ok(format!(
        "Prediction endpoint received request. \
         Actual prediction requires a trained ML model and complex feature engineering pipeline using BigQuery. \
         Received profile keys: [{}]",
        keys.join(", ")
    ))
}
