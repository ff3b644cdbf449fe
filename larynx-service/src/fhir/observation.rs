//! Packaging analysis results as a FHIR `Observation`.

use serde::Serialize;

use crate::analysis::AnalysisResult;
use crate::service::ExamMetadata;

const OBSERVATION_CATEGORY_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";
const OBSERVATION_CODE_TEXT: &str = "AI-assisted laryngeal image parameter analysis";
const DEMO_UNIT: &str = "demo-unit";

/// FHIR R4 `Observation` resource, ready to serialize
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation<'a> {
    resource_type: &'static str,
    status: &'static str,
    category: Vec<CodeableConcept<'a>>,
    code: CodeableConcept<'a>,
    subject: Reference,
    effective_date_time: &'a str,
    derived_from: Vec<Reference>,
    component: Vec<Component<'a>>,
}

#[derive(Debug, Serialize)]
struct CodeableConcept<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    coding: Vec<Coding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Coding {
    system: &'static str,
    code: &'static str,
    display: &'static str,
}

#[derive(Debug, Serialize)]
struct Reference {
    reference: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Component<'a> {
    code: CodeableConcept<'a>,
    value_quantity: Quantity,
}

#[derive(Debug, Serialize)]
struct Quantity {
    value: f64,
    unit: &'static str,
}

/// Build the `Observation` for an analysed image.
///
/// The patient id is used verbatim as the FHIR `Patient.id`.
pub fn build_observation<'a>(
    metadata: &'a ExamMetadata,
    analysis: &'a AnalysisResult,
    raw_binary_id: &str,
) -> Observation<'a> {
    Observation {
        resource_type: "Observation",
        status: "final",
        category: vec![CodeableConcept {
            coding: vec![Coding {
                system: OBSERVATION_CATEGORY_SYSTEM,
                code: "imaging",
                display: "Imaging",
            }],
            text: None,
        }],
        code: CodeableConcept {
            coding: Vec::new(),
            text: Some(OBSERVATION_CODE_TEXT),
        },
        subject: Reference {
            reference: format!("Patient/{}", metadata.patient_id),
        },
        effective_date_time: &metadata.exam_date,
        derived_from: vec![Reference {
            reference: format!("Binary/{}", raw_binary_id),
        }],
        component: analysis
            .parameters
            .iter()
            .map(|(name, value)| Component {
                code: CodeableConcept {
                    coding: Vec::new(),
                    text: Some(name.as_str()),
                },
                value_quantity: Quantity {
                    value: *value,
                    unit: DEMO_UNIT,
                },
            })
            .collect(),
    }
}
