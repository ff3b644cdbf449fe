//! FHIR server integration.
//!
//! Only the handful of R4 resources the service touches are modelled:
//! the `DocumentReference` catalog records, `Binary` payloads, and the
//! `Observation` written back after analysis.

pub mod client;
pub mod observation;
pub mod resources;

pub use client::{FetchedBinary, FhirClient};
pub use observation::build_observation;
pub use resources::{Attachment, CatalogRecord};
