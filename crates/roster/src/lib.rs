//! `cohort-roster`: tenant-scoped citizens, grades and pictograms.

pub mod citizen;
pub mod grade;
pub mod isolation;
pub mod pictogram;

pub use citizen::{Citizen, CitizenUpdate};
pub use grade::Grade;
pub use isolation::{validate_ownership, CrossTenantViolation, VerifiedCitizens};
pub use pictogram::Pictogram;
