//! Prescribing domain module (event-sourced).
//!
//! Prescriptions move from draft through pharmacist verification to
//! dispensed. Dispensings hold line quantities as claims until they are
//! settled or released.

pub mod dosage;
pub mod prescription;

pub use dosage::{Dosage, Frequency, Route};
pub use prescription::{
    AddPrescriptionItem, ClaimItems, ClaimReleased, CreatePrescription, DispensedQuantitiesRecorded,
    ItemClaim, ItemsClaimed, LineQuantity, MarkPrescriptionDispensed, PatientId, Prescription,
    PrescriptionCommand, PrescriptionCreated, PrescriptionDispensed, PrescriptionEvent,
    PrescriptionId, PrescriptionItem, PrescriptionItemAdded, PrescriptionRejected,
    PrescriptionStatus, PrescriptionSubmitted, PrescriptionVerification, PrescriptionVerified,
    Priority, RecordDispensed, RejectPrescription, ReleaseClaim, SubmitPrescription,
    VerificationChecks, VerifyPrescription,
};
