//! Dispensing domain module (event-sourced).
//!
//! A dispensing fulfils a verified prescription from FEFO-allocated stock:
//! queue, preparation, pharmacist check, hand-over. Returns of dispensed
//! items are handled by [`DrugReturn`] with per-reason follow-up rules.

pub mod dispensing;
pub mod returns;

pub use dispensing::{
    CancelDispensing, CompleteCounseling, CounselingCompleted, CreateDispensing, Dispense,
    Dispensing, DispensingCancelled, DispensingCommand, DispensingCompleted, DispensingCreated,
    DispensingEvent, DispensingId, DispensingItem, DispensingPutOnHold, DispensingResumed,
    DispensingStatus, DispensingTotals, DispensingVerified, ItemAllocation, ItemReturnRecorded,
    ItemReturnReversed, ItemSubstituted, NewDispensingItem, PatientCounseling, PreparationStarted,
    PutOnHold, RecordItemReturn, ResumeDispensing, ReverseItemReturn, StartPreparing,
    SubmitForVerification, SubmittedForVerification, SubstituteItem, VerifyDispensing,
};
pub use returns::{
    ApproveReturn, CloseReturn, CreateIncidentReport, DrugReturn, IncidentReportCreated,
    NotifySupplier, ProcessRefund, RecordRestock, Refund, RefundMethod, RefundProcessed,
    RejectReturn, RequestReturn, ReturnApproved, ReturnBehavior, ReturnClosed, ReturnCommand,
    ReturnEvent, ReturnId, ReturnPolicyTable, ReturnReason, ReturnRejected, ReturnRequested,
    ReturnRestocked, ReturnStatus, SupplierNotified,
};
