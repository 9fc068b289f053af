//! Follow-up work derived from published workflow events.
//!
//! Label printing, counseling material, supplier notices and incident
//! filing are performed outside the engine; this module only tells a
//! subscriber which of them an event calls for.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use pharmledger_catalog::SupplierId;
use pharmledger_dispensing::{DispensingEvent, DispensingId, ReturnEvent, ReturnId};
use pharmledger_events::EventEnvelope;

use crate::engine::{DISPENSING, RETURN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowNotice {
    /// A dispensing passed its pharmacist check.
    PrintLabels { dispensing_id: DispensingId },
    /// Items were handed over after counseling.
    DeliverCounselingMaterial { dispensing_id: DispensingId },
    NotifySupplier {
        return_id: ReturnId,
        supplier_id: Option<SupplierId>,
    },
    FileIncidentReport { return_id: ReturnId, report_number: String },
}

/// Notices raised by one published event. Events of other aggregates, and
/// events that need no follow-up, yield nothing.
pub fn notices_for(envelope: &EventEnvelope<JsonValue>) -> Result<Vec<WorkflowNotice>, serde_json::Error> {
    let notices = match envelope.aggregate_type() {
        DISPENSING => match serde_json::from_value(envelope.payload().clone())? {
            DispensingEvent::DispensingVerified(e) if e.passed => vec![WorkflowNotice::PrintLabels {
                dispensing_id: e.dispensing_id,
            }],
            DispensingEvent::DispensingCompleted(e) if e.counseled => {
                vec![WorkflowNotice::DeliverCounselingMaterial {
                    dispensing_id: e.dispensing_id,
                }]
            }
            _ => vec![],
        },
        RETURN => match serde_json::from_value(envelope.payload().clone())? {
            ReturnEvent::SupplierNotified(e) => vec![WorkflowNotice::NotifySupplier {
                return_id: e.return_id,
                supplier_id: e.supplier_id,
            }],
            ReturnEvent::IncidentReportCreated(e) => vec![WorkflowNotice::FileIncidentReport {
                return_id: e.return_id,
                report_number: e.report_number,
            }],
            _ => vec![],
        },
        _ => vec![],
    };
    Ok(notices)
}
