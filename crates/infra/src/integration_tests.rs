//! End-to-end flows through the engine.
//!
//! Command → EventStore → EventBus, with stock effects on the ledger:
//! - receipts post batches; transfers and adjustments move them
//! - a prescription is verified, dispensed from FEFO stock, and settled
//! - cancellation, shortfalls and substitution leave no stray reservations
//! - returns restock once and follow their reason's rules
//! - racing calls on one workflow move stock once

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    use pharmledger_catalog::{
        ControlFlags, DiscontinueDrug, DrugCommand, DrugId, FormularyStatus, RegisterDrug, StockStatus,
        StockThresholds, Supplier, SupplierId,
    };
    use pharmledger_core::{AggregateId, DomainError, FixedClock, UserId};
    use pharmledger_dispensing::{
        CancelDispensing, CloseReturn, CompleteCounseling, CreateDispensing, CreateIncidentReport, Dispense,
        Dispensing, DispensingId, DispensingStatus, DrugReturn, NewDispensingItem, NotifySupplier,
        ProcessRefund, RefundMethod, RequestReturn, ReturnId, ReturnPolicyTable, ReturnReason, ReturnStatus,
        VerifyDispensing,
    };
    use pharmledger_events::EventBus;
    use pharmledger_inventory::{
        AddReceiptItem, AddTransferItem, AdjustmentCommand, AdjustmentId, AdjustmentReason,
        AdjustmentStatus, ApproveAdjustment, ApproveReceipt, BatchId, CancelTransfer, CreateReceipt,
        CreateTransfer, DispatchTransfer, LocationId, MarkReceiptPosted, MovementKind, MovementLog,
        ReceiptCommand, ReceiptId, ReceiptStatus, ReceiveTransfer, RequestAdjustment, SubmitReceipt,
        TransferCommand, TransferId, TransferStatus,
    };
    use pharmledger_prescribing::{
        AddPrescriptionItem, CreatePrescription, Dosage, Frequency, PatientId, PrescriptionCommand,
        PrescriptionId, PrescriptionStatus, Priority, Route, SubmitPrescription, VerificationChecks,
        VerifyPrescription,
    };

    use crate::config::EngineConfig;
    use crate::engine::{InMemoryPharmacyEngine, SubstitutionRequest};
    use crate::error::EngineError;
    use crate::notices::{WorkflowNotice, notices_for};

    type Engine = InMemoryPharmacyEngine<FixedClock>;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine_with(config: EngineConfig) -> Engine {
        pharmledger_observability::tracing::init_pretty("debug");
        InMemoryPharmacyEngine::in_memory(config, ReturnPolicyTable::standard(), FixedClock(now()))
    }

    fn engine() -> Engine {
        engine_with(EngineConfig::default())
    }

    fn domain(err: EngineError) -> DomainError {
        match err {
            EngineError::Domain(e) => e,
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    fn register_drug(engine: &Engine, code: &str, generic: &str, controls: ControlFlags) -> DrugId {
        let drug_id = DrugId::generate();
        engine
            .drug_command(DrugCommand::RegisterDrug(RegisterDrug {
                drug_id,
                code: code.into(),
                generic_name: generic.into(),
                brand_name: None,
                strength: "500 mg".into(),
                unit: "tablet".into(),
                category_id: None,
                thresholds: StockThresholds::new(10, 200, 20).unwrap(),
                controls,
                formulary_status: FormularyStatus::Formulary,
                occurred_at: now(),
            }))
            .unwrap();
        drug_id
    }

    /// Create and submit a receipt for `lots`, ready for approval.
    fn submitted_receipt(
        engine: &Engine,
        supplier_id: Option<SupplierId>,
        location_id: LocationId,
        lots: &[(DrugId, &str, NaiveDate, i64)],
    ) -> ReceiptId {
        let receipt_id = ReceiptId::generate();
        let clerk = UserId::new();
        engine
            .receipt_command(ReceiptCommand::CreateReceipt(CreateReceipt {
                receipt_id,
                receipt_number: format!("GRN-{}", receipt_id),
                supplier_id,
                location_id,
                received_on: now().date_naive(),
                created_by: clerk,
                occurred_at: now(),
            }))
            .unwrap();
        for (drug_id, batch_number, expiry_date, quantity) in lots {
            engine
                .receipt_command(ReceiptCommand::AddReceiptItem(AddReceiptItem {
                    receipt_id,
                    drug_id: *drug_id,
                    batch_number: batch_number.to_string(),
                    expiry_date: *expiry_date,
                    quantity: *quantity,
                    unit_cost: 120,
                    occurred_at: now(),
                }))
                .unwrap();
        }
        engine
            .receipt_command(ReceiptCommand::SubmitReceipt(SubmitReceipt {
                receipt_id,
                submitted_by: clerk,
                occurred_at: now(),
            }))
            .unwrap();
        receipt_id
    }

    /// Receive lots through the receipt workflow; returns the posted batches
    /// in line order.
    fn receive(
        engine: &Engine,
        supplier_id: Option<SupplierId>,
        location_id: LocationId,
        lots: &[(DrugId, &str, NaiveDate, i64)],
    ) -> Vec<BatchId> {
        let receipt_id = submitted_receipt(engine, supplier_id, location_id, lots);
        let posted = engine
            .receipt_command(ReceiptCommand::ApproveReceipt(ApproveReceipt {
                receipt_id,
                approved_by: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        assert_eq!(posted.status(), ReceiptStatus::Posted);
        posted.posted_batches().to_vec()
    }

    fn twice_daily_for_five_days() -> Dosage {
        Dosage {
            dose: 1,
            frequency: Frequency::TwiceDaily,
            route: Route::Oral,
            duration_days: 5,
            quantity_override: None,
        }
    }

    /// A verified prescription; every drug is prescribed for 10 units.
    fn prescribe(
        engine: &Engine,
        patient_id: PatientId,
        drugs: &[DrugId],
        pharmacists: &[UserId],
    ) -> PrescriptionId {
        let prescription_id = PrescriptionId::generate();
        engine
            .prescription_command(PrescriptionCommand::CreatePrescription(CreatePrescription {
                prescription_id,
                prescription_number: format!("RX-{prescription_id}"),
                patient_id,
                prescriber_id: UserId::new(),
                priority: Priority::Routine,
                valid_until: now() + Duration::days(30),
                occurred_at: now(),
            }))
            .unwrap();
        for drug_id in drugs {
            engine
                .prescription_command(PrescriptionCommand::AddPrescriptionItem(AddPrescriptionItem {
                    prescription_id,
                    drug_id: *drug_id,
                    dosage: twice_daily_for_five_days(),
                    instructions: Some("after meals".into()),
                    requires_dual_check: false,
                    occurred_at: now(),
                }))
                .unwrap();
        }
        engine
            .prescription_command(PrescriptionCommand::SubmitPrescription(SubmitPrescription {
                prescription_id,
                occurred_at: now(),
            }))
            .unwrap();
        for pharmacist in pharmacists {
            engine
                .prescription_command(PrescriptionCommand::VerifyPrescription(VerifyPrescription {
                    prescription_id,
                    pharmacist: *pharmacist,
                    checks: VerificationChecks::all(),
                    notes: None,
                    dual_verification_enabled: false,
                    occurred_at: now(),
                }))
                .unwrap();
        }
        prescription_id
    }

    fn open_dispensing(
        engine: &Engine,
        prescription_id: PrescriptionId,
        location_id: LocationId,
        allow_partial: bool,
    ) -> DispensingId {
        let prescription = engine.prescription(prescription_id).unwrap();
        let dispensing_id = DispensingId::generate();
        engine
            .create_dispensing(CreateDispensing {
                dispensing_id,
                dispensing_number: format!("DSP-{dispensing_id}"),
                prescription_id,
                patient_id: prescription.patient_id(),
                location_id,
                items: prescription
                    .items()
                    .iter()
                    .map(|i| NewDispensingItem {
                        line_no: i.line_no,
                        drug_id: i.drug_id,
                        quantity: i.required_quantity,
                        unit_price: 150,
                        requires_dual_check: false,
                    })
                    .collect(),
                counseling_requested: false,
                counseling_for_dual_check_items: false,
                allow_partial,
                service_fee: 500,
                occurred_at: now(),
            })
            .unwrap();
        dispensing_id
    }

    fn make_ready(engine: &Engine, dispensing_id: DispensingId, pharmacist: UserId) {
        engine.start_preparing(dispensing_id, UserId::new()).unwrap();
        engine.submit_for_verification(dispensing_id).unwrap();
        let ready = engine
            .verify_dispensing(VerifyDispensing {
                dispensing_id,
                pharmacist,
                passed: true,
                notes: None,
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(ready.status(), DispensingStatus::Ready);
    }

    fn hand_over(engine: &Engine, dispensing_id: DispensingId, pharmacist: UserId) -> Result<Dispensing, EngineError> {
        engine.dispense(Dispense {
            dispensing_id,
            pharmacist,
            recipient: "patient".into(),
            occurred_at: now(),
        })
    }

    #[test]
    fn approved_receipt_posts_batches_and_derives_stock() {
        let engine = engine();
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let batches = receive(
            &engine,
            None,
            store,
            &[(drug, "L-1", date(2026, 5, 15), 30), (drug, "L-2", date(2027, 1, 31), 20)],
        );
        assert_eq!(batches.len(), 2);

        let level = engine.stock_level(drug).unwrap();
        assert_eq!(level.current_stock, 50);
        assert_eq!(level.available, 50);
        assert_eq!(level.status, StockStatus::Normal);

        for batch_id in &batches {
            engine.ledger().reconcile(*batch_id).unwrap();
        }
        let expiring = engine.expiring_stock();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].batch_id, batches[0]);
    }

    #[test]
    fn posting_is_not_a_caller_command() {
        let engine = engine();
        let err = engine
            .receipt_command(ReceiptCommand::MarkReceiptPosted(MarkReceiptPosted {
                receipt_id: ReceiptId::generate(),
                batch_ids: vec![],
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));
    }

    #[test]
    fn controlled_drug_is_dispensed_from_soonest_expiry_after_counseling() {
        let engine = engine();
        let notices = engine.dispatcher().bus().subscribe();
        let store = LocationId::generate();
        let morphine = register_drug(
            &engine,
            "MOR10",
            "morphine",
            ControlFlags {
                narcotic: true,
                ..ControlFlags::default()
            },
        );
        let batches = receive(
            &engine,
            None,
            store,
            &[(morphine, "LATE", date(2026, 12, 1), 20), (morphine, "SOON", date(2026, 4, 1), 6)],
        );
        let (late, soon) = (batches[0], batches[1]);

        let first = UserId::new();
        let second = UserId::new();
        let patient = PatientId::generate();
        let prescription_id = prescribe(&engine, patient, &[morphine], &[first]);
        assert_eq!(
            engine.prescription(prescription_id).unwrap().status(),
            PrescriptionStatus::PendingVerification
        );
        prescribe_second_check(&engine, prescription_id, second);

        let dispensing_id = open_dispensing(&engine, prescription_id, store, false);
        let queued = engine.dispensing(dispensing_id).unwrap();
        assert!(queued.counseling_required());
        assert!(queued.items()[0].requires_dual_check);

        make_ready(&engine, dispensing_id, first);
        let prepared = engine.dispensing(dispensing_id).unwrap();
        let lines = &prepared.items()[0].allocations;
        assert_eq!(lines[0].batch_id, soon);
        assert_eq!(lines[0].quantity, 6);
        assert_eq!(lines[1].batch_id, late);
        assert_eq!(lines[1].quantity, 4);

        let err = hand_over(&engine, dispensing_id, first).unwrap_err();
        assert_eq!(domain(err), DomainError::CounselingRequired);

        engine
            .complete_counseling(CompleteCounseling {
                dispensing_id,
                pharmacist: first,
                topics: vec!["drowsiness".into(), "no alcohol".into()],
                notes: None,
                understanding_confirmed: true,
                occurred_at: now(),
            })
            .unwrap();
        let dispensed = hand_over(&engine, dispensing_id, first).unwrap();
        assert_eq!(dispensed.status(), DispensingStatus::Dispensed);
        assert_eq!(dispensed.totals().total_quantity, 10);
        assert_eq!(dispensed.totals().total_amount, 10 * 150 + 500);

        let soon_batch = engine.ledger().batch(soon, now().date_naive()).unwrap().value;
        let late_batch = engine.ledger().batch(late, now().date_naive()).unwrap().value;
        assert_eq!(soon_batch.quantity_on_hand(), 0);
        assert_eq!(late_batch.quantity_on_hand(), 16);
        assert_eq!(late_batch.quantity_reserved(), 0);
        engine.ledger().reconcile(soon).unwrap();
        engine.ledger().reconcile(late).unwrap();

        let prescription = engine.prescription(prescription_id).unwrap();
        assert_eq!(prescription.status(), PrescriptionStatus::Dispensed);
        assert!(prescription.claims().is_empty());

        let raised: Vec<WorkflowNotice> = notices
            .drain()
            .iter()
            .flat_map(|env| notices_for(env).unwrap())
            .collect();
        assert_eq!(
            raised,
            vec![
                WorkflowNotice::PrintLabels { dispensing_id },
                WorkflowNotice::DeliverCounselingMaterial { dispensing_id },
            ]
        );
    }

    fn prescribe_second_check(engine: &Engine, prescription_id: PrescriptionId, pharmacist: UserId) {
        let verified = engine
            .prescription_command(PrescriptionCommand::VerifyPrescription(VerifyPrescription {
                prescription_id,
                pharmacist,
                checks: VerificationChecks::all(),
                notes: Some("second check".into()),
                dual_verification_enabled: false,
                occurred_at: now(),
            }))
            .unwrap();
        assert_eq!(verified.status(), PrescriptionStatus::Verified);
    }

    #[test]
    fn cancelling_releases_reservations_and_the_claim() {
        let engine = engine();
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let batch = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 25)])[0];
        let prescription_id = prescribe(&engine, PatientId::generate(), &[drug], &[UserId::new()]);

        let dispensing_id = open_dispensing(&engine, prescription_id, store, false);
        assert_eq!(engine.prescription(prescription_id).unwrap().claimable_quantity(1), 0);
        engine.start_preparing(dispensing_id, UserId::new()).unwrap();
        assert_eq!(engine.ledger().batch(batch, now().date_naive()).unwrap().value.quantity_reserved(), 10);

        let cancelled = engine
            .cancel_dispensing(CancelDispensing {
                dispensing_id,
                cancelled_by: UserId::new(),
                reason: "patient left".into(),
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(cancelled.status(), DispensingStatus::Cancelled);

        let after = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
        assert_eq!(after.quantity_reserved(), 0);
        assert_eq!(after.quantity_available(), 25);
        assert_eq!(after.quantity_on_hand(), 25);
        assert_eq!(engine.prescription(prescription_id).unwrap().claimable_quantity(1), 10);

        // The freed quantity can be claimed again.
        open_dispensing(&engine, prescription_id, store, false);
    }

    #[test]
    fn shortfall_aborts_preparation_without_reserving() {
        let engine = engine();
        let store = LocationId::generate();
        let a = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let b = register_drug(&engine, "PCM500", "paracetamol", ControlFlags::default());
        let batches = receive(
            &engine,
            None,
            store,
            &[(a, "A-1", date(2026, 9, 1), 40), (b, "B-1", date(2026, 9, 1), 5)],
        );
        let prescription_id = prescribe(&engine, PatientId::generate(), &[a, b], &[UserId::new()]);
        let dispensing_id = open_dispensing(&engine, prescription_id, store, false);

        let err = engine.start_preparing(dispensing_id, UserId::new()).unwrap_err();
        assert_eq!(
            domain(err),
            DomainError::InsufficientStock {
                requested: 10,
                satisfied: 5,
                shortfall: 5
            }
        );
        assert_eq!(engine.dispensing(dispensing_id).unwrap().status(), DispensingStatus::Queue);
        for batch_id in batches {
            let batch = engine.ledger().batch(batch_id, now().date_naive()).unwrap().value;
            assert_eq!(batch.quantity_reserved(), 0);
        }
    }

    #[test]
    fn partial_dispensing_leaves_the_rest_claimable() {
        let mut config = EngineConfig::default();
        config.dispensing.allow_partial = true;
        let engine = engine_with(config);
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 6)]);
        let pharmacist = UserId::new();
        let prescription_id = prescribe(&engine, PatientId::generate(), &[drug], &[pharmacist]);

        let dispensing_id = open_dispensing(&engine, prescription_id, store, true);
        make_ready(&engine, dispensing_id, pharmacist);
        let dispensed = hand_over(&engine, dispensing_id, pharmacist).unwrap();
        assert!(dispensed.is_partial());
        assert_eq!(dispensed.items()[0].dispensed_quantity, 6);
        assert_eq!(dispensed.totals().subtotal, 6 * 150);

        let prescription = engine.prescription(prescription_id).unwrap();
        assert_eq!(prescription.status(), PrescriptionStatus::Verified);
        assert_eq!(prescription.items()[0].dispensed_quantity, 6);
        assert_eq!(prescription.claimable_quantity(1), 4);
        assert_eq!(engine.stock_level(drug).unwrap().status, StockStatus::OutOfStock);
    }

    #[test]
    fn partial_request_is_ignored_when_configuration_forbids_it() {
        let engine = engine();
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 6)]);
        let prescription_id = prescribe(&engine, PatientId::generate(), &[drug], &[UserId::new()]);

        let dispensing_id = open_dispensing(&engine, prescription_id, store, true);
        assert!(!engine.dispensing(dispensing_id).unwrap().allows_partial());
        let err = engine.start_preparing(dispensing_id, UserId::new()).unwrap_err();
        assert!(matches!(domain(err), DomainError::InsufficientStock { .. }));
    }

    #[test]
    fn substitution_swaps_reservations_to_the_equivalent() {
        let engine = engine();
        let store = LocationId::generate();
        let original = register_drug(&engine, "AMX-A", "amoxicillin", ControlFlags::default());
        let equivalent = register_drug(&engine, "AMX-B", "Amoxicillin", ControlFlags::default());
        let unrelated = register_drug(&engine, "PCM500", "paracetamol", ControlFlags::default());
        let batches = receive(
            &engine,
            None,
            store,
            &[
                (original, "A-1", date(2026, 9, 1), 10),
                (equivalent, "B-1", date(2026, 10, 1), 15),
                (unrelated, "P-1", date(2026, 10, 1), 15),
            ],
        );
        let prescription_id = prescribe(&engine, PatientId::generate(), &[original], &[UserId::new()]);
        let dispensing_id = open_dispensing(&engine, prescription_id, store, false);
        engine.start_preparing(dispensing_id, UserId::new()).unwrap();

        let request = |substitute_drug_id| SubstitutionRequest {
            dispensing_id,
            line_no: 1,
            substitute_drug_id,
            reason: "original brand on recall watch".into(),
            unit_price: 140,
        };
        let err = engine.substitute_item(request(unrelated)).unwrap_err();
        assert!(matches!(domain(err), DomainError::Validation(_)));

        let swapped = engine.substitute_item(request(equivalent)).unwrap();
        let item = &swapped.items()[0];
        assert_eq!(item.drug_id, equivalent);
        assert_eq!(item.substituted_from, Some(original));
        assert_eq!(item.allocations[0].batch_id, batches[1]);

        let today = now().date_naive();
        assert_eq!(engine.ledger().batch(batches[0], today).unwrap().value.quantity_reserved(), 0);
        assert_eq!(engine.ledger().batch(batches[1], today).unwrap().value.quantity_reserved(), 10);
        assert_eq!(engine.ledger().batch(batches[2], today).unwrap().value.quantity_reserved(), 0);
    }

    /// Dispense 10 units from one batch; returns (dispensing, batch, supplier).
    fn dispensed_order(engine: &Engine) -> (DispensingId, BatchId, SupplierId) {
        let store = LocationId::generate();
        let supplier_id = SupplierId::generate();
        engine
            .register_supplier(Supplier::new(supplier_id, "MEDS", "Meds Wholesale", None).unwrap())
            .unwrap();
        let drug = register_drug(engine, "AMX500", "amoxicillin", ControlFlags::default());
        let batch = receive(engine, Some(supplier_id), store, &[(drug, "L-1", date(2026, 9, 1), 30)])[0];
        let pharmacist = UserId::new();
        let prescription_id = prescribe(engine, PatientId::generate(), &[drug], &[pharmacist]);
        let dispensing_id = open_dispensing(engine, prescription_id, store, false);
        make_ready(engine, dispensing_id, pharmacist);
        hand_over(engine, dispensing_id, pharmacist).unwrap();
        (dispensing_id, batch, supplier_id)
    }

    fn request_return(
        engine: &Engine,
        dispensing_id: DispensingId,
        batch_id: BatchId,
        quantity: i64,
        reason: &str,
    ) -> Result<DrugReturn, EngineError> {
        let return_id = ReturnId::generate();
        engine.request_return(RequestReturn {
            return_id,
            return_number: format!("RET-{return_id}"),
            dispensing_id,
            line_no: 1,
            drug_id: DrugId::generate(),
            batch_id,
            quantity,
            unit_price: 0,
            reason: ReturnReason::new(reason).unwrap(),
            requested_by: UserId::new(),
            occurred_at: now(),
        })
    }

    #[test]
    fn restocking_a_return_happens_exactly_once() {
        let engine = engine();
        let (dispensing_id, batch, _) = dispensed_order(&engine);

        let requested = request_return(&engine, dispensing_id, batch, 3, ReturnReason::THERAPY_CHANGED).unwrap();
        assert_eq!(requested.return_value(), 3 * 150);
        let return_id = requested.id_typed();

        let err = engine.restock_return(return_id, UserId::new()).unwrap_err();
        assert!(matches!(domain(err), DomainError::ApprovalRequired(_)));

        engine.approve_return(return_id, UserId::new()).unwrap();
        assert_eq!(engine.dispensing(dispensing_id).unwrap().items()[0].returned_quantity, 3);

        let restocked = engine.restock_return(return_id, UserId::new()).unwrap();
        assert!(restocked.is_restocked());
        let after = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
        assert_eq!(after.quantity_on_hand(), 23);
        engine.ledger().reconcile(batch).unwrap();

        let err = engine.restock_return(return_id, UserId::new()).unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));
        let again = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
        assert_eq!(again.quantity_on_hand(), 23);
        let returns = engine
            .ledger()
            .movements()
            .for_batch(batch)
            .into_iter()
            .filter(|m| m.kind == MovementKind::Return)
            .count();
        assert_eq!(returns, 1);

        engine
            .process_refund(ProcessRefund {
                return_id,
                amount: 450,
                method: RefundMethod::Cash,
                processed_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        let closed = engine
            .close_return(CloseReturn {
                return_id,
                closed_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(closed.status(), ReturnStatus::Closed);
    }

    #[test]
    fn returns_are_bounded_by_the_dispensed_batch_and_quantity() {
        let engine = engine();
        let (dispensing_id, batch, _) = dispensed_order(&engine);

        let err = request_return(&engine, dispensing_id, BatchId::generate(), 1, ReturnReason::DAMAGED).unwrap_err();
        assert!(matches!(domain(err), DomainError::Validation(_)));
        let err = request_return(&engine, dispensing_id, batch, 11, ReturnReason::DAMAGED).unwrap_err();
        assert!(matches!(domain(err), DomainError::Validation(_)));
        let err = request_return(&engine, dispensing_id, batch, 1, "changed_my_mind").unwrap_err();
        assert!(matches!(domain(err), DomainError::Validation(_)));
    }

    #[test]
    fn quality_return_needs_supplier_notice_and_wrong_drug_needs_incident_report() {
        let engine = engine();
        let notices = engine.dispatcher().bus().subscribe();
        let (dispensing_id, batch, supplier_id) = dispensed_order(&engine);
        notices.drain();

        let quality = request_return(&engine, dispensing_id, batch, 2, ReturnReason::QUALITY_DEFECT).unwrap();
        let quality_id = quality.id_typed();
        let approved = engine.approve_return(quality_id, UserId::new()).unwrap();
        assert_eq!(approved.pending_steps(), vec!["supplier notification"]);

        let err = engine
            .close_return(CloseReturn {
                return_id: quality_id,
                closed_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));

        let err = engine.restock_return(quality_id, UserId::new()).unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));

        engine
            .notify_supplier(NotifySupplier {
                return_id: quality_id,
                supplier_id: None,
                notified_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        engine
            .close_return(CloseReturn {
                return_id: quality_id,
                closed_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();

        let wrong = request_return(&engine, dispensing_id, batch, 3, ReturnReason::WRONG_DRUG).unwrap();
        let wrong_id = wrong.id_typed();
        let approved = engine.approve_return(wrong_id, UserId::new()).unwrap();
        assert!(approved.behavior().unwrap().is_pharmacy_error);
        engine
            .create_incident_report(CreateIncidentReport {
                return_id: wrong_id,
                report_number: "IR-2026-014".into(),
                created_by: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        assert!(engine.drug_return(wrong_id).unwrap().pending_steps().is_empty());

        let raised: Vec<WorkflowNotice> = notices
            .drain()
            .iter()
            .flat_map(|env| notices_for(env).unwrap())
            .collect();
        assert_eq!(
            raised,
            vec![
                WorkflowNotice::NotifySupplier {
                    return_id: quality_id,
                    supplier_id: Some(supplier_id),
                },
                WorkflowNotice::FileIncidentReport {
                    return_id: wrong_id,
                    report_number: "IR-2026-014".into(),
                },
            ]
        );
        assert_eq!(engine.dispensing(dispensing_id).unwrap().items()[0].returned_quantity, 5);
    }

    fn transfer_with_item(
        engine: &Engine,
        from: LocationId,
        to: LocationId,
        batch_id: BatchId,
        drug_id: DrugId,
        quantity: i64,
    ) -> TransferId {
        let transfer_id = TransferId::generate();
        engine
            .transfer_command(TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id,
                transfer_number: format!("TRF-{transfer_id}"),
                from_location: from,
                to_location: to,
                requested_by: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        engine
            .transfer_command(TransferCommand::AddTransferItem(AddTransferItem {
                transfer_id,
                batch_id,
                drug_id,
                quantity,
                occurred_at: now(),
            }))
            .unwrap();
        engine
            .transfer_command(TransferCommand::DispatchTransfer(DispatchTransfer {
                transfer_id,
                dispatched_by: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        transfer_id
    }

    #[test]
    fn transfer_moves_a_lot_to_the_ward() {
        let engine = engine();
        let (store, ward) = (LocationId::generate(), LocationId::generate());
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let source = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 20)])[0];
        let today = now().date_naive();

        let transfer_id = transfer_with_item(&engine, store, ward, source, drug, 8);
        assert_eq!(engine.ledger().batch(source, today).unwrap().value.quantity_reserved(), 8);

        let received = engine
            .transfer_command(TransferCommand::ReceiveTransfer(ReceiveTransfer {
                transfer_id,
                received_by: UserId::new(),
                destination_batches: vec![],
                occurred_at: now(),
            }))
            .unwrap();
        assert_eq!(received.status(), TransferStatus::Received);

        let source_batch = engine.ledger().batch(source, today).unwrap().value;
        assert_eq!(source_batch.quantity_on_hand(), 12);
        assert_eq!(source_batch.quantity_reserved(), 0);
        let destination = engine.ledger().batch(received.destination_batches()[0], today).unwrap().value;
        assert_eq!(destination.location_id(), ward);
        assert_eq!(destination.batch_number(), "L-1");
        assert_eq!(destination.expiry_date(), date(2026, 9, 1));
        assert_eq!(destination.quantity_on_hand(), 8);
        engine.ledger().reconcile(source).unwrap();
        engine.ledger().reconcile(destination.id()).unwrap();
        assert_eq!(engine.stock_level(drug).unwrap().current_stock, 20);
    }

    #[test]
    fn cancelling_an_in_transit_transfer_frees_the_source() {
        let engine = engine();
        let (store, ward) = (LocationId::generate(), LocationId::generate());
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let source = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 20)])[0];

        let err = engine
            .transfer_command(TransferCommand::AddTransferItem(AddTransferItem {
                transfer_id: transfer_with_item(&engine, store, ward, source, drug, 5),
                batch_id: source,
                drug_id: DrugId::generate(),
                quantity: 1,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::Validation(_)));

        let transfer_id = transfer_with_item(&engine, store, ward, source, drug, 8);
        let batch = engine.ledger().batch(source, now().date_naive()).unwrap().value;
        assert_eq!(batch.quantity_reserved(), 13);

        let cancelled = engine
            .transfer_command(TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id,
                reason: "ward closed".into(),
                occurred_at: now(),
            }))
            .unwrap();
        assert_eq!(cancelled.status(), TransferStatus::Cancelled);
        let batch = engine.ledger().batch(source, now().date_naive()).unwrap().value;
        assert_eq!(batch.quantity_reserved(), 5);
        assert_eq!(batch.quantity_on_hand(), 20);
    }

    #[test]
    fn adjustment_needs_a_second_person_and_writes_a_movement() {
        let engine = engine();
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let batch = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 20)])[0];

        let adjustment_id = AdjustmentId::generate();
        let clerk = UserId::new();
        engine
            .adjustment_command(AdjustmentCommand::RequestAdjustment(RequestAdjustment {
                adjustment_id,
                batch_id: batch,
                drug_id: drug,
                delta: -2,
                reason: AdjustmentReason::Damaged,
                notes: Some("crushed blister".into()),
                requested_by: clerk,
                occurred_at: now(),
            }))
            .unwrap();

        let approve = |approved_by| {
            engine.adjustment_command(AdjustmentCommand::ApproveAdjustment(ApproveAdjustment {
                adjustment_id,
                approved_by,
                occurred_at: now(),
            }))
        };
        let err = approve(clerk).unwrap_err();
        assert_eq!(domain(err), DomainError::Unauthorized);
        assert_eq!(engine.ledger().batch(batch, now().date_naive()).unwrap().value.quantity_on_hand(), 20);

        let applied = approve(UserId::new()).unwrap();
        assert_eq!(applied.status(), AdjustmentStatus::Applied);
        let movement_id = applied.movement_id().unwrap();
        let movements = engine.ledger().movements().for_batch(batch);
        assert!(movements.iter().any(|m| m.id == movement_id && m.kind == MovementKind::Adjustment));
        assert_eq!(engine.ledger().batch(batch, now().date_naive()).unwrap().value.quantity_on_hand(), 18);
        engine.ledger().reconcile(batch).unwrap();
    }

    #[test]
    fn discontinued_drugs_cannot_be_prescribed() {
        let engine = engine();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        engine
            .drug_command(DrugCommand::DiscontinueDrug(DiscontinueDrug {
                drug_id: drug,
                reason: "withdrawn".into(),
                occurred_at: now(),
            }))
            .unwrap();

        let prescription_id = PrescriptionId::generate();
        engine
            .prescription_command(PrescriptionCommand::CreatePrescription(CreatePrescription {
                prescription_id,
                prescription_number: "RX-1".into(),
                patient_id: PatientId::new(AggregateId::new()),
                prescriber_id: UserId::new(),
                priority: Priority::Urgent,
                valid_until: now() + Duration::days(7),
                occurred_at: now(),
            }))
            .unwrap();
        let err = engine
            .prescription_command(PrescriptionCommand::AddPrescriptionItem(AddPrescriptionItem {
                prescription_id,
                drug_id: drug,
                dosage: twice_daily_for_five_days(),
                instructions: None,
                requires_dual_check: false,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));

        let err = engine
            .drug_command(DrugCommand::RegisterDrug(RegisterDrug {
                drug_id: DrugId::generate(),
                code: "AMX500".into(),
                generic_name: "amoxicillin".into(),
                brand_name: None,
                strength: "500 mg".into(),
                unit: "tablet".into(),
                category_id: None,
                thresholds: StockThresholds::new(0, 0, 1).unwrap(),
                controls: ControlFlags::default(),
                formulary_status: FormularyStatus::Formulary,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::Conflict(_)));
    }

    #[test]
    fn hold_and_resume_keep_the_reservation() {
        let engine = engine();
        let store = LocationId::generate();
        let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
        let batch = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 12)])[0];
        let prescription_id = prescribe(&engine, PatientId::generate(), &[drug], &[UserId::new()]);
        let dispensing_id = open_dispensing(&engine, prescription_id, store, false);
        engine.start_preparing(dispensing_id, UserId::new()).unwrap();

        let held = engine.put_on_hold(dispensing_id, "awaiting prescriber call").unwrap();
        assert_eq!(held.status(), DispensingStatus::OnHold);
        let err = engine.submit_for_verification(dispensing_id).unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidState(_)));

        let resumed = engine.resume_dispensing(dispensing_id).unwrap();
        assert_eq!(resumed.status(), DispensingStatus::Preparing);
        let batch = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
        assert_eq!(batch.quantity_reserved(), 10);
        assert_eq!(batch.quantity_available(), 2);
    }

    mod concurrency {
        use std::sync::Barrier;

        use pharmledger_core::ExpectedVersion;
        use pharmledger_inventory::StockReceipt;

        use super::*;
        use crate::engine::RECEIPT;

        const ROUNDS: usize = 25;

        /// Run both calls at once, released together by a barrier.
        fn race<T: Send>(first: impl FnOnce() -> T + Send, second: impl FnOnce() -> T + Send) -> [T; 2] {
            let barrier = &Barrier::new(2);
            std::thread::scope(|scope| {
                let a = scope.spawn(move || {
                    barrier.wait();
                    first()
                });
                let b = scope.spawn(move || {
                    barrier.wait();
                    second()
                });
                [a.join().unwrap(), b.join().unwrap()]
            })
        }

        fn lost_race(err: &EngineError) -> bool {
            err.is_concurrency_conflict() || matches!(err.domain(), Some(DomainError::InvalidState(_)))
        }

        fn movements_of_kind(engine: &Engine, batch: BatchId, kind: MovementKind) -> usize {
            engine
                .ledger()
                .movements()
                .for_batch(batch)
                .into_iter()
                .filter(|m| m.kind == kind)
                .count()
        }

        #[test]
        fn concurrent_restocks_credit_the_batch_once() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let (dispensing_id, batch, _) = dispensed_order(&engine);
                let return_id = request_return(&engine, dispensing_id, batch, 3, ReturnReason::THERAPY_CHANGED)
                    .unwrap()
                    .id_typed();
                engine.approve_return(return_id, UserId::new()).unwrap();

                let results = race(
                    || engine.restock_return(return_id, UserId::new()),
                    || engine.restock_return(return_id, UserId::new()),
                );
                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                assert!(results.iter().filter_map(|r| r.as_ref().err()).all(lost_race));

                let after = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
                assert_eq!(after.quantity_on_hand(), 23);
                assert_eq!(movements_of_kind(&engine, batch, MovementKind::Return), 1);
                engine.ledger().reconcile(batch).unwrap();
            }
        }

        #[test]
        fn concurrent_approvals_never_return_more_than_was_dispensed() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let (dispensing_id, batch, _) = dispensed_order(&engine);
                let first = request_return(&engine, dispensing_id, batch, 6, ReturnReason::THERAPY_CHANGED)
                    .unwrap()
                    .id_typed();
                let second = request_return(&engine, dispensing_id, batch, 6, ReturnReason::PATIENT_REFUSED)
                    .unwrap()
                    .id_typed();

                let results = race(
                    || engine.approve_return(first, UserId::new()),
                    || engine.approve_return(second, UserId::new()),
                );
                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                for err in results.iter().filter_map(|r| r.as_ref().err()) {
                    assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
                }
                assert_eq!(engine.dispensing(dispensing_id).unwrap().items()[0].returned_quantity, 6);

                let restocked = [first, second]
                    .into_iter()
                    .filter(|id| engine.restock_return(*id, UserId::new()).is_ok())
                    .count();
                assert_eq!(restocked, 1);
                let after = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
                assert_eq!(after.quantity_on_hand(), 26);
                engine.ledger().reconcile(batch).unwrap();
            }
        }

        #[test]
        fn approving_one_return_twice_books_its_quantity_once() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let (dispensing_id, batch, _) = dispensed_order(&engine);
                let return_id = request_return(&engine, dispensing_id, batch, 3, ReturnReason::THERAPY_CHANGED)
                    .unwrap()
                    .id_typed();

                let results = race(
                    || engine.approve_return(return_id, UserId::new()),
                    || engine.approve_return(return_id, UserId::new()),
                );
                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                assert_eq!(engine.dispensing(dispensing_id).unwrap().items()[0].returned_quantity, 3);
                assert_eq!(engine.drug_return(return_id).unwrap().status(), ReturnStatus::Approved);
            }
        }

        #[test]
        fn concurrent_adjustment_applications_move_stock_once() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let store = LocationId::generate();
                let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
                let batch = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 20)])[0];

                let adjustment_id = AdjustmentId::generate();
                engine
                    .adjustment_command(AdjustmentCommand::RequestAdjustment(RequestAdjustment {
                        adjustment_id,
                        batch_id: batch,
                        drug_id: drug,
                        delta: -25,
                        reason: AdjustmentReason::Damaged,
                        notes: None,
                        requested_by: UserId::new(),
                        occurred_at: now(),
                    }))
                    .unwrap();
                let err = engine
                    .adjustment_command(AdjustmentCommand::ApproveAdjustment(ApproveAdjustment {
                        adjustment_id,
                        approved_by: UserId::new(),
                        occurred_at: now(),
                    }))
                    .unwrap_err();
                assert!(matches!(domain(err), DomainError::InsufficientStock { .. }));
                assert_eq!(movements_of_kind(&engine, batch, MovementKind::Adjustment), 0);

                let topped_up = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 10)])[0];
                assert_eq!(topped_up, batch);

                let results = race(
                    || engine.apply_adjustment(adjustment_id),
                    || engine.apply_adjustment(adjustment_id),
                );
                let applied: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
                assert_eq!(applied.len(), 1);
                assert_eq!(applied[0].status(), AdjustmentStatus::Applied);
                for err in results.iter().filter_map(|r| r.as_ref().err()) {
                    assert!(lost_race(err) || matches!(err.domain(), Some(DomainError::InsufficientStock { .. })));
                }

                let after = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
                assert_eq!(after.quantity_on_hand(), 5);
                assert_eq!(movements_of_kind(&engine, batch, MovementKind::Adjustment), 1);
                engine.ledger().reconcile(batch).unwrap();
            }
        }

        #[test]
        fn concurrent_transfer_receipts_leave_other_reservations_alone() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let (store, ward) = (LocationId::generate(), LocationId::generate());
                let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
                let source = receive(&engine, None, store, &[(drug, "L-1", date(2026, 9, 1), 20)])[0];
                let destination = BatchId::for_lot(drug, ward, "L-1");
                let today = now().date_naive();

                let first = transfer_with_item(&engine, store, ward, source, drug, 8);
                let second = transfer_with_item(&engine, store, ward, source, drug, 5);
                let receive_transfer = |transfer_id| {
                    engine.transfer_command(TransferCommand::ReceiveTransfer(ReceiveTransfer {
                        transfer_id,
                        received_by: UserId::new(),
                        destination_batches: vec![],
                        occurred_at: now(),
                    }))
                };

                let results = race(|| receive_transfer(first), || receive_transfer(first));
                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                assert!(results.iter().filter_map(|r| r.as_ref().err()).all(lost_race));

                let source_batch = engine.ledger().batch(source, today).unwrap().value;
                assert_eq!(source_batch.quantity_on_hand(), 12);
                assert_eq!(source_batch.quantity_reserved(), 5);
                let ward_batch = engine.ledger().batch(destination, today).unwrap().value;
                assert_eq!(ward_batch.quantity_on_hand(), 8);
                engine.ledger().reconcile(source).unwrap();
                engine.ledger().reconcile(destination).unwrap();

                let results = race(
                    || receive_transfer(second),
                    || {
                        engine.transfer_command(TransferCommand::CancelTransfer(CancelTransfer {
                            transfer_id: second,
                            reason: "ward closed".into(),
                            occurred_at: now(),
                        }))
                    },
                );
                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

                let source_batch = engine.ledger().batch(source, today).unwrap().value;
                let ward_batch = engine.ledger().batch(destination, today).unwrap().value;
                assert_eq!(source_batch.quantity_reserved(), 0);
                assert_eq!(source_batch.quantity_on_hand() + ward_batch.quantity_on_hand(), 20);
                assert!(matches!(ward_batch.quantity_on_hand(), 8 | 13));
                engine.ledger().reconcile(source).unwrap();
                engine.ledger().reconcile(destination).unwrap();
                assert_eq!(engine.stock_level(drug).unwrap().current_stock, 20);
            }
        }

        #[test]
        fn concurrent_postings_put_a_receipt_on_the_shelf_once() {
            for _ in 0..ROUNDS {
                let engine = engine();
                let store = LocationId::generate();
                let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
                let receipt_id = submitted_receipt(&engine, None, store, &[(drug, "L-7", date(2026, 9, 1), 40)]);
                engine
                    .dispatcher()
                    .dispatch_expecting(
                        RECEIPT,
                        ReceiptCommand::ApproveReceipt(ApproveReceipt {
                            receipt_id,
                            approved_by: UserId::new(),
                            occurred_at: now(),
                        }),
                        ExpectedVersion::Any,
                        |id| StockReceipt::empty(ReceiptId::new(id)),
                    )
                    .unwrap();

                let results = race(|| engine.post_receipt(receipt_id), || engine.post_receipt(receipt_id));
                let posted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
                assert_eq!(posted.len(), 1);
                assert!(results.iter().filter_map(|r| r.as_ref().err()).all(lost_race));

                let batch = BatchId::for_lot(drug, store, "L-7");
                assert_eq!(posted[0].posted_batches(), [batch]);
                let shelved = engine.ledger().batch(batch, now().date_naive()).unwrap().value;
                assert_eq!(shelved.quantity_on_hand(), 40);
                assert_eq!(movements_of_kind(&engine, batch, MovementKind::Receipt), 1);
                engine.ledger().reconcile(batch).unwrap();
            }
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 32,
                ..ProptestConfig::default()
            })]

            /// Property: preparing then cancelling leaves every batch as it was received.
            #[test]
            fn cancelled_preparation_leaves_no_reservation(
                lots in prop::collection::vec(1i64..15, 1..5),
                expiry_offsets in prop::collection::vec(10u64..400, 5),
            ) {
                let engine = engine();
                let store = LocationId::generate();
                let drug = register_drug(&engine, "AMX500", "amoxicillin", ControlFlags::default());
                let numbers: Vec<String> = (0..lots.len()).map(|i| format!("L-{i}")).collect();
                let stock: Vec<(DrugId, &str, NaiveDate, i64)> = lots
                    .iter()
                    .enumerate()
                    .map(|(i, qty)| {
                        let expiry = now().date_naive() + Duration::days(expiry_offsets[i] as i64);
                        (drug, numbers[i].as_str(), expiry, *qty)
                    })
                    .collect();
                let batches = receive(&engine, None, store, &stock);
                let total: i64 = lots.iter().sum();

                let prescription_id = prescribe(&engine, PatientId::generate(), &[drug], &[UserId::new()]);
                let dispensing_id = open_dispensing(&engine, prescription_id, store, false);
                let prepared = engine.start_preparing(dispensing_id, UserId::new());
                prop_assert_eq!(prepared.is_ok(), total >= 10);

                engine
                    .cancel_dispensing(CancelDispensing {
                        dispensing_id,
                        cancelled_by: UserId::new(),
                        reason: "prescriber withdrew".into(),
                        occurred_at: now(),
                    })
                    .unwrap();

                for (batch_id, qty) in batches.iter().zip(&lots) {
                    let batch = engine.ledger().batch(*batch_id, now().date_naive()).unwrap().value;
                    prop_assert_eq!(batch.quantity_reserved(), 0);
                    prop_assert_eq!(batch.quantity_on_hand(), *qty);
                    engine.ledger().reconcile(*batch_id).unwrap();
                }
                prop_assert_eq!(engine.prescription(prescription_id).unwrap().claimable_quantity(1), 10);
            }
        }
    }
}
