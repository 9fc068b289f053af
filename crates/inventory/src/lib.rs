//! Inventory domain module.
//!
//! Batch quantities are plain versioned records owned by the
//! [`StockBatchLedger`]; receipts, transfers and adjustments are event-sourced
//! workflows whose stock side effects the engine applies through the ledger.

pub mod adjustment;
pub mod batch;
pub mod fefo;
pub mod ledger;
pub mod movement;
pub mod receipt;
pub mod stock_level;
pub mod store;
pub mod transfer;

pub use adjustment::{
    AdjustmentApplied, AdjustmentApproved, AdjustmentCommand, AdjustmentEvent, AdjustmentId,
    AdjustmentReason, AdjustmentRejected, AdjustmentRequested, AdjustmentStatus,
    ApproveAdjustment, MarkAdjustmentApplied, RejectAdjustment, RequestAdjustment,
    StockAdjustment,
};
pub use batch::{BatchId, BatchMutation, IncomingStock, LocationId, StockBatch};
pub use fefo::{Allocation, AllocationLine, AllocationRequest, FulfillmentPolicy};
pub use ledger::{LedgerConfig, ReceivedStock, StockBatchLedger};
pub use movement::{
    InMemoryMovementLog, MovementDirection, MovementKind, MovementLog, MovementReference,
    ReferenceKind, StockMovement,
};
pub use receipt::{
    AddReceiptItem, ApproveReceipt, CreateReceipt, MarkReceiptPosted, ReceiptCommand,
    ReceiptEvent, ReceiptId, ReceiptItem, ReceiptStatus, RejectReceipt, RemoveReceiptItem,
    StockReceipt, SubmitReceipt,
};
pub use stock_level::{ExpiryAlert, StockLevel};
pub use store::{BatchFilter, BatchStore, InMemoryBatchStore};
pub use transfer::{
    AddTransferItem, CancelTransfer, CreateTransfer, DispatchTransfer, ReceiveTransfer,
    StockTransfer, TransferCommand, TransferEvent, TransferId, TransferItem, TransferStatus,
};
