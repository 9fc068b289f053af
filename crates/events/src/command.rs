use pharmledger_core::AggregateId;

/// A command targets exactly one aggregate stream.
///
/// Commands are intent ("verify this prescription"); the events an aggregate
/// returns for them are facts. A command is the transaction boundary: it is
/// handled against a single aggregate instance and either all of its events
/// are appended or none are.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
