/// Execute an aggregate command in memory: decide, then evolve.
///
/// Useful in tests and for dry runs; persistence and publication go through the
/// infra dispatcher instead.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: pharmledger_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
