use tracing::info;

use crate::core::error::PartialRecordError;

/// Largest batch forwarded upstream; anything past it is ignored
pub const MAX_BATCH: usize = 50;

/// Output records that can stand in for an identifier that failed to resolve
pub trait BatchRecord {
    fn placeholder(identifier: &str, error: &PartialRecordError) -> Self;
}

/// Keep the first [`MAX_BATCH`] identifiers
pub fn cap_batch<T>(mut identifiers: Vec<T>) -> Vec<T> {
    if identifiers.len() > MAX_BATCH {
        info!(
            "(Assembler) Batch of {} identifiers truncated to {}",
            identifiers.len(),
            MAX_BATCH
        );
        identifiers.truncate(MAX_BATCH);
    }
    identifiers
}

/// One record per requested identifier, in request order. Failures become placeholders.
pub fn assemble<R, F>(requested: &[String], mut resolve: F) -> Vec<R>
where
    R: BatchRecord,
    F: FnMut(usize, &str) -> Result<R, PartialRecordError>,
{
    requested
        .iter()
        .enumerate()
        .map(|(idx, identifier)| match resolve(idx, identifier) {
            Ok(record) => record,
            Err(err) => R::placeholder(identifier, &err),
        })
        .collect()
}
