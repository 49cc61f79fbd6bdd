use super::{Record, RecordId};
use crate::prelude::*;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::prelude::*;
use std::collections::HashSet;

/// Result of an attempt to delete a published item on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DeleteOutcome {
    /// The remote side confirmed the removal
    #[display(fmt = "deleted")]
    Deleted,

    /// The item doesn't exist on the remote side anymore or can never be
    /// deleted. The end state matches the intent, so this is a success.
    #[display(fmt = "already_gone")]
    AlreadyGone,

    /// Timeout, rate limit or any other failure unrelated to the item's
    /// existence. The record must survive to be retried on the next sweep.
    #[display(fmt = "other_error")]
    OtherError,
}

/// Capability to delete a published item on the remote side.
///
/// Deleting an already removed item must resolve to [`DeleteOutcome::AlreadyGone`].
/// An [`Err`] means the remote channel is unreachable as a whole (e.g. the
/// credentials are invalid), so no further progress is possible and the
/// sweep is aborted.
#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, id: &RecordId) -> Result<DeleteOutcome>;
}

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Records strictly older than this are deleted
    pub max_age: chrono::Duration,

    /// Hard ceiling on the number of records kept in the ledger. The oldest
    /// records above it are evicted regardless of their age and the outcome
    /// of their deletion.
    pub max_retained: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of records confirmed to be deleted by the remote side
    pub deleted: usize,

    /// Number of records whose items were already gone on the remote side
    pub already_gone: usize,

    /// Number of delete attempts that failed with [`DeleteOutcome::OtherError`]
    pub errored: usize,

    /// Number of records dropped by the [`SweepPolicy::max_retained`] ceiling
    pub evicted: usize,

    /// Number of records left in the ledger after the sweep
    pub retained: usize,
}

impl SweepReport {
    fn count(&mut self, outcome: DeleteOutcome) {
        match outcome {
            DeleteOutcome::Deleted => self.deleted += 1,
            DeleteOutcome::AlreadyGone => self.already_gone += 1,
            DeleteOutcome::OtherError => self.errored += 1,
        }
    }
}

pub(crate) struct SweepOutput {
    pub(crate) retained: Vec<Record>,
    pub(crate) report: SweepReport,

    /// Set if the deleter reported that no progress is possible
    pub(crate) abort: Option<Error>,
}

/// Partitions the records into the ones that stay in the ledger and the ones
/// that are removed from it, deleting the latter on the remote side.
/// The relative order of the retained records is preserved.
pub(crate) async fn sweep(
    records: Vec<Record>,
    now: DateTime<Utc>,
    deleter: &dyn Deleter,
    policy: &SweepPolicy,
) -> SweepOutput {
    let mut report = SweepReport::default();

    let (evicted, remaining) = split_excess(records, policy.max_retained);

    report.evicted = evicted.len();

    if !evicted.is_empty() {
        info!(
            evicted = evicted.len(),
            max_retained = ?policy.max_retained,
            "The ledger exceeds its capacity, evicting the oldest records",
        );
    }

    for record in &evicted {
        let outcome = match deleter.delete(&record.id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    err = tracing_err(&err),
                    message_id = %record.id,
                    "Aborting the sweep, because the remote channel is unreachable",
                );
                report.retained = remaining.len();
                return SweepOutput {
                    retained: remaining,
                    report,
                    abort: Some(err),
                };
            }
        };

        report.count(outcome);

        info!(
            message_id = %record.id,
            %outcome,
            "Evicted the record from the ledger",
        );
    }

    let mut retained = Vec::with_capacity(remaining.len());
    let mut remaining = remaining.into_iter();

    while let Some(record) = remaining.next() {
        let age = record.age(now);

        if age <= policy.max_age {
            debug!(
                message_id = %record.id,
                %age,
                "The record is not due for deletion yet",
            );
            retained.push(record);
            continue;
        }

        let outcome = match deleter.delete(&record.id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    err = tracing_err(&err),
                    message_id = %record.id,
                    "Aborting the sweep, because the remote channel is unreachable",
                );
                retained.push(record);
                retained.extend(remaining);
                report.retained = retained.len();
                return SweepOutput {
                    retained,
                    report,
                    abort: Some(err),
                };
            }
        };

        report.count(outcome);

        match outcome {
            DeleteOutcome::Deleted => {
                info!(message_id = %record.id, %age, "Deleted the expired message");
            }
            DeleteOutcome::AlreadyGone => {
                info!(
                    message_id = %record.id,
                    %age,
                    "The expired message is already gone, forgetting about it",
                );
            }
            DeleteOutcome::OtherError => {
                warn!(
                    message_id = %record.id,
                    %age,
                    "Failed to delete the expired message, will retry on the next sweep",
                );
                retained.push(record);
            }
        }
    }

    report.retained = retained.len();

    SweepOutput {
        retained,
        report,
        abort: None,
    }
}

/// Splits off the oldest records that exceed `max_retained`. Ties in the
/// publishing time are broken by the position in the ledger.
fn split_excess(records: Vec<Record>, max_retained: Option<usize>) -> (Vec<Record>, Vec<Record>) {
    let excess = max_retained.map_or(0, |max| records.len().saturating_sub(max));

    if excess == 0 {
        return (vec![], records);
    }

    let mut by_age: Vec<usize> = (0..records.len()).collect();

    // Stable sort keeps the original order for equal timestamps
    by_age.sort_by_key(|&i| records[i].published_at);

    let excess_indices: HashSet<_> = by_age[..excess].iter().copied().collect();

    let (evicted, remaining): (Vec<_>, Vec<_>) = records
        .into_iter()
        .enumerate()
        .partition(|(i, _)| excess_indices.contains(i));

    let mut evicted: Vec<_> = evicted.into_iter().map(|(_, record)| record).collect();
    evicted.sort_by_key(|record| record.published_at);

    let remaining = remaining.into_iter().map(|(_, record)| record).collect();

    (evicted, remaining)
}
