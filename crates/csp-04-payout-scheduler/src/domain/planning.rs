//! # Batch Planning
//!
//! Selects who gets paid and groups the outputs into transactions.

use csp_02_participant_ledger::{Participant, PayoutEntry};
use shared_types::{BlockHeight, PoolParameters};

/// Whether `participant` is due a payout at `current_height`.
pub fn is_eligible(participant: &Participant, params: &PoolParameters, current_height: BlockHeight) -> bool {
    let amount = participant.unpaid;
    if amount == 0 || amount < params.payout_threshold || amount < params.min_output_value {
        return false;
    }
    match participant.last_payout_height {
        Some(last) => current_height.saturating_sub(last) >= params.min_blocks_between_payments,
        None => true,
    }
}

/// Payout entries for every eligible participant, ordered by id and chunked
/// into batches of at most `max_outputs` outputs.
pub fn plan_batches(
    participants: &[Participant],
    params: &PoolParameters,
    current_height: BlockHeight,
    max_outputs: usize,
) -> Vec<Vec<PayoutEntry>> {
    let mut due: Vec<&Participant> = participants
        .iter()
        .filter(|p| is_eligible(p, params, current_height))
        .collect();
    due.sort_by(|a, b| a.id.cmp(&b.id));

    due.chunks(max_outputs.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(|p| PayoutEntry::new(p.id.clone(), p.unpaid))
                .collect()
        })
        .collect()
}
