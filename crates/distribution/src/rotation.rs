//! Round-robin with cooldown.

use std::collections::HashMap;

use switchboard_conversations::Operator;

/// Pick the next operator for an offer.
///
/// `members` follows the department's member list, with `None` for ids that
/// no longer resolve to an operator, and `start` is the department's rotation
/// pointer into that list. Scanning begins at `start` and wraps. An operator
/// is skipped when they do not take offers (offline), when their active count
/// has reached `max_concurrent`, or when they are `cooling` (they resolved
/// this conversation within the cooldown window) while someone else could
/// take it. Returns the member position of the chosen operator.
///
/// The cooldown only binds while another member is under their chat limit;
/// an online or busy operator who is full does not count.
pub fn pick(
    members: &[Option<&Operator>],
    start: usize,
    active: &HashMap<String, u32>,
    cooling: Option<&str>,
) -> Option<usize> {
    let n = members.len();
    if n == 0 {
        return None;
    }

    let available = |op: &Operator| {
        op.status.receives_offers() && active.get(&op.id).copied().unwrap_or(0) < op.max_concurrent
    };
    // Waived when the cooling operator is the only one who could take it.
    let cooldown_binds = cooling.is_some_and(|cooling_id| {
        members
            .iter()
            .flatten()
            .any(|op| op.id != cooling_id && available(op))
    });

    (0..n).map(|i| (start + i) % n).find(|&idx| {
        members[idx].is_some_and(|op| {
            available(op) && !(cooldown_binds && cooling == Some(op.id.as_str()))
        })
    })
}
