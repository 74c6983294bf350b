// Operational transform over flat char offsets.
//
// Operations are normalized into primitive components first: a replace is
// a delete followed by an insert at the same position, and no-op
// components are dropped. `rebase` then walks an operation's components
// against the concurrent components already applied, rebasing each side
// over the other, which is what makes composite operations converge.
//
// The primitive pair rules are closed under a single operation (no
// splitting): an insert landing strictly inside a concurrent delete's
// range is swallowed by the delete, and its dual becomes a no-op. For any
// pair of concurrent in-bounds operations the two application orders
// converge (see the convergence property test).
//
// Position ties between two inserts are broken by the `(clock, user_id)`
// total order, carried in as `earlier_precedes`.

use huddle_common::types::{OperationKind, TextOperation};

/// Split an operation into primitive components in application order.
/// Replace becomes delete-then-insert (same position — the insert lands
/// where the deleted range began); empty components are dropped.
pub fn normalize(op: TextOperation) -> Vec<TextOperation> {
    let TextOperation { id, user_id, pos, kind, clock, base_clock } = op;
    let rebuild = |user_id: String, kind: OperationKind| TextOperation {
        id,
        user_id,
        pos,
        kind,
        clock,
        base_clock,
    };

    match kind {
        OperationKind::Insert { text } if text.is_empty() => Vec::new(),
        OperationKind::Insert { text } => {
            vec![rebuild(user_id, OperationKind::Insert { text })]
        }
        OperationKind::Delete { len: 0 } => Vec::new(),
        OperationKind::Delete { len } => vec![rebuild(user_id, OperationKind::Delete { len })],
        OperationKind::Replace { len, text } => {
            let mut components = Vec::new();
            if len > 0 {
                components.push(rebuild(user_id.clone(), OperationKind::Delete { len }));
            }
            if !text.is_empty() {
                components.push(rebuild(user_id, OperationKind::Insert { text }));
            }
            components
        }
    }
}

/// Transform `op` so it applies on top of the `earlier` operations (in
/// their application order), none of which `op`'s originator had seen.
/// Returns `op`'s primitive components, ready to apply in order.
///
/// Each earlier component is rebased over the components of `op` as the
/// walk proceeds, so the second component of a replace meets the earlier
/// operations in the coordinate frame that its own delete produced.
pub fn rebase(op: TextOperation, earlier: &[TextOperation]) -> Vec<TextOperation> {
    let mut components = normalize(op);
    let mut earlier: Vec<TextOperation> =
        earlier.iter().flat_map(|e| normalize(e.clone())).collect();

    for component in components.iter_mut() {
        for concurrent in earlier.iter_mut() {
            let before = component.clone();
            let concurrent_precedes = concurrent.order_key() < component.order_key();
            transform(component, concurrent, concurrent_precedes);
            transform(concurrent, &before, !concurrent_precedes);
        }
    }
    components
}

/// Transform `op` so it applies on top of `earlier`, an operation that has
/// already been applied to the buffer but that `op`'s originator had not
/// seen. `earlier_precedes` is the `(clock, user_id)` tie-break: true when
/// `earlier` sorts before `op` in the shared total order.
pub fn transform(op: &mut TextOperation, earlier: &TextOperation, earlier_precedes: bool) {
    let (e_pos, e_del, e_ins) = effect(earlier);
    if e_del > 0 {
        transform_against_delete(op, e_pos, e_del);
    }
    if e_ins > 0 {
        transform_against_insert(op, e_pos, e_ins, earlier_precedes);
    }
}

/// Apply an operation to the buffer. Positions are char offsets, clamped to
/// the buffer bounds; a malformed position never panics.
pub fn apply(buffer: &mut String, op: &TextOperation) {
    match &op.kind {
        OperationKind::Insert { text } => {
            insert_at(buffer, op.pos, text);
        }
        OperationKind::Delete { len } => {
            delete_range(buffer, op.pos, *len);
        }
        OperationKind::Replace { len, text } => {
            delete_range(buffer, op.pos, *len);
            insert_at(buffer, op.pos, text);
        }
    }
}

/// The footprint of an operation: position, chars removed, chars added.
fn effect(op: &TextOperation) -> (u32, u32, u32) {
    match &op.kind {
        OperationKind::Insert { text } => (op.pos, 0, char_len(text)),
        OperationKind::Delete { len } => (op.pos, *len, 0),
        OperationKind::Replace { len, text } => (op.pos, *len, char_len(text)),
    }
}

fn transform_against_delete(op: &mut TextOperation, d_pos: u32, d_len: u32) {
    let d_end = d_pos + d_len;
    match &mut op.kind {
        OperationKind::Insert { text } => {
            if op.pos <= d_pos {
                // At or before the deleted range: untouched.
            } else if op.pos >= d_end {
                op.pos -= d_len;
            } else {
                // Strictly inside the deleted range: the delete wins.
                op.pos = d_pos;
                text.clear();
            }
        }
        OperationKind::Delete { len } | OperationKind::Replace { len, .. } => {
            let pos = op.pos;
            let end = pos + *len;
            if d_pos >= end {
                // Earlier delete is entirely after this range: untouched.
            } else if d_end <= pos {
                op.pos -= d_len;
            } else {
                // Overlap: shift by the part before us, shrink by the part
                // we both cover.
                let before = d_pos_chars_before(pos, d_pos, d_len);
                let overlap = d_end.min(end) - d_pos.max(pos);
                op.pos = pos - before;
                *len -= overlap;
            }
        }
    }
}

fn transform_against_insert(op: &mut TextOperation, i_pos: u32, i_len: u32, earlier_precedes: bool) {
    match &mut op.kind {
        OperationKind::Insert { .. } => {
            if i_pos < op.pos || (i_pos == op.pos && earlier_precedes) {
                op.pos += i_len;
            }
        }
        OperationKind::Delete { len } | OperationKind::Replace { len, .. } => {
            let pos = op.pos;
            let end = pos + *len;
            if i_pos <= pos {
                op.pos += i_len;
            } else if i_pos >= end {
                // After the range: untouched.
            } else {
                // Inserted text sits inside the range being removed:
                // swallow it so both sides converge.
                *len += i_len;
            }
        }
    }
}

/// Chars of the deleted range `[d_pos, d_pos + d_len)` that lie before `pos`.
fn d_pos_chars_before(pos: u32, d_pos: u32, d_len: u32) -> u32 {
    if d_pos >= pos {
        0
    } else {
        (pos - d_pos).min(d_len)
    }
}

fn char_len(s: &str) -> u32 {
    s.chars().count() as u32
}

fn insert_at(buffer: &mut String, pos: u32, text: &str) {
    let idx = byte_index(buffer, pos);
    buffer.insert_str(idx, text);
}

fn delete_range(buffer: &mut String, pos: u32, len: u32) {
    let start = byte_index(buffer, pos);
    let end = byte_index(buffer, pos.saturating_add(len));
    buffer.drain(start..end);
}

/// Byte index of the given char offset, clamped to the buffer end.
fn byte_index(buffer: &str, char_offset: u32) -> usize {
    buffer
        .char_indices()
        .nth(char_offset as usize)
        .map(|(idx, _)| idx)
        .unwrap_or(buffer.len())
}
