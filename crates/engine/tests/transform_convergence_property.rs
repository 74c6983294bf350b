// Convergence property for the operational transform.
//
// Two clients concurrently edit the same base text. Whichever order the
// pair of operations is applied in (each transformed against the one
// already applied), the buffers must converge.

use proptest::prelude::*;
use uuid::Uuid;

use huddle_common::types::{OperationKind, TextOperation};
use huddle_engine::collab::transform::{apply, normalize, rebase};

/// Build an in-bounds operation against a buffer of `base_len` chars.
fn build_op(
    base_len: u32,
    choice: u8,
    pos_seed: u32,
    len_seed: u32,
    text: String,
    user: &str,
) -> TextOperation {
    let pos = if base_len == 0 { 0 } else { pos_seed % (base_len + 1) };
    let max_del = base_len - pos;
    let len = if max_del == 0 { 0 } else { len_seed % (max_del + 1) };
    let kind = match choice % 3 {
        0 => OperationKind::Insert { text },
        1 => OperationKind::Delete { len },
        _ => OperationKind::Replace { len, text },
    };
    TextOperation {
        id: Uuid::new_v4(),
        user_id: user.to_string(),
        pos,
        kind,
        // Concurrent: same clock, neither has seen the other.
        clock: 1,
        base_clock: 0,
    }
}

fn apply_all(buffer: &mut String, components: Vec<TextOperation>) {
    for component in components {
        apply(buffer, &component);
    }
}

fn apply_both_orders(base: &str, a: &TextOperation, b: &TextOperation) -> (String, String) {
    let mut left = base.to_string();
    apply_all(&mut left, normalize(a.clone()));
    apply_all(&mut left, rebase(b.clone(), std::slice::from_ref(a)));

    let mut right = base.to_string();
    apply_all(&mut right, normalize(b.clone()));
    apply_all(&mut right, rebase(a.clone(), std::slice::from_ref(b)));

    (left, right)
}

proptest! {
    #[test]
    fn concurrent_operation_pairs_converge(
        base in "[a-z]{0,12}",
        choice_a in 0u8..3,
        choice_b in 0u8..3,
        pos_a in 0u32..16,
        pos_b in 0u32..16,
        len_a in 0u32..16,
        len_b in 0u32..16,
        text_a in "[A-Z]{0,4}",
        text_b in "[A-Z]{0,4}",
    ) {
        let base_len = base.chars().count() as u32;
        let a = build_op(base_len, choice_a, pos_a, len_a, text_a, "user-a");
        let b = build_op(base_len, choice_b, pos_b, len_b, text_b, "user-b");

        let (left, right) = apply_both_orders(&base, &a, &b);
        prop_assert_eq!(left, right);
    }

    #[test]
    fn transform_is_identity_for_disjoint_prefix_suffix_edits(
        prefix in "[a-z]{1,6}",
        suffix in "[a-z]{1,6}",
        text in "[A-Z]{1,4}",
    ) {
        // An insert at the very start and one at the very end never
        // interfere: both orders must leave text at both ends.
        let base = format!("{prefix}{suffix}");
        let base_len = base.chars().count() as u32;
        let a = build_op(base_len, 0, 0, 0, text.clone(), "user-a");
        let b = build_op(base_len, 0, base_len, 0, text.clone(), "user-b");

        let (left, right) = apply_both_orders(&base, &a, &b);
        prop_assert_eq!(&left, &right);
        prop_assert!(left.starts_with(&text));
        prop_assert!(left.ends_with(&text));
    }
}
