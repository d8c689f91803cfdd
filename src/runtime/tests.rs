use super::*;

#[test]
fn batch_rejects_tokens_over_capacity() {
    let mut batch = TokenBatch::new(2);
    batch.push(1, 0, 0).expect("first token should fit");
    batch.push(2, 1, 0).expect("second token should fit");

    let err = batch.push(3, 2, 0).expect_err("third token should be rejected");
    assert!(matches!(err, RagError::Tokenization(_)));
    assert_eq!(batch.len(), 2);
}

#[test]
fn push_sequence_assigns_positions_from_zero() {
    let mut batch = TokenBatch::new(16);
    batch
        .push_sequence(&[10, 11, 12], 7)
        .expect("sequence should fit");

    let items = batch.items();
    assert_eq!(items.len(), 3);
    for (expected_position, item) in items.iter().enumerate() {
        assert_eq!(item.position, expected_position);
        assert_eq!(item.sequence, 7);
    }
}

#[test]
fn push_sequence_fails_when_budget_runs_out() {
    let mut batch = TokenBatch::new(2);
    let err = batch
        .push_sequence(&[1, 2, 3], 0)
        .expect_err("three tokens should not fit in a two-token batch");
    assert!(matches!(err, RagError::Tokenization(_)));
    // The admitted prefix stays in the batch.
    assert_eq!(batch.len(), 2);
}

#[test]
fn remaining_tracks_admitted_tokens() {
    let mut batch = TokenBatch::new(4);
    assert_eq!(batch.remaining(), 4);

    batch.push_sequence(&[1, 2, 3], 0).expect("sequence should fit");
    assert_eq!(batch.remaining(), 1);

    batch.clear();
    assert!(batch.is_empty());
    assert_eq!(batch.remaining(), 4);
}

#[test]
fn sequence_ids_in_first_seen_order() {
    let mut batch = TokenBatch::new(8);
    batch.push_sequence(&[1, 2], 3).expect("sequence should fit");
    batch.push_sequence(&[3], 1).expect("sequence should fit");
    batch.push_sequence(&[4, 5], 3).expect("sequence should fit");

    assert_eq!(batch.sequence_ids(), vec![3, 1]);
}

#[test]
fn forward_pass_returns_pooled_when_set() {
    let mut pass = ForwardPass::new(3);
    pass.set_pooled(0, vec![1.0, 0.0, 0.0]);

    assert_eq!(pass.dimension(), 3);
    assert_eq!(pass.pooled(0), Some([1.0, 0.0, 0.0].as_slice()));
    assert_eq!(pass.pooled(1), None);
}

#[test]
fn forward_pass_token_vectors_keep_order() {
    let mut pass = ForwardPass::new(2);
    pass.push_token_vector(5, vec![1.0, 2.0]);
    pass.push_token_vector(5, vec![3.0, 4.0]);

    let vectors = pass.token_vectors(5);
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vec![1.0, 2.0]);
    assert_eq!(vectors[1], vec![3.0, 4.0]);
}

#[test]
fn forward_pass_unknown_sequence_is_empty() {
    let pass = ForwardPass::new(4);
    assert!(pass.token_vectors(9).is_empty());
    assert_eq!(pass.pooled(9), None);
}
