use super::*;

#[test]
fn prompt_contains_question_and_context() {
    let prompt = build_prompt(
        "What is the capital of France?",
        &["Paris is the capital of France.", "It hosts the Eiffel Tower."],
    );

    assert!(prompt.contains("What is the capital of France?"));
    assert!(prompt.contains("Paris is the capital of France."));
    assert!(prompt.contains("It hosts the Eiffel Tower."));
}

#[test]
fn context_chunks_joined_by_newline_in_rank_order() {
    let prompt = build_prompt("q", &["closest chunk", "second chunk", "third chunk"]);

    assert!(prompt.contains("closest chunk\nsecond chunk\nthird chunk"));
}

#[test]
fn prompt_carries_escape_phrase() {
    let prompt = build_prompt("q", &["some context"]);

    assert!(prompt.contains(NO_ANSWER_PHRASE));
}

#[test]
fn empty_context_still_produces_full_template() {
    let prompt = build_prompt("What is the capital of France?", &[]);

    assert!(prompt.contains("Context:"));
    assert!(prompt.contains("Question: What is the capital of France?"));
    assert!(prompt.ends_with("Answer:"));
}

#[test]
fn prompt_is_deterministic() {
    let first = build_prompt("q", &["a", "b"]);
    let second = build_prompt("q", &["a", "b"]);

    assert_eq!(first, second);
}
