//! Grounded prompt assembly for retrieval-augmented completion.
//!
//! The template constrains the model to the retrieved context and gives it an
//! explicit escape phrase for questions the context cannot answer.

#[cfg(test)]
mod tests;

/// Reply the model is instructed to give when the context does not contain
/// the answer.
pub const NO_ANSWER_PHRASE: &str = "No answer found in the provided documents.";

/// Builds the completion prompt for a question grounded in retrieved chunks.
///
/// # Arguments
/// * `question` - The user's raw question
/// * `context_chunks` - Retrieved chunk contents in retrieval-rank order
///
/// # Returns
/// A single prompt string with an instruction preamble, the context joined by
/// newlines, and the question.
pub fn build_prompt(question: &str, context_chunks: &[&str]) -> String {
    let context = context_chunks.join("\n");

    format!(
        "Answer the question using only the context below. \
         If the context does not contain the answer, reply with exactly: \"{NO_ANSWER_PHRASE}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:"
    )
}
