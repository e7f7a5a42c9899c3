//! Prompt construction

/// Answer returned when retrieval finds no documents; the model is not called.
pub const NO_CONTEXT_ANSWER: &str = "No context available: no documents have been ingested yet.";

/// Build the single-message prompt from retrieved documents and the query.
///
/// Documents appear in the order given, one per line.
pub fn build_prompt(documents: &[&str], query: &str) -> String {
    format!(
        "Given the following documents:\n{}\n\nAnswer this query:\n{}",
        documents.join("\n"),
        query
    )
}
