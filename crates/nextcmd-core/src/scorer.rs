/// Lexical similarity between a query and every entry of a corpus.
///
/// Implementations must not keep fitted state between calls: the corpus is
/// the caller's per-request history, so any vocabulary is rebuilt from it
/// every time and dropped when the call returns.
pub trait LexicalScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one score per corpus entry, in corpus order.
    fn similarities(&self, corpus: &[String], query: &str) -> Vec<f64>;
}
