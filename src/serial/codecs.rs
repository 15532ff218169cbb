/// Newline delimited lines.
pub(crate) mod lines;
