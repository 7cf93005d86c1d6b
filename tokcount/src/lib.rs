//! Count the tokens a BPE tokenizer produces for a piece of text, the way OpenAI models count
//! them, and assemble collections of source files into prompts whose size is reported in tokens.
pub mod counter;
mod error;
pub mod prompt;

pub use counter::{count_tokens, read_text, SpecialTokens, TokenCounter, MODEL};
pub use error::TokcountError;

/// Error types for the tokcount crate.
pub type Result<T> = std::result::Result<T, TokcountError>;
