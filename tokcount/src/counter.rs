//! Token counting with the BPE tokenizers OpenAI publishes for its models.
//!
//! The tokenizer itself lives in `tiktoken-rs`.  This module only resolves a model identifier to
//! the right encoder, applies the special token policy, and counts what comes out.
use crate::error::{DisallowedSpecialTokenSnafu, InvalidUtf8Snafu, StdinIoSnafu};
use crate::Result;
use snafu::ResultExt;
use std::fmt;
use std::io::Read;
use strum::EnumString;
use tracing::*;

pub type Tokenizer = tiktoken_rs::tokenizer::Tokenizer;
pub type Encoder = tiktoken_rs::CoreBPE;

/// The model whose tokenizer is used when none is given explicitly.
///
/// This is not one of the model names `tiktoken` knows about, so counting with it fails with
/// [`crate::TokcountError::UnknownModel`].  It is kept verbatim; pick a real model with
/// [`TokenCounter::for_model`] (or `--model` on the command line).
pub const MODEL: &str = "gpt-4ocode";

/// Markers that some encodings reserve as "special" tokens.
///
/// Which of these an encoding actually treats as special is worked out per encoder when a
/// [`TokenCounter`] is created.
const SPECIAL_TOKEN_MARKERS: &[&str] = &[
    "<|endoftext|>",
    "<|fim_prefix|>",
    "<|fim_middle|>",
    "<|fim_suffix|>",
    "<|endofprompt|>",
];

/// How to treat special token markers like `<|endoftext|>` that appear in the input text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SpecialTokens {
    /// Refuse to count text that contains a special token marker.  This is what `tiktoken` does
    /// by default.
    #[default]
    Disallow,

    /// Count each special token marker as the single special token it stands for.
    Allow,

    /// Treat special token markers as ordinary text, splitting them into subword tokens.
    Ordinary,
}

/// Get the `tiktoken-rs` tokenizer that OpenAI uses for the given model.
pub fn get_tokenizer_for_model(model: &str) -> Result<Tokenizer> {
    tiktoken_rs::tokenizer::get_tokenizer(model).ok_or_else(|| {
        crate::error::UnknownModelSnafu {
            model: model.to_string(),
        }
        .build()
    })
}

pub fn get_encoder_for_tokenizer(tokenizer: Tokenizer) -> Result<Encoder> {
    tiktoken_rs::get_bpe_from_tokenizer(tokenizer).map_err(|e| {
        crate::error::TikTokenRsSnafu {
            inner: format!("{e:#}"),
        }
        .build()
    })
}

/// A tokenizer bound to one model, ready to count tokens.
///
/// Loading the encoder tables is the expensive part, so create one of these and reuse it for as
/// many counts as needed.
pub struct TokenCounter {
    model: String,
    tokenizer: Tokenizer,
    encoder: Encoder,
    special_tokens: SpecialTokens,

    /// The subset of [`SPECIAL_TOKEN_MARKERS`] that this encoder treats as special tokens
    special_markers: Vec<&'static str>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The encoder tables are huge and not useful in debug output
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .field("tokenizer", &self.tokenizer)
            .field("special_tokens", &self.special_tokens)
            .field("special_markers", &self.special_markers)
            .finish_non_exhaustive()
    }
}

impl TokenCounter {
    /// Resolve `model` to its tokenizer and load the encoder for it.
    pub fn for_model(model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let tokenizer = get_tokenizer_for_model(&model)?;
        debug!(model = %model, ?tokenizer, "Loading encoder");

        let encoder = get_encoder_for_tokenizer(tokenizer)?;

        // A marker is special for this encoder if encoding it with special tokens enabled yields a
        // single token, while encoding it as ordinary text does not
        let special_markers = SPECIAL_TOKEN_MARKERS
            .iter()
            .copied()
            .filter(|marker| {
                encoder.encode_with_special_tokens(marker).len() == 1
                    && encoder.encode_ordinary(marker).len() > 1
            })
            .collect();

        Ok(Self {
            model,
            tokenizer,
            encoder,
            special_tokens: SpecialTokens::default(),
            special_markers,
        })
    }

    /// Use a different policy for special token markers in the input text.
    pub fn with_special_tokens(mut self, special_tokens: SpecialTokens) -> Self {
        self.special_tokens = special_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tokenizer(&self) -> Tokenizer {
        self.tokenizer
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special_tokens
    }

    /// Count the tokens in `text`.
    ///
    /// This only fails if the special token policy is [`SpecialTokens::Disallow`] and `text`
    /// contains a special token marker.
    pub fn count(&self, text: &str) -> Result<usize> {
        let tokens = match self.special_tokens {
            SpecialTokens::Disallow => {
                if let Some(token) = self.find_special_token(text) {
                    return DisallowedSpecialTokenSnafu { token }.fail();
                }
                self.encoder.encode_ordinary(text)
            }
            SpecialTokens::Allow => self.encoder.encode_with_special_tokens(text),
            SpecialTokens::Ordinary => self.encoder.encode_ordinary(text),
        };

        trace!(model = %self.model, bytes = text.len(), tokens = tokens.len(), "Counted tokens");

        Ok(tokens.len())
    }

    /// Find the special token marker that appears first in `text`, if any.
    fn find_special_token(&self, text: &str) -> Option<&'static str> {
        self.special_markers
            .iter()
            .filter_map(|marker| text.find(*marker).map(|offset| (offset, *marker)))
            .min_by_key(|(offset, _)| *offset)
            .map(|(_, marker)| marker)
    }
}

/// Count the tokens in `text` using the tokenizer for [`MODEL`].
pub fn count_tokens(text: &str) -> Result<usize> {
    TokenCounter::for_model(MODEL)?.count(text)
}

/// Read everything from `reader` until end of input, and decode it as text.
///
/// The input must be valid UTF-8.  Line endings are translated the way text-mode reads usually
/// do it: `\r\n` and lone `\r` both become `\n`.
pub fn read_text(mut reader: impl Read) -> Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).context(StdinIoSnafu)?;
    debug!(bytes = bytes.len(), "Read input text");

    let text = String::from_utf8(bytes).context(InvalidUtf8Snafu)?;

    Ok(normalize_newlines(text))
}

pub(crate) fn normalize_newlines(text: String) -> String {
    if !text.contains('\r') {
        return text;
    }

    text.replace("\r\n", "\n").replace('\r', "\n")
}
