use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TokcountError {
    #[snafu(display("No tokenizer found for model '{model}'"))]
    UnknownModel { model: String },

    #[snafu(display("tiktoken-rs error: {inner}"))]
    TikTokenRs { inner: String },

    #[snafu(display("Error reading input text"))]
    StdinIo { source: std::io::Error },

    #[snafu(display("Input text is not valid UTF-8"))]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    #[snafu(display(
        "Input text contains the special token '{token}', which is disallowed by the current special token policy"
    ))]
    DisallowedSpecialToken { token: String },

    #[snafu(display("File I/O error on file '{}'", path.display()))]
    FileIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error walking directory '{}'", path.display()))]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}
