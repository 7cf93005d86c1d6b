//! Run the `tok` binary the way a user would, feeding it stdin and checking what comes out.
use std::io::Write;
use std::process::{Command, Output, Stdio};

const TOK: &str = env!("CARGO_BIN_EXE_tok");

fn tok(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(TOK)
        .args(args)
        .env_remove("TOKCOUNT_MODEL")
        .env_remove("TOKCOUNT_SPECIAL_TOKENS")
        .env_remove("TOKCOUNT_IGNORE_SUFFIXES")
        .env_remove("TOKCOUNT_IGNORE_FOLDERS")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Dropping stdin after writing closes the stream
    child.stdin.take().unwrap().write_all(stdin).unwrap();

    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> &str {
    std::str::from_utf8(&output.stdout).unwrap()
}

#[test]
fn empty_input_is_zero_tokens() {
    let output = tok(&["--model", "gpt-4"], b"");

    assert!(output.status.success());
    assert_eq!("0\n", stdout(&output));
}

#[test]
fn hello_world_is_stable() {
    let first = tok(&["--model", "gpt-4"], b"hello world");
    let second = tok(&["--model", "gpt-4"], b"hello world");

    assert!(first.status.success());
    assert_eq!("2\n", stdout(&first));
    assert_eq!(stdout(&first), stdout(&second));
}

#[test]
fn explicit_count_command() {
    let output = tok(&["count", "--model", "gpt-3.5-turbo"], b"hello world");

    assert!(output.status.success());
    assert_eq!("2\n", stdout(&output));
}

#[test]
fn whitespace_only_input() {
    let first = tok(&["--model", "gpt-4"], b"   ");
    let second = tok(&["--model", "gpt-4"], b"   ");

    assert!(first.status.success());
    let count: usize = stdout(&first).trim_end().parse().unwrap();
    assert!(count > 0);
    assert_eq!(stdout(&first), stdout(&second));
}

#[test]
fn model_from_environment() {
    let output = Command::new(TOK)
        .env("TOKCOUNT_MODEL", "gpt-4")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!("0\n", stdout(&output));
}

#[test]
fn default_model_is_unknown() {
    let output = tok(&[], b"hello world");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("gpt-4ocode"));
}

#[test]
fn nonsense_model_fails_without_output() {
    let output = tok(&["--model", "not-a-real-model"], b"hello world");

    assert_eq!(Some(1), output.status.code());
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_utf8_fails() {
    let output = tok(&["--model", "gpt-4"], &[b'h', b'i', 0xc3, 0x28]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn special_tokens() {
    let disallowed = tok(&["--model", "gpt-4"], b"<|endoftext|>");
    assert!(!disallowed.status.success());
    assert!(disallowed.stdout.is_empty());

    let allowed = tok(&["--model", "gpt-4", "--special", "allow"], b"<|endoftext|>");
    assert!(allowed.status.success());
    assert_eq!("1\n", stdout(&allowed));
}

#[test]
fn prompt_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
    std::fs::write(dir.path().join("image.png"), [0x89, b'P', b'N', b'G']).unwrap();
    let root = dir.path().to_str().unwrap();

    let output = tok(
        &["prompt", "--model", "gpt-4", "--task", "Explain this", root],
        b"",
    );

    assert!(output.status.success());
    let expected = format!(
        "Explain this\n\n=== FILE: {} ===\nfn main() {{}}\n\n\n",
        dir.path().join("main.rs").display()
    );
    assert_eq!(expected, stdout(&output));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Tokens: "));
}

#[test]
fn prompt_to_file_with_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    let saved = dir.path().join("prompt.out");
    std::fs::write(&input, "abcdefgh").unwrap();

    // The default model can't be loaded, so the count falls back to an estimate
    let output = tok(
        &[
            "prompt",
            "--output",
            saved.to_str().unwrap(),
            input.to_str().unwrap(),
        ],
        b"",
    );

    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    let prompt = std::fs::read_to_string(&saved).unwrap();
    assert_eq!(
        format!("=== FILE: {} ===\nabcdefgh\n\n", input.display()),
        prompt
    );

    let expected = format!("Estimated tokens: {}", prompt.chars().count() / 4);
    assert!(String::from_utf8_lossy(&output.stderr).contains(&expected));
}
