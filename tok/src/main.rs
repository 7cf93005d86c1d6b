use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;
use tokcount::prompt::{self, IgnoreRules};
use tokcount::{SpecialTokens, TokenCounter};
use tracing::*;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

/// Count the tokens an OpenAI model sees in the text on stdin
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: Globals,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Globals {
    /// The model whose tokenizer is used to count tokens
    #[arg(long, env = "TOKCOUNT_MODEL", default_value = tokcount::MODEL, global = true)]
    model: String,

    /// What to do with special token markers like `<|endoftext|>` in the text
    /// (disallow, allow, ordinary)
    #[arg(long, env = "TOKCOUNT_SPECIAL_TOKENS", default_value_t = SpecialTokens::Disallow, global = true)]
    special: SpecialTokens,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,
}

impl Globals {
    fn token_counter(&self) -> tokcount::Result<TokenCounter> {
        Ok(TokenCounter::for_model(&self.model)?.with_special_tokens(self.special))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Count the tokens in the text read from stdin, and print the count.
    ///
    /// This is also what happens when no command is given.
    Count,

    /// Combine text files into a single prompt and estimate its size in tokens
    ///
    /// The prompt is written to stdout, or to the file given with `--output`.  The token estimate
    /// is written to stderr.
    Prompt {
        /// Files and directories to include.  Directories are searched recursively.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Description of the task, placed at the top of the prompt
        #[arg(short, long, default_value = "")]
        task: String,

        /// Comma-separated file suffixes to leave out
        #[arg(long, env = "TOKCOUNT_IGNORE_SUFFIXES", default_value_t = prompt::DEFAULT_IGNORE_SUFFIXES.join(", "))]
        ignore_suffixes: String,

        /// Comma-separated folder names to leave out
        #[arg(long, env = "TOKCOUNT_IGNORE_FOLDERS", default_value_t = prompt::DEFAULT_IGNORE_FOLDERS.join(", "))]
        ignore_folders: String,

        /// Write the prompt to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

impl Commands {
    async fn execute(self, globals: &Globals) -> anyhow::Result<()> {
        match self {
            Commands::Count => {
                let text = tokcount::read_text(std::io::stdin().lock())?;
                let counter = globals.token_counter()?;
                let tokens = counter.count(&text)?;

                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{tokens}")?;
                stdout.flush()?;
            }
            Commands::Prompt {
                paths,
                task,
                ignore_suffixes,
                ignore_folders,
                output,
            } => {
                let rules = IgnoreRules::from_lists(&ignore_suffixes, &ignore_folders);
                let files = prompt::collect_files(paths, &rules)?;
                info!(files = files.len(), "Assembling prompt");

                let files = prompt::load_files(files).await?;
                let rendered = prompt::Prompt::new(task, files).render();

                // The prompt is still useful without an exact count, so a counter that can't be
                // created just means falling back to an estimate
                let counter = match globals.token_counter() {
                    Ok(counter) => Some(counter),
                    Err(e) => {
                        warn!(err = %e, "Unable to load tokenizer");
                        None
                    }
                };
                let estimate = prompt::estimate_tokens(counter.as_ref(), &rendered);

                match output {
                    Some(path) => {
                        tokio::fs::write(&path, &rendered).await?;
                        info!(path = %path.display(), "Saved prompt");
                    }
                    None => {
                        let mut stdout = std::io::stdout().lock();
                        stdout.write_all(rendered.as_bytes())?;
                        stdout.flush()?;
                    }
                }

                if estimate.exact {
                    eprintln!("Tokens: {}", estimate.tokens);
                } else {
                    eprintln!("Estimated tokens: {}", estimate.tokens);
                }
            }
        }

        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let default_log_directive = match cli.globals.debug {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Logs go to stderr so stdout only ever holds the program's output
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_log_directive.into())
                .from_env_lossy(),
        )
        .json()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    debug!(model = %cli.globals.model, special = %cli.globals.special, "Starting");

    let command = cli.command.unwrap_or(Commands::Count);
    if let Err(e) = command.execute(&cli.globals).await {
        error!("{:#}", e);
        exit(1);
    } else {
        debug!("command executed successfully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify that there aren't any invalid attributes in the CLI specification that can only be
    /// detected at runtime
    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn no_arguments_counts_with_default_model() {
        let cli = Cli::try_parse_from(["tok"]).unwrap();

        assert!(cli.command.is_none());
        assert_eq!(SpecialTokens::Disallow, cli.globals.special);
        assert_eq!(0, cli.globals.debug);
    }

    #[test]
    fn prompt_arguments() {
        let cli = Cli::try_parse_from([
            "tok",
            "prompt",
            "--task",
            "Review this",
            "--ignore-folders",
            "target",
            "src",
            "README.md",
            "--special",
            "allow",
        ])
        .unwrap();

        assert_eq!(SpecialTokens::Allow, cli.globals.special);
        match cli.command {
            Some(Commands::Prompt {
                paths,
                task,
                ignore_folders,
                output,
                ..
            }) => {
                assert_eq!(vec![PathBuf::from("src"), PathBuf::from("README.md")], paths);
                assert_eq!("Review this", task);
                assert_eq!("target", ignore_folders);
                assert!(output.is_none());
            }
            _ => panic!("expected the prompt command"),
        }
    }

    #[test]
    fn prompt_requires_paths() {
        assert!(Cli::try_parse_from(["tok", "prompt"]).is_err());
    }

    #[test]
    fn rejects_unknown_special_token_policy() {
        assert!(Cli::try_parse_from(["tok", "--special", "maybe"]).is_err());
    }
}
