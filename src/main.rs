//! Purpose: `etcdbolt` CLI entry point.
//! Role: Binary crate root; parses args, plans one operation, runs it, reports errors.
//! Invariants: Results go to stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as one JSON object on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
//! Invariants: A closed stdout pipe ends the process quietly with exit code 0.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use etcdbolt::core::encoding::Format;
use etcdbolt::core::error::{Error, ErrorKind, to_exit_code};
use etcdbolt::core::extract;

mod command_dispatch;
mod plan;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, _)) if is_broken_pipe(&err) => 0,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_corrupt_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "etcdbolt",
    version,
    about = "Read versioned records out of etcd bbolt data files",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Works on a copy of member/snap/db or a live file (read-only, shared lock).

Mental model:
  - every write to etcd is one record in the `key` bucket
  - a logical key has one record per version
  - `extract` resolves versions, lists keys, and converts values
"#,
    after_help = r#"EXAMPLES
  $ etcdbolt extract -f db --keys-by-prefix /registry/pods/ --fields key,version-count
  $ etcdbolt extract -f db -k /registry/configmaps/default/app --list-versions
  $ etcdbolt extract -f db -k /registry/configmaps/default/app -o json

LEARN MORE
  $ etcdbolt <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
    Proto,
}

impl From<OutputFormat> for Format {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Json => Format::Json,
            OutputFormat::Yaml => Format::Yaml,
            OutputFormat::Proto => Format::Proto,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Extract keys, versions and values from a store file",
        long_about = r#"Extract keys, versions and values from a store file.

Every invocation performs exactly one operation:
  --list-versions        versions of --key, in storage order
  --key [--version]      value of --key (latest version by default)
  --fields / --template  one line per logical key under --keys-by-prefix
  --leaf-item            decode one raw record from --file or stdin"#,
        after_help = r#"EXAMPLES
  $ etcdbolt extract -f db -k /registry/secrets/kube-system/token -v 3 --raw
  $ etcdbolt extract -f db --keys-by-prefix /registry/ --template '{{.Key}} {{.TypeMeta.kind}}'
  $ etcdbolt extract --leaf-item --meta-summary < item.bin

NOTES
  - Values are auto-detected: storage-binary (k8s\0), JSON, or YAML
  - Storage-binary values can only be emitted with -o proto
  - Fields: key, value-size, all-versions-value-size, version-count, value
  - The store is locked shared; use --lock-timeout to wait for a writer"#
    )]
    Extract(Box<ExtractArgs>),
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[arg(
        short = 'f',
        long = "file",
        help = "Store file (or leaf item file with --leaf-item)",
        value_hint = ValueHint::FilePath
    )]
    file: Option<PathBuf>,
    #[arg(short = 'k', long = "key", help = "Logical etcd key")]
    key: Option<String>,
    #[arg(
        short = 'v',
        long = "version",
        value_name = "VERSION",
        help = "Version of --key (default: latest)",
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    key_version: Option<i64>,
    #[arg(
        long = "keys-by-prefix",
        value_name = "PREFIX",
        help = "List logical keys starting with PREFIX (empty lists all)"
    )]
    keys_by_prefix: Option<String>,
    #[arg(long = "list-versions", help = "Print every version of --key")]
    list_versions: bool,
    #[arg(long = "leaf-item", help = "Decode one raw record instead of a store")]
    leaf_item: bool,
    #[arg(long = "print-key", help = "With --leaf-item: print only the key")]
    print_key: bool,
    #[arg(long = "meta-summary", help = "With --leaf-item: print record metadata")]
    meta_summary: bool,
    #[arg(long, help = "Print value bytes without conversion")]
    raw: bool,
    #[arg(long, value_name = "LIST", help = "Comma separated summary fields")]
    fields: Option<String>,
    #[arg(
        long,
        value_name = "TEMPLATE",
        help = "Render each key summary, e.g. '{{.Key}}'",
        long_help = r#"Render each key summary, e.g. '{{.Key}} {{.Stats.VersionCount}}'.

Each {{ }} action is a jq filter over the summary fields Key, Version,
Value, TypeMeta and Stats (VersionCount, KeySize, ValueSize,
AllVersionsKeySize, AllVersionsValueSize). Unknown field names are
rejected. `}}` inside a quoted jq string does not close the action.

Value holds the latest version decoded as a JSON or YAML object.
Storage-binary (protobuf, k8s\0) objects have no Value, so .Value paths
render <no value>; use .Key, .TypeMeta and .Stats for them."#
    )]
    template: Option<String>,
    #[arg(
        short = 'o',
        long = "output",
        default_value = "yaml",
        value_enum,
        help = "Output format for values: json|yaml|proto"
    )]
    output: OutputFormat,
    #[arg(
        long = "lock-timeout",
        value_name = "DURATION",
        help = "Wait up to DURATION for a writer's lock (e.g. 5, 500ms, 2s, 1m)"
    )]
    lock_timeout: Option<String>,
}

/// The source chain below `err`, nearest first.
fn sources(err: &Error) -> impl Iterator<Item = &(dyn StdError + 'static)> {
    std::iter::successors(err.source(), |&source| source.source())
}

fn is_broken_pipe(err: &Error) -> bool {
    sources(err).any(|source| {
        source
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
    })
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Store pages are inconsistent. Work on a fresh copy of the file, or check it with `bbolt check`.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

/// Stderr label styles: the headline and its context lines.
#[derive(Copy, Clone, Debug)]
enum Tone {
    Headline,
    Context,
}

impl Tone {
    fn sgr(self) -> &'static str {
        match self {
            Tone::Headline => "31",
            Tone::Context => "33",
        }
    }

    fn paint(self, label: &str, use_color: bool) -> String {
        if use_color {
            format!("\u{1b}[{}m{label}\u{1b}[0m", self.sgr())
        } else {
            label.to_string()
        }
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let mut stderr = io::stderr().lock();
    let is_tty = stderr.is_terminal();
    let rendered = if is_tty {
        error_text(err, color_mode.use_color(is_tty))
    } else {
        serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
            "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
        })
    };
    let _ = writeln!(stderr, "{rendered}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::Open => "cannot open store",
        ErrorKind::Decode => "record does not decode",
        ErrorKind::Corrupt => "corrupt store",
        ErrorKind::Conversion => "conversion failed",
        ErrorKind::UnknownField => "unknown field",
        ErrorKind::Template => "template error",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    sources(err).map(|source| source.to_string()).collect()
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(page) = err.page() {
        inner.insert("page".to_string(), json!(page));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let context = [
        ("hint:", err.hint().map(str::to_string)),
        ("path:", err.path().map(|path| path.display().to_string())),
        ("key:", err.key().map(str::to_string)),
        ("page:", err.page().map(|page| page.to_string())),
        ("caused by:", sources(err).next().map(|source| source.to_string())),
    ];
    let headline = format!("{} {}", Tone::Headline.paint("error:", use_color), error_message(err));
    std::iter::once(headline)
        .chain(context.into_iter().filter_map(|(name, value)| {
            value.map(|value| format!("{} {value}", Tone::Context.paint(name, use_color)))
        }))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First non-empty line of clap's rendering, without its `error:` tag.
fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").map_or(line, str::trim).to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let subcommand = usage.and_then(|usage| {
        let mut tokens = usage.split_whitespace();
        tokens.find(|token| *token == "etcdbolt")?;
        tokens.next().filter(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
    });

    match subcommand {
        Some(subcommand) => format!("Try `etcdbolt {subcommand} --help`."),
        None => "Try `etcdbolt --help`.".to_string(),
    }
}
