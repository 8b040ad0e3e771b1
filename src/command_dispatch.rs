//! Purpose: Hold top-level CLI command dispatch for `etcdbolt`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: stdout is buffered per command and flushed before returning success.

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "etcdbolt", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Extract(args) => {
            let operation = plan::plan_extract(*args)?;
            tracing::debug!(?operation, "planned extract");

            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            extract::run(&operation, &mut out)?;
            out.flush().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write output")
                    .with_source(err)
            })?;
            Ok(RunOutcome::ok())
        }
    }
}
