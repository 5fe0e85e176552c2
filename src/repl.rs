//! The interactive engine: exit keywords, PASTE mode, meta-commands and
//! evaluation, one line at a time.

use std::io;

use tracing::debug;

use crate::accumulator::{Feed, LineAccumulator, PASTE_ENTER, PASTE_EXIT};
use crate::backend::{Compiler, Machine};
use crate::console::{LineSource, OutputSink};
use crate::error::ReplError;
use crate::meta::{Dispatch, MetaCommands};
use crate::session::Session;

/// Lines that end the session, compared after trimming.
pub const EXIT_KEYWORDS: &[&str] = &["bye", "quit"];

pub const DEFAULT_PROMPT: &str = "> ";
pub const DEFAULT_PASTE_PROMPT: &str = "... ";

/// How a line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Evaluated successfully, or stored in the paste buffer.
    Ok,
    /// The submission failed and the error was shown.
    Failed,
    /// A mode change, marker notice or meta-command.
    Notice,
    /// An exit keyword.
    Exit,
}

/// Counts from a run over a line source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: usize,
    pub failures: usize,
    /// Ended by an exit keyword rather than end of input
    pub exited: bool,
}

pub struct Repl<'a, M: Machine, C: Compiler> {
    session: Session<'a, M, C>,
    accumulator: LineAccumulator,
    meta: MetaCommands,
    prompt: String,
    paste_prompt: String,
}

impl<'a, M: Machine, C: Compiler> Repl<'a, M, C> {
    pub fn new(session: Session<'a, M, C>) -> Self {
        Self {
            session,
            accumulator: LineAccumulator::new(),
            meta: MetaCommands::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            paste_prompt: DEFAULT_PASTE_PROMPT.to_string(),
        }
    }

    pub fn with_prompts(mut self, prompt: impl Into<String>, paste_prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self.paste_prompt = paste_prompt.into();
        self
    }

    pub fn session(&self) -> &Session<'a, M, C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<'a, M, C> {
        &mut self.session
    }

    pub fn is_pasting(&self) -> bool {
        self.accumulator.is_accumulating()
    }

    /// Prompt for the next line; distinct while in PASTE mode.
    pub fn prompt(&self) -> &str {
        if self.accumulator.is_accumulating() {
            &self.paste_prompt
        } else {
            &self.prompt
        }
    }

    /// Process one input line, writing everything the operator should see.
    pub fn feed_line(&mut self, line: &str, sink: &mut dyn OutputSink) -> io::Result<LineStatus> {
        if EXIT_KEYWORDS.contains(&line.trim()) {
            return Ok(LineStatus::Exit);
        }

        let feed = match self.accumulator.feed(line) {
            Ok(feed) => feed,
            Err(err) => {
                sink.err_line(&error_message(&err))?;
                return Ok(LineStatus::Failed);
            }
        };

        let submission = match feed {
            Feed::Ready(text) => text,
            Feed::Buffered => return Ok(LineStatus::Ok),
            Feed::Entered => {
                sink.notice(&format!(
                    "Entering PASTE mode. Type '{}' to compile and execute.",
                    PASTE_EXIT
                ))?;
                return Ok(LineStatus::Notice);
            }
            Feed::AlreadyAccumulating => {
                sink.notice("Already in PASTE mode")?;
                return Ok(LineStatus::Notice);
            }
            Feed::NotAccumulating => {
                sink.notice("Not in PASTE mode")?;
                return Ok(LineStatus::Notice);
            }
            Feed::EmptyPaste => {
                sink.notice("(empty PASTE buffer)")?;
                return Ok(LineStatus::Notice);
            }
        };

        if self.meta.dispatch(submission, &mut self.session, sink)? == Dispatch::Handled {
            return Ok(LineStatus::Notice);
        }

        let result = self.session.process(submission);
        let output = self.session.take_output();
        if !output.is_empty() {
            sink.out(&output)?;
        }

        match result {
            Ok(_) => {
                sink.out_line(&self.session.format_stack())?;
                Ok(LineStatus::Ok)
            }
            Err(err) => {
                sink.err_line(&error_message(&err))?;
                Ok(LineStatus::Failed)
            }
        }
    }

    /// Print the banner, process lines until `bye`/`quit` or end of input,
    /// then save history.
    pub fn run(
        &mut self,
        source: &mut dyn LineSource,
        sink: &mut dyn OutputSink,
    ) -> io::Result<RunSummary> {
        sink.out_line(&format!("stackrepl v{}", crate::VERSION))?;
        sink.out_line("Type 'bye' or press Ctrl+D to exit")?;
        sink.out_line("Type '.help' for help")?;
        sink.out_line(&format!("Type '{}' to enter PASTE mode", PASTE_ENTER))?;
        sink.out_line("")?;

        let summary = self.run_lines(source, sink)?;
        if !summary.exited {
            sink.out_line("")?;
        }
        sink.out_line("Goodbye!")?;
        source.save_history();
        Ok(summary)
    }

    /// Process lines without banner or farewell.
    pub fn run_lines(
        &mut self,
        source: &mut dyn LineSource,
        sink: &mut dyn OutputSink,
    ) -> io::Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            self.session.interrupt_flag().clear();
            let Some(line) = source.read_line(self.prompt())? else {
                break;
            };

            // Ctrl+C while the line was being typed
            if self.session.interrupt_flag().take() {
                if self.accumulator.abort() {
                    sink.notice("PASTE mode interrupted")?;
                }
                continue;
            }

            summary.lines += 1;
            match self.feed_line(&line, sink)? {
                LineStatus::Exit => {
                    summary.exited = true;
                    break;
                }
                LineStatus::Failed => summary.failures += 1,
                LineStatus::Ok | LineStatus::Notice => {
                    if !line.trim().is_empty() {
                        source.add_history(&line);
                    }
                }
            }
        }

        debug!(
            lines = summary.lines,
            failures = summary.failures,
            exited = summary.exited,
            "input finished"
        );
        Ok(summary)
    }
}

/// Operator-facing text for a failed submission.
pub fn error_message(err: &ReplError) -> String {
    match err {
        ReplError::Compile { formatted, .. } => formatted.clone(),
        other => format!("Error: {}", other),
    }
}
