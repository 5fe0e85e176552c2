//! Where lines come from and where text goes.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;
use tracing::{debug, warn};

/// A source of input lines.
pub trait LineSource {
    /// Show `prompt` and read one line without its line terminator.
    /// `None` means end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Remember an accepted line.
    fn add_history(&mut self, _line: &str) {}

    /// Persist remembered lines, if the source keeps any.
    fn save_history(&mut self) {}
}

/// Destination for everything the operator reads.
pub trait OutputSink {
    fn out(&mut self, text: &str) -> io::Result<()>;

    fn err(&mut self, text: &str) -> io::Result<()>;

    fn out_line(&mut self, text: &str) -> io::Result<()> {
        self.out(text)?;
        self.out("\n")
    }

    fn err_line(&mut self, text: &str) -> io::Result<()> {
        self.err(text)?;
        self.err("\n")
    }

    /// Mode changes and other informational lines.
    fn notice(&mut self, text: &str) -> io::Result<()> {
        self.out_line(text)
    }
}

/// Persisted input history.
#[derive(Debug)]
pub struct History {
    path: PathBuf,
    entries: Vec<String>,
    max: usize,
}

impl History {
    /// Load history from `path`. A missing or unreadable file starts empty.
    pub fn load(path: PathBuf, max: usize) -> Self {
        let mut history = Self {
            path,
            entries: Vec::new(),
            max,
        };

        match fs::read_to_string(&history.path) {
            Ok(content) => {
                for line in content.lines() {
                    if !line.trim().is_empty() {
                        history.entries.push(line.to_string());
                    }
                }
                history.trim();
                debug!(path = %history.path.display(), entries = history.entries.len(), "history loaded");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %history.path.display(), error = %e, "could not read history"),
        }
        history
    }

    /// Append a line, skipping blanks and repeats of the previous entry.
    pub fn add(&mut self, line: &str) {
        if line.trim().is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
        self.trim();
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the history file. Failures are logged and otherwise ignored.
    pub fn save(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let mut content = self.entries.join("\n");
        content.push('\n');
        if let Err(e) = fs::write(&self.path, content) {
            warn!(path = %self.path.display(), error = %e, "could not save history");
        }
    }

    fn trim(&mut self) {
        if self.entries.len() > self.max {
            let excess = self.entries.len() - self.max;
            self.entries.drain(..excess);
        }
    }
}

/// Interactive input from standard input.
pub struct StdinSource {
    stdin: io::Stdin,
    history: Option<History>,
}

impl StdinSource {
    pub fn new(history: Option<History>) -> Self {
        Self {
            stdin: io::stdin(),
            history,
        }
    }
}

impl LineSource for StdinSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if self.stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn add_history(&mut self, line: &str) {
        if let Some(history) = &mut self.history {
            history.add(line);
        }
    }

    fn save_history(&mut self) {
        if let Some(history) = &self.history {
            history.save();
        }
    }
}

/// Lines from a string or file. Prompts are not shown.
#[derive(Debug, Default)]
pub struct ScriptSource {
    lines: VecDeque<String>,
}

impl ScriptSource {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        Ok(Self::from_text(&fs::read_to_string(path)?))
    }
}

impl LineSource for ScriptSource {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Standard output and standard error.
#[derive(Debug)]
pub struct Console {
    color: bool,
}

impl Console {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl OutputSink for Console {
    fn out(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }

    fn err(&mut self, text: &str) -> io::Result<()> {
        let mut stderr = io::stderr();
        if self.color && !text.trim().is_empty() {
            write!(stderr, "{}", text.red())
        } else {
            stderr.write_all(text.as_bytes())
        }
    }

    fn notice(&mut self, text: &str) -> io::Result<()> {
        if self.color {
            self.out_line(&text.dimmed().to_string())
        } else {
            self.out_line(text)
        }
    }
}

/// Collects output in memory.
#[derive(Debug, Default)]
pub struct Capture {
    pub out: String,
    pub err: String,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for Capture {
    fn out(&mut self, text: &str) -> io::Result<()> {
        self.out.push_str(text);
        Ok(())
    }

    fn err(&mut self, text: &str) -> io::Result<()> {
        self.err.push_str(text);
        Ok(())
    }
}
