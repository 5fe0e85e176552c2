//! Line accumulation and PASTE mode.
//!
//! In idle mode every line is its own submission. A line reading `<<<`
//! switches to PASTE mode, where lines are collected until a line reading
//! `>>>` hands the whole block over as one submission.

use tracing::trace;

use crate::error::ReplError;

/// Marker line that enters PASTE mode.
pub const PASTE_ENTER: &str = "<<<";
/// Marker line that leaves PASTE mode and submits the block.
pub const PASTE_EXIT: &str = ">>>";

/// Capacity of the paste buffer on first use.
pub const INITIAL_PASTE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Accumulating,
}

/// What the accumulator did with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed<'a> {
    /// PASTE mode started.
    Entered,
    /// `<<<` while already in PASTE mode.
    AlreadyAccumulating,
    /// `>>>` outside PASTE mode.
    NotAccumulating,
    /// Line stored in the paste buffer.
    Buffered,
    /// PASTE mode left with nothing collected.
    EmptyPaste,
    /// A submission is ready.
    Ready(&'a str),
}

#[derive(Debug)]
pub struct LineAccumulator {
    mode: Mode,
    buffer: String,
    lines: usize,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self {
            mode: Mode::Idle,
            buffer: String::new(),
            lines: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_accumulating(&self) -> bool {
        self.mode == Mode::Accumulating
    }

    /// Lines collected since PASTE mode was entered.
    pub fn buffered_lines(&self) -> usize {
        self.lines
    }

    /// Feed one line of input.
    ///
    /// On allocation failure the accumulator is left exactly as it was.
    pub fn feed<'a>(&'a mut self, line: &'a str) -> Result<Feed<'a>, ReplError> {
        let feed = match (self.mode, marker(line)) {
            (Mode::Idle, Some(PASTE_ENTER)) => {
                self.buffer.clear();
                self.lines = 0;
                self.mode = Mode::Accumulating;
                trace!("entered paste mode");
                Feed::Entered
            }
            (Mode::Accumulating, Some(PASTE_ENTER)) => Feed::AlreadyAccumulating,
            (Mode::Idle, Some(_)) => Feed::NotAccumulating,
            (Mode::Accumulating, Some(_)) => {
                self.mode = Mode::Idle;
                trace!(lines = self.lines, bytes = self.buffer.len(), "left paste mode");
                if self.buffer.is_empty() {
                    Feed::EmptyPaste
                } else {
                    Feed::Ready(&self.buffer)
                }
            }
            (Mode::Accumulating, None) => {
                self.append(line)?;
                Feed::Buffered
            }
            (Mode::Idle, None) => Feed::Ready(line),
        };
        Ok(feed)
    }

    /// Abandon PASTE mode, discarding collected lines. Returns whether
    /// PASTE mode was active.
    pub fn abort(&mut self) -> bool {
        if self.mode == Mode::Idle {
            return false;
        }
        self.mode = Mode::Idle;
        self.buffer.clear();
        trace!(lines = self.lines, "paste mode aborted");
        self.lines = 0;
        true
    }

    fn append(&mut self, line: &str) -> Result<(), ReplError> {
        let needed = self.buffer.len() + line.len() + 1;
        if needed > self.buffer.capacity() {
            let mut target = self.buffer.capacity().max(INITIAL_PASTE_CAPACITY);
            while target < needed {
                target = target.saturating_mul(2);
            }
            self.buffer
                .try_reserve_exact(target - self.buffer.len())
                .map_err(|e| ReplError::allocation("in PASTE mode", e))?;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.lines += 1;
        Ok(())
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// The marker a line consists of, if any. Surrounding whitespace is ignored;
/// anything else on the line makes it ordinary text.
fn marker(line: &str) -> Option<&'static str> {
    match line.trim() {
        PASTE_ENTER => Some(PASTE_ENTER),
        PASTE_EXIT => Some(PASTE_EXIT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(acc: &mut LineAccumulator, line: &str) -> String {
        match acc.feed(line).unwrap() {
            Feed::Ready(text) => format!("ready:{}", text),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_idle_lines_pass_through() {
        let mut acc = LineAccumulator::new();
        assert_eq!(feed(&mut acc, "2 3 +"), "ready:2 3 +");
        assert_eq!(acc.mode(), Mode::Idle);
    }

    #[test]
    fn test_paste_block_preserves_order() {
        let mut acc = LineAccumulator::new();
        assert_eq!(feed(&mut acc, "<<<"), "Entered");
        assert_eq!(feed(&mut acc, ": SQ DUP * ;"), "Buffered");
        assert_eq!(feed(&mut acc, "3 SQ"), "Buffered");
        assert_eq!(acc.buffered_lines(), 2);
        assert_eq!(feed(&mut acc, ">>>"), "ready:: SQ DUP * ;\n3 SQ\n");
        assert!(!acc.is_accumulating());
    }

    #[test]
    fn test_markers_tolerate_surrounding_whitespace() {
        let mut acc = LineAccumulator::new();
        assert_eq!(feed(&mut acc, "  <<<\t"), "Entered");
        assert_eq!(feed(&mut acc, " >>> "), "EmptyPaste");
    }

    #[test]
    fn test_marker_with_trailing_text_is_ordinary() {
        let mut acc = LineAccumulator::new();
        assert_eq!(feed(&mut acc, "<<< 1 2"), "ready:<<< 1 2");
        assert_eq!(feed(&mut acc, "<<<"), "Entered");
        assert_eq!(feed(&mut acc, ">>>x"), "Buffered");
        assert_eq!(feed(&mut acc, ">>>"), "ready:>>>x\n");
    }

    #[test]
    fn test_misplaced_markers_are_notices() {
        let mut acc = LineAccumulator::new();
        assert_eq!(feed(&mut acc, ">>>"), "NotAccumulating");
        assert_eq!(feed(&mut acc, "<<<"), "Entered");
        assert_eq!(feed(&mut acc, "<<<"), "AlreadyAccumulating");
        assert!(acc.is_accumulating());
    }

    #[test]
    fn test_reentering_discards_stale_content() {
        let mut acc = LineAccumulator::new();
        feed(&mut acc, "<<<");
        feed(&mut acc, "1 2 3");
        assert!(acc.abort());
        assert!(!acc.abort());

        assert_eq!(feed(&mut acc, "<<<"), "Entered");
        assert_eq!(feed(&mut acc, ">>>"), "EmptyPaste");
    }

    #[test]
    fn test_buffer_grows_by_doubling() {
        let mut acc = LineAccumulator::new();
        feed(&mut acc, "<<<");
        feed(&mut acc, "x");
        assert_eq!(acc.buffer.capacity(), INITIAL_PASTE_CAPACITY);

        let long = "y".repeat(INITIAL_PASTE_CAPACITY * 3);
        feed(&mut acc, &long);
        assert_eq!(acc.buffer.capacity(), INITIAL_PASTE_CAPACITY * 4);
        assert_eq!(acc.buffer.len(), 2 + long.len() + 1);
    }
}
