//! Loudness rendering
//!
//! Turns one loudness value into text on the output stream. The bar graph
//! is scaled against a fixed full-scale reference, not the signal itself.

use std::io::{self, Write};

/// Number of cells in the bar graph
pub const BAR_WIDTH: usize = 60;

/// Loudness at which the bar graph is completely filled
pub const FULL_SCALE: f32 = 0.02;

const FILLED_CELL: char = '\u{2588}';
const EMPTY_CELL: char = '-';

/// Exit status for a one-shot reading that heard something
pub const EXIT_AUDIO: i32 = 0;
/// Exit status for a one-shot reading of exact silence
pub const EXIT_SILENT: i32 = 1;

/// How readings are shown. Chosen once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    /// Print one reading, then stop
    OneShot,
    /// Keep overwriting one line with the latest reading
    ContinuousNumeric,
    /// Keep overwriting one line with a bar graph
    BarGraph,
}

/// What the event loop should do after a render
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit(i32),
}

/// Fixed-width row of bar graph cells
#[derive(Clone, Debug)]
pub struct BarBuffer {
    cells: [char; BAR_WIDTH],
}

impl BarBuffer {
    pub fn new() -> Self {
        Self {
            cells: [EMPTY_CELL; BAR_WIDTH],
        }
    }

    /// Number of filled cells for a loudness, `floor(60 * loudness / 0.02)`
    /// clamped to the bar width.
    pub fn filled_cells(loudness: f32) -> usize {
        // Dividing first keeps exact ratios such as 0.01 / 0.02 exact in f32
        let units = (loudness / FULL_SCALE * BAR_WIDTH as f32).floor();
        // `as` saturates: NaN and negatives become 0
        (units as usize).min(BAR_WIDTH)
    }

    /// Overwrite every cell for the given loudness, returning the filled count
    pub fn fill(&mut self, loudness: f32) -> usize {
        let filled = Self::filled_cells(loudness);
        for (i, cell) in self.cells.iter_mut().enumerate() {
            *cell = if i < filled { FILLED_CELL } else { EMPTY_CELL };
        }
        filled
    }

    #[cfg(test)]
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|&&c| c == FILLED_CELL).count()
    }

    #[cfg(test)]
    pub fn cells(&self) -> &[char] {
        &self.cells
    }
}

impl Default for BarBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BarBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line: String = self.cells.iter().collect();
        f.write_str(&line)
    }
}

/// Renders readings in one mode to an output stream
pub struct Display<W: Write> {
    mode: DisplayMode,
    bar: BarBuffer,
    out: W,
}

impl<W: Write> Display<W> {
    pub fn new(mode: DisplayMode, out: W) -> Self {
        Self {
            mode,
            bar: BarBuffer::new(),
            out,
        }
    }

    #[cfg(test)]
    pub fn bar(&self) -> &BarBuffer {
        &self.bar
    }

    #[cfg(test)]
    pub fn writer(&self) -> &W {
        &self.out
    }

    /// Write one reading. Continuous modes flush so the line updates at once.
    pub fn render(&mut self, loudness: f32) -> io::Result<Flow> {
        match self.mode {
            DisplayMode::OneShot => {
                writeln!(self.out, "{:.5}", loudness)?;
                self.out.flush()?;
                let status = if loudness == 0.0 {
                    EXIT_SILENT
                } else {
                    EXIT_AUDIO
                };
                Ok(Flow::Quit(status))
            }
            DisplayMode::ContinuousNumeric => {
                write!(self.out, " {:.5}   \r", loudness)?;
                self.out.flush()?;
                Ok(Flow::Continue)
            }
            DisplayMode::BarGraph => {
                self.bar.fill(loudness);
                write!(self.out, " {}\r", self.bar)?;
                self.out.flush()?;
                Ok(Flow::Continue)
            }
        }
    }
}
