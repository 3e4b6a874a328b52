//! Terminal rendering of the streamed log.

use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

use netlinx_tail::TailSink;

const TRUNCATED_BANNER: &str = "----- log truncated -----\n";

/// Writes log text to a terminal or pipe.
///
/// On a terminal `clear` wipes the screen; on a pipe it writes a banner so
/// the output stays append-only.
pub struct ConsoleSink<W: Write + Send> {
    out: Mutex<W>,
    is_terminal: bool,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        let out = io::stdout();
        let is_terminal = out.is_terminal();
        Self {
            out: Mutex::new(out),
            is_terminal,
        }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    #[cfg(test)]
    fn new(out: W, is_terminal: bool) -> Self {
        Self {
            out: Mutex::new(out),
            is_terminal,
        }
    }

    fn write(&self, bytes: &[u8]) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
            tracing::debug!("Console write failed: {e}");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> TailSink for ConsoleSink<W> {
    fn append(&self, text: &str) {
        self.write(text.as_bytes());
    }

    fn clear(&self) {
        if self.is_terminal {
            // Clear screen and scrollback, cursor home.
            self.write(b"\x1b[2J\x1b[3J\x1b[H");
        } else {
            self.write(TRUNCATED_BANNER.as_bytes());
        }
    }

    fn dispose(&self) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = out.flush() {
            tracing::debug!("Console flush failed: {e}");
        }
    }
}
