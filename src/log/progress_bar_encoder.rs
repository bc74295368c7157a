//! Keeps log lines readable while a progress bar is drawn on the same terminal. Without the
//! prefix, the part of the bar that a shorter log line does not overwrite stays on screen.

use log::Record;
use log4rs::encode::{Encode, Write};

/// Clears the current line, then delegates to the wrapped encoder.
#[derive(Debug)]
pub struct PBWrapperEncoder {
    inner: Box<dyn Encode>,
}

impl PBWrapperEncoder {
    pub fn new(inner: Box<dyn Encode>) -> Self {
        Self { inner }
    }
}

impl Encode for PBWrapperEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> Result<(), anyhow::Error> {
        // Erase the line and return to column zero.
        w.write_all(b"\x1B[2K\r")?;
        self.inner.encode(w, record)
    }
}
