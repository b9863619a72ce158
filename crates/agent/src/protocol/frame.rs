//! Byte-at-a-time frame decoder (C1).
//!
//! Grounded directly on `serial_cb()` in the original firmware: a single
//! byte-mode state machine switching between LINE and BINARY accumulation.
//! No `tokio_util::codec::Decoder` is used here -- nothing in this workspace
//! or its sibling examples demonstrates that pattern, and the original ISR
//! this is ported from is itself a raw byte state machine, so a hand-rolled
//! one is the grounded choice.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Line,
    Binary,
}

/// Decodes a raw byte stream into [`Frame`]s. Owned by the single reader
/// task; `arm_binary`/`disarm_binary` are called by the dispatcher task to
/// authorize or cancel a pending BINARY payload, mirroring the original
/// ISR/COMM-task split where only the COMM task may arm binary mode.
pub struct FrameDecoder {
    mode: Mode,
    line_buf: Vec<u8>,
    line_buf_size: usize,
    binary_buf: Vec<u8>,
    binary_expected: usize,
}

impl FrameDecoder {
    pub fn new(line_buf_size: usize) -> Self {
        Self {
            mode: Mode::Line,
            line_buf: Vec::with_capacity(line_buf_size),
            line_buf_size,
            binary_buf: Vec::new(),
            binary_expected: 0,
        }
    }

    pub fn arm_binary(&mut self, expected_len: usize) {
        self.mode = Mode::Binary;
        self.binary_buf = Vec::with_capacity(expected_len);
        self.binary_expected = expected_len;
    }

    pub fn disarm_binary(&mut self) {
        self.mode = Mode::Line;
        self.binary_buf.clear();
        self.binary_expected = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.mode == Mode::Binary
    }

    /// Feed one byte; returns a completed frame if one became available.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        match self.mode {
            Mode::Line => self.feed_line(byte),
            Mode::Binary => self.feed_binary(byte),
        }
    }

    fn feed_line(&mut self, byte: u8) -> Option<Frame> {
        let is_terminator = byte == b'\n' || byte == b'\r';
        if is_terminator {
            if self.line_buf.is_empty() {
                // A bare `\r` or `\n` with nothing accumulated (e.g. the `\n`
                // half of a `\r\n` pair already flushed by the `\r`): ignore.
                return None;
            }
            let line = String::from_utf8_lossy(&self.line_buf).to_string();
            self.line_buf.clear();
            return Some(Frame::Line(line));
        }
        if self.line_buf.len() < self.line_buf_size {
            self.line_buf.push(byte);
        }
        // Else: the line is already at its cap. Excess bytes are dropped
        // silently but the accumulated prefix is kept intact, so the
        // terminator still flushes a truncated (not empty) line.
        None
    }

    fn feed_binary(&mut self, byte: u8) -> Option<Frame> {
        self.binary_buf.push(byte);
        if self.binary_buf.len() >= self.binary_expected {
            let payload = std::mem::take(&mut self.binary_buf);
            self.mode = Mode::Line;
            self.binary_expected = 0;
            return Some(Frame::Binary(payload));
        }
        None
    }
}
