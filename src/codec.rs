use thiserror::Error;

/// Splits one connection's byte stream into newline-delimited messages.
///
/// The wire protocol is plain ASCII, one message per `\n`-terminated line.
/// Reads arrive in arbitrary chunks, so partial lines sit in the buffer
/// until the terminator shows up. A byte outside the ASCII range poisons
/// the connection; the caller drops the session.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("non-ASCII byte 0x{0:02x} on the wire")]
    NonAscii(u8),
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if let Some(byte) = bytes.iter().find(|byte| !byte.is_ascii()) {
            return Err(CodecError::NonAscii(*byte));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Pop the next complete message, stripped of surrounding whitespace
    /// (`\r` included). Blank lines come out as empty strings; rejecting
    /// those is the dispatcher's job.
    pub fn pop_line(&mut self) -> Option<String> {
        let nl = self.buf.iter().position(|byte| *byte == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=nl).collect();
        let text = String::from_utf8_lossy(&line[..nl]);
        Some(text.trim().to_string())
    }
}
