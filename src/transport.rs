//! Raw byte-stream transport consumed by the engine.

/// A bidirectional byte stream with timeout-bounded operations.
///
/// The transport never interprets MQTT semantics; it only moves bytes. Both
/// calls take the maximum time to wait in milliseconds, matching the socket
/// receive/send timeouts used on constrained targets.
///
/// Partial reads and writes are expected: the engine buffers sub-packet
/// reads and resumes them on the next call, and loops partial writes until
/// a frame is fully handed over.
pub trait Transport {
    /// Associated error type.
    type Error: core::fmt::Debug;

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` when no data arrived within `timeout_ms`. An `Err`
    /// means the link itself failed and the session cannot continue.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Writes up to `buf.len()` bytes, returning how many were accepted.
    ///
    /// `Ok(0)` and `Err` both mean the link failed.
    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}
