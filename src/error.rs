//! Common error type for the protocol engine.

/// Errors surfaced by the public client operations.
///
/// Every operation returns a `Result` with this error type; failures are
/// values, never panics. The variants are designed to be simple and portable
/// for `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// No expected response arrived within the command timeout.
    ///
    /// Retryable by the caller. For a QoS1/2 publish this means the
    /// acknowledgment handshake did not complete and at-least-once delivery
    /// may have been broken.
    Timeout,
    /// The broker rejected the CONNECT with the contained return code (1-5).
    ConnectRefused(u8),
    /// The broker returned a failure code in SUBACK.
    SubscribeFailed(u8),
    /// An inbound frame failed validation.
    ///
    /// Packet framing is desynchronized at this point; the engine drops the
    /// connection and a fresh `connect` is required.
    MalformedPacket,
    /// The requested operation does not fit the fixed buffer or table
    /// capacity. The operation was not attempted.
    BufferOverflow,
    /// The transport failed mid-session. A full reconnect is required.
    ConnectionLost,
    /// The engine is not in the connection state the operation requires.
    NotConnected,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectRefused(code) => defmt::write!(f, "ConnectRefused({})", code),
            Error::SubscribeFailed(code) => defmt::write!(f, "SubscribeFailed({})", code),
            Error::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::ConnectionLost => defmt::write!(f, "ConnectionLost"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
        }
    }
}
