//! Application messages, handler capability and the topic router.

use heapless::String;
use heapless::Vec;

/// Maximum stored topic filter length in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery (PUBACK).
    AtLeastOnce = 1,
    /// Exactly once delivery (PUBREC/PUBREL/PUBCOMP).
    ExactlyOnce = 2,
}

impl QoS {
    /// Maps the 2-bit wire field to a level; 3 is malformed.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QoS {
    fn format(&self, f: defmt::Formatter) {
        match self {
            QoS::AtMostOnce => defmt::write!(f, "QoS0"),
            QoS::AtLeastOnce => defmt::write!(f, "QoS1"),
            QoS::ExactlyOnce => defmt::write!(f, "QoS2"),
        }
    }
}

/// An application message, without its topic.
///
/// Transient: constructed for one `publish` call or one inbound dispatch.
/// For outbound messages the payload bytes belong to the caller; for inbound
/// dispatch they borrow the engine's receive buffer and are only valid for
/// the duration of the handler callback.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Message<'a> {
    /// Delivery guarantee level.
    pub qos: QoS,
    /// Whether the broker should retain (outbound) or did retain (inbound)
    /// the message.
    pub retained: bool,
    /// Set on retransmitted QoS1/2 packets.
    pub dup: bool,
    /// Raw payload bytes.
    pub payload: &'a [u8],
}

/// A callback capability invoked for each inbound publication.
///
/// Implemented for any `Fn(&str, &Message)` closure. Handlers take `&self`
/// so a single handler can be registered for several filters; use interior
/// mutability to accumulate state.
pub trait MessageHandler {
    /// Called exactly once per inbound application message on a matching
    /// topic.
    fn on_message(&self, topic: &str, message: &Message<'_>);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &Message<'_>),
{
    fn on_message(&self, topic: &str, message: &Message<'_>) {
        self(topic, message)
    }
}

struct Entry<'h> {
    filter: String<MAX_TOPIC_LEN>,
    qos: QoS,
    handler: &'h dyn MessageHandler,
}

/// Maps exact topic-filter strings to handlers, with a fixed maximum number
/// of registrations.
///
/// Matching is exact only; wildcard filters are stored and forwarded to the
/// broker verbatim but are never expanded locally.
pub struct Router<'h, const SUBS: usize> {
    entries: Vec<Entry<'h>, SUBS>,
}

impl<'h, const SUBS: usize> Router<'h, SUBS> {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers `handler` for `filter`, replacing any existing entry.
    ///
    /// Returns `false` when the table is full or the filter exceeds
    /// [`MAX_TOPIC_LEN`].
    pub fn register(&mut self, filter: &str, qos: QoS, handler: &'h dyn MessageHandler) -> bool {
        let Ok(filter) = String::try_from(filter) else {
            return false;
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.filter == filter) {
            entry.qos = qos;
            entry.handler = handler;
            return true;
        }
        self.entries
            .push(Entry {
                filter,
                qos,
                handler,
            })
            .is_ok()
    }

    /// Removes the entry for `filter`. Returns `false` if none existed.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.filter.as_str() != filter);
        self.entries.len() != before
    }

    /// Whether `filter` is currently registered.
    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|e| e.filter.as_str() == filter)
    }

    /// Granted QoS recorded for `filter`, if registered.
    pub fn granted_qos(&self, filter: &str) -> Option<QoS> {
        self.entries
            .iter()
            .find(|e| e.filter.as_str() == filter)
            .map(|e| e.qos)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the table is at capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() == SUBS
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Invokes the handler registered for exactly `topic`.
    ///
    /// Returns `true` if a handler was invoked.
    pub fn dispatch(&self, topic: &str, message: &Message<'_>) -> bool {
        match self.entries.iter().find(|e| e.filter.as_str() == topic) {
            Some(entry) => {
                entry.handler.on_message(topic, message);
                true
            }
            None => false,
        }
    }
}

impl<'h, const SUBS: usize> Default for Router<'h, SUBS> {
    fn default() -> Self {
        Self::new()
    }
}

// Handlers are opaque trait objects; show the occupancy instead.
impl<'h, const SUBS: usize> core::fmt::Debug for Router<'h, SUBS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Router")
            .field("len", &self.entries.len())
            .field("capacity", &SUBS)
            .finish()
    }
}
