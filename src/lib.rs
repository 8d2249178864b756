//! # tickmq - MQTT 3.1.1 client protocol engine
//!
//! A lightweight MQTT 3.1.1 client engine for embedded systems and other
//! resource-constrained environments. It is designed for `no_std` targets:
//! fixed-size buffers, no heap growth, and a cooperative single-threaded
//! yield loop that drives all I/O.
//!
//! ## Features
//!
//! - MQTT 3.1.1 protocol compliance (CONNECT through DISCONNECT)
//! - Quality of Service levels 0, 1 and 2 with retry-on-timeout
//! - Clean session and persistent session support
//! - Will messages, username/password authentication
//! - Configurable keep-alive with automatic PINGREQ scheduling
//! - Exact-match topic-to-handler dispatch over a fixed-capacity table
//! - Fixed-size send/receive buffers for predictable memory usage
//! - Transport agnostic: any byte stream with timeout-bounded reads/writes
//!
//! ## Design
//!
//! The engine owns no threads and never performs I/O on its own. All network
//! traffic happens inside [`Client::yield_for`] or inside a blocking call
//! (`connect`, `subscribe`, QoS1/2 `publish`) that internally runs the same
//! tick logic, bounded by the configured command timeout. Inject your own
//! [`Transport`] and [`Clock`] implementations; on a host, any `TcpStream`
//! with socket timeouts works.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! tickmq = "0.1.0"
//! ```
//!
//! Connect, subscribe and process traffic:
//!
//! ```rust,no_run
//! use tickmq::{Client, Config, ConnectOptions, Message, QoS, Transport};
//! # struct Conn;
//! # impl Transport for Conn {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, ()> { Ok(0) }
//! #     fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, ()> { Ok(buf.len()) }
//! # }
//! # struct Millis;
//! # impl tickmq::Clock for Millis {
//! #     fn now_ms(&self) -> u64 { 0 }
//! # }
//! # fn main() -> Result<(), tickmq::Error> {
//! let on_message = |topic: &str, message: &Message<'_>| {
//!     let _ = (topic, message.payload);
//! };
//! let mut client: Client<'_, _, _> = Client::new(Conn, Millis, Config::default());
//!
//! client.connect(&ConnectOptions::new("my_device").keep_alive_seconds(10))?;
//! client.subscribe("commands/my_device", QoS::AtLeastOnce, &on_message)?;
//! client.yield_for(20_000)?;
//! client.disconnect()
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: host-side conveniences such as [`time::StdClock`]
//! - `defmt`: `defmt::Format` implementations for embedded debugging

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Error taxonomy shared by all public operations.
pub mod error;

/// Monotonic time source interface.
pub mod time;

/// Raw byte-stream transport interface.
pub mod transport;

/// Application messages, handler capability and the topic router.
pub mod handler;

pub(crate) mod inflight;
pub(crate) mod packet;

/// The session controller: connection lifecycle, keep-alive scheduling and
/// the cooperative yield loop.
pub mod client;

pub use client::{Client, Config, ConnectOptions, ConnectResult, Will};
pub use error::Error;
pub use handler::{MAX_TOPIC_LEN, Message, MessageHandler, QoS, Router};
pub use time::Clock;
pub use transport::Transport;
