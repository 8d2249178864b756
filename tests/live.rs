//! Tests against a real broker.
//!
//! Ignored by default: they need a reachable MQTT broker. Set
//! `TEST_MQTT_ADDRESS` (defaults to test.mosquitto.org:1883) and run with
//! `cargo test -- --ignored`.

use std::cell::RefCell;
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use dotenvy::dotenv;
use tickmq::{Client, Clock, Config, ConnectOptions, Message, MessageHandler, QoS, Transport};

struct NetTransport {
    stream: TcpStream,
}

impl NetTransport {
    fn open() -> Self {
        dotenv().ok();
        let address =
            env::var("TEST_MQTT_ADDRESS").unwrap_or("test.mosquitto.org:1883".to_string());
        let stream = TcpStream::connect(address).expect("Failed to connect to broker");
        Self { stream }
    }
}

impl Transport for NetTransport {
    type Error = std::io::Error;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.stream
            .set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1) as u64)))?;
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.stream
            .set_write_timeout(Some(Duration::from_millis(timeout_ms.max(1) as u64)))?;
        self.stream.write(buf)
    }
}

struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[derive(Default)]
struct Recorder {
    messages: RefCell<Vec<(String, QoS, Vec<u8>)>>,
}

impl MessageHandler for Recorder {
    fn on_message(&self, topic: &str, message: &Message<'_>) {
        self.messages
            .borrow_mut()
            .push((topic.to_string(), message.qos, message.payload.to_vec()));
    }
}

#[test]
#[ignore = "needs a reachable MQTT broker"]
fn connect_to_public_broker() {
    let mut client: Client<'_, _, _> = Client::new(
        NetTransport::open(),
        MonotonicClock::new(),
        Config::default(),
    );

    let options = ConnectOptions::new("tickmq-live-connect").keep_alive_seconds(10);
    let result = client.connect(&options).expect("Failed to connect");
    assert!(!result.session_present);
    client.disconnect().expect("Failed to disconnect");
}

#[test]
#[ignore = "needs a reachable MQTT broker"]
fn publish_and_receive_loopback() {
    let recorder = Recorder::default();
    let mut client: Client<'_, _, _> = Client::new(
        NetTransport::open(),
        MonotonicClock::new(),
        Config::default(),
    );

    let options = ConnectOptions::new("tickmq-live-loopback").keep_alive_seconds(10);
    client.connect(&options).expect("Failed to connect");

    let topic = "tickmq/live/loopback";
    client
        .subscribe(topic, QoS::AtLeastOnce, &recorder)
        .expect("Failed to subscribe");

    let message = Message {
        qos: QoS::AtLeastOnce,
        retained: false,
        dup: false,
        payload: b"Test Message !!!",
    };
    client.publish(topic, &message).expect("Failed to publish");

    // Wait out the broker echo.
    for _ in 0..50 {
        client.yield_for(100).expect("yield failed");
        if !recorder.messages.borrow().is_empty() {
            break;
        }
    }

    let messages = recorder.messages.borrow();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, topic);
    assert_eq!(messages[0].2, b"Test Message !!!");
    drop(messages);

    client.disconnect().expect("Failed to disconnect");
}
