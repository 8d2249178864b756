use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tickmq::{Client, Clock, Config, ConnectOptions, Message, QoS, Transport};

/// In-memory byte pipe: writes are discarded, reads drain a queue the bench
/// refills between iterations. Keeps the measurements free of network jitter.
#[derive(Clone, Default)]
struct Loopback {
    rx: Rc<RefCell<VecDeque<u8>>>,
}

impl Loopback {
    fn inject(&self, bytes: &[u8]) {
        self.rx.borrow_mut().extend(bytes);
    }
}

impl Transport for Loopback {
    type Error = ();

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, ()> {
        let mut rx = self.rx.borrow_mut();
        let n = buf.len().min(rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, ()> {
        Ok(buf.len())
    }
}

struct FrozenClock;

impl Clock for FrozenClock {
    fn now_ms(&self) -> u64 {
        0
    }
}

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

fn connected_client<'h>(loopback: &Loopback) -> Client<'h, Loopback, FrozenClock> {
    let mut client = Client::new(loopback.clone(), FrozenClock, Config::default());
    loopback.inject(&CONNACK);
    client
        .connect(&ConnectOptions::new("tickmq-bench").keep_alive_seconds(0))
        .expect("Failed to connect");
    client
}

fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x30, (2 + topic.len() + payload.len()) as u8];
    frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn bench_publish_qos0(c: &mut Criterion) {
    let loopback = Loopback::default();
    let mut client = connected_client(&loopback);
    let message = Message {
        qos: QoS::AtMostOnce,
        retained: false,
        dup: false,
        payload: b"hello from publish",
    };

    let mut group = c.benchmark_group("publish_qos0");
    group.throughput(Throughput::Bytes(message.payload.len() as u64));
    group.bench_function("publish_qos0", |b| {
        b.iter(|| {
            client
                .publish("tickmq/bench-topic", &message)
                .expect("Failed to publish");
        })
    });
    group.finish();
}

pub fn bench_inbound_dispatch(c: &mut Criterion) {
    let handler = |_topic: &str, _message: &Message<'_>| {};
    let loopback = Loopback::default();
    let mut client = connected_client(&loopback);

    loopback.inject(&[0x90, 0x03, 0x00, 0x01, 0x00]);
    client
        .subscribe("tickmq/bench-topic", QoS::AtMostOnce, &handler)
        .expect("Failed to subscribe");

    let frame = publish_frame("tickmq/bench-topic", b"hello world from bench");

    let mut group = c.benchmark_group("inbound_dispatch");
    group.throughput(Throughput::Bytes(frame.len() as u64 * 50));
    group.bench_function("inbound_dispatch", |b| {
        b.iter(|| {
            for _ in 0..50 {
                loopback.inject(&frame);
            }
            client.yield_for(0).expect("Failed to yield");
        })
    });
    group.finish();
}

criterion_group!(benches, bench_publish_qos0, bench_inbound_dispatch);
criterion_main!(benches);
