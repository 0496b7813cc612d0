//! Device receiver benchmarks: ingest, dispatch and reply.

use cmdshell_device::config::{InfoConfig, ReceiverConfig};
use cmdshell_device::modules::{IoModule, SimulatedPins, SystemModule};
use cmdshell_device::{Dispatcher, Outbound, Receiver};
use cmdshell_protocol::Message;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::mpsc;

fn receiver() -> (Receiver, mpsc::UnboundedReceiver<bytes::Bytes>) {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(IoModule::new(SimulatedPins::new()));
    dispatcher.register(SystemModule::new(InfoConfig::default()));

    let (tx, rx) = mpsc::unbounded_channel();
    let (control_tx, _control_rx) = mpsc::unbounded_channel();
    let receiver = Receiver::new(
        &ReceiverConfig::default(),
        dispatcher,
        Outbound::new(tx),
        control_tx,
    );
    (receiver, rx)
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("receiver_dispatch");

    for line in ["ping", "read", "set 1010101010101010", "getpinmap"] {
        let frame = Message::parse_line(1, 0, line).unwrap().encode().unwrap();
        let (receiver, mut rx) = receiver();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(line), &frame, |b, frame| {
            b.iter(|| {
                receiver.on_bytes(frame);
                while rx.try_recv().is_ok() {}
            });
        });
    }

    group.finish();
}

fn bench_byte_at_a_time(c: &mut Criterion) {
    let frame = Message::parse_line(1, 0, "so 3 1").unwrap().encode().unwrap();
    let (receiver, mut rx) = receiver();

    c.bench_function("receiver_byte_at_a_time", |b| {
        b.iter(|| {
            for byte in frame.iter() {
                receiver.on_bytes(std::slice::from_ref(byte));
            }
            while rx.try_recv().is_ok() {}
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_byte_at_a_time);
criterion_main!(benches);
