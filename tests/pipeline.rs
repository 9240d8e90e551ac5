//! End-to-end pipelines built from the reference blocks.

use crossbeam_channel::unbounded;
use sigflow::nodes::{CollectorSink, FrameAssembler, Passthrough, SequenceSource};
use sigflow::runtime::{BLOCK_SIZE_ATTRIBUTE, SYNC_FAULT_ATTRIBUTE};
use sigflow::{
    Block, Endpoint, Frame, RemainderWait, RingBuffer, Runtime, RuntimeConfig, Value,
    connect_endpoints,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::new().with_poll_interval(Duration::from_millis(10))).unwrap()
}

/// Wire source -> sink through one explicitly sized buffer.
fn wire(
    source: &SequenceSource,
    sink: &CollectorSink<i32>,
    capacity: usize,
    policy: RemainderWait,
) {
    let buffer = Arc::new(RingBuffer::with_remainder_wait(capacity, policy));
    source.output().connect(Arc::clone(&buffer));
    sink.input().connect(buffer);
}

#[test]
fn test_sequence_arrives_complete_and_ordered() {
    init_tracing();
    let rt = runtime();
    let source = SequenceSource::new(&rt, "source", 0..1000);
    let sink = CollectorSink::<i32>::new(&rt, "sink");
    wire(&source, &sink, 16, RemainderWait::Deadline);

    sink.start().unwrap();
    source.start().unwrap();

    assert!(sink.wait_for(1000, Duration::from_secs(10)));
    source.stop();
    sink.stop();
    assert_eq!(sink.received(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn test_sequence_with_unbounded_remainder_wait() {
    init_tracing();
    let rt = runtime();
    let source = SequenceSource::new(&rt, "source", 0..1000);
    let sink = CollectorSink::<i32>::new(&rt, "sink");
    wire(&source, &sink, 16, RemainderWait::Forever);

    sink.start().unwrap();
    source.start().unwrap();

    assert!(sink.wait_for(1000, Duration::from_secs(10)));
    source.stop();
    sink.stop();
    assert_eq!(sink.received(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn test_disconnecting_sink_raises_sync_fault() {
    init_tracing();
    let rt = runtime();
    let source = SequenceSource::new(&rt, "source", 0..1_000_000);
    let sink = CollectorSink::<i32>::new(&rt, "sink");
    wire(&source, &sink, 16, RemainderWait::Deadline);

    let (tx, rx) = unbounded();
    source
        .attributes()
        .require(SYNC_FAULT_ATTRIBUTE)
        .unwrap()
        .observe(move |_: &str, value: &Value| {
            let _ = tx.send(value.clone());
        });

    sink.start().unwrap();
    source.start().unwrap();
    assert!(sink.wait_for(100, Duration::from_secs(10)));

    let _earlier: Vec<Value> = rx.try_iter().collect();
    sink.input().disconnect();
    assert!(!sink.input().is_connected());

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Value::Event);
    assert!(source.output().is_connected());

    source.stop();
    sink.stop();

    // Whatever got through is an unbroken prefix
    let received = sink.received();
    assert!(received.len() >= 100);
    assert!(received.iter().copied().eq(0..received.len() as i32));
}

#[test]
fn test_three_stage_pipeline_with_frames() {
    init_tracing();
    let rt = runtime();
    let source = SequenceSource::new(&rt, "source", 0..64);
    source
        .attributes()
        .require(BLOCK_SIZE_ATTRIBUTE)
        .unwrap()
        .set::<i32>(5)
        .unwrap();
    let pass = Passthrough::<i32>::new(&rt, "pass");
    let frames = FrameAssembler::<i32>::new(&rt, "frames");
    frames
        .attributes()
        .require(BLOCK_SIZE_ATTRIBUTE)
        .unwrap()
        .set::<i32>(16)
        .unwrap();
    let sink = CollectorSink::<Frame<i32>>::new(&rt, "sink");

    connect_endpoints(source.output(), pass.input());
    connect_endpoints(pass.output(), frames.input());
    connect_endpoints(frames.output(), sink.input());

    let blocks: Vec<Arc<dyn Block>> =
        vec![sink.clone(), frames.clone(), pass.clone(), source.clone()];
    for block in &blocks {
        block.start().unwrap();
    }

    assert!(sink.wait_for(4, Duration::from_secs(10)));
    for block in &blocks {
        block.stop();
    }

    let received = sink.received();
    assert_eq!(received.len(), 4);
    let flattened: Vec<i32> = received.iter().flat_map(|f| f.iter().copied()).collect();
    assert_eq!(flattened, (0..64).collect::<Vec<_>>());
    assert!(received.iter().all(|f| f.len() == 16 && f.is_pooled()));
}
