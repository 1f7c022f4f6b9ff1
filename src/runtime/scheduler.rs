//! Thread-per-block scheduler
//!
//! `Graph::start()` runs the construction phases in order (connectivity
//! check, signature resolution, rate propagation including block
//! initialization, stream allocation) and only then spawns one worker
//! thread per block. Any phase failing means no worker was spawned and no
//! stream allocated.
//!
//! Each worker runs a cooperative loop: observe the stop flag, call
//! `process`, translate its outcome into a lifecycle transition. Workers
//! suspend only inside stream reads and writes; shutdown closes every
//! stream, so a blocked worker wakes, drains, and exits within one
//! `process` call. Lifecycle events travel over the control channel; the
//! supervisor joins threads as their termination messages arrive.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use super::block::{Advance, Block};
use super::control::{self, ControlMessage, Status};
use super::errors::{BlockFault, FlowError, WorkError};
use super::graph::{BlockId, Graph};
use super::monitor::StallMonitor;
use super::ports::{InputStream, OutputStream};
use super::rates;
use super::resolver;
use super::stream::{self, StreamControl, StreamSpec};
use super::types;

impl Graph {
    /// Freeze the graph and run it: resolve signatures, propagate rates,
    /// allocate per-edge streams, and launch one worker per block.
    pub fn start(self) -> Result<Controller, FlowError> {
        launch(self)
    }
}

fn launch(mut graph: Graph) -> Result<Controller, FlowError> {
    // Every input port must have its producer by start time
    for id in graph.topological() {
        for port in 0..graph.n_inputs(id) {
            if graph.inbound(id, port).is_none() {
                return Err(FlowError::UnconnectedInput {
                    block: graph.name_of(id).to_string(),
                    port,
                });
            }
        }
    }

    let resolution = resolver::resolve(&graph)?;
    rates::propagate(&mut graph, &resolution)?;

    info!(
        "starting graph: {} blocks, {} edges",
        graph.num_blocks(),
        graph.edges().len()
    );

    // One stream per producer output port; fan-out shares the ring through
    // per-reader cursors
    let monitor = StallMonitor::new();
    let mut groups: HashMap<(BlockId, usize), Vec<usize>> = HashMap::new();
    for (i, edge) in graph.edges().iter().enumerate() {
        groups.entry((edge.from, edge.from_port)).or_default().push(i);
    }

    let mut writers: HashMap<(BlockId, usize), Box<dyn Any + Send>> = HashMap::new();
    let mut readers: HashMap<(BlockId, usize), (Box<dyn Any + Send>, String)> = HashMap::new();
    let mut streams: Vec<Arc<dyn StreamControl>> = Vec::new();

    let mut ports: Vec<_> = groups.keys().copied().collect();
    ports.sort();
    for (from, from_port) in ports {
        let edge_idxs = &groups[&(from, from_port)];
        let type_name = resolution.edge_type(edge_idxs[0]);
        let capacity = edge_idxs
            .iter()
            .filter_map(|&i| graph.edges()[i].capacity)
            .max()
            .unwrap_or_else(|| match types::fixed_size(type_name) {
                Some(size) => stream::default_capacity(size),
                None => stream::DEFAULT_OBJECT_CAPACITY,
            });
        let label = format!("{}.out{}", graph.name_of(from), from_port);
        debug!(
            "allocating stream {} ({}, capacity {}, {} reader(s))",
            label,
            type_name,
            capacity,
            edge_idxs.len()
        );

        let spec = StreamSpec {
            label: label.clone(),
            capacity,
            n_readers: edge_idxs.len(),
            monitor: Some(monitor.clone()),
        };
        let alloc = types::open_stream(type_name, &spec).ok_or_else(|| FlowError::UnknownType {
            name: type_name.to_string(),
        })?;

        writers.insert((from, from_port), alloc.writer);
        for (reader, &edge_idx) in alloc.readers.into_iter().zip(edge_idxs) {
            let edge = &graph.edges()[edge_idx];
            let edge_label = graph.edge_label(edge);
            readers.insert((edge.to, edge.to_port), (reader, edge_label));
        }
        streams.push(alloc.control);
    }

    // Hand each block its port vectors and spawn its worker
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (control_tx, control_rx) = control::channel();
    let monitor_handle = monitor.start_thread();

    let (blocks, _edges) = graph.into_parts();
    let mut workers = HashMap::new();
    for (id, name, block, n_inputs, n_outputs) in blocks {
        let inputs: Vec<InputStream> = (0..n_inputs)
            .map(|port| {
                let (reader, label) = readers
                    .remove(&(id, port))
                    .expect("connectivity was validated above");
                InputStream::from_erased(reader, label)
            })
            .collect();
        let outputs: Vec<OutputStream> = (0..n_outputs)
            .map(|port| {
                let label = format!("{name}.out{port}");
                match writers.remove(&(id, port)) {
                    Some(writer) => OutputStream::from_erased(writer, label),
                    None => OutputStream::vacant(label),
                }
            })
            .collect();

        let stop = Arc::clone(&stop_flag);
        let tx = control_tx.clone();
        let worker_name = name.clone();
        let handle =
            thread::spawn(move || run_block(worker_name, block, inputs, outputs, stop, tx));
        workers.insert(name, handle);
    }

    Ok(Controller {
        stop_flag,
        streams,
        control_tx: Some(control_tx),
        control_rx,
        workers,
        status: Status::default(),
        outcome: None,
        monitor,
        monitor_handle: Some(monitor_handle),
    })
}

/// One worker's cooperative loop.
fn run_block(
    name: String,
    mut block: Box<dyn Block>,
    mut inputs: Vec<InputStream>,
    mut outputs: Vec<OutputStream>,
    stop: Arc<AtomicBool>,
    control: Sender<ControlMessage>,
) {
    let _ = control.send(ControlMessage::Started {
        block: name.clone(),
    });
    debug!("[{}] worker started", name);

    let mut items = 0u64;
    let mut fault: Option<String> = None;
    loop {
        if stop.load(Ordering::Relaxed) {
            debug!("[{}] stop signal observed", name);
            break;
        }
        match block.process(&mut inputs, &mut outputs) {
            Ok(Advance::Items(n)) => items += n as u64,
            Ok(Advance::NeedMore) => thread::yield_now(),
            Ok(Advance::Finished) => {
                info!("[{}] finished after {} items", name, items);
                break;
            }
            Err(WorkError::Stream(_)) | Err(WorkError::Shutdown) => {
                debug!("[{}] stream closed, shutting down", name);
                break;
            }
            Err(WorkError::Block(detail)) => {
                error!("[{}] work error: {}", name, detail);
                fault = Some(detail);
                break;
            }
        }
    }

    // Dropping the endpoints closes our output streams and retires our
    // read cursors, propagating shutdown both ways
    drop(outputs);
    drop(inputs);
    drop(block);

    let message = match fault {
        Some(detail) => ControlMessage::Fault {
            block: name,
            detail,
        },
        None => ControlMessage::Stopped { block: name, items },
    };
    let _ = control.send(message);
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("status", &self.status)
            .field("streams", &self.streams.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Supervisor handle to a running graph.
pub struct Controller {
    stop_flag: Arc<AtomicBool>,
    streams: Vec<Arc<dyn StreamControl>>,
    control_tx: Option<Sender<ControlMessage>>,
    control_rx: Receiver<ControlMessage>,
    workers: HashMap<String, JoinHandle<()>>,
    status: Status,
    outcome: Option<Result<(), FlowError>>,
    monitor: StallMonitor,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Controller {
    /// Request shutdown: raise the stop flag and close every stream so
    /// blocked workers wake up. Idempotent.
    pub fn stop(&self) {
        if self.stop_flag.swap(true, Ordering::Relaxed) {
            debug!("stop already requested");
            return;
        }
        info!("stopping graph: closing {} streams", self.streams.len());
        for stream in &self.streams {
            stream.close();
        }
    }

    /// Current worker lifecycle counts, derived from the control channel.
    pub fn status(&mut self) -> Status {
        while let Ok(message) = self.control_rx.try_recv() {
            self.note(&message);
        }
        self.status.clone()
    }

    /// Block until every worker has terminated. Returns the aggregated
    /// result: `Ok` for a clean run, or the first fatal error of each
    /// failed worker. Idempotent after termination.
    pub fn wait(&mut self) -> Result<(), FlowError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        // With our own sender gone the channel disconnects exactly when the
        // last worker has reported (or died)
        drop(self.control_tx.take());
        info!("waiting for {} workers", self.workers.len());

        while let Ok(message) = self.control_rx.recv() {
            let finished = match &message {
                ControlMessage::Started { .. } => None,
                ControlMessage::Stopped { block, .. } | ControlMessage::Fault { block, .. } => {
                    Some(block.clone())
                }
            };
            self.note(&message);
            if let Some(name) = finished
                && let Some(handle) = self.workers.remove(&name)
            {
                match handle.join() {
                    Ok(()) => debug!("[{}] worker joined", name),
                    Err(_) => error!("[{}] worker panicked after reporting", name),
                }
            }
        }

        // Workers that died without reporting
        for (name, handle) in self.workers.drain() {
            if handle.join().is_err() {
                error!("[{}] worker panicked", name);
                self.status.faults.push(BlockFault {
                    block: name,
                    detail: "worker panicked".to_string(),
                });
            }
        }

        self.monitor.stop();
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }

        let outcome = if self.status.faults.is_empty() {
            Ok(())
        } else {
            Err(FlowError::RuntimeFailure {
                failures: self.status.faults.clone(),
            })
        };
        info!("graph terminated: {} worker(s) stopped", self.status.stopped);
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn note(&mut self, message: &ControlMessage) {
        if let ControlMessage::Fault { block, detail } = message {
            error!("[{}] fatal: {} - stopping remaining workers", block, detail);
            self.stop();
        }
        self.status.absorb(message);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Gain, JsonSink, Multiply, PacketSource, Throttle, VectorSink, VectorSource};
    use crate::runtime::block::Signature;
    use crate::runtime::errors::WorkResult;
    use crate::runtime::types::{self, COMPLEX32, REAL32};
    use num_complex::Complex;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Source that never runs dry, for shutdown tests
    struct Endless;

    impl Block for Endless {
        fn name(&self) -> &str {
            "endless"
        }

        fn signatures(&self) -> Vec<Signature> {
            vec![Signature::typed(&[], &[REAL32])]
        }

        fn sample_rate(&self) -> Option<f64> {
            Some(1_000_000.0)
        }

        fn process(
            &mut self,
            _inputs: &mut [InputStream],
            outputs: &mut [OutputStream],
        ) -> WorkResult<Advance> {
            let writer = outputs[0]
                .get::<f32>()
                .ok_or_else(|| WorkError::Block("bad output type".to_string()))?;
            let n = 64;
            writer.reserve(n).fill(0.0);
            writer.commit(n)?;
            Ok(Advance::Items(n))
        }
    }

    /// Sink that fails fatally on its first sample
    struct Exploder;

    impl Block for Exploder {
        fn name(&self) -> &str {
            "exploder"
        }

        fn signatures(&self) -> Vec<Signature> {
            vec![Signature::typed(&[REAL32], &[])]
        }

        fn process(
            &mut self,
            inputs: &mut [InputStream],
            _outputs: &mut [OutputStream],
        ) -> WorkResult<Advance> {
            let reader = inputs[0]
                .get::<f32>()
                .ok_or_else(|| WorkError::Block("bad input type".to_string()))?;
            reader.peek()?;
            Err(WorkError::Block("deliberate failure".to_string()))
        }
    }

    #[test]
    fn test_linear_real_chain() {
        let data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let expected: Vec<f32> = data.iter().map(|x| x * 2.0).collect();

        let mut graph = Graph::new();
        let sink = VectorSink::<f32>::new(REAL32);
        let collected = sink.values();
        let rate_seen = sink.seen_rate();

        graph
            .add("src", VectorSource::new(REAL32, 48_000.0, data))
            .unwrap();
        graph.add("gain", Gain::new(2.0)).unwrap();
        graph.add("snk", sink).unwrap();
        graph.connect("src", 0, "gain", 0).unwrap();
        graph.connect("gain", 0, "snk", 0).unwrap();

        let mut controller = graph.start().unwrap();
        controller.wait().unwrap();

        assert_eq!(*collected.lock().unwrap(), expected);
        assert_eq!(*rate_seen.lock().unwrap(), Some(48_000.0));
    }

    #[test]
    fn test_overloaded_multiply_computes_real_product() {
        let a: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let b: Vec<f32> = vec![10.0, 20.0, 30.0, 40.0];

        let mut graph = Graph::new();
        let sink = VectorSink::<f32>::new(REAL32);
        let collected = sink.values();

        graph
            .add("a", VectorSource::new(REAL32, 8_000.0, a))
            .unwrap();
        graph
            .add("b", VectorSource::new(REAL32, 8_000.0, b))
            .unwrap();
        graph.add("mul", Multiply::new()).unwrap();
        graph.add("snk", sink).unwrap();
        graph.connect("a", 0, "mul", 0).unwrap();
        graph.connect("b", 0, "mul", 1).unwrap();
        graph.connect("mul", 0, "snk", 0).unwrap();

        let mut controller = graph.start().unwrap();
        controller.wait().unwrap();

        assert_eq!(
            *collected.lock().unwrap(),
            vec![10.0, 40.0, 90.0, 160.0]
        );
    }

    #[test]
    fn test_fan_out_backpressure_loses_nothing() {
        let data: Vec<f32> = (0..5000).map(|i| i as f32).collect();

        let mut graph = Graph::new();
        let fast = VectorSink::<f32>::new(REAL32).with_name("fast");
        let slow = VectorSink::<f32>::new(REAL32).with_name("slow");
        let fast_values = fast.values();
        let slow_values = slow.values();

        graph
            .add(
                "src",
                VectorSource::new(REAL32, 1_000_000.0, data.clone()).with_chunk(16),
            )
            .unwrap();
        graph.add("fast", fast).unwrap();
        graph
            .add(
                "brake",
                Throttle::<f32>::new(REAL32, Duration::from_millis(1)),
            )
            .unwrap();
        graph.add("slow", slow).unwrap();

        // Tiny ring so the slow path actually gates the producer
        graph
            .connect_with_capacity("src", 0, "fast", 0, 64)
            .unwrap();
        graph
            .connect_with_capacity("src", 0, "brake", 0, 64)
            .unwrap();
        graph.connect("brake", 0, "slow", 0).unwrap();

        let mut controller = graph.start().unwrap();
        controller.wait().unwrap();

        assert_eq!(*fast_values.lock().unwrap(), data);
        assert_eq!(*slow_values.lock().unwrap(), data);
    }

    #[test]
    fn test_signature_failure_stops_start() {
        let mut graph = Graph::new();
        graph
            .add(
                "src",
                VectorSource::<Complex<f32>>::new(
                    COMPLEX32,
                    48_000.0,
                    vec![Complex::new(1.0, 0.0)],
                ),
            )
            .unwrap();
        graph.add("gain", Gain::new(2.0)).unwrap();
        graph.connect("src", 0, "gain", 0).unwrap();

        let err = graph.start().unwrap_err();
        assert_eq!(err.kind(), "SignatureMismatch");
        assert!(err.to_string().contains("src.out0 -> gain.in0"));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Packet {
        seq: u32,
        body: String,
    }

    #[test]
    fn test_object_stream_reaches_json_sink_in_order() {
        types::register_json_object::<Packet>("test_sched_packet").unwrap();
        let packets: Vec<Packet> = (0..5)
            .map(|seq| Packet {
                seq,
                body: format!("payload {seq}"),
            })
            .collect();

        // Codec round-trip holds for every packet
        let codec = types::codec::<Packet>("test_sched_packet").unwrap();
        for packet in &packets {
            assert_eq!(codec.decode(&codec.encode(packet)).unwrap(), *packet);
        }

        let mut graph = Graph::new();
        let sink = JsonSink::new();
        let rendered = sink.rendered();

        graph
            .add(
                "decoder",
                PacketSource::new("test_sched_packet", 100.0, packets.clone()),
            )
            .unwrap();
        graph.add("json", sink).unwrap();
        graph.connect("decoder", 0, "json", 0).unwrap();

        let mut controller = graph.start().unwrap();
        controller.wait().unwrap();

        let rendered = rendered.lock().unwrap();
        assert_eq!(rendered.len(), 5);
        for (json, original) in rendered.iter().zip(&packets) {
            let parsed: Packet = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, *original);
        }
    }

    #[test]
    fn test_stop_and_wait_are_idempotent() {
        let mut graph = Graph::new();
        let sink = VectorSink::<f32>::new(REAL32);
        let collected = sink.values();

        graph.add("endless", Endless).unwrap();
        graph.add("snk", sink).unwrap();
        graph.connect("endless", 0, "snk", 0).unwrap();

        let mut controller = graph.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        controller.stop();
        controller.stop();
        assert!(controller.wait().is_ok());
        assert!(controller.wait().is_ok());

        assert!(!collected.lock().unwrap().is_empty());

        let status = controller.status();
        assert_eq!(status.running(), 0);
        assert_eq!(status.stopped, 2);
    }

    #[test]
    fn test_worker_fault_aggregates_and_stops_the_rest() {
        let mut graph = Graph::new();
        graph.add("endless", Endless).unwrap();
        graph.add("bomb", Exploder).unwrap();
        graph.connect("endless", 0, "bomb", 0).unwrap();

        let mut controller = graph.start().unwrap();
        let err = controller.wait().unwrap_err();

        assert_eq!(err.kind(), "BlockRuntimeError");
        let FlowError::RuntimeFailure { failures } = err else {
            panic!("expected RuntimeFailure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].block, "bomb");
        assert!(failures[0].detail.contains("deliberate failure"));
    }

    #[test]
    fn test_unconnected_input_rejected_at_start() {
        let mut graph = Graph::new();
        graph
            .add(
                "src",
                VectorSource::new(REAL32, 1_000.0, vec![0.0f32]),
            )
            .unwrap();
        graph.add("snk", VectorSink::<f32>::new(REAL32)).unwrap();

        let err = graph.start().unwrap_err();
        assert_eq!(err.kind(), "UnconnectedInput");
    }
}
