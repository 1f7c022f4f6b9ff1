//! Example: structured objects over an object stream
//!
//! Registers a custom packet type with a JSON codec, streams a handful of
//! packets from a source block into a JSON sink, and prints the rendered
//! documents.
//!
//! Usage:
//!   cargo run --example packet_stream -- --count 5

use clap::Parser;
use serde::{Deserialize, Serialize};
use sigflow::blocks::{JsonSink, PacketSource};
use sigflow::runtime::Graph;
use sigflow::runtime::types::register_json_object;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of packets to stream
    #[arg(short, long, default_value = "5")]
    count: u32,

    /// Nominal packet rate in Hz
    #[arg(short, long, default_value = "100")]
    rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Packet {
    seq: u32,
    payload: Vec<u8>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    register_json_object::<Packet>("packet")?;

    let packets: Vec<Packet> = (0..args.count)
        .map(|seq| Packet {
            seq,
            payload: vec![seq as u8; 4],
        })
        .collect();

    let mut graph = Graph::new();
    let sink = JsonSink::new();
    let rendered = sink.rendered();

    graph.add("decoder", PacketSource::new("packet", args.rate, packets))?;
    graph.add("json", sink)?;
    graph.connect("decoder", 0, "json", 0)?;

    let mut controller = graph.start()?;
    controller.wait()?;

    let documents = rendered.lock().unwrap();
    info!("rendered {} packets", documents.len());
    for doc in documents.iter() {
        println!("{doc}");
    }

    Ok(())
}
