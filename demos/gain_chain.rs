//! Example: linear real chain
//!
//! Runs a vector source through a gain block into a collecting sink and
//! prints the first few output samples.
//!
//! Usage:
//!   cargo run --example gain_chain -- --samples 1000 --gain 2.0

use clap::Parser;
use sigflow::blocks::{Gain, VectorSink, VectorSource};
use sigflow::runtime::Graph;
use sigflow::runtime::types::REAL32;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of samples to generate
    #[arg(short, long, default_value = "1000")]
    samples: usize,

    /// Gain factor applied to the stream
    #[arg(short, long, default_value = "2.0")]
    gain: f32,

    /// Source sample rate in Hz
    #[arg(short, long, default_value = "48000")]
    rate: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let data: Vec<f32> = (0..args.samples).map(|i| i as f32).collect();

    let mut graph = Graph::new();
    let sink = VectorSink::<f32>::new(REAL32);
    let collected = sink.values();

    graph.add("src", VectorSource::new(REAL32, args.rate, data))?;
    graph.add("gain", Gain::new(args.gain))?;
    graph.add("snk", sink)?;
    graph.connect("src", 0, "gain", 0)?;
    graph.connect("gain", 0, "snk", 0)?;

    let mut controller = graph.start()?;
    controller.wait()?;

    let values = collected.lock().unwrap();
    info!("collected {} samples at {} Hz", values.len(), args.rate);
    for (i, value) in values.iter().take(8).enumerate() {
        println!("y[{i}] = {value}");
    }

    Ok(())
}
