//! Watch pipeline loading progress.

use anyhow::Result;
use axon::fragment::{scaffold, ReferenceRuntime, ReferenceSpec};
use axon::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = ReferenceSpec {
        num_chunks: 4,
        num_layers: 8,
        ..ReferenceSpec::default()
    };
    scaffold(dir.path(), &spec, "demo")?;

    let runtime = ReferenceRuntime::new(spec);
    let pipeline = Pipeline::load(
        &runtime,
        dir.path(),
        &PipelineOptions::default(),
        |status, fraction| println!("[{:>3.0}%] {status}", fraction * 100.0),
    )?;

    let config = pipeline.config();
    println!(
        "{} layers, window {}, context {}, vocab {}",
        config.num_layers, config.input_length, config.context_length, config.vocab_size
    );
    Ok(())
}
