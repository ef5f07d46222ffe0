//! Stream tokens from the reference pipeline.
//!
//! Lays out a reference artifact directory, loads it, and pulls a short
//! decode session, printing each token id with its latency.

use anyhow::Result;
use axon::fragment::{scaffold, ReferenceRuntime, ReferenceSpec};
use axon::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = ReferenceSpec {
        batch_size: 8,
        context_length: 128,
        ..ReferenceSpec::default()
    };
    scaffold(dir.path(), &spec, "demo")?;

    let runtime = ReferenceRuntime::new(spec);
    let mut pipeline = Pipeline::load(
        &runtime,
        dir.path(),
        &PipelineOptions::default(),
        |_, _| {},
    )?;
    println!("loaded: {:?}", pipeline.config());

    let prompt = [5u32, 6, 7, 8];
    let mut stream = pipeline.predict(&prompt, 16)?;
    while let Some(prediction) = stream.next().await {
        let prediction = prediction?;
        if let Some(prompt_ms) = prediction.prompt_latency_ms {
            println!("prompt ingested in {prompt_ms:.2} ms");
        }
        println!(
            "token {:>5}  ({:.2} ms, {} total)",
            prediction.new_token,
            prediction.latency_ms,
            prediction.all_tokens.len()
        );
    }
    Ok(())
}
