//! Trace capture example - record a few seconds of tracing as a stream

use browser::trace::StreamCompression;
use browser::{InspectorConfig, InspectorSession, StartParams, TraceData, TransferMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let session = InspectorSession::connect(InspectorConfig::default()).await?;
    let recorder = session.recorder().clone();

    let categories = recorder.get_categories().await?;
    println!("{} categories available", categories.len());

    let mut usage = recorder.buffer_usage();
    tokio::spawn(async move {
        while usage.changed().await.is_ok() {
            let current = *usage.borrow();
            println!("Buffer: {:.0}% full", current.percent_full.unwrap_or(0.0) * 100.0);
        }
    });

    recorder
        .start(StartParams {
            categories: Some("devtools.timeline,v8.execute".to_string()),
            buffer_usage_reporting_interval: Some(500.0),
            transfer_mode: TransferMode::ReturnAsStream,
            stream_compression: Some(StreamCompression::None),
            ..Default::default()
        })
        .await?;
    println!("Recording");

    tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
    recorder.end().await?;

    match session.collect_trace().await? {
        TraceData::Bytes(bytes) => {
            std::fs::write("trace.json", &bytes)?;
            println!("Wrote {} bytes to trace.json", bytes.len());
        }
        TraceData::Events(events) => println!("Collected {} inline events", events.len()),
    }

    session.close().await?;
    Ok(())
}
