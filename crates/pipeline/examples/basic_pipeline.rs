//! Builds the RTSP viewer topology on the recording runtime and prints every
//! runtime request it produces.

use stagegraph::recording::RecordingBackend;
use stagegraph::{Pipeline, PipelineOptions, State};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Basic Pipeline Example");
    info!("======================");

    let backend = RecordingBackend::new();
    let mut pipeline = Pipeline::new(backend.clone(), "RTSP_SERVER", PipelineOptions::default())?;

    pipeline.create_stage("rtspsrc", "rtspsrc")?;
    pipeline.create_stage("rtph264depay", "videodepay")?;
    pipeline.create_stage("h264parse", "h264parse")?;
    pipeline.create_stage("avdec_h264", "videodecode")?;
    pipeline.create_stage("videoconvert", "videoconvert")?;
    pipeline.create_filtered_stage("videoscale", "videoscale", "video/x-raw, width=(int)640")?;
    pipeline.create_stage("autovideosink", "videosink")?;

    pipeline.set_property("rtspsrc", "location", "rtsp://127.0.0.1:8554/test")?;
    pipeline.set_property("rtspsrc", "latency", 0)?;

    let linked = pipeline.link_by_name(&[
        "videodepay",
        "h264parse",
        "videodecode",
        "videoconvert",
        "videoscale",
        "videosink",
    ])?;
    info!("Linked {} pairs", linked);

    pipeline.attach_signal("rtspsrc", "pad-added", String::from("videodepay"), |_, depay| {
        println!("new pad, would link to {depay}");
        None
    })?;
    pipeline.set_state(State::Playing)?;

    for call in backend.calls() {
        println!("  {call}");
    }
    Ok(())
}
