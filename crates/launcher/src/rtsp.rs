//! The RTSP H.264 viewer topology.

use anyhow::{Context, Result};
use gstreamer as gst;

use gst::glib;
use gst::prelude::*;
use stagegraph::{GstBackend, Pipeline, PipelineOptions, State};
use tracing::{info, warn};

const RAW_VIDEO_CAPS: &str = "video/x-raw, format=(string)I420";

pub fn run(location: &str, latency: u32, tcp: bool) -> Result<()> {
    let mut pipeline = Pipeline::new(GstBackend::new(), "RTSP_SERVER", PipelineOptions::default())?;

    pipeline.create_stage("rtspsrc", "rtspsrc")?;
    pipeline.create_stage("rtph264depay", "videodepay")?;
    pipeline.create_stage("h264parse", "h264parse")?;
    pipeline.create_stage("avdec_h264", "videodecode")?;
    pipeline.create_stage("videoscale", "videoscale")?;
    pipeline.create_stage("videorate", "videorate")?;
    pipeline.create_filtered_stage("videoconvert", "videoconvert", RAW_VIDEO_CAPS)?;
    pipeline.create_stage("autovideosink", "videosink")?;

    pipeline.set_property("rtspsrc", "location", location)?;
    pipeline.set_property("rtspsrc", "protocols", if tcp { "tcp" } else { "udp" })?;
    pipeline.set_property("rtspsrc", "latency", latency)?;

    pipeline.link_by_name(&[
        "videodepay",
        "h264parse",
        "videodecode",
        "videoscale",
        "videorate",
        "videoconvert",
        "videosink",
    ])?;

    // rtspsrc only exposes its source pads once the session is set up.
    let depay = pipeline
        .stage("videodepay")
        .cloned()
        .context("videodepay is not registered")?;
    pipeline.attach_signal("rtspsrc", "pad-added", depay, on_pad_added)?;

    pipeline.set_state(State::Playing)?;
    pipeline.run_loop()?;
    Ok(())
}

fn on_pad_added(args: &[glib::Value], depay: &gst::Element) -> Option<glib::Value> {
    let pad = args.get(1)?.get::<gst::Pad>().ok()?;
    let Some(sink_pad) = depay.static_pad("sink") else {
        warn!("{} has no sink pad", depay.name());
        return None;
    };
    if sink_pad.is_linked() {
        info!("rtspsrc and depay are already linked. Ignoring {}", pad.name());
        return None;
    }
    match pad.link(&sink_pad) {
        Ok(_) => info!("Linked {} to {}", pad.name(), depay.name()),
        Err(e) => warn!("Failed to link {} to {}: {:?}", pad.name(), depay.name(), e),
    }
    None
}
