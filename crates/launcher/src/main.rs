use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagegraph::recording::RecordingBackend;
use stagegraph::PipelineConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "gstreamer")]
mod rtsp;

#[derive(Parser, Debug)]
#[command(name = "stagegraph", about = "Build and run media pipelines from named stages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dry-run a topology file and print the runtime requests it produces
    Check { path: PathBuf },
    /// Build a topology file on GStreamer and run it until end-of-stream
    Run { path: PathBuf },
    /// Play an RTSP H.264 stream, e.g. rtsp://192.168.68.52:8554/test
    Rtsp {
        location: String,
        /// Jitter buffer latency in milliseconds
        #[arg(long, default_value_t = 0)]
        latency: u32,
        /// Use TCP instead of UDP for the RTP transport
        #[arg(long)]
        tcp: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagegraph=info,stagegraph_launch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { path } => check(&path),
        Command::Run { path } => run(&path),
        Command::Rtsp {
            location,
            latency,
            tcp,
        } => rtsp_view(&location, latency, tcp),
    }
}

fn load(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("Could not load pipeline from {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let config = load(path)?;
    let backend = RecordingBackend::new();
    let pipeline = config
        .build(backend.clone())
        .with_context(|| format!("Pipeline '{}' failed to build", config.name))?;

    for call in backend.calls() {
        println!("{call}");
    }
    tracing::info!(
        "Pipeline '{}' is valid: {} stages",
        pipeline.name(),
        pipeline.registry().len()
    );
    Ok(())
}

#[cfg(feature = "gstreamer")]
fn run(path: &Path) -> Result<()> {
    use stagegraph::{GstBackend, State};

    let config = load(path)?;
    let pipeline = config
        .build(GstBackend::new())
        .with_context(|| format!("Pipeline '{}' failed to build", config.name))?;
    if config.state.is_none() {
        pipeline.set_state(State::Playing)?;
    }
    pipeline.run_loop()?;
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
fn run(_path: &Path) -> Result<()> {
    anyhow::bail!("stagegraph was built without the `gstreamer` feature")
}

#[cfg(feature = "gstreamer")]
fn rtsp_view(location: &str, latency: u32, tcp: bool) -> Result<()> {
    rtsp::run(location, latency, tcp)
}

#[cfg(not(feature = "gstreamer"))]
fn rtsp_view(_location: &str, _latency: u32, _tcp: bool) -> Result<()> {
    anyhow::bail!("stagegraph was built without the `gstreamer` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtsp_requires_a_location() {
        assert!(Cli::try_parse_from(["stagegraph", "rtsp"]).is_err());
    }

    #[test]
    fn rtsp_flags_parse() {
        let cli = Cli::try_parse_from([
            "stagegraph",
            "rtsp",
            "rtsp://cam/1",
            "--latency",
            "200",
            "--tcp",
        ])
        .unwrap();
        match cli.command {
            Command::Rtsp {
                location,
                latency,
                tcp,
            } => {
                assert_eq!(location, "rtsp://cam/1");
                assert_eq!(latency, 200);
                assert!(tcp);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn check_accepts_the_bundled_viewer() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../pipelines/rtsp_viewer.yaml");
        check(&path).unwrap();
    }

    #[test]
    fn check_reports_missing_files() {
        let err = check(Path::new("/nonexistent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Could not load pipeline"));
    }
}
