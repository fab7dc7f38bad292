//! Live tracker server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{routing::get, Extension, Router};
use cam_source::CameraConfig;
use clap::Parser;
use env_logger::TimestampPrecision;
use track_server::{
    endpoints::{healthcheck, index, video_stream},
    meter::spawn_meter_logger,
    nn::YoloV8Model,
    AppState,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve on
    #[clap(long, default_value = "0.0.0.0:8080")]
    address: String,

    /// Path to the detection model (downloaded into the cache directory
    /// if not given)
    #[clap(long)]
    model: Option<PathBuf>,

    /// Camera command producing motion-JPEG on stdout
    #[clap(long, default_value = "rpicam-vid")]
    camera_command: String,

    /// Captured frame width
    #[clap(long, default_value_t = 640)]
    width: u32,

    /// Captured frame height
    #[clap(long, default_value_t = 640)]
    height: u32,

    /// Captured frames per second
    #[clap(long, default_value_t = 30)]
    framerate: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model = YoloV8Model::new(args.model).await?;
    let camera = CameraConfig {
        command: args.camera_command,
        width: args.width,
        height: args.height,
        framerate: args.framerate,
    };
    let state = Arc::new(AppState::new(Arc::new(model), camera));

    spawn_meter_logger();

    let app = Router::new()
        .route("/", get(index))
        .route("/video", get(video_stream))
        .route("/healthcheck", get(healthcheck))
        .layer(Extension(state));

    let addr: SocketAddr = args.address.parse()?;
    log::info!("serving on http://{addr}");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
