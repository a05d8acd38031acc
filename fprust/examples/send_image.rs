//! Send a synthetic frame to a virtual image device
//!
//! Usage: `FP_VIRTUAL_IMAGE=/tmp/fp-image.sock cargo run --example send_image [width] [height]`

use anyhow::Context;
use fprust::config::ENV_VIRTUAL_IMAGE;
use fprust_transport::image::encode_frame;
use fprust_transport::{Transport, UnixTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::var(ENV_VIRTUAL_IMAGE).with_context(|| format!("{ENV_VIRTUAL_IMAGE} must be set"))?;

    let mut args = std::env::args().skip(1);
    let width: i32 = args.next().map_or(Ok(64), |arg| arg.parse()).context("invalid width")?;
    let height: i32 = args.next().map_or(Ok(64), |arg| arg.parse()).context("invalid height")?;

    // Diagonal gradient
    let pixels: Vec<u8> = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) % 256) as u8))
        .collect();

    let mut transport = UnixTransport::new(&path);
    transport.connect().await?;
    transport.send(&encode_frame(width, height, &pixels)).await?;
    transport.disconnect().await?;

    println!("Sent {}x{} frame to {}", width, height, path);
    Ok(())
}
