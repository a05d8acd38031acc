//! Enroll and verify on the virtual match-in-sensor device
//!
//! Plays both sides: the device runs on its own task and a stimulus task
//! answers every status line the way a cooperative sensor would.

use std::path::PathBuf;

use anyhow::Context;
use fprust::{DeviceHandle, VirtualConfig};
use fprust_transport::{LineReader, StatusLine, Transport, UnixTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut config = VirtualConfig::from_env();
    let path = config
        .misdev_path
        .get_or_insert_with(|| std::env::temp_dir().join("fprust-misdev.sock"))
        .clone();

    let device = config
        .discover()
        .into_iter()
        .find(|device| device.info().driver == "virtual_misdev")
        .context("virtual match-in-sensor device not configured")?;

    let (handle, _events) = DeviceHandle::spawn(device);
    handle.open().await?;
    println!("Listening on {}", path.display());

    let stimulus = tokio::spawn(answer(path));

    let print = handle
        .enroll(handle.new_print(), |stage| {
            println!("Enroll stage {}: {:?}", stage.completed, stage.result);
        })
        .await?;
    println!("Enrolled {}", print);

    let outcome = handle.verify(print.clone()).await?;
    println!("Verify: {:?}", outcome.result);

    handle.delete_print(print).await?;
    println!("Deleted");

    handle.close().await?;
    stimulus.abort();

    Ok(())
}

/// Answer every action the device announces with success
async fn answer(path: PathBuf) -> fprust_transport::Result<()> {
    let mut transport = UnixTransport::new(&path);
    transport.connect().await?;
    let mut lines = LineReader::new();

    loop {
        let data = transport.receive(30).await?;
        lines.push(&data);

        while let Some(line) = lines.next_line() {
            let reply: &[u8] = match StatusLine::parse(&line)? {
                StatusLine::Idle => continue,
                StatusLine::Enroll(_) => b"3\n1\n",
                StatusLine::Verify(_) => b"1\n",
                StatusLine::Delete(_) => b"0\n",
            };
            println!("Device says {}", String::from_utf8_lossy(&line));
            transport.send(reply).await?;
        }
    }
}
