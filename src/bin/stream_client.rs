//! # Streaming Demo Client
//!
//! Streams a WAV file to `/ws/stream` in real time and prints every message
//! the server sends back.
//!
//! ```text
//! BIRDNET_API_KEY=... stream_client --file example.wav --lat 60.44 --lon 22.26
//! ```
//!
//! The file must already be 48kHz mono 16-bit PCM, the layout the server expects.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const SAMPLE_RATE: u32 = 48_000;

/// 0.5s of 48kHz mono 16-bit audio
const CHUNK_BYTES: usize = 48_000;
const CHUNK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "stream_client", about = "Stream a WAV file to the detection service")]
struct Args {
    /// Streaming endpoint
    #[arg(long, default_value = "ws://localhost:8000/ws/stream")]
    url: String,

    /// 48kHz mono 16-bit WAV file
    #[arg(long, default_value = "example.wav")]
    file: PathBuf,

    #[arg(long, default_value_t = 60.44324706064409, allow_negative_numbers = true)]
    lat: f64,

    #[arg(long, default_value_t = 22.2632729407483, allow_negative_numbers = true)]
    lon: f64,

    /// Confidence floor
    #[arg(long, default_value_t = 0.8)]
    min_conf: f64,

    /// Session length in seconds
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let token = std::env::var("BIRDNET_API_KEY").unwrap_or_default();
    if token.is_empty() {
        bail!("Environment variable BIRDNET_API_KEY is not set");
    }

    let pcm = load_pcm(&args.file)?;
    println!("Loaded audio: {} bytes of PCM", pcm.len());

    let uri = stream_url(&args.url, &token)?;
    let (socket, _) = tokio_tungstenite::connect_async(uri.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    let (mut sink, mut stream) = socket.split();

    let init = json!({
        "lat": args.lat,
        "lon": args.lon,
        "min_conf": args.min_conf,
        "timeout": args.timeout,
    });
    sink.send(Message::Text(init.to_string())).await?;
    println!("Sent init: {}", init);

    // Print server messages while audio is being sent.
    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => println!("Received: {}", text),
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => println!("Server closed: {} {}", u16::from(frame.code), frame.reason),
                        None => println!("Server closed"),
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut interval = tokio::time::interval(CHUNK_INTERVAL);
    for chunk in pcm.chunks(CHUNK_BYTES) {
        interval.tick().await;
        if reader.is_finished() {
            break;
        }
        if let Err(e) = sink.send(Message::Binary(chunk.to_vec())).await {
            eprintln!("Stopped streaming: {}", e);
            break;
        }
    }

    println!("Finished streaming; waiting for the server to time out...");
    let grace = Duration::from_secs_f64(args.timeout.max(0.0)) + Duration::from_secs(10);
    if tokio::time::timeout(grace, reader).await.is_err() {
        println!("No close from the server after {:?}", grace);
    }

    Ok(())
}

/// Read a WAV file and return its samples as little-endian 16-bit PCM.
fn load_pcm(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read WAV file {}", path.display()))?;

    if header.sampling_rate != SAMPLE_RATE || header.channel_count != 1 {
        bail!(
            "{} is {} Hz with {} channel(s); expected {} Hz mono",
            path.display(),
            header.sampling_rate,
            header.channel_count,
            SAMPLE_RATE
        );
    }

    let samples = match data.try_into_sixteen() {
        Ok(samples) => samples,
        Err(_) => bail!("{} is {}-bit; expected 16-bit", path.display(), header.bits_per_sample),
    };

    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        pcm.write_i16::<LittleEndian>(sample)?;
    }
    Ok(pcm)
}

/// Endpoint URL with the token appended as a percent-encoded query parameter.
fn stream_url(base: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid URL {}", base))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
