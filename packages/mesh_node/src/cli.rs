//! `meshnode` subcommands.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mesh_core::message::Payload;
use side_channel::acoustic::{estimate_duration, tone_schedule};
use side_channel::qr::{BarcodeImage, BarcodeRenderer, TerminalRenderer};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use crate::config::{FileConfig, NodePaths};
use crate::identity::NodeIdentity;
use crate::seen_store::SqliteSeenStore;
use crate::session::{Delivery, MeshSession};

/// Load (or regenerate) the device key pair and print its fingerprints.
pub fn keygen_command(paths: &NodePaths, reset: bool) -> Result<()> {
    let identity = if reset {
        NodeIdentity::reset(&paths.data_dir)?
    } else {
        NodeIdentity::load_or_generate(&paths.data_dir)?
    };
    println!("agreement key: {}", identity.fingerprint());
    println!("signing key:   {}", identity.signing_fingerprint());
    Ok(())
}

pub fn qr_command(text: &str) -> Result<()> {
    let image = BarcodeImage::encode(text).context("failed to encode QR code")?;
    let mut renderer = TerminalRenderer::new(std::io::stdout().lock());
    renderer.render(&image, text)?;
    Ok(())
}

pub fn tones_command(text: &str, bit_ms: u64) -> Result<()> {
    let bit = Duration::from_millis(bit_ms);
    let mut out = std::io::stdout().lock();
    for tone in tone_schedule(text, bit) {
        writeln!(out, "{:>6.0} Hz  {:>4} ms", tone.freq, tone.duration.as_millis())?;
    }
    writeln!(
        out,
        "{} bits, ~{:.2}s at {} ms/bit",
        text.len() * 8,
        estimate_duration(text, bit).as_secs_f64(),
        bit_ms
    )?;
    Ok(())
}

/// Join the mesh over the relay only: stdin lines go out as chat messages,
/// delivered messages are printed.
pub async fn relay_command(
    paths: &NodePaths,
    mut file_config: FileConfig,
    url: Option<String>,
) -> Result<()> {
    if let Some(url) = url {
        file_config.relay.url = Some(url);
    }
    let config = file_config.session_config();
    if config.relay.is_none() {
        anyhow::bail!("no relay url: pass --url or set [relay] url in config.toml");
    }

    let identity = NodeIdentity::load_or_generate(&paths.data_dir)?;
    let store = SqliteSeenStore::connect(&paths.db_url()).await?;
    let session = MeshSession::builder(config)
        .keys(identity.keys().clone())
        .seen_store(Arc::new(store))
        .build()
        .await
        .context("failed to start mesh session")?;
    session.start_relay()?;
    info!(node_id = %session.self_id(), "joined mesh over relay");

    let mut inbox = session
        .take_inbox()
        .context("session inbox already taken")?;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = session.send_mesh(line, false) {
                    warn!(error = %e, "send failed");
                }
            }
            delivery = inbox.recv() => {
                let Some(delivery) = delivery else { break };
                print_delivery(&delivery);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

fn print_delivery(delivery: &Delivery) {
    match delivery {
        Delivery::Message(msg) => match &msg.payload {
            Payload::Chat(chat) => println!("<{}> {}", msg.from, chat.text),
            other => println!("<{}> [{:?}]", msg.from, other.kind()),
        },
        Delivery::File(file) => println!(
            "<{}> file {} ({}, {} bytes)",
            file.from,
            file.name,
            file.mime,
            file.data.len()
        ),
    }
}
