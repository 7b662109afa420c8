//! Example: Pretend to be a site and talk to a running cloud relay.
//!
//! Provision a site with `sec-ctl-cloud create-site`, then:
//!
//! ```text
//! cargo run --example fake_site -- 127.0.0.1:9754 <site_token>
//! ```
//!
//! The fake panel answers state requests, applies arm/disarm commands and
//! toggles zone 1 every few seconds.

use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpStream;

use sec_ctl::message::login_frame;
use sec_ctl::{
    ControlMessage, Event, EventLevel, MessageReader, MessageWriter, Partition, PartitionStatus,
    SiteMessage, StateChange, SystemState, UserCommandCode, Zone, ZoneStatus,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:9754".to_string());
    let token = args.next().context("usage: fake_site <addr> <site_token>")?;

    println!("Connecting to {addr}...");
    let stream = TcpStream::connect(&addr).await?;
    let (rd, wr) = stream.into_split();
    let mut reader = MessageReader::new(rd);
    let writer = MessageWriter::new(wr);
    writer.send_frame(&login_frame(&token)).await?;

    let mut state = SystemState {
        partitions: vec![Partition::new(1, PartitionStatus::Ready)],
        zones: vec![Zone::new(1, ZoneStatus::Restore)],
        ..Default::default()
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            msg = reader.next_message() => match msg? {
                SiteMessage::Control(ControlMessage::GetState) => {
                    println!("Cloud asked for state");
                    writer.send(&SiteMessage::SystemState(state.clone())).await?;
                }
                SiteMessage::UserCommand(cmd) => {
                    println!("Command: {:?}", cmd);
                    let status = match cmd.code {
                        UserCommandCode::Disarm => PartitionStatus::Disarmed,
                        UserCommandCode::StatusReport => {
                            writer.send(&SiteMessage::SystemState(state.clone())).await?;
                            continue;
                        }
                        UserCommandCode::Panic => {
                            let event = Event::new(EventLevel::Critical, "Panic");
                            writer.send(&event.into()).await?;
                            continue;
                        }
                        _ => PartitionStatus::Armed,
                    };
                    let partition = Partition::new(cmd.partition_id.unwrap_or(1), status);
                    let change = StateChange::Partition(partition.clone());
                    state.apply(change.clone());
                    writer.send(&SiteMessage::StateChange(change)).await?;
                    let code = if status == PartitionStatus::Armed { "Armed" } else { "Disarmed" };
                    writer
                        .send(&Event::new(EventLevel::Info, code).with_partition(partition.id).into())
                        .await?;
                }
                other => println!("Ignoring {}", other.kind()),
            },
            _ = ticker.tick() => {
                let open = state.zone(1).is_some_and(|z| z.status == ZoneStatus::Open);
                let status = if open { ZoneStatus::Restore } else { ZoneStatus::Open };
                let change = StateChange::Zone(Zone::new(1, status));
                state.apply(change.clone());
                writer.send(&SiteMessage::StateChange(change)).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Disconnecting...");
                writer.shutdown().await;
                return Ok(());
            }
        }
    }
}
