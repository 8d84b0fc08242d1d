use std::sync::Arc;

use avc1394::sim::SimTapeDeck;
use avc1394::tl::sim::SimBus;
use avc1394::tl::{CommandServer, ServerConfig};
use avc1394::{AvcUnit, NodeId};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let bus = SimBus::new();
    let deck = NodeId::local(1);
    bus.add_device(deck, SimTapeDeck::new());

    let server = CommandServer::spawn(Arc::new(bus.clone()), ServerConfig::default());
    let unit = AvcUnit::new(server.handle(), deck);

    println!("initial: {}", unit.transport_status().await?);
    for _ in 0..2 {
        let code = unit.play().await?;
        println!("play -> {code:?}: {}", unit.transport_status().await?);
    }
    unit.pause().await?;
    println!("pause: {}", unit.transport_status().await?);
    unit.seek_timecode("00:01:30:00".parse()?).await?;
    match unit.timecode().await? {
        Some(position) => println!("time code {position}"),
        None => println!("no time code"),
    }
    unit.eject().await?;
    println!("eject: {}", unit.transport_status().await?);
    println!("{} packets sent", bus.sent().len());

    server.shutdown().await;
    Ok(())
}
