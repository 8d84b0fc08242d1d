use std::sync::Arc;
use std::time::Duration;

use avc1394::sim::SimTapeDeck;
use avc1394::tl::sim::{SimBus, SimDevice, SimReaction};
use avc1394::tl::{CommandServer, ServerConfig};
use avc1394::{AvcUnit, FcpFrame, NodeId};

/// A second node keeps writing unrelated frames to the response register
/// while the deck answers late; only the deck's answer resolves the command.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let bus = SimBus::new();
    let deck_node = NodeId::local(1);
    let noisy_node = NodeId::local(5);

    let mut deck = SimTapeDeck::new();
    bus.add_device(deck_node, move |frame: &FcpFrame| {
        let reaction = deck.on_command(frame);
        let mut late = SimReaction::ack(reaction.ack);
        for response in reaction.responses {
            late = late.with_packet(response.packet, Duration::from_millis(40));
        }
        late
    });
    let stray = FcpFrame::from_words(vec![0x0c28_c375]);
    for delay in [5u64, 10, 20] {
        bus.inject_response(noisy_node, &stray, Duration::from_millis(delay));
    }

    let server = CommandServer::spawn(Arc::new(bus.clone()), ServerConfig::default());
    let unit = AvcUnit::new(server.handle(), deck_node);
    println!("deck: {}", unit.transport_status().await?);

    for completion in bus.completions() {
        println!(
            "{} wrote {:012x}: {:?}",
            completion.source, completion.offset, completion.rcode
        );
    }
    server.shutdown().await;
    Ok(())
}
