use std::sync::Arc;
use std::time::Duration;

use avc1394::fcp::avc::unit;
use avc1394::sim::SimTapeDeck;
use avc1394::tl::sim::{SimBus, SimDevice, SimReaction};
use avc1394::tl::{AckCode, CommandServer, ServerConfig};
use avc1394::{AvcUnit, FcpFrame, NodeId};

/// Scan a deck that stops answering SUBUNIT INFO after page 2.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let bus = SimBus::new();
    let node = NodeId::local(2);
    let mut deck = SimTapeDeck::new()
        .with_company_id(0x08_0046)
        .with_subunit_page(1, Some(0x28ff_ffff));
    bus.add_device(node, move |frame: &FcpFrame| {
        let page = frame.operand(0).map(|operand| (operand >> 4) & 0x07);
        if frame.opcode() == unit::SUBUNIT_INFO && page >= Some(3) {
            SimReaction::ack(AckCode::Complete)
        } else {
            deck.on_command(frame)
        }
    });

    let config = ServerConfig {
        max_retries: 1,
        split_timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let server = CommandServer::spawn(Arc::new(bus), config);
    let unit = AvcUnit::new(server.handle(), node);

    let info = unit.get_unit_info().await?;
    println!(
        "unit {:?} id {} company {:06x}",
        info.unit_type, info.unit_id, info.company_id
    );
    let scan = unit.get_subunit_info().await;
    for (page, word) in scan.pages.iter().enumerate() {
        match word {
            Some(word) => println!("page {page}: {word:08x}"),
            None => println!("page {page}: not read"),
        }
    }
    for (subunit_type, max_id) in scan.entries() {
        println!("subunit {subunit_type:?} ids 0..={max_id}");
    }
    if let Some(err) = &scan.error {
        println!("scan stopped: {err}");
    }

    server.shutdown().await;
    Ok(())
}
