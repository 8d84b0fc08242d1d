use std::path::PathBuf;

use anyhow::Result;
use avc1394::sim::SimTapeDeck;
use avc1394::TimeCode;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd_info;
mod cmd_timecode;
mod cmd_vcr;
mod common;

use cmd_info::SubunitArg;
use cmd_vcr::Action;
use common::Session;

#[derive(Parser, Debug)]
#[command(name = "avcctl", version, about = "AV/C tape deck control over a simulated IEEE 1394 bus")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// Command server settings (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Protocol retries after the first transmission
    #[arg(long)]
    retries: Option<u32>,
    /// Wait for a correlated response, in milliseconds
    #[arg(long)]
    split_timeout_ms: Option<u64>,
    /// Physical id of the tape deck
    #[arg(long, default_value_t = common::DEFAULT_DECK_PHY, value_parser = clap::value_parser!(u8).range(0..63))]
    node: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read UNIT INFO and the subunit table
    Info,
    /// Check whether the unit has a subunit of the given type
    Check {
        #[arg(long, value_enum)]
        subunit: SubunitArg,
    },
    /// Run transport commands in order, printing the mode after each
    Vcr {
        #[arg(value_enum, required = true)]
        actions: Vec<Action>,
    },
    /// Variable speed playback
    Trick {
        #[arg(long, allow_negative_numbers = true)]
        speed: i32,
    },
    /// Read the time code, optionally seeking first
    Timecode {
        /// Target position as HH:MM:SS:FF
        #[arg(long)]
        seek: Option<TimeCode>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        config,
        retries,
        split_timeout_ms,
        node,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = common::load_config(config.as_deref(), retries, split_timeout_ms)?;
    let session = Session::open(config, node, SimTapeDeck::new())?;
    let unit = &session.unit;
    let result = match cmd {
        Cmd::Info => cmd_info::run(unit, json).await,
        Cmd::Check { subunit } => cmd_info::check(unit, subunit, json).await,
        Cmd::Vcr { actions } => cmd_vcr::run(unit, &actions, json).await,
        Cmd::Trick { speed } => cmd_vcr::trick(unit, speed, json).await,
        Cmd::Timecode { seek } => cmd_timecode::run(unit, seek, json).await,
    };
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_vcr_actions() {
        let cli = Cli::parse_from(["avcctl", "vcr", "play", "pause", "next-frame"]);
        match cli.cmd {
            Cmd::Vcr { actions } => {
                assert_eq!(actions, vec![Action::Play, Action::Pause, Action::NextFrame])
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(cli.node, common::DEFAULT_DECK_PHY);
    }

    #[test]
    fn vcr_requires_an_action() {
        assert!(Cli::try_parse_from(["avcctl", "vcr"]).is_err());
    }

    #[test]
    fn parse_negative_trick_speed() {
        let cli = Cli::parse_from(["avcctl", "trick", "--speed", "-3"]);
        match cli.cmd {
            Cmd::Trick { speed } => assert_eq!(speed, -3),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_seek_target() {
        let cli = Cli::parse_from(["avcctl", "--json", "timecode", "--seek", "00:10:00:00"]);
        assert!(cli.json);
        match cli.cmd {
            Cmd::Timecode { seek } => {
                assert_eq!(seek.map(|code| code.to_string()).as_deref(), Some("00:10:00:00"))
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(Cli::try_parse_from(["avcctl", "timecode", "--seek", "10:00"]).is_err());
    }

    #[test]
    fn node_must_be_a_phy_id() {
        assert!(Cli::try_parse_from(["avcctl", "--node", "63", "info"]).is_err());
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let config = common::load_config(None, Some(5), Some(250)).expect("config");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.split_timeout, Duration::from_millis(250));
        let missing = std::path::Path::new("/nonexistent/avcctl.json");
        assert!(common::load_config(Some(missing), None, None).is_err());
    }

    #[tokio::test]
    async fn session_runs_transport_commands() {
        let session = Session::open(
            common::load_config(None, None, None).expect("config"),
            2,
            SimTapeDeck::new(),
        )
        .expect("session");
        cmd_vcr::run(&session.unit, &[Action::Play, Action::Pause, Action::Status], true)
            .await
            .expect("run actions");
        assert_eq!(
            session.unit.is_playing().await.expect("probe"),
            Some(avc1394::fcp::avc::vcr::PLAY_FORWARD_PAUSE)
        );
        session.close().await;
    }

    #[tokio::test]
    async fn local_node_is_not_a_deck() {
        let config = common::load_config(None, None, None).expect("config");
        assert!(Session::open(config, 0, SimTapeDeck::new()).is_err());
    }
}
