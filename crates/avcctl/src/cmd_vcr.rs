use anyhow::{Context, Result};
use avc1394::{AvcError, AvcRespCode, AvcUnit, TransportState};
use clap::ValueEnum;
use serde::Serialize;
use tracing::info;

use crate::common;

/// Tape transport commands, executed in the order given.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Status,
    Play,
    Reverse,
    Pause,
    Stop,
    Record,
    Eject,
    Rewind,
    Forward,
    NextFrame,
    PreviousFrame,
    NextIndex,
    PreviousIndex,
}

impl Action {
    fn name(self) -> String {
        self.to_possible_value()
            .map(|value| value.get_name().to_owned())
            .unwrap_or_else(|| format!("{self:?}"))
    }
}

#[derive(Serialize)]
struct ActionOutcome {
    action: Action,
    /// `None` when the deck was not in a mode accepting the command.
    response: Option<String>,
    state: TransportState,
}

pub async fn run(unit: &AvcUnit, actions: &[Action], json: bool) -> Result<()> {
    let mut outcomes = Vec::with_capacity(actions.len());
    for &action in actions {
        let response = perform(unit, action)
            .await
            .with_context(|| format!("{} on node {}", action.name(), unit.node()))?;
        let state = unit
            .transport_status()
            .await
            .context("read transport state")?;
        info!(action = %action.name(), ?response, %state, "transport command done");
        outcomes.push(ActionOutcome {
            action,
            response: response.map(|code| format!("{code:?}")),
            state,
        });
    }

    if json {
        return common::print_json(&outcomes);
    }
    for outcome in &outcomes {
        println!(
            "{:<15} {:<15} {}",
            outcome.action.name(),
            outcome.response.as_deref().unwrap_or("-"),
            outcome.state
        );
    }
    Ok(())
}

pub async fn trick(unit: &AvcUnit, speed: i32, json: bool) -> Result<()> {
    let response = unit
        .trick_play(speed)
        .await
        .with_context(|| format!("trick play at speed {speed}"))?;
    let state = unit
        .transport_status()
        .await
        .context("read transport state")?;
    if json {
        return common::print_json(&serde_json::json!({
            "speed": speed,
            "response": response.map(|code| format!("{code:?}")),
            "state": state,
        }));
    }
    match response {
        Some(code) => println!("{code:?}: {state}"),
        None => println!("refused while recording: {state}"),
    }
    Ok(())
}

async fn perform(unit: &AvcUnit, action: Action) -> Result<Option<AvcRespCode>, AvcError> {
    let response = match action {
        Action::Status => return Ok(None),
        Action::Play => unit.play().await?,
        Action::Reverse => unit.reverse().await?,
        Action::Pause => unit.pause().await?,
        Action::Stop => unit.stop().await?,
        Action::Record => unit.record().await?,
        Action::Eject => unit.eject().await?,
        Action::Rewind => unit.rewind().await?,
        Action::Forward => unit.fast_forward().await?,
        Action::NextFrame => return unit.next_frame().await,
        Action::PreviousFrame => return unit.previous_frame().await,
        Action::NextIndex => return unit.next_index().await,
        Action::PreviousIndex => return unit.previous_index().await,
    };
    Ok(Some(response))
}
