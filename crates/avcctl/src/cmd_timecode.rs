use anyhow::{Context, Result};
use avc1394::{AvcUnit, TimeCode};
use tracing::info;

use crate::common;

pub async fn run(unit: &AvcUnit, seek: Option<TimeCode>, json: bool) -> Result<()> {
    let seek_response = match seek {
        Some(target) => {
            let code = unit
                .seek_timecode(target)
                .await
                .with_context(|| format!("seek to {target}"))?;
            info!(%target, ?code, "seek answered");
            Some(format!("{code:?}"))
        }
        None => None,
    };
    let position = unit.timecode().await.context("read time code")?;

    if json {
        return common::print_json(&serde_json::json!({
            "seek": seek_response,
            "timecode": position,
        }));
    }
    if let Some(code) = seek_response {
        println!("seek: {code}");
    }
    match position {
        Some(position) => println!("{position}"),
        None => println!("no time code"),
    }
    Ok(())
}
