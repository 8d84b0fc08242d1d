use anyhow::{Context, Result};
use avc1394::{AvcSubunitType, AvcUnit, UnitInfo};
use clap::ValueEnum;
use serde::Serialize;
use tracing::warn;

use crate::common;

/// Subunit types accepted by `check`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SubunitArg {
    Monitor,
    Audio,
    Disc,
    Tape,
    Tuner,
    Camera,
    Panel,
    Music,
}

impl From<SubunitArg> for AvcSubunitType {
    fn from(value: SubunitArg) -> Self {
        match value {
            SubunitArg::Monitor => AvcSubunitType::Monitor,
            SubunitArg::Audio => AvcSubunitType::Audio,
            SubunitArg::Disc => AvcSubunitType::Disc,
            SubunitArg::Tape => AvcSubunitType::Tape,
            SubunitArg::Tuner => AvcSubunitType::Tuner,
            SubunitArg::Camera => AvcSubunitType::Camera,
            SubunitArg::Panel => AvcSubunitType::Panel,
            SubunitArg::Music => AvcSubunitType::Music,
        }
    }
}

#[derive(Serialize)]
struct SubunitEntry {
    subunit_type: AvcSubunitType,
    max_id: u8,
}

#[derive(Serialize)]
struct InfoReport {
    unit: UnitInfo,
    pages: Vec<Option<String>>,
    subunits: Vec<SubunitEntry>,
    error: Option<String>,
}

pub async fn run(unit: &AvcUnit, json: bool) -> Result<()> {
    let info = unit.get_unit_info().await.context("read unit info")?;
    let scan = unit.get_subunit_info().await;
    if let Some(err) = &scan.error {
        warn!(%err, "subunit table incomplete");
    }

    if json {
        let report = InfoReport {
            unit: info,
            pages: scan
                .pages
                .iter()
                .map(|page| page.map(|word| format!("{word:08x}")))
                .collect(),
            subunits: scan
                .entries()
                .map(|(subunit_type, max_id)| SubunitEntry {
                    subunit_type,
                    max_id,
                })
                .collect(),
            error: scan.error.as_ref().map(ToString::to_string),
        };
        common::print_json(&report)?;
    } else {
        println!(
            "unit: {:?} id {} company {:06x}",
            info.unit_type, info.unit_id, info.company_id
        );
        for (page, word) in scan.pages.iter().enumerate() {
            match word {
                Some(word) => println!("page {page}: {word:08x}"),
                None => println!("page {page}: -"),
            }
        }
        for (subunit_type, max_id) in scan.entries() {
            println!("subunit {subunit_type:?} ids 0..={max_id}");
        }
    }

    match scan.error {
        Some(err) => Err(anyhow::Error::new(err).context("subunit table incomplete")),
        None => Ok(()),
    }
}

pub async fn check(unit: &AvcUnit, subunit: SubunitArg, json: bool) -> Result<()> {
    let subunit_type = AvcSubunitType::from(subunit);
    let present = unit
        .check_subunit_type(subunit_type)
        .await
        .with_context(|| format!("look up {subunit_type:?} subunit"))?;
    if json {
        common::print_json(&serde_json::json!({
            "subunit_type": subunit_type,
            "present": present,
        }))
    } else {
        println!("{subunit_type:?}: {}", if present { "present" } else { "absent" });
        Ok(())
    }
}
