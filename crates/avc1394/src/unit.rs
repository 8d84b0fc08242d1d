//! Unit commands: UNIT INFO and the SUBUNIT INFO scan.

use fcp::avc::{unit, AvcAddr, AvcCtype, AvcRespCode, AvcSubunitType};
use fcp::FcpFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{response_code, AvcError, AvcUnit};

/// Operand padding of the unit status queries and the table entry of a page
/// the unit does not implement.
const PADDING_QUADLET: u32 = 0xffff_ffff;

/// Answer to UNIT INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub unit_type: AvcSubunitType,
    pub unit_id: u8,
    /// IEEE OUI of the vendor.
    pub company_id: u32,
}

impl UnitInfo {
    pub fn from_response(frame: &FcpFrame) -> Result<Self, AvcError> {
        let code = response_code(frame);
        if code != AvcRespCode::ImplementedStable {
            return Err(AvcError::unexpected(format!("UNIT INFO answered {code:?}")));
        }
        let operands = frame
            .quadlet(1)
            .ok_or_else(|| AvcError::unexpected(format!("short UNIT INFO response: {frame}")))?;
        let unit = (operands >> 24) as u8;
        Ok(Self {
            unit_type: AvcSubunitType::from_raw(unit >> 3),
            unit_id: unit & 0x07,
            company_id: operands & 0x00ff_ffff,
        })
    }
}

/// Subunit table gathered by [`AvcUnit::get_subunit_info`].
///
/// Each page word packs four one-byte entries, first subunit in the most
/// significant byte: subunit type in the upper five bits and the highest
/// subunit id in the lower three. `0xff` marks an unused slot. The scan stops
/// at the first page that fails; later pages stay `None` and the failure is
/// kept in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubunitScan {
    pub pages: [Option<u32>; unit::SUBUNIT_INFO_PAGES],
    pub error: Option<AvcError>,
}

impl SubunitScan {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// `(subunit type, highest subunit id)` of every used slot on the answered pages.
    pub fn entries(&self) -> impl Iterator<Item = (AvcSubunitType, u8)> + '_ {
        self.pages
            .iter()
            .flatten()
            .flat_map(|page| page.to_be_bytes())
            .filter(|&entry| entry != unit::EMPTY_ENTRY)
            .map(|entry| (AvcSubunitType::from_raw(entry >> 3), entry & 0x07))
    }

    pub fn contains(&self, subunit_type: AvcSubunitType) -> bool {
        self.entries().any(|(found, _)| found == subunit_type)
    }
}

impl AvcUnit {
    pub async fn get_unit_info(&self) -> Result<UnitInfo, AvcError> {
        let frame = FcpFrame::command(AvcCtype::Status, AvcAddr::Unit, unit::UNIT_INFO, unit::PADDING)
            .with_quadlet(PADDING_QUADLET);
        let response = self.transaction(frame).await?;
        UnitInfo::from_response(&response.frame)
    }

    /// Read the SUBUNIT INFO pages in order.
    ///
    /// Pages answered with anything but IMPLEMENTED read as `0xffffffff`.
    /// A failed page ends the scan; the table gathered so far is returned
    /// together with the error.
    pub async fn get_subunit_info(&self) -> SubunitScan {
        let mut scan = SubunitScan::default();
        for (page, slot) in scan.pages.iter_mut().enumerate() {
            let operand = ((page as u8) << 4) | unit::SUBUNIT_INFO_EXTENSION;
            let frame = FcpFrame::command(AvcCtype::Status, AvcAddr::Unit, unit::SUBUNIT_INFO, operand)
                .with_quadlet(PADDING_QUADLET);
            match self.transaction(frame).await {
                Ok(response) => {
                    let entry = match response_code(&response.frame) {
                        AvcRespCode::ImplementedStable => {
                            response.frame.quadlet(1).unwrap_or(PADDING_QUADLET)
                        }
                        _ => PADDING_QUADLET,
                    };
                    debug!(node = %self.node(), page, entry, "subunit info page");
                    *slot = Some(entry);
                }
                Err(err) => {
                    warn!(node = %self.node(), page, %err, "subunit info scan stopped");
                    scan.error = Some(err);
                    break;
                }
            }
        }
        scan
    }

    /// Whether the unit reports a subunit of `subunit_type`.
    ///
    /// A match on the pages read before a failure counts; otherwise the
    /// failure is returned.
    pub async fn check_subunit_type(&self, subunit_type: AvcSubunitType) -> Result<bool, AvcError> {
        let scan = self.get_subunit_info().await;
        if scan.contains(subunit_type) {
            return Ok(true);
        }
        match scan.error {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }
}
