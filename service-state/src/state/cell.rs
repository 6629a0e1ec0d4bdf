use serde::{Deserialize, Serialize};

/// LTE channel bandwidths a cell can legitimately report, in kHz.
pub const LTE_BANDWIDTHS_KHZ: [u32; 6] = [1400, 3000, 5000, 10000, 15000, 20000];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellIdentity {
    Gsm {
        mcc: Option<String>,
        mnc: Option<String>,
        lac: i32,
        cid: i64,
    },
    Wcdma {
        lac: i32,
        cid: i64,
        psc: i32,
    },
    Lte {
        mcc: Option<String>,
        mnc: Option<String>,
        tac: i32,
        ci: i64,
        pci: i32,
        /// kHz, when the modem reports it.
        bandwidth: Option<u32>,
    },
    Cdma {
        base_station_id: i32,
        system_id: i32,
        network_id: i32,
    },
}

impl CellIdentity {
    /// Bandwidth of the serving LTE cell, if it is one of the valid LTE values.
    pub fn lte_bandwidth(&self) -> Option<u32> {
        match self {
            CellIdentity::Lte {
                bandwidth: Some(bw),
                ..
            } if LTE_BANDWIDTHS_KHZ.contains(bw) => Some(*bw),
            _ => None,
        }
    }
}

/// Location derived from the registered cell. `Invalid` until a registration
/// result carries an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellLocation {
    #[default]
    Invalid,
    Gsm {
        lac: i32,
        cid: i64,
        psc: i32,
    },
    Cdma {
        base_station_id: i32,
        system_id: i32,
        network_id: i32,
    },
}

impl CellLocation {
    pub fn from_identity(identity: Option<&CellIdentity>) -> Self {
        let Some(identity) = identity else {
            return CellLocation::Invalid;
        };

        match *identity {
            CellIdentity::Gsm { lac, cid, .. } => CellLocation::Gsm { lac, cid, psc: -1 },
            CellIdentity::Wcdma { lac, cid, psc } => CellLocation::Gsm { lac, cid, psc },
            CellIdentity::Lte { tac, ci, .. } => CellLocation::Gsm {
                lac: tac,
                cid: ci,
                psc: -1,
            },
            CellIdentity::Cdma {
                base_station_id,
                system_id,
                network_id,
            } => CellLocation::Cdma {
                base_station_id,
                system_id,
                network_id,
            },
        }
    }

    pub fn set_invalid(&mut self) {
        *self = CellLocation::Invalid;
    }

    pub fn cid(&self) -> Option<i64> {
        match self {
            CellLocation::Gsm { cid, .. } => Some(*cid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInfo {
    pub registered: bool,
    pub identity: CellIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_lte_identity_to_gsm_location() {
        let identity = CellIdentity::Lte {
            mcc: Some("262".to_string()),
            mnc: Some("03".to_string()),
            tac: 0xC945,
            ci: 0x0197763E,
            pci: 12,
            bandwidth: Some(10000),
        };

        let loc = CellLocation::from_identity(Some(&identity));

        assert_eq!(
            loc,
            CellLocation::Gsm {
                lac: 0xC945,
                cid: 0x0197763E,
                psc: -1
            }
        );
        assert_eq!(identity.lte_bandwidth(), Some(10000));
        assert_eq!(CellLocation::from_identity(None), CellLocation::Invalid);
    }

    #[test]
    fn it_ignores_invalid_lte_bandwidth() {
        let identity = CellIdentity::Lte {
            mcc: None,
            mnc: None,
            tac: 1,
            ci: 1,
            pci: 1,
            bandwidth: Some(7000),
        };

        assert_eq!(identity.lte_bandwidth(), None);
    }
}
