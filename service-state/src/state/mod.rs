//! Point-in-time view of voice/data registration.

pub mod cell;

use derive_more::Display;
use num_derive::{FromPrimitive, ToPrimitive};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// CDMA ERI roaming indicator values.
pub const ROAMING_INDICATOR_ON: i32 = 0;
pub const ROAMING_INDICATOR_OFF: i32 = 1;
pub const ROAMING_INDICATOR_FLASH: i32 = 2;

/// No registration reject cause reported.
pub const REJECT_CAUSE_NONE: i32 = -1;

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum RegState {
    #[display("IN_SERVICE")]
    InService,
    #[default]
    #[display("OUT_OF_SERVICE")]
    OutOfService,
    #[display("EMERGENCY_ONLY")]
    EmergencyOnly,
    #[display("POWER_OFF")]
    PowerOff,
}

/// Registration status as reported by the modem, TS 27.007 7.2 (`+CREG`/`+CGREG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum RegCode {
    NotRegistered = 0,
    Home = 1,
    Searching = 2,
    Denied = 3,
    Unknown = 4,
    Roaming = 5,
}

impl RegCode {
    pub fn to_reg_state(self) -> RegState {
        match self {
            RegCode::Home | RegCode::Roaming => RegState::InService,
            _ => RegState::OutOfService,
        }
    }

    pub fn is_roaming(self) -> bool {
        self == RegCode::Roaming
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatFamily {
    Unknown,
    Gsm,
    Cdma,
    Iwlan,
}

/// Radio access technology, numbered like the RIL does so that raw modem codes
/// decode with [`num_traits::FromPrimitive`].
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
pub enum RadioTech {
    #[default]
    #[display("Unknown")]
    Unknown = 0,
    #[display("GPRS")]
    Gprs = 1,
    #[display("EDGE")]
    Edge = 2,
    #[display("UMTS")]
    Umts = 3,
    #[display("IS95A")]
    Is95A = 4,
    #[display("IS95B")]
    Is95B = 5,
    #[display("1xRTT")]
    OneXRtt = 6,
    #[display("EvDo-rev.0")]
    Evdo0 = 7,
    #[display("EvDo-rev.A")]
    EvdoA = 8,
    #[display("HSDPA")]
    Hsdpa = 9,
    #[display("HSUPA")]
    Hsupa = 10,
    #[display("HSPA")]
    Hspa = 11,
    #[display("EvDo-rev.B")]
    EvdoB = 12,
    #[display("eHRPD")]
    Ehrpd = 13,
    #[display("LTE")]
    Lte = 14,
    #[display("HSPAP")]
    Hspap = 15,
    #[display("GSM")]
    Gsm = 16,
    #[display("TD-SCDMA")]
    TdScdma = 17,
    #[display("IWLAN")]
    Iwlan = 18,
    #[display("LTE_CA")]
    LteCa = 19,
    #[display("NR")]
    Nr = 20,
}

impl RadioTech {
    pub fn family(self) -> RatFamily {
        match self {
            RadioTech::Unknown => RatFamily::Unknown,
            RadioTech::Iwlan => RatFamily::Iwlan,
            tech if tech.is_cdma() => RatFamily::Cdma,
            _ => RatFamily::Gsm,
        }
    }

    pub fn is_lte(self) -> bool {
        matches!(self, RadioTech::Lte | RadioTech::LteCa)
    }

    pub fn is_cdma(self) -> bool {
        matches!(
            self,
            RadioTech::Is95A
                | RadioTech::Is95B
                | RadioTech::OneXRtt
                | RadioTech::Evdo0
                | RadioTech::EvdoA
                | RadioTech::EvdoB
                | RadioTech::Ehrpd
        )
    }

    /// 3GPP technologies, IWLAN included.
    pub fn is_gsm(self) -> bool {
        !matches!(self, RadioTech::Unknown) && !self.is_cdma()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorIdentity {
    pub alpha_long: Option<String>,
    pub alpha_short: Option<String>,
    /// MCC+MNC, 5 or 6 digits.
    pub numeric: Option<String>,
}

impl OperatorIdentity {
    pub fn mcc(&self) -> Option<&str> {
        self.numeric.as_deref().and_then(|n| n.get(..3))
    }

    /// Long name, or the short one when the long one is empty.
    pub fn alpha(&self) -> Option<&str> {
        self.alpha_long
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.alpha_short.as_deref().filter(|s| !s.is_empty()))
    }
}

pub fn is_valid_operator_numeric(numeric: Option<&str>) -> bool {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\d{5,6}$").unwrap());

    match numeric {
        Some(n) => RE.is_match(n) && n != "00000" && n != "000000",
        None => false,
    }
}

/// CDMA-family roaming fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdmaRoaming {
    pub roaming_indicator: i32,
    pub in_prl: bool,
    pub default_roaming_indicator: i32,
    pub system_id: i32,
    pub network_id: i32,
}

impl Default for CdmaRoaming {
    fn default() -> Self {
        Self {
            roaming_indicator: -1,
            in_prl: false,
            default_roaming_indicator: -1,
            system_id: -1,
            network_id: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub voice_reg_state: RegState,
    pub data_reg_state: RegState,
    pub voice_roaming: bool,
    pub data_roaming: bool,
    /// Data roaming as the modem reported it, before any carrier override.
    pub data_roaming_from_registration: bool,
    pub voice_rat: RadioTech,
    pub data_rat: RadioTech,
    pub operator: OperatorIdentity,
    /// kHz
    pub cell_bandwidths: Vec<u32>,
    pub manual_selection: bool,
    pub emergency_only: bool,
    /// Concurrent voice and data supported.
    pub css_indicator: bool,
    pub cdma: CdmaRoaming,
    pub reject_cause: i32,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::with_reg_state(RegState::OutOfService)
    }
}

impl ServiceState {
    fn with_reg_state(reg_state: RegState) -> Self {
        Self {
            voice_reg_state: reg_state,
            data_reg_state: reg_state,
            voice_roaming: false,
            data_roaming: false,
            data_roaming_from_registration: false,
            voice_rat: RadioTech::Unknown,
            data_rat: RadioTech::Unknown,
            operator: OperatorIdentity::default(),
            cell_bandwidths: Vec::new(),
            manual_selection: false,
            emergency_only: false,
            css_indicator: false,
            cdma: CdmaRoaming::default(),
            reject_cause: REJECT_CAUSE_NONE,
        }
    }

    pub fn out_of_service() -> Self {
        Self::with_reg_state(RegState::OutOfService)
    }

    pub fn power_off() -> Self {
        Self::with_reg_state(RegState::PowerOff)
    }

    pub fn set_out_of_service(&mut self) {
        *self = Self::out_of_service();
    }

    pub fn set_power_off(&mut self) {
        *self = Self::power_off();
    }

    pub fn set_roaming(&mut self, roaming: bool) {
        self.voice_roaming = roaming;
        self.data_roaming = roaming;
    }

    /// Voice state, falling back to data state for data-only registrations.
    pub fn combined_reg_state(&self) -> RegState {
        if self.voice_reg_state == RegState::OutOfService
            && self.data_reg_state == RegState::InService
        {
            self.data_reg_state
        } else {
            self.voice_reg_state
        }
    }

    pub fn is_concurrent_voice_and_data_allowed(&self) -> bool {
        self.css_indicator
            || (self.voice_rat.family() == RatFamily::Gsm
                && !matches!(
                    self.data_rat,
                    RadioTech::Unknown | RadioTech::Gprs | RadioTech::Edge
                ))
    }
}
