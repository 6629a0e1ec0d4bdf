//! The modem command channel.
//!
//! Every request carries a [`Token`] and completes later, out of band, as a
//! [`Response`] posted back onto the tracker's event loop. Nothing here blocks.

pub mod mmcli;
pub mod signal;

use crate::{
    poll::Generation,
    state::{
        OperatorIdentity,
        cell::{CellIdentity, CellInfo},
    },
};
use signal::SignalMetrics;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RadioState {
    #[default]
    Unavailable,
    Off,
    On,
}

impl RadioState {
    pub fn is_on(self) -> bool {
        self == RadioState::On
    }

    pub fn is_available(self) -> bool {
        self != RadioState::Unavailable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollQuery {
    Operator,
    DataRegistration,
    VoiceRegistration,
    NetworkSelectionMode,
}

/// Correlation token handed to the modem with each request and echoed back on
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Poll {
        generation: Generation,
        query: PollQuery,
    },
    SignalStrength,
    CellInfo,
    RadioPower {
        on: bool,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("radio not available")]
    RadioNotAvailable,
    #[error("operation not allowed before network registration")]
    OpNotAllowedBeforeRegistration,
    #[error("request not supported")]
    RequestNotSupported,
    #[error("generic failure: {0}")]
    GenericFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Automatic,
    Manual,
}

/// Voice (CS domain) registration result. Codes are raw modem values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRegistration {
    /// TS 27.007 7.2 registration status.
    pub reg_code: i32,
    /// RIL radio technology code.
    pub rat: i32,
    pub css_supported: bool,
    pub emergency_enabled: bool,
    pub reject_cause: i32,
    pub roaming_indicator: i32,
    pub system_is_in_prl: bool,
    pub default_roaming_indicator: i32,
    pub cell_identity: Option<CellIdentity>,
}

impl Default for VoiceRegistration {
    fn default() -> Self {
        Self {
            reg_code: 0,
            rat: 0,
            css_supported: false,
            emergency_enabled: false,
            reject_cause: crate::state::REJECT_CAUSE_NONE,
            roaming_indicator: 0,
            system_is_in_prl: false,
            default_roaming_indicator: 0,
            cell_identity: None,
        }
    }
}

/// Data (PS domain) registration result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRegistration {
    pub reg_code: i32,
    pub rat: i32,
    pub reject_cause: i32,
    pub max_data_calls: i32,
    pub cell_identity: Option<CellIdentity>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Operator(OperatorIdentity),
    VoiceRegistration(VoiceRegistration),
    DataRegistration(DataRegistration),
    NetworkSelectionMode(SelectionMode),
    SignalStrength(SignalMetrics),
    CellInfo(Vec<CellInfo>),
    Ack,
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Operator(_) => "operator",
            Reply::VoiceRegistration(_) => "voice registration",
            Reply::DataRegistration(_) => "data registration",
            Reply::NetworkSelectionMode(_) => "network selection mode",
            Reply::SignalStrength(_) => "signal strength",
            Reply::CellInfo(_) => "cell info",
            Reply::Ack => "ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: Token,
    pub result: Result<Reply, CommandError>,
}

impl Response {
    pub fn ok(token: Token, reply: Reply) -> Self {
        Self {
            token,
            result: Ok(reply),
        }
    }

    pub fn err(token: Token, err: CommandError) -> Self {
        Self {
            token,
            result: Err(err),
        }
    }
}

/// Unsolicited modem notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Indication {
    RadioStateChanged(RadioState),
    NetworkStateChanged,
    SignalStrength(SignalMetrics),
    CellInfoList(Vec<CellInfo>),
    /// Bitmask of `restricted::RESTRICTED_*`.
    RestrictedStateChanged(i32),
    SimReady,
    CdmaSubscription {
        home_system_ids: Vec<i32>,
        prl_version: Option<String>,
    },
}

/// Fire-and-forget request interface to the modem. Completions are delivered as
/// [`Response`]s carrying the same token.
#[cfg_attr(test, mockall::automock)]
pub trait ModemChannel: Send + Sync {
    fn get_operator(&self, token: Token);
    fn get_voice_registration_state(&self, token: Token);
    fn get_data_registration_state(&self, token: Token);
    fn get_network_selection_mode(&self, token: Token);
    fn set_radio_power(&self, on: bool, token: Token);
    fn request_shutdown(&self, token: Token);
    fn get_signal_strength(&self, token: Token);
    fn get_cell_info_list(&self, token: Token);
}
