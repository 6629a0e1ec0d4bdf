//! Technology family specific behavior.
//!
//! Everything that differs between 3GPP and 3GPP2 networks lives behind
//! [`TechFamily`]. One implementation is picked when the tracker is built and
//! swapped only on an explicit phone type switch.

pub mod cdma;
pub mod gsm;

use crate::{
    arena::Slot,
    host::{SimRecords, SpnDisplay},
    modem::{DataRegistration, PollQuery, VoiceRegistration},
    roaming::RoamingPolicy,
    state::{
        OperatorIdentity, RadioTech, RegCode, RegState, ServiceState, cell::CellLocation,
    },
};
use derive_more::Display;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

pub use cdma::CdmaFamily;
pub use gsm::GsmFamily;

pub const NO_SERVICE: &str = "No service";
pub const EMERGENCY_CALLS_ONLY: &str = "Emergency calls only";

#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
pub enum PhoneType {
    #[display("GSM")]
    Gsm,
    #[display("CDMA")]
    Cdma,
    #[display("CDMA-LTE")]
    CdmaLte,
}

/// Borrowed view of the collaborators a family consults while merging.
pub struct FamilyContext<'a> {
    pub policy: &'a RoamingPolicy,
    pub sim: &'a dyn SimRecords,
}

pub trait TechFamily: Send {
    fn phone_type(&self) -> PhoneType;

    /// Queries issued by every poll batch.
    fn poll_queries(&self) -> &'static [PollQuery];

    /// Forgets raw registration results kept from an earlier batch. Runs
    /// whenever a batch starts or is cancelled.
    fn start_batch(&mut self);

    fn on_voice_registration(
        &mut self,
        reg: &VoiceRegistration,
        pending: &mut Slot,
        ctx: &FamilyContext<'_>,
    );

    /// Returns true when the signal strength should be re-read right away.
    fn on_data_registration(
        &mut self,
        reg: &DataRegistration,
        current: &ServiceState,
        pending: &mut ServiceState,
    ) -> bool;

    fn on_operator(
        &mut self,
        operator: &OperatorIdentity,
        pending: &mut ServiceState,
        ctx: &FamilyContext<'_>,
    );

    /// Runs once the last response of a batch has been merged.
    fn finish_batch(&mut self, pending: &mut ServiceState, ctx: &FamilyContext<'_>);

    /// Runs right before `pending` is diffed against `current`.
    fn before_commit(&mut self, pending: &mut ServiceState, ctx: &FamilyContext<'_>);

    fn spn_display(&self, current: &ServiceState, sim: &dyn SimRecords) -> SpnDisplay;

    fn on_cdma_subscription(&mut self, _home_system_ids: &[i32], _prl_version: Option<&str>) {}

    /// Voice in service without data is suspicious and worth a delayed check.
    fn checks_gprs_consistency(&self) -> bool {
        false
    }

    fn handles_restricted_state(&self) -> bool {
        false
    }

    fn detects_4g_handoff(&self) -> bool {
        false
    }

    fn delays_power_off_for_ims(&self) -> bool {
        false
    }
}

pub fn for_phone_type(phone_type: PhoneType) -> Box<dyn TechFamily> {
    match phone_type {
        PhoneType::Gsm => Box::new(GsmFamily::new()),
        PhoneType::Cdma => Box::new(CdmaFamily::new(false)),
        PhoneType::CdmaLte => Box::new(CdmaFamily::new(true)),
    }
}

/// Unknown codes count as not registered.
pub(crate) fn reg_code(raw: i32) -> Option<RegCode> {
    RegCode::from_i32(raw)
}

pub(crate) fn reg_state(raw: i32) -> RegState {
    reg_code(raw).map_or(RegState::OutOfService, RegCode::to_reg_state)
}

pub(crate) fn is_roaming(raw: i32) -> bool {
    reg_code(raw).is_some_and(RegCode::is_roaming)
}

pub(crate) fn radio_tech(raw: i32) -> RadioTech {
    RadioTech::from_i32(raw).unwrap_or_default()
}

/// Fields every family takes from a voice registration.
pub(crate) fn merge_voice(reg: &VoiceRegistration, pending: &mut Slot) {
    pending.state.voice_reg_state = reg_state(reg.reg_code);
    pending.state.css_indicator = reg.css_supported;
    pending.state.voice_rat = radio_tech(reg.rat);
    pending.location = CellLocation::from_identity(reg.cell_identity.as_ref());
}

/// Fields every family takes from a data registration. Bandwidths only come
/// from here so that voice and data never write the same field.
pub(crate) fn merge_data(reg: &DataRegistration, pending: &mut ServiceState) {
    pending.data_reg_state = reg_state(reg.reg_code);
    pending.data_rat = radio_tech(reg.rat);
    if let Some(bw) = reg.cell_identity.as_ref().and_then(|c| c.lte_bandwidth()) {
        pending.cell_bandwidths = vec![bw];
    }
}
