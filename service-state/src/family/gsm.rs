use super::{
    EMERGENCY_CALLS_ONLY, FamilyContext, NO_SERVICE, PhoneType, TechFamily, is_roaming,
    merge_data, merge_voice,
};
use crate::{
    arena::Slot,
    host::{SPN_RULE_SHOW_PLMN, SPN_RULE_SHOW_SPN, SimRecords, SpnDisplay},
    modem::{DataRegistration, PollQuery, VoiceRegistration},
    roaming::SimOperator,
    state::{OperatorIdentity, RegState, ServiceState},
};

/// 3GPP networks. Voice and data roaming are reported separately and
/// reconciled once the batch is complete.
#[derive(Debug, Default)]
pub struct GsmFamily {
    gsm_roaming: bool,
    data_roaming: bool,
    emergency_only: bool,
}

impl GsmFamily {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TechFamily for GsmFamily {
    fn phone_type(&self) -> PhoneType {
        PhoneType::Gsm
    }

    fn poll_queries(&self) -> &'static [PollQuery] {
        &[
            PollQuery::Operator,
            PollQuery::DataRegistration,
            PollQuery::VoiceRegistration,
            PollQuery::NetworkSelectionMode,
        ]
    }

    fn start_batch(&mut self) {
        *self = Self::default();
    }

    fn on_voice_registration(
        &mut self,
        reg: &VoiceRegistration,
        pending: &mut Slot,
        _ctx: &FamilyContext<'_>,
    ) {
        merge_voice(reg, pending);
        pending.state.reject_cause = reg.reject_cause;
        self.gsm_roaming = is_roaming(reg.reg_code);
        self.emergency_only = reg.emergency_enabled;
    }

    fn on_data_registration(
        &mut self,
        reg: &DataRegistration,
        _current: &ServiceState,
        pending: &mut ServiceState,
    ) -> bool {
        merge_data(reg, pending);
        self.data_roaming = is_roaming(reg.reg_code);
        pending.data_roaming_from_registration = self.data_roaming;

        false
    }

    fn on_operator(
        &mut self,
        operator: &OperatorIdentity,
        pending: &mut ServiceState,
        _ctx: &FamilyContext<'_>,
    ) {
        pending.operator = operator.clone();
    }

    fn finish_batch(&mut self, pending: &mut ServiceState, ctx: &FamilyContext<'_>) {
        let sim_numeric = ctx.sim.operator_numeric();
        let sim_spn = ctx.sim.service_provider_name();
        let sim = SimOperator {
            numeric: sim_numeric.as_deref(),
            spn: sim_spn.as_deref(),
        };

        let roaming = ctx
            .policy
            .gsm_roaming(self.gsm_roaming, self.data_roaming, pending, sim);
        pending.set_roaming(roaming);
        pending.emergency_only = self.emergency_only;
    }

    fn before_commit(&mut self, _pending: &mut ServiceState, _ctx: &FamilyContext<'_>) {}

    fn spn_display(&self, current: &ServiceState, sim: &dyn SimRecords) -> SpnDisplay {
        let plmn_alpha = current.operator.alpha().map(str::to_string);
        let rule = sim.display_rule(current.operator.numeric.as_deref());

        let (show_plmn, plmn, in_service) = match current.combined_reg_state() {
            RegState::InService => {
                let show = plmn_alpha.is_some() && rule & SPN_RULE_SHOW_PLMN != 0;
                (show, plmn_alpha, true)
            }
            RegState::OutOfService | RegState::EmergencyOnly if current.emergency_only => {
                (true, Some(EMERGENCY_CALLS_ONLY.to_string()), false)
            }
            _ => (true, Some(NO_SERVICE.to_string()), false),
        };

        let mut spn = sim.service_provider_name().filter(|s| !s.is_empty());
        let mut show_spn = in_service && spn.is_some() && rule & SPN_RULE_SHOW_SPN != 0;
        if current.voice_reg_state == RegState::PowerOff || (show_plmn && spn == plmn) {
            spn = None;
            show_spn = false;
        }

        SpnDisplay {
            show_plmn,
            plmn,
            show_spn,
            spn,
        }
    }

    fn checks_gprs_consistency(&self) -> bool {
        true
    }

    fn handles_restricted_state(&self) -> bool {
        true
    }

    fn delays_power_off_for_ims(&self) -> bool {
        true
    }
}
