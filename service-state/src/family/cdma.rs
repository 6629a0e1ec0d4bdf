use super::{
    FamilyContext, NO_SERVICE, PhoneType, TechFamily, is_roaming, merge_data, merge_voice,
};
use crate::{
    arena::Slot,
    host::{SimRecords, SpnDisplay},
    modem::{DataRegistration, PollQuery, VoiceRegistration},
    state::{
        OperatorIdentity, ROAMING_INDICATOR_FLASH, ROAMING_INDICATOR_OFF, ROAMING_INDICATOR_ON,
        RadioTech, RegState, ServiceState, cell::CellIdentity,
    },
};
use tracing::debug;

const UNKNOWN_NUMERIC: &str = "00000";

/// 3GPP2 networks, optionally with LTE (`lte`).
#[derive(Debug)]
pub struct CdmaFamily {
    lte: bool,
    roaming_indicator: i32,
    in_prl: bool,
    default_roaming_indicator: i32,
    prl_version: Option<String>,
    home_system_ids: Vec<i32>,
}

impl CdmaFamily {
    pub fn new(lte: bool) -> Self {
        Self {
            lte,
            roaming_indicator: ROAMING_INDICATOR_OFF,
            in_prl: false,
            default_roaming_indicator: ROAMING_INDICATOR_OFF,
            prl_version: None,
            home_system_ids: Vec::new(),
        }
    }

    fn sids_all_zero(&self) -> bool {
        self.home_system_ids.iter().all(|sid| *sid == 0)
    }

    fn is_home_sid(&self, sid: i32) -> bool {
        self.home_system_ids.contains(&sid)
    }

    fn prl_loaded(&self) -> bool {
        self.prl_version.as_deref().is_some_and(|v| !v.is_empty())
    }

    fn roaming_indicator_for(&self, pending: &ServiceState, nam_match: bool) -> i32 {
        if !self.prl_loaded() || pending.voice_rat == RadioTech::Unknown {
            return ROAMING_INDICATOR_OFF;
        }
        if self.sids_all_zero() {
            return self.roaming_indicator;
        }

        match (nam_match, self.in_prl) {
            (false, false) => self.default_roaming_indicator,
            (true, false) if pending.voice_rat.is_lte() => ROAMING_INDICATOR_OFF,
            (true, false) => ROAMING_INDICATOR_FLASH,
            (false, true) => self.roaming_indicator,
            (true, true) if self.roaming_indicator <= 2 => ROAMING_INDICATOR_OFF,
            (true, true) => self.roaming_indicator,
        }
    }
}

/// RAT family moves that leave the last signal sample misleading.
fn signal_family_changed(old: RadioTech, new: RadioTech) -> bool {
    (old == RadioTech::Unknown && new != RadioTech::Unknown)
        || (old.is_cdma() && new.is_lte())
        || (old.is_lte() && new.is_cdma())
}

impl TechFamily for CdmaFamily {
    fn phone_type(&self) -> PhoneType {
        if self.lte {
            PhoneType::CdmaLte
        } else {
            PhoneType::Cdma
        }
    }

    fn poll_queries(&self) -> &'static [PollQuery] {
        &[
            PollQuery::Operator,
            PollQuery::DataRegistration,
            PollQuery::VoiceRegistration,
        ]
    }

    fn start_batch(&mut self) {
        self.roaming_indicator = ROAMING_INDICATOR_OFF;
        self.in_prl = false;
        self.default_roaming_indicator = ROAMING_INDICATOR_OFF;
    }

    fn on_voice_registration(
        &mut self,
        reg: &VoiceRegistration,
        pending: &mut Slot,
        ctx: &FamilyContext<'_>,
    ) {
        merge_voice(reg, pending);

        pending.state.voice_roaming = is_roaming(reg.reg_code)
            && !ctx.policy.is_home_roaming_indicator(reg.roaming_indicator);
        self.roaming_indicator = reg.roaming_indicator;
        self.in_prl = reg.system_is_in_prl;
        self.default_roaming_indicator = reg.default_roaming_indicator;

        let (system_id, network_id) = match reg.cell_identity {
            Some(CellIdentity::Cdma {
                system_id,
                network_id,
                ..
            }) => (system_id, network_id),
            _ => (0, 0),
        };
        pending.state.cdma.system_id = system_id;
        pending.state.cdma.network_id = network_id;

        if reg.reg_code == 3 {
            debug!(reason = reg.reject_cause, "registration denied");
        }
    }

    fn on_data_registration(
        &mut self,
        reg: &DataRegistration,
        current: &ServiceState,
        pending: &mut ServiceState,
    ) -> bool {
        merge_data(reg, pending);
        let roaming = is_roaming(reg.reg_code);
        pending.data_roaming = roaming;
        pending.data_roaming_from_registration = roaming;

        self.lte && signal_family_changed(current.data_rat, pending.data_rat)
    }

    fn on_operator(
        &mut self,
        operator: &OperatorIdentity,
        pending: &mut ServiceState,
        ctx: &FamilyContext<'_>,
    ) {
        let mut operator = operator.clone();
        let bad = operator
            .numeric
            .as_deref()
            .is_none_or(|n| n.len() < 5 || n == UNKNOWN_NUMERIC);
        if bad {
            let home = ctx
                .sim
                .operator_numeric()
                .unwrap_or_else(|| UNKNOWN_NUMERIC.to_string());
            debug!(reported = ?operator.numeric, %home, "bad operator numeric, using home");
            operator.numeric = Some(home);
        }
        pending.operator = operator;
    }

    fn finish_batch(&mut self, pending: &mut ServiceState, ctx: &FamilyContext<'_>) {
        let nam_match = !self.sids_all_zero() && self.is_home_sid(pending.cdma.system_id);

        // Voice and data roam together. Without voice service the TSB58
        // indicator decides.
        if pending.data_rat.is_cdma() {
            if pending.voice_reg_state == RegState::InService {
                pending.data_roaming = pending.voice_roaming;
            } else {
                pending.data_roaming =
                    !ctx.policy.is_home_roaming_indicator(self.roaming_indicator);
            }
        }

        pending.cdma.default_roaming_indicator = self.default_roaming_indicator;
        pending.cdma.in_prl = self.in_prl;
        pending.cdma.roaming_indicator = self.roaming_indicator_for(pending, nam_match);

        debug!(
            roaming_indicator = pending.cdma.roaming_indicator,
            voice_roaming = pending.voice_roaming,
            data_roaming = pending.data_roaming,
            nam_match,
            in_prl = self.in_prl,
            "cdma roaming indicator"
        );
    }

    fn before_commit(&mut self, pending: &mut ServiceState, ctx: &FamilyContext<'_>) {
        let numeric = pending.operator.numeric.clone();
        match ctx
            .policy
            .override_for(numeric.as_deref(), Some(pending.cdma.system_id))
        {
            Some(true) => {
                pending.set_roaming(true);
                pending.cdma.roaming_indicator = ROAMING_INDICATOR_ON;
            }
            Some(false) => {
                pending.set_roaming(false);
                pending.cdma.roaming_indicator = ROAMING_INDICATOR_OFF;
            }
            None => {}
        }
    }

    fn spn_display(&self, current: &ServiceState, _sim: &dyn SimRecords) -> SpnDisplay {
        let plmn = if current.combined_reg_state() == RegState::InService {
            current.operator.alpha().map(str::to_string)
        } else {
            Some(NO_SERVICE.to_string())
        };

        SpnDisplay {
            show_plmn: plmn.is_some(),
            plmn,
            show_spn: false,
            spn: None,
        }
    }

    fn on_cdma_subscription(&mut self, home_system_ids: &[i32], prl_version: Option<&str>) {
        self.home_system_ids = home_system_ids.to_vec();
        self.prl_version = prl_version.map(str::to_string);
    }

    fn detects_4g_handoff(&self) -> bool {
        self.lte
    }
}
