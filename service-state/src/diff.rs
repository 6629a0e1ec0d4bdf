//! Transition predicates between the committed and the freshly polled snapshot.

use crate::{
    arena::Slot,
    state::{RadioTech, RegState},
};

/// Boolean transitions, computed pairwise between `current` and `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transitions {
    pub has_registered: bool,
    pub has_deregistered: bool,
    pub has_data_attached: bool,
    pub has_data_detached: bool,
    pub has_data_reg_state_changed: bool,
    pub has_voice_reg_state_changed: bool,
    pub has_voice_rat_changed: bool,
    pub has_data_rat_changed: bool,
    pub has_voice_roaming_on: bool,
    pub has_voice_roaming_off: bool,
    pub has_data_roaming_on: bool,
    pub has_data_roaming_off: bool,
    pub has_location_changed: bool,
    pub has_reject_cause_changed: bool,
    pub has_css_indicator_changed: bool,
    /// Full structural inequality of the service state.
    pub has_changed: bool,
    pub has_4g_handoff: bool,
    pub has_multi_apn_support: bool,
    pub has_lost_multi_apn_support: bool,
}

fn is_multi_apn_rat(rat: RadioTech) -> bool {
    rat.is_lte() || rat == RadioTech::Ehrpd
}

impl Transitions {
    /// `detect_handoff` enables the CDMA-LTE only LTE/eHRPD predicates.
    pub fn compute(current: &Slot, pending: &Slot, detect_handoff: bool) -> Self {
        let cur = &current.state;
        let new = &pending.state;
        let in_service = |s: RegState| s == RegState::InService;

        let mut t = Transitions {
            has_registered: !in_service(cur.voice_reg_state)
                && in_service(new.voice_reg_state),
            has_deregistered: in_service(cur.voice_reg_state)
                && !in_service(new.voice_reg_state),
            has_data_attached: !in_service(cur.data_reg_state)
                && in_service(new.data_reg_state),
            has_data_detached: in_service(cur.data_reg_state)
                && !in_service(new.data_reg_state),
            has_data_reg_state_changed: cur.data_reg_state != new.data_reg_state,
            has_voice_reg_state_changed: cur.voice_reg_state != new.voice_reg_state,
            has_voice_rat_changed: cur.voice_rat != new.voice_rat,
            has_data_rat_changed: cur.data_rat != new.data_rat,
            has_voice_roaming_on: !cur.voice_roaming && new.voice_roaming,
            has_voice_roaming_off: cur.voice_roaming && !new.voice_roaming,
            has_data_roaming_on: !cur.data_roaming && new.data_roaming,
            has_data_roaming_off: cur.data_roaming && !new.data_roaming,
            has_location_changed: current.location != pending.location,
            has_reject_cause_changed: cur.reject_cause != new.reject_cause,
            has_css_indicator_changed: cur.css_indicator != new.css_indicator,
            has_changed: cur != new,
            ..Default::default()
        };

        if detect_handoff {
            t.has_4g_handoff = in_service(new.data_reg_state)
                && ((cur.data_rat.is_lte() && new.data_rat == RadioTech::Ehrpd)
                    || (cur.data_rat == RadioTech::Ehrpd && new.data_rat.is_lte()));
            t.has_multi_apn_support =
                is_multi_apn_rat(new.data_rat) && !is_multi_apn_rat(cur.data_rat);
            t.has_lost_multi_apn_support = matches!(
                new.data_rat,
                RadioTech::Is95A
                    | RadioTech::Is95B
                    | RadioTech::OneXRtt
                    | RadioTech::Evdo0
                    | RadioTech::EvdoA
            );
        }

        t
    }

    pub fn has_attach_change(&self) -> bool {
        self.has_data_attached
            || self.has_4g_handoff
            || self.has_data_detached
            || self.has_registered
            || self.has_deregistered
    }

    pub fn has_roaming_change(&self) -> bool {
        self.has_voice_roaming_on
            || self.has_voice_roaming_off
            || self.has_data_roaming_on
            || self.has_data_roaming_off
    }
}
