//! Carrier roaming overrides.
//!
//! Precedence, highest first: always-home, explicit non-roaming, explicit
//! roaming, then whatever the modem reported.

use crate::state::ServiceState;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoamingPolicy {
    pub always_home: bool,
    /// Exact MCCMNC matches.
    pub roaming_networks: Vec<String>,
    pub non_roaming_networks: Vec<String>,
    /// MCC or MCCMNC prefixes, only consulted for same-named operators.
    pub roaming_operator_prefixes: Vec<String>,
    pub non_roaming_operator_prefixes: Vec<String>,
    pub cdma_roaming_sids: Vec<i32>,
    pub cdma_non_roaming_sids: Vec<i32>,
    /// ERI values that denote the home system.
    pub home_roaming_indicators: Vec<i32>,
}

/// What the SIM says about its home operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimOperator<'a> {
    pub numeric: Option<&'a str>,
    pub spn: Option<&'a str>,
}

fn listed(list: &[String], numeric: Option<&str>) -> bool {
    numeric.is_some_and(|n| list.iter().any(|l| l == n))
}

fn prefixed(list: &[String], numeric: Option<&str>) -> bool {
    numeric.is_some_and(|n| list.iter().any(|p| !p.is_empty() && n.starts_with(p.as_str())))
}

/// SIM and network MCC match. A missing MCC on either side counts as a match.
fn mcc_equals_sim_mcc(state: &ServiceState, sim: SimOperator<'_>) -> bool {
    match (sim.numeric.and_then(|n| n.get(..3)), state.operator.mcc()) {
        (Some(sim_mcc), Some(net_mcc)) => sim_mcc == net_mcc,
        _ => true,
    }
}

fn operator_name_matches_spn(state: &ServiceState, sim: SimOperator<'_>) -> bool {
    let Some(spn) = sim.spn.filter(|s| !s.is_empty()) else {
        return false;
    };
    let eq = |name: &Option<String>| name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(spn));

    eq(&state.operator.alpha_long) || eq(&state.operator.alpha_short)
}

pub fn is_same_named_operator(state: &ServiceState, sim: SimOperator<'_>) -> bool {
    mcc_equals_sim_mcc(state, sim) && operator_name_matches_spn(state, sim)
}

impl RoamingPolicy {
    /// Carrier verdict for a network: `Some(false)` forces home, `Some(true)`
    /// forces roaming, `None` defers to the modem.
    pub fn override_for(&self, numeric: Option<&str>, system_id: Option<i32>) -> Option<bool> {
        let sid_in = |sids: &[i32]| system_id.is_some_and(|sid| sids.contains(&sid));

        if self.always_home {
            debug!("carrier override: always on home network");
            Some(false)
        } else if listed(&self.non_roaming_networks, numeric)
            || sid_in(&self.cdma_non_roaming_sids)
        {
            debug!(?numeric, ?system_id, "carrier override: non roaming");
            Some(false)
        } else if listed(&self.roaming_networks, numeric) || sid_in(&self.cdma_roaming_sids) {
            debug!(?numeric, ?system_id, "carrier override: roaming");
            Some(true)
        } else {
            None
        }
    }

    /// Roaming for a 3GPP registration. Voice and data can disagree, the device
    /// roams when either does, unless voice roaming was reported on what is in
    /// fact the home operator.
    pub fn gsm_roaming(
        &self,
        voice_roaming: bool,
        data_roaming: bool,
        state: &ServiceState,
        sim: SimOperator<'_>,
    ) -> bool {
        let numeric = state.operator.numeric.as_deref();
        let mut roaming = voice_roaming || data_roaming;

        if voice_roaming
            && !prefixed(&self.roaming_operator_prefixes, numeric)
            && (is_same_named_operator(state, sim)
                || prefixed(&self.non_roaming_operator_prefixes, numeric))
        {
            debug!(?numeric, "voice roaming on home operator, treating as home");
            roaming = false;
        }

        self.override_for(numeric, None).unwrap_or(roaming)
    }

    pub fn is_home_roaming_indicator(&self, indicator: i32) -> bool {
        self.home_roaming_indicators.contains(&indicator)
    }
}
