//! Collaborators for running the tracker on its own, without a telephony
//! stack around it. Sinks log what they are told.

use super::{
    CallTracker, CarrierPolicyProvider, DataConnectionTracker, DisconnectRegistry,
    FamilyRatchet, Host, NitzHook, Notification, Notifier, PhoneNotifier, Scheduler,
    SimRecords, SpnDisplay, SubId, SubscriptionStore,
};
use crate::{
    registrant::{Message, Registrant},
    roaming::RoamingPolicy,
    signal::SignalStrength,
    state::{ServiceState, cell::CellInfo},
};
use color_eyre::{Result, eyre::WrapErr};
use flume::Sender;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, error, info, warn};

/// Data connections are owned by someone else, as far as the tracker can tell
/// they are always down.
#[derive(Debug, Default)]
pub struct NoDataConnections;

impl DataConnectionTracker for NoDataConnections {
    fn is_disconnected(&self) -> bool {
        true
    }

    fn clean_up_all_connections(&self, reason: &str) {
        debug!(reason, "no data connections to clean up");
    }
}

/// A device with exactly one subscription, which is the default data one.
#[derive(Debug)]
pub struct SingleSubscription {
    sub_id: SubId,
}

impl SingleSubscription {
    pub fn new(sub_id: SubId) -> Self {
        Self { sub_id }
    }
}

impl DisconnectRegistry for SingleSubscription {
    fn default_data_subscription(&self) -> SubId {
        self.sub_id
    }

    fn is_data_disconnected(&self, _sub: SubId) -> bool {
        true
    }

    fn register_for_all_data_disconnected(&self, _sub: SubId, registrant: Registrant) {
        registrant.notify();
    }

    fn unregister_for_all_data_disconnected(&self, _sub: SubId, _handler: &Sender<Message>) {}
}

#[derive(Debug, Default)]
pub struct StaticCarrierPolicy {
    policy: RoamingPolicy,
}

impl StaticCarrierPolicy {
    pub fn new(policy: RoamingPolicy) -> Self {
        Self { policy }
    }
}

impl CarrierPolicyProvider for StaticCarrierPolicy {
    fn roaming_policy(&self, _sub: SubId) -> Result<RoamingPolicy> {
        Ok(self.policy.clone())
    }
}

/// Contents of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub sub_id: SubId,
    pub service_state: Option<ServiceState>,
    pub spn: Option<SpnDisplay>,
}

/// Keeps the last committed state and SPN display in a JSON file.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::default(),
        }
    }

    pub fn load(&self) -> Result<PersistedState> {
        let bytes = fs::read(&self.path)
            .wrap_err_with(|| format!("failed to read {}", self.path.display()))?;
        let state = serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("failed to parse {}", self.path.display()))?;

        Ok(state)
    }

    fn update(&self, f: impl FnOnce(&mut PersistedState)) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);

        let json = serde_json::to_vec_pretty(&*state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .wrap_err_with(|| format!("failed to move state file to {}", self.path.display()))?;

        Ok(())
    }
}

impl SubscriptionStore for JsonStateStore {
    fn persist_service_state(&self, sub: SubId, state: &ServiceState) -> Result<()> {
        self.update(|s| {
            s.sub_id = sub;
            s.service_state = Some(state.clone());
        })
    }

    fn set_plmn_spn(&self, sub: SubId, name: &SpnDisplay) -> bool {
        info!(
            plmn = ?name.plmn.as_deref().filter(|_| name.show_plmn),
            spn = ?name.spn.as_deref().filter(|_| name.show_spn),
            "network name"
        );

        match self.update(|s| {
            s.sub_id = sub;
            s.spn = Some(name.clone());
        }) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to store spn display: {e:?}");
                false
            }
        }
    }
}

/// Logs NITZ hooks, user notifications and phone-level broadcasts.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NitzHook for TracingSink {
    fn network_available(&self) {
        debug!("nitz: network available");
    }

    fn network_unavailable(&self) {
        debug!("nitz: network unavailable");
    }

    fn country_code_set(&self, country_changed: bool) {
        debug!(country_changed, "nitz: country code set");
    }
}

impl Notifier for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::RejectCause(cause) if cause >= 0 => {
                warn!(cause, "network rejected registration");
            }
            other => info!(?other, "notification"),
        }
    }
}

impl PhoneNotifier for TracingSink {
    fn service_state_changed(&self, merged: &ServiceState) {
        info!(
            voice = %merged.voice_reg_state,
            data = %merged.data_reg_state,
            rat = %merged.data_rat,
            roaming = merged.voice_roaming || merged.data_roaming,
            operator = ?merged.operator.numeric,
            "service state"
        );
    }

    fn signal_strength_changed(&self, signal: &SignalStrength) {
        debug!(?signal, "signal strength");
    }

    fn location_changed(&self) {
        debug!("cell location changed");
    }

    fn data_connection_changed(&self, reason: Option<&str>) {
        debug!(?reason, "data connections should be re-evaluated");
    }

    fn cell_info_changed(&self, cells: &[CellInfo]) {
        debug!(count = cells.len(), "cell info");
    }
}

#[derive(Debug, Default)]
pub struct NoCalls;

impl CallTracker for NoCalls {
    fn is_in_call(&self) -> bool {
        false
    }

    fn hangup_all(&self) {}
}

/// SIM records that do not change while the daemon runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSim {
    pub present: bool,
    pub operator_numeric: Option<String>,
    pub service_provider_name: Option<String>,
    /// `SPN_RULE_*` bits.
    pub display_rule: u32,
}

impl SimRecords for StaticSim {
    fn is_ready(&self) -> bool {
        self.present
    }

    fn operator_numeric(&self) -> Option<String> {
        self.operator_numeric.clone()
    }

    fn service_provider_name(&self) -> Option<String> {
        self.service_provider_name.clone()
    }

    fn display_rule(&self, _plmn: Option<&str>) -> u32 {
        self.display_rule
    }

    fn card_present(&self) -> bool {
        self.present
    }
}

#[bon::builder]
pub fn host(
    sub_id: SubId,
    scheduler: Arc<dyn Scheduler>,
    policy: RoamingPolicy,
    store: Arc<JsonStateStore>,
    #[builder(default)] sim: StaticSim,
) -> Host {
    let sink = Arc::new(TracingSink);

    Host::builder()
        .data(Arc::new(NoDataConnections))
        .registry(Arc::new(SingleSubscription::new(sub_id)))
        .carrier(Arc::new(StaticCarrierPolicy::new(policy)))
        .store(store)
        .nitz(sink.clone())
        .ratchet(Arc::new(FamilyRatchet))
        .scheduler(scheduler)
        .notifier(sink.clone())
        .phone(sink)
        .calls(Arc::new(NoCalls))
        .sim(Arc::new(sim))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RegState;

    #[test]
    fn it_persists_state_and_spn_as_json() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("service-state.json"));
        let state = ServiceState {
            voice_reg_state: RegState::InService,
            ..Default::default()
        };
        let spn = SpnDisplay {
            show_plmn: true,
            plmn: Some("vodafone.de".to_string()),
            ..Default::default()
        };

        // Act
        store.persist_service_state(SubId(1), &state).unwrap();
        let committed = store.set_plmn_spn(SubId(1), &spn);

        // Assert
        assert!(committed);
        let loaded = store.load().unwrap();
        assert_eq!(
            loaded,
            PersistedState {
                sub_id: SubId(1),
                service_state: Some(state),
                spn: Some(spn),
            }
        );
    }

    #[test]
    fn it_reports_uncommitted_spn_when_the_file_cannot_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("missing").join("state.json"));

        let committed = store.set_plmn_spn(SubId(0), &SpnDisplay::default());

        assert!(!committed);
    }

    #[test]
    fn it_notifies_all_data_disconnected_right_away() {
        let (tx, rx) = flume::unbounded();
        let registry = SingleSubscription::new(SubId(0));

        registry.register_for_all_data_disconnected(SubId(0), Registrant::new(tx, 7, None));

        assert_eq!(rx.try_recv().unwrap().what, 7);
    }
}
