//! Cellular service state tracking.
//!
//! [`tracker::ServiceStateTracker`] polls the modem for operator and
//! registration state, commits consistent snapshots and fans the resulting
//! transitions out to registrants. [`service`] runs it on a tokio task, and
//! [`modem::mmcli`] drives a real modem through ModemManager.

pub mod arena;
pub mod cell_info;
pub mod config;
pub mod diff;
pub mod family;
pub mod host;
pub mod local_log;
pub mod modem;
pub mod poll;
pub mod power;
pub mod registrant;
pub mod restricted;
pub mod roaming;
pub mod service;
pub mod signal;
pub mod state;
pub mod telemetry;
pub mod tracker;

use color_eyre::Result;
use config::TrackerConfig;
use family::PhoneType;
use host::standalone::{self, JsonStateStore, StaticSim};
use modem::mmcli::{self, MmcliModem, ModemManager};
use roaming::RoamingPolicy;
use service::{ServiceStateHandle, TokioScheduler};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracker::ServiceStateTracker;

pub type Tasks = Vec<JoinHandle<Result<()>>>;

/// Wires a tracker to a ModemManager modem with standalone host collaborators
/// and starts the event loop plus the modem monitor.
#[bon::builder(finish_fn = run)]
pub async fn program(
    modem_manager: impl ModemManager + Clone,
    #[builder(into)] modem_id: String,
    #[builder(default)] config: TrackerConfig,
    #[builder(default = PhoneType::Gsm)] phone_type: PhoneType,
    #[builder(default)] roaming_policy: RoamingPolicy,
    #[builder(into)] state_file: PathBuf,
    #[builder(default)] sim: StaticSim,
    monitor_interval: Duration,
    cancel: CancellationToken,
) -> Result<(ServiceStateHandle, Tasks)> {
    let (events_tx, events_rx) = flume::unbounded();
    let (messages_tx, messages_rx) = flume::unbounded();

    let store = Arc::new(JsonStateStore::new(state_file));
    match store.load() {
        Ok(prev) => info!(
            sub_id = %prev.sub_id,
            state = ?prev.service_state.map(|s| s.combined_reg_state()),
            "last persisted service state"
        ),
        Err(e) => debug!("no persisted service state: {e}"),
    }

    let host = standalone::host()
        .sub_id(config.sub_id)
        .scheduler(Arc::new(TokioScheduler::new(events_tx.clone())))
        .policy(roaming_policy)
        .store(store)
        .sim(sim)
        .call();
    let modem = MmcliModem::new(
        modem_manager.clone(),
        modem_id.as_str(),
        events_tx.clone(),
    );

    info!(%modem_id, %phone_type, sub_id = %config.sub_id, "starting service state tracker");
    let tracker = ServiceStateTracker::builder()
        .config(config)
        .modem(Arc::new(modem))
        .host(host)
        .self_handler(messages_tx)
        .phone_type(phone_type)
        .build();

    let (handle, tracker_task) = service::spawn()
        .tracker(tracker)
        .events_tx(events_tx.clone())
        .events(events_rx)
        .messages(messages_rx)
        .cancel(cancel.clone())
        .run();

    let monitor_task = tokio::spawn(async move {
        mmcli::monitor(modem_manager, &modem_id, events_tx, monitor_interval, cancel).await
    });

    Ok((handle, vec![tracker_task, monitor_task]))
}
