//! Radio power sequencing.
//!
//! Turning the radio off is graceful when data is still up: connections are
//! torn down first and the radio goes off once every subscription reports
//! data disconnected, or when the fallback timer fires, whichever is first.
//! Each graceful sequence bumps a tag; timer callbacks carrying an older tag
//! are ignored.

use crate::{
    config::TrackerConfig,
    host::{CallTracker, Host, SubId, Timer},
    local_log::LocalLog,
    modem::{ModemChannel, RadioState, Token},
    registrant::{Message, Registrant},
};
use flume::Sender;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Registrant `what` for the cross-subscription all-data-disconnected callback.
pub const EVENT_ALL_DATA_DISCONNECTED: i32 = 1;

pub const REASON_RADIO_TURNED_OFF: &str = "radioTurnedOff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
    GracefulOffPending,
    ShuttingDown,
}

#[derive(Debug, Default)]
struct PendingState {
    active: bool,
    tag: u64,
}

/// Pending graceful power off. Cloned out to the data tracker, which may
/// resolve it from another thread.
#[derive(Clone)]
pub struct PendingPowerOff {
    state: Arc<Mutex<PendingState>>,
    modem: Arc<dyn ModemChannel>,
    calls: Arc<dyn CallTracker>,
}

impl fmt::Debug for PendingPowerOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("PendingPowerOff")
            .field("active", &st.active)
            .field("tag", &st.tag)
            .finish()
    }
}

impl PendingPowerOff {
    pub fn new(modem: Arc<dyn ModemChannel>, calls: Arc<dyn CallTracker>) -> Self {
        Self {
            state: Arc::default(),
            modem,
            calls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_pending(&self) -> bool {
        self.lock().active
    }

    pub fn tag(&self) -> u64 {
        self.lock().tag
    }

    /// Powers off right away if a graceful power off is waiting on data
    /// teardown. Returns whether one was.
    pub fn process(&self) -> bool {
        let mut st = self.lock();
        if !st.active {
            return false;
        }

        info!(tag = st.tag, "processing pending radio power off");
        st.tag += 1;
        st.active = false;
        self.hangup_and_power_off();

        true
    }

    fn hangup_and_power_off(&self) {
        if self.calls.is_in_call() {
            self.calls.hangup_all();
        }
        self.modem
            .set_radio_power(false, Token::RadioPower { on: false });
    }
}

/// What the sequencer needs to know about the rest of the tracker to decide.
pub struct PowerEnv<'a> {
    pub radio: RadioState,
    pub host: &'a Host,
    /// Whether this technology family holds the radio on for IMS to
    /// deregister.
    pub delays_for_ims: bool,
}

pub struct RadioPowerSequencer {
    desired: bool,
    carrier_disabled: bool,
    shutting_down: bool,
    ims_registered: bool,
    ims_alarm_armed: bool,
    delay_needed: bool,
    sub_id: SubId,
    power_off_fallback: Duration,
    ims_radio_off_delay: Duration,
    modem: Arc<dyn ModemChannel>,
    pending: PendingPowerOff,
    self_handler: Sender<Message>,
    log: LocalLog,
}

impl RadioPowerSequencer {
    pub fn new(
        config: &TrackerConfig,
        modem: Arc<dyn ModemChannel>,
        calls: Arc<dyn CallTracker>,
        self_handler: Sender<Message>,
    ) -> Self {
        Self {
            desired: false,
            carrier_disabled: false,
            shutting_down: false,
            ims_registered: false,
            ims_alarm_armed: false,
            delay_needed: config.power_off_delay_needed,
            sub_id: config.sub_id,
            power_off_fallback: config.power_off_fallback,
            ims_radio_off_delay: config.ims_radio_off_delay,
            pending: PendingPowerOff::new(modem.clone(), calls),
            modem,
            self_handler,
            log: LocalLog::new(20),
        }
    }

    pub fn desired(&self) -> bool {
        self.desired
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn is_ims_alarm_armed(&self) -> bool {
        self.ims_alarm_armed
    }

    pub fn pending(&self) -> &PendingPowerOff {
        &self.pending
    }

    pub fn state(&self, radio: RadioState) -> PowerState {
        if self.shutting_down {
            PowerState::ShuttingDown
        } else if self.pending.is_pending() {
            PowerState::GracefulOffPending
        } else if radio.is_on() {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    pub fn set_desired(&mut self, on: bool, env: &PowerEnv<'_>) {
        self.log.log(format!("set desired power {on}"));
        self.desired = on;
        self.set_power_state_to_desired(env);
    }

    pub fn set_carrier_enabled(&mut self, enabled: bool, env: &PowerEnv<'_>) {
        self.log.log(format!("carrier radio enabled {enabled}"));
        self.carrier_disabled = !enabled;
        self.set_power_state_to_desired(env);
    }

    /// Enters the terminal shutting down state. Only the first call counts.
    pub fn request_shutdown(&mut self, env: &PowerEnv<'_>) {
        if self.shutting_down {
            return;
        }

        info!("device shutting down, radio goes off for good");
        self.log.log("request shutdown");
        self.shutting_down = true;
        self.desired = false;
        self.set_power_state_to_desired(env);
    }

    pub fn set_ims_registered(&mut self, registered: bool, env: &PowerEnv<'_>) {
        let dropped = self.ims_registered && !registered;
        self.ims_registered = registered;

        if dropped && self.ims_alarm_armed {
            debug!("IMS deregistered while radio off was delayed for it");
            env.host.scheduler.cancel(Timer::ImsRadioOff);
            self.ims_alarm_armed = false;
            self.set_power_state_to_desired(env);
        }
    }

    pub fn set_power_state_to_desired(&mut self, env: &PowerEnv<'_>) {
        self.log.log(format!(
            "evaluate: desired={} carrier_disabled={} shutting_down={} radio={:?}",
            self.desired, self.carrier_disabled, self.shutting_down, env.radio
        ));

        if self.ims_alarm_armed {
            env.host.scheduler.cancel(Timer::ImsRadioOff);
            self.ims_alarm_armed = false;
        }

        let wants_on = self.desired && !self.carrier_disabled;
        if wants_on && env.radio == RadioState::Off {
            info!("turning radio on");
            self.modem.set_radio_power(true, Token::RadioPower { on: true });
        } else if !wants_on && env.radio.is_on() {
            if self.shutting_down && self.pending.is_pending() {
                info!("shutting down with a graceful power off still pending");
                self.modem.request_shutdown(Token::Shutdown);
            } else if env.delays_for_ims
                && self.delay_needed
                && self.ims_registered
                && !self.ims_alarm_armed
            {
                match env
                    .host
                    .scheduler
                    .schedule(Timer::ImsRadioOff, self.ims_radio_off_delay)
                {
                    Ok(()) => {
                        info!("delaying radio off for IMS deregistration");
                        self.ims_alarm_armed = true;
                    }
                    Err(e) => {
                        warn!("could not delay radio off for IMS: {e}");
                        self.power_off_radio_safely(env);
                    }
                }
            } else {
                self.power_off_radio_safely(env);
            }
        } else if self.shutting_down && env.radio.is_available() {
            info!("radio is off, requesting modem shutdown");
            self.modem.request_shutdown(Token::Shutdown);
        }
    }

    /// Powers off now if data is already down everywhere that matters,
    /// otherwise tears data down and arms the fallback timer.
    pub fn power_off_radio_safely(&mut self, env: &PowerEnv<'_>) {
        let host = env.host;
        let mut pending = self.pending.lock();
        if pending.active {
            debug!(tag = pending.tag, "graceful power off already in flight");
            return;
        }

        let dds = host.registry.default_data_subscription();
        if host.data.is_disconnected()
            && (dds == self.sub_id || host.registry.is_data_disconnected(dds))
        {
            info!(%dds, "data already disconnected, powering radio off");
            self.log.log("data disconnected, power off");
            host.data.clean_up_all_connections(REASON_RADIO_TURNED_OFF);
            self.pending.hangup_and_power_off();
            return;
        }

        if host.calls.is_in_call() {
            host.calls.hangup_all();
        }
        host.data.clean_up_all_connections(REASON_RADIO_TURNED_OFF);

        let waits_on_dds = dds != self.sub_id && !host.registry.is_data_disconnected(dds);
        if waits_on_dds {
            debug!(%dds, "waiting for data on the default data subscription");
            host.registry.register_for_all_data_disconnected(
                dds,
                Registrant::new(self.self_handler.clone(), EVENT_ALL_DATA_DISCONNECTED, None),
            );
            pending.active = true;
        }

        pending.tag += 1;
        let tag = pending.tag;
        match host
            .scheduler
            .schedule(Timer::PowerOffFallback { tag }, self.power_off_fallback)
        {
            Ok(()) => {
                info!(tag, "waiting for data teardown before powering radio off");
                self.log.log(format!("graceful power off, tag {tag}"));
                pending.active = true;
            }
            Err(e) => {
                warn!("could not arm power off fallback, powering off now: {e}");
                self.log.log(format!("fallback timer failed, hard power off, tag {tag}"));
                if waits_on_dds {
                    host.registry
                        .unregister_for_all_data_disconnected(dds, &self.self_handler);
                }
                pending.active = false;
                self.pending.hangup_and_power_off();
            }
        }
    }

    pub fn on_fallback_timer(&mut self, tag: u64) {
        let mut pending = self.pending.lock();
        if pending.active && pending.tag == tag {
            info!(tag, "data teardown timed out, powering radio off");
            self.log.log(format!("fallback timer fired, tag {tag}"));
            self.pending.hangup_and_power_off();
            pending.tag += 1;
            pending.active = false;
        } else {
            debug!(tag, current = pending.tag, "stale power off timer");
        }
    }

    pub fn on_all_data_disconnected(&mut self, env: &PowerEnv<'_>) {
        let host = env.host;
        let dds = host.registry.default_data_subscription();
        host.registry
            .unregister_for_all_data_disconnected(dds, &self.self_handler);

        let mut pending = self.pending.lock();
        if pending.active {
            info!("all data disconnected, powering radio off");
            self.log.log("all data disconnected, power off");
            self.pending.hangup_and_power_off();
            pending.active = false;
            pending.tag += 1;
        } else {
            debug!("stale all data disconnected notification");
        }
    }

    /// Completion of a radio off request.
    pub fn on_power_off_done(&mut self, radio: RadioState) {
        if self.shutting_down && radio.is_available() {
            self.modem.request_shutdown(Token::Shutdown);
        }
    }

    pub fn on_ims_alarm(&mut self, env: &PowerEnv<'_>) {
        if !self.ims_alarm_armed {
            debug!("stale IMS radio off alarm");
            return;
        }
        self.ims_alarm_armed = false;
        self.power_off_radio_safely(env);
    }

    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(
            out,
            " desired={} carrier_disabled={} shutting_down={} ims_registered={} {:?}",
            self.desired,
            self.carrier_disabled,
            self.shutting_down,
            self.ims_registered,
            self.pending
        );
        out.push_str(" radio power log:\n");
        self.log.dump(out);
    }
}
