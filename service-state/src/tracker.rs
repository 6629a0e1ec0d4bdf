//! The registration state machine.
//!
//! Everything in here runs on one event loop. Modem completions, indications
//! and timers are fed in one at a time through the `handle_*` methods.

use crate::{
    arena::{Slot, SnapshotArena},
    cell_info::CellInfoCache,
    config::TrackerConfig,
    diff::Transitions,
    family::{self, FamilyContext, PhoneType, TechFamily},
    host::{Host, Notification, SpnDisplay, Timer},
    local_log::LocalLog,
    modem::{
        CommandError, Indication, ModemChannel, PollQuery, RadioState, Reply, Response,
        SelectionMode, Token, signal::SignalMetrics,
    },
    poll::{Generation, MalformedReply, PollCoordinator},
    power::{EVENT_ALL_DATA_DISCONNECTED, PendingPowerOff, PowerEnv, PowerState, RadioPowerSequencer},
    registrant::{Message, Payload, Registrant, RegistrantKind, Registrants},
    restricted::RestrictedState,
    roaming::RoamingPolicy,
    signal::{self, SignalStrength, SignalStrengthCache},
    state::{
        RadioTech, RegState, ServiceState, cell::CellInfo, cell::CellLocation,
        is_valid_operator_numeric,
    },
};
use bon::bon;
use flume::Sender;
use std::{fmt::Write, sync::Arc};
use tracing::{debug, error, info, trace, warn};

pub const REASON_CSS_INDICATOR_CHANGED: &str = "cssIndicatorChanged";
pub const REASON_IWLAN_AVAILABLE: &str = "iwlanAvailable";

/// Builds the power sequencer's view of the tracker from disjoint fields, so
/// that `self.power` can still be borrowed mutably.
macro_rules! power_env {
    ($s:ident) => {
        PowerEnv {
            radio: $s.radio,
            host: &$s.host,
            delays_for_ims: $s.family.delays_power_off_for_ims(),
        }
    };
}

pub struct ServiceStateTracker {
    config: TrackerConfig,
    modem: Arc<dyn ModemChannel>,
    host: Host,
    family: Box<dyn TechFamily>,
    arena: SnapshotArena,
    poll: PollCoordinator,
    radio: RadioState,
    power: RadioPowerSequencer,
    signal: SignalStrengthCache,
    cell_info: CellInfoCache,
    restricted: RestrictedState,
    registrants: Registrants,
    subscription_ready: bool,
    ims_voice_in_service: bool,
    last_spn: Option<SpnDisplay>,
    gprs_check_started: bool,
    gprs_no_reg_reported: bool,
    commits: u64,
    roaming_log: LocalLog,
    attach_log: LocalLog,
    phone_type_log: LocalLog,
    rat_log: LocalLog,
}

#[bon]
impl ServiceStateTracker {
    #[builder]
    pub fn new(
        #[builder(default)] config: TrackerConfig,
        modem: Arc<dyn ModemChannel>,
        host: Host,
        /// Receives callbacks the tracker registers for itself.
        self_handler: Sender<Message>,
        #[builder(default = PhoneType::Gsm)] phone_type: PhoneType,
    ) -> Self {
        let power =
            RadioPowerSequencer::new(&config, modem.clone(), host.calls.clone(), self_handler);

        Self {
            config,
            modem,
            host,
            family: family::for_phone_type(phone_type),
            arena: SnapshotArena::new(),
            poll: PollCoordinator::new(),
            radio: RadioState::Unavailable,
            power,
            signal: SignalStrengthCache::new(),
            cell_info: CellInfoCache::new(),
            restricted: RestrictedState::default(),
            registrants: Registrants::new(),
            subscription_ready: false,
            ims_voice_in_service: false,
            last_spn: None,
            gprs_check_started: false,
            gprs_no_reg_reported: false,
            commits: 0,
            roaming_log: LocalLog::new(10),
            attach_log: LocalLog::new(10),
            phone_type_log: LocalLog::new(10),
            rat_log: LocalLog::new(20),
        }
    }
}

impl ServiceStateTracker {
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn service_state(&self) -> &ServiceState {
        &self.arena.current().state
    }

    pub fn cell_location(&self) -> &CellLocation {
        &self.arena.current().location
    }

    pub fn signal_strength(&self) -> &SignalStrength {
        self.signal.latest()
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state(self.radio)
    }

    pub fn desired_power(&self) -> bool {
        self.power.desired()
    }

    pub fn combined_reg_state(&self) -> RegState {
        self.service_state().combined_reg_state()
    }

    pub fn phone_type(&self) -> PhoneType {
        self.family.phone_type()
    }

    pub fn restricted_state(&self) -> RestrictedState {
        self.restricted
    }

    pub fn poll_generation(&self) -> Generation {
        self.poll.generation()
    }

    pub fn outstanding_queries(&self) -> usize {
        self.poll.outstanding()
    }

    /// Number of snapshots committed so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn cell_info_cache(&self) -> CellInfoCache {
        self.cell_info.clone()
    }

    pub fn pending_power_off(&self) -> PendingPowerOff {
        self.power.pending().clone()
    }

    /// The committed state with voice over IMS folded in.
    pub fn merged_service_state(&self) -> ServiceState {
        let mut merged = self.service_state().clone();
        if merged.voice_reg_state != RegState::InService && self.ims_voice_in_service {
            merged.voice_reg_state = RegState::InService;
            merged.emergency_only = false;
        }

        merged
    }

    fn roaming_policy(&self) -> RoamingPolicy {
        self.host
            .carrier
            .roaming_policy(self.config.sub_id)
            .unwrap_or_else(|e| {
                error!("could not get carrier roaming policy: {e:?}");
                RoamingPolicy::default()
            })
    }

    // ---------------------------------------------------------------- polling

    pub fn poll_state(&mut self) {
        self.poll_state_inner(false);
    }

    /// Polls even when the radio was last reported off. Modems keep
    /// registering over IWLAN with the radio off.
    pub fn modem_triggered_poll_state(&mut self) {
        self.poll_state_inner(true);
    }

    pub fn cancel_poll_state(&mut self) {
        debug!(generation = %self.poll.generation(), "cancelling poll");
        self.poll.cancel();
        self.family.start_batch();
    }

    fn poll_state_inner(&mut self, modem_triggered: bool) {
        let generation = self.poll.start();
        self.family.start_batch();
        self.arena.reset_pending();

        match self.radio {
            RadioState::Unavailable => {
                debug!(%generation, "radio unavailable, committing out of service");
                self.arena.pending_mut().state.set_out_of_service();
                self.reset_for_no_radio();
                self.poll_state_done();
            }
            RadioState::Off => {
                self.arena.pending_mut().state.set_power_off();
                self.reset_for_no_radio();

                let on_iwlan = self.service_state().data_rat == RadioTech::Iwlan;
                if self.power.is_shutting_down() || (!modem_triggered && !on_iwlan) {
                    debug!(%generation, "radio off, committing power off");
                    self.poll_state_done();
                    return;
                }
                self.issue_queries(generation);
            }
            RadioState::On => self.issue_queries(generation),
        }
    }

    fn reset_for_no_radio(&mut self) {
        self.arena.pending_mut().location.set_invalid();
        let current = self.service_state();
        let is_gsm = signal::is_gsm(current.voice_rat, current.data_rat, None);
        self.signal.reset(is_gsm);
        self.host.nitz.network_unavailable();
    }

    fn issue_queries(&mut self, generation: Generation) {
        let queries = self.family.poll_queries();
        debug!(%generation, ?queries, "polling service state");

        for query in queries {
            let token = self.poll.issue(*query);
            match query {
                PollQuery::Operator => self.modem.get_operator(token),
                PollQuery::DataRegistration => self.modem.get_data_registration_state(token),
                PollQuery::VoiceRegistration => self.modem.get_voice_registration_state(token),
                PollQuery::NetworkSelectionMode => self.modem.get_network_selection_mode(token),
            }
        }
    }

    fn on_poll_response(
        &mut self,
        generation: Generation,
        query: PollQuery,
        result: Result<Reply, CommandError>,
    ) {
        if !self.poll.is_current(generation) {
            trace!(%generation, ?query, "dropping stale poll response");
            return;
        }

        match result {
            Err(CommandError::RadioNotAvailable) => {
                debug!(%generation, ?query, "radio not available, abandoning poll");
                self.cancel_poll_state();
                return;
            }
            Err(CommandError::OpNotAllowedBeforeRegistration) => {
                debug!(?query, "query not allowed before registration");
            }
            Err(e) => {
                error!(?query, "modem returned an error where it must succeed: {e}");
            }
            Ok(reply) => {
                if let Err(e) = self.merge(query, reply) {
                    error!("{e}");
                }
            }
        }

        if self.poll.complete_one() {
            self.finish_batch();
            self.poll_state_done();
        }
    }

    fn merge(&mut self, query: PollQuery, reply: Reply) -> Result<(), MalformedReply> {
        let policy = self.roaming_policy();
        let ctx = FamilyContext {
            policy: &policy,
            sim: self.host.sim.as_ref(),
        };

        match (query, reply) {
            (PollQuery::VoiceRegistration, Reply::VoiceRegistration(reg)) => {
                self.family
                    .on_voice_registration(&reg, self.arena.pending_mut(), &ctx);
            }
            (PollQuery::DataRegistration, Reply::DataRegistration(reg)) => {
                let (current, pending) = self.arena.split_mut();
                if self
                    .family
                    .on_data_registration(&reg, &current.state, &mut pending.state)
                {
                    self.modem.get_signal_strength(Token::SignalStrength);
                }
            }
            (PollQuery::Operator, Reply::Operator(op)) => {
                self.family
                    .on_operator(&op, &mut self.arena.pending_mut().state, &ctx);
            }
            (PollQuery::NetworkSelectionMode, Reply::NetworkSelectionMode(mode)) => {
                self.arena.pending_mut().state.manual_selection = mode == SelectionMode::Manual;
            }
            (query, reply) => return Err(MalformedReply::new(query, &reply)),
        }

        Ok(())
    }

    fn finish_batch(&mut self) {
        let policy = self.roaming_policy();
        let ctx = FamilyContext {
            policy: &policy,
            sim: self.host.sim.as_ref(),
        };
        self.family
            .finish_batch(&mut self.arena.pending_mut().state, &ctx);
    }

    // ----------------------------------------------------------------- commit

    fn use_data_reg_state_for_data_only_devices(&mut self) {
        if !self.config.voice_capable {
            let pending = &mut self.arena.pending_mut().state;
            pending.voice_reg_state = pending.data_reg_state;
        }
    }

    /// With the radio off the pending snapshot becomes power off, except that
    /// data stays in service on IWLAN and the operator name is kept.
    fn reset_service_state_in_iwlan_mode(&mut self) {
        if self.radio != RadioState::Off {
            return;
        }

        let pending = &mut self.arena.pending_mut().state;
        let on_iwlan = pending.data_rat == RadioTech::Iwlan;
        let alpha_long = pending.operator.alpha_long.take();
        pending.set_power_off();
        if on_iwlan {
            debug!("radio off on IWLAN, keeping data in service");
            pending.data_rat = RadioTech::Iwlan;
            pending.data_reg_state = RegState::InService;
        }
        pending.operator.alpha_long = alpha_long;
    }

    fn poll_state_done(&mut self) {
        {
            let policy = self.roaming_policy();
            let ctx = FamilyContext {
                policy: &policy,
                sim: self.host.sim.as_ref(),
            };
            self.family
                .before_commit(&mut self.arena.pending_mut().state, &ctx);
        }
        self.use_data_reg_state_for_data_only_devices();
        self.reset_service_state_in_iwlan_mode();

        let location_changed = self.arena.current().location != self.arena.pending().location;
        {
            let (current, pending) = self.arena.split_mut();
            if pending.state.data_reg_state == RegState::InService {
                self.host
                    .ratchet
                    .ratchet(&current.state, &mut pending.state, location_changed);
            }
        }

        let t = Transitions::compute(
            self.arena.current(),
            self.arena.pending(),
            self.family.detects_4g_handoff(),
        );
        debug!(?t, "poll state done");
        self.log_transitions(&t);

        let old_merged = self.merged_service_state();
        let old_mcc = self
            .service_state()
            .operator
            .mcc()
            .map(str::to_string);

        self.arena.commit();
        self.commits += 1;
        let current = self.service_state().clone();

        if t.has_registered {
            self.registrants.notify(RegistrantKind::NetworkAttached);
            self.host.nitz.network_available();
        }
        if t.has_deregistered {
            self.registrants.notify(RegistrantKind::NetworkDetached);
            self.host.nitz.network_unavailable();
        }
        if t.has_data_attached || t.has_4g_handoff {
            self.registrants.notify(RegistrantKind::DataAttached);
        }
        if t.has_data_detached {
            self.registrants.notify(RegistrantKind::DataDetached);
        }

        if t.has_reject_cause_changed {
            self.host
                .notifier
                .notify(Notification::RejectCause(current.reject_cause));
        }

        if t.has_changed {
            self.update_spn_display();
            self.update_network_country(&current, old_mcc.as_deref());

            let merged = self.merged_service_state();
            if merged != old_merged {
                info!(
                    voice = %merged.voice_reg_state,
                    data = %merged.data_reg_state,
                    rat = %merged.data_rat,
                    "service state changed"
                );
                self.host.phone.service_state_changed(&merged);
            }

            if let Err(e) = self
                .host
                .store
                .persist_service_state(self.config.sub_id, &current)
            {
                error!("could not persist service state: {e:?}");
            }

            if t.has_roaming_change() {
                self.roaming_log.log(format!(
                    "voice roaming {} data roaming {} on {:?}",
                    current.voice_roaming, current.data_roaming, current.operator.numeric
                ));
            }
        }

        if t.has_attach_change() {
            self.attach_log.log(format!(
                "voice {} data {} rat {}",
                current.voice_reg_state, current.data_reg_state, current.data_rat
            ));
        }

        if t.has_voice_rat_changed || t.has_data_rat_changed {
            self.rat_log.log(format!(
                "voice {} data {}",
                current.voice_rat, current.data_rat
            ));
        }

        if t.has_data_reg_state_changed || t.has_data_rat_changed {
            let payload: Payload = Arc::new((current.data_reg_state, current.data_rat));
            self.registrants
                .notify_result(RegistrantKind::DataRegStateOrRatChanged, Some(payload));
            let reason = (current.data_rat == RadioTech::Iwlan).then_some(REASON_IWLAN_AVAILABLE);
            self.host.phone.data_connection_changed(reason);
        }

        if t.has_voice_roaming_on {
            self.registrants.notify(RegistrantKind::VoiceRoamingOn);
        }
        if t.has_voice_roaming_off {
            self.registrants.notify(RegistrantKind::VoiceRoamingOff);
        }
        if t.has_data_roaming_on {
            self.registrants.notify(RegistrantKind::DataRoamingOn);
        }
        if t.has_data_roaming_off {
            self.registrants.notify(RegistrantKind::DataRoamingOff);
        }

        if t.has_location_changed {
            self.host.phone.location_changed();
        }

        if self.family.checks_gprs_consistency() {
            self.check_gprs_consistency(&current);
        }
    }

    fn log_transitions(&self, t: &Transitions) {
        let cur = &self.arena.current().state;
        let new = &self.arena.pending().state;

        if t.has_voice_reg_state_changed || t.has_data_reg_state_changed {
            info!(
                "registration changed: voice {} -> {}, data {} -> {}",
                cur.voice_reg_state, new.voice_reg_state, cur.data_reg_state, new.data_reg_state
            );
        }

        if self.family.phone_type() == PhoneType::Gsm {
            if t.has_voice_rat_changed {
                let cid = self.arena.pending().location.cid();
                debug!(?cid, "RAT switched {} -> {}", cur.voice_rat, new.voice_rat);
            }
            if t.has_css_indicator_changed {
                self.host
                    .phone
                    .data_connection_changed(Some(REASON_CSS_INDICATOR_CHANGED));
            }
        }
    }

    fn update_network_country(&self, current: &ServiceState, old_mcc: Option<&str>) {
        let numeric = current.operator.numeric.as_deref();
        if !is_valid_operator_numeric(numeric) {
            debug!(?numeric, "operator numeric is invalid");
            self.host.nitz.network_unavailable();
        } else if current.data_rat != RadioTech::Iwlan {
            let country_changed =
                self.host.sim.card_present() && old_mcc != current.operator.mcc();
            self.host.nitz.country_code_set(country_changed);
        }
    }

    pub fn update_spn_display(&mut self) {
        let spn = self
            .family
            .spn_display(self.service_state(), self.host.sim.as_ref());
        if self.last_spn.as_ref() == Some(&spn) {
            return;
        }

        if self.host.store.set_plmn_spn(self.config.sub_id, &spn) {
            debug!(?spn, "updated spn display");
            self.last_spn = Some(spn);
        } else {
            debug!(?spn, "spn display not committed");
        }
    }

    fn is_gprs_consistent(state: &ServiceState) -> bool {
        !(state.voice_reg_state == RegState::InService
            && state.data_reg_state != RegState::InService)
    }

    fn check_gprs_consistency(&mut self, current: &ServiceState) {
        if Self::is_gprs_consistent(current) {
            self.gprs_no_reg_reported = false;
            return;
        }
        if self.gprs_check_started || self.gprs_no_reg_reported {
            return;
        }

        self.gprs_check_started = true;
        if let Err(e) = self
            .host
            .scheduler
            .schedule(Timer::GprsCheck, self.config.gprs_check_period)
        {
            warn!("could not schedule gprs registration check: {e}");
            self.gprs_check_started = false;
        }
    }

    fn on_gprs_check(&mut self) {
        let current = self.service_state();
        if self.family.checks_gprs_consistency() && !Self::is_gprs_consistent(current) {
            warn!(
                operator = ?current.operator.numeric,
                cid = ?self.cell_location().cid(),
                "voice registered but data is not"
            );
            self.gprs_no_reg_reported = true;
        }
        self.gprs_check_started = false;
    }

    // ------------------------------------------------------------ inbound

    pub fn handle_response(&mut self, response: Response) {
        let Response { token, result } = response;
        match token {
            Token::Poll { generation, query } => self.on_poll_response(generation, query, result),
            Token::SignalStrength => self.on_solicited_signal_strength(result),
            Token::CellInfo => self.on_solicited_cell_info(result),
            Token::RadioPower { on: false } => {
                if let Err(e) = result {
                    warn!("radio power off failed: {e}");
                }
                self.power.on_power_off_done(self.radio);
            }
            Token::RadioPower { on: true } => {
                if let Err(e) = result {
                    warn!("radio power on failed: {e}");
                }
            }
            Token::Shutdown => match result {
                Ok(_) => info!("modem shut down"),
                Err(e) => warn!("modem shutdown failed: {e}"),
            },
        }
    }

    pub fn handle_indication(&mut self, indication: Indication) {
        match indication {
            Indication::RadioStateChanged(state) => self.on_radio_state_changed(state),
            Indication::NetworkStateChanged => self.modem_triggered_poll_state(),
            Indication::SignalStrength(metrics) => {
                self.signal.mark_unsolicited();
                self.on_signal_metrics(Ok(metrics));
            }
            Indication::CellInfoList(cells) => self.on_cell_info_list(cells),
            Indication::RestrictedStateChanged(bits) => {
                if self.family.handles_restricted_state() {
                    self.on_restricted_state_changed(bits);
                }
            }
            Indication::SimReady => self.on_sim_ready(),
            Indication::CdmaSubscription {
                home_system_ids,
                prl_version,
            } => {
                self.family
                    .on_cdma_subscription(&home_system_ids, prl_version.as_deref());
                self.subscription_ready = true;
                self.registrants
                    .notify(RegistrantKind::SubscriptionInfoReady);
            }
        }
    }

    pub fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::PowerOffFallback { tag } => self.power.on_fallback_timer(tag),
            Timer::ImsRadioOff => {
                let env = power_env!(self);
                self.power.on_ims_alarm(&env);
            }
            Timer::GprsCheck => self.on_gprs_check(),
            Timer::SignalPoll => self.modem.get_signal_strength(Token::SignalStrength),
        }
    }

    /// Callbacks delivered through the tracker's own registrant handler.
    pub fn handle_message(&mut self, msg: Message) {
        match msg.what {
            EVENT_ALL_DATA_DISCONNECTED => {
                let env = power_env!(self);
                self.power.on_all_data_disconnected(&env);
            }
            other => debug!(what = other, "ignoring unknown message"),
        }
    }

    fn on_radio_state_changed(&mut self, state: RadioState) {
        let old = self.radio;
        self.radio = state;
        info!(?old, new = ?state, "radio state changed");

        if state.is_on() && !old.is_on() {
            self.queue_next_signal_poll();
        }
        self.set_power_state_to_desired();
        self.modem_triggered_poll_state();
    }

    fn on_sim_ready(&mut self) {
        debug!("sim ready");
        self.queue_next_signal_poll();
        self.poll_state();
    }

    fn on_restricted_state_changed(&mut self, bits: i32) {
        let new = RestrictedState::from_bits(bits, self.host.sim.is_ready());
        let change = self.restricted.transition_to(&new);
        debug!(old = ?self.restricted, ?new, "restricted state changed");

        match change.ps {
            Some(true) => {
                self.registrants.notify(RegistrantKind::PsRestrictEnabled);
                self.host.notifier.notify(Notification::PsRestrictEnabled);
            }
            Some(false) => {
                self.registrants.notify(RegistrantKind::PsRestrictDisabled);
                self.host.notifier.notify(Notification::PsRestrictDisabled);
            }
            None => {}
        }
        if let Some(cs) = change.cs {
            self.host.notifier.notify(Notification::Cs(cs));
        }

        self.restricted = new;
    }

    // ------------------------------------------------------------- signal

    fn queue_next_signal_poll(&self) {
        if !self.signal.wants_polling() {
            return;
        }
        if let Err(e) = self
            .host
            .scheduler
            .schedule(Timer::SignalPoll, self.config.signal_poll_interval)
        {
            warn!("could not schedule signal strength poll: {e}");
        }
    }

    fn on_solicited_signal_strength(&mut self, result: Result<Reply, CommandError>) {
        if !self.radio.is_on() {
            debug!("ignoring signal strength with radio not on");
            return;
        }

        let metrics = match result {
            Ok(Reply::SignalStrength(m)) => Ok(m),
            Ok(other) => Err(format!("unexpected {} reply", other.name())),
            Err(e) => Err(e.to_string()),
        };
        self.on_signal_metrics(metrics);
        self.queue_next_signal_poll();
    }

    fn on_signal_metrics(&mut self, metrics: Result<SignalMetrics, String>) {
        let ss = self.service_state();
        let sample = match metrics {
            Ok(m) => SignalStrength::from_metrics(m, ss.voice_rat, ss.data_rat),
            Err(e) => {
                debug!("signal strength unavailable: {e}");
                SignalStrength::default_for(signal::is_gsm(ss.voice_rat, ss.data_rat, None))
            }
        };

        if self.signal.update(sample) {
            self.host.phone.signal_strength_changed(self.signal.latest());
        }
    }

    // ---------------------------------------------------------- cell info

    pub fn request_cell_info(&self) {
        self.modem.get_cell_info_list(Token::CellInfo);
    }

    fn on_solicited_cell_info(&mut self, result: Result<Reply, CommandError>) {
        match result {
            Ok(Reply::CellInfo(cells)) => self.cell_info.complete(Some(cells)),
            Ok(other) => {
                error!("unexpected {} reply to cell info request", other.name());
                self.cell_info.complete(None);
            }
            Err(e) => {
                debug!("cell info request failed: {e}");
                self.cell_info.complete(None);
            }
        }
    }

    fn on_cell_info_list(&mut self, cells: Vec<CellInfo>) {
        self.host.phone.cell_info_changed(&cells);
        self.cell_info.update(cells);
    }

    // -------------------------------------------------------------- power

    pub fn set_radio_power(&mut self, on: bool) {
        let env = power_env!(self);
        self.power.set_desired(on, &env);
    }

    pub fn set_radio_power_from_carrier(&mut self, enabled: bool) {
        let env = power_env!(self);
        self.power.set_carrier_enabled(enabled, &env);
    }

    pub fn request_shutdown(&mut self) {
        let env = power_env!(self);
        self.power.request_shutdown(&env);
    }

    pub fn set_power_state_to_desired(&mut self) {
        let env = power_env!(self);
        self.power.set_power_state_to_desired(&env);
    }

    pub fn set_ims_registration_state(&mut self, registered: bool) {
        let env = power_env!(self);
        self.power.set_ims_registered(registered, &env);
    }

    /// Short-circuits a graceful power off that waits on data teardown.
    pub fn process_pending_power_off(&self) -> bool {
        self.power.pending().process()
    }

    pub fn set_ims_voice_in_service(&mut self, in_service: bool) {
        let old = self.merged_service_state();
        self.ims_voice_in_service = in_service;
        let merged = self.merged_service_state();
        if merged != old {
            self.host.phone.service_state_changed(&merged);
        }
    }

    // ----------------------------------------------------------- registrants

    fn condition_holds(&self, kind: RegistrantKind) -> bool {
        let ss = self.service_state();
        match kind {
            RegistrantKind::VoiceRoamingOn => ss.voice_roaming,
            RegistrantKind::VoiceRoamingOff => !ss.voice_roaming,
            RegistrantKind::DataRoamingOn => ss.data_roaming,
            RegistrantKind::DataRoamingOff => !ss.data_roaming,
            RegistrantKind::NetworkAttached => ss.voice_reg_state == RegState::InService,
            RegistrantKind::NetworkDetached => ss.voice_reg_state != RegState::InService,
            RegistrantKind::DataAttached => ss.data_reg_state == RegState::InService,
            RegistrantKind::DataDetached => ss.data_reg_state != RegState::InService,
            RegistrantKind::DataRegStateOrRatChanged => true,
            RegistrantKind::PsRestrictEnabled => self.restricted.ps,
            RegistrantKind::PsRestrictDisabled => !self.restricted.ps,
            RegistrantKind::SubscriptionInfoReady => self.subscription_ready,
        }
    }

    /// With `notify_now` the registrant is notified right away if the
    /// condition it waits for already holds.
    pub fn register_for(&mut self, kind: RegistrantKind, registrant: Registrant, notify_now: bool) {
        if notify_now && self.condition_holds(kind) {
            let result: Option<Payload> = match kind {
                RegistrantKind::DataRegStateOrRatChanged => {
                    let ss = self.service_state();
                    Some(Arc::new((ss.data_reg_state, ss.data_rat)))
                }
                _ => None,
            };
            registrant.notify_result(result);
        }
        self.registrants.add(kind, registrant);
    }

    pub fn unregister_for(&mut self, kind: RegistrantKind, handler: &Sender<Message>) {
        self.registrants.remove(kind, handler);
    }

    pub fn registrant_count(&self, kind: RegistrantKind) -> usize {
        self.registrants.len(kind)
    }

    // --------------------------------------------------------- phone type

    pub fn switch_phone_type(&mut self, phone_type: PhoneType) {
        let old = self.family.phone_type();
        if old == phone_type {
            return;
        }

        info!(%old, new = %phone_type, "switching phone type");
        self.phone_type_log.log(format!("{old} -> {phone_type}"));
        self.cancel_poll_state();
        self.family = family::for_phone_type(phone_type);
        self.arena = SnapshotArena::new();
        self.last_spn = None;
        self.gprs_check_started = false;
        self.gprs_no_reg_reported = false;
        self.restricted = RestrictedState::default();
        self.subscription_ready = false;
        let is_gsm = phone_type == PhoneType::Gsm;
        self.signal.reset(is_gsm);

        self.set_power_state_to_desired();
        self.modem_triggered_poll_state();
    }

    // --------------------------------------------------------------- dump

    pub fn dump(&self) -> String {
        let mut out = String::new();
        let Slot { state, location } = self.arena.current();
        let _ = writeln!(out, "ServiceStateTracker ({}):", self.family.phone_type());
        let _ = writeln!(out, " ss={state:?}");
        let _ = writeln!(out, " pending={:?}", self.arena.pending().state);
        let _ = writeln!(out, " location={location:?}");
        let _ = writeln!(
            out,
            " radio={:?} power={:?} poll={} outstanding={} commits={}",
            self.radio,
            self.power_state(),
            self.poll.generation(),
            self.poll.outstanding(),
            self.commits
        );
        let _ = writeln!(out, " signal={:?}", self.signal.latest());
        let _ = writeln!(out, " restricted={:?}", self.restricted);
        let _ = writeln!(out, " spn={:?}", self.last_spn);
        self.power.dump(&mut out);
        for (name, log) in [
            ("roaming", &self.roaming_log),
            ("attach", &self.attach_log),
            ("phone type", &self.phone_type_log),
            ("rat", &self.rat_log),
        ] {
            let _ = writeln!(out, " {name} log:");
            log.dump(&mut out);
        }

        out
    }
}
