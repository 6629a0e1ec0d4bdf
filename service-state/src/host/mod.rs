//! Contracts of the collaborators the tracker drives but does not own.

pub mod standalone;

use crate::{
    registrant::{Message, Registrant},
    restricted::CsNotification,
    roaming::RoamingPolicy,
    state::{RadioTech, ServiceState},
};
use bon::Builder;
use color_eyre::Result;
use derive_more::{Display, From};
use flume::Sender;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default, From, Serialize, Deserialize,
)]
pub struct SubId(pub i32);

pub trait DataConnectionTracker: Send + Sync {
    fn is_disconnected(&self) -> bool;
    fn clean_up_all_connections(&self, reason: &str);
}

/// Data state across every subscription on the device.
pub trait DisconnectRegistry: Send + Sync {
    fn default_data_subscription(&self) -> SubId;
    fn is_data_disconnected(&self, sub: SubId) -> bool;
    fn register_for_all_data_disconnected(&self, sub: SubId, registrant: Registrant);
    fn unregister_for_all_data_disconnected(&self, sub: SubId, handler: &Sender<Message>);
}

pub trait CarrierPolicyProvider: Send + Sync {
    fn roaming_policy(&self, sub: SubId) -> Result<RoamingPolicy>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpnDisplay {
    pub show_plmn: bool,
    pub plmn: Option<String>,
    pub show_spn: bool,
    pub spn: Option<String>,
}

pub trait SubscriptionStore: Send + Sync {
    fn persist_service_state(&self, sub: SubId, state: &ServiceState) -> Result<()>;
    /// Returns whether the display values were committed.
    fn set_plmn_spn(&self, sub: SubId, name: &SpnDisplay) -> bool;
}

/// Network time source hooks.
pub trait NitzHook: Send + Sync {
    fn network_available(&self);
    fn network_unavailable(&self);
    fn country_code_set(&self, country_changed: bool);
}

pub trait RatRatchet: Send + Sync {
    /// Mutates the RATs of `new` in place.
    fn ratchet(&self, old: &ServiceState, new: &mut ServiceState, location_changed: bool);
}

/// Keeps the highest RAT seen within one RAT family while camped on the same
/// cell.
#[derive(Debug, Clone, Default)]
pub struct FamilyRatchet;

impl FamilyRatchet {
    const FAMILIES: [&'static [RadioTech]; 4] = [
        &[RadioTech::Gprs, RadioTech::Edge],
        &[RadioTech::Evdo0, RadioTech::EvdoA, RadioTech::EvdoB],
        &[
            RadioTech::Umts,
            RadioTech::Hsdpa,
            RadioTech::Hsupa,
            RadioTech::Hspa,
            RadioTech::Hspap,
        ],
        &[RadioTech::Lte, RadioTech::LteCa],
    ];

    fn rank(rat: RadioTech) -> Option<(usize, usize)> {
        Self::FAMILIES
            .iter()
            .enumerate()
            .find_map(|(f, members)| members.iter().position(|r| *r == rat).map(|p| (f, p)))
    }

    fn higher(old: RadioTech, new: RadioTech) -> RadioTech {
        match (Self::rank(old), Self::rank(new)) {
            (Some((old_family, old_rank)), Some((new_family, new_rank)))
                if old_family == new_family && old_rank > new_rank =>
            {
                old
            }
            _ => new,
        }
    }
}

impl RatRatchet for FamilyRatchet {
    fn ratchet(&self, old: &ServiceState, new: &mut ServiceState, location_changed: bool) {
        if location_changed {
            return;
        }
        new.voice_rat = Self::higher(old.voice_rat, new.voice_rat);
        new.data_rat = Self::higher(old.data_rat, new.data_rat);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Fallback for a graceful power off, tagged with the sequence it belongs
    /// to.
    PowerOffFallback { tag: u64 },
    ImsRadioOff,
    GprsCheck,
    SignalPoll,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("no async runtime available to arm the timer")]
    NoRuntime,
    #[error("event loop is gone")]
    Closed,
}

/// One-shot timers. Scheduling a timer that is already armed re-arms it.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, timer: Timer, after: Duration) -> Result<(), ScheduleError>;
    fn cancel(&self, timer: Timer);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    RejectCause(i32),
    PsRestrictEnabled,
    PsRestrictDisabled,
    Cs(CsNotification),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Phone-level listeners.
pub trait PhoneNotifier: Send + Sync {
    fn service_state_changed(&self, merged: &ServiceState);
    fn signal_strength_changed(&self, signal: &crate::signal::SignalStrength);
    fn location_changed(&self);
    fn data_connection_changed(&self, reason: Option<&str>);
    fn cell_info_changed(&self, cells: &[crate::state::cell::CellInfo]);
}

pub trait CallTracker: Send + Sync {
    fn is_in_call(&self) -> bool;
    fn hangup_all(&self);
}

pub const SPN_RULE_SHOW_SPN: u32 = 0x01;
pub const SPN_RULE_SHOW_PLMN: u32 = 0x02;

pub trait SimRecords: Send + Sync {
    fn is_ready(&self) -> bool;
    fn operator_numeric(&self) -> Option<String>;
    fn service_provider_name(&self) -> Option<String>;
    /// `SPN_RULE_*` bits for the registered PLMN.
    fn display_rule(&self, plmn: Option<&str>) -> u32;
    fn card_present(&self) -> bool;
}

/// Every collaborator of one tracker instance.
#[derive(Clone, Builder)]
pub struct Host {
    pub data: Arc<dyn DataConnectionTracker>,
    pub registry: Arc<dyn DisconnectRegistry>,
    pub carrier: Arc<dyn CarrierPolicyProvider>,
    pub store: Arc<dyn SubscriptionStore>,
    pub nitz: Arc<dyn NitzHook>,
    pub ratchet: Arc<dyn RatRatchet>,
    pub scheduler: Arc<dyn Scheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub phone: Arc<dyn PhoneNotifier>,
    pub calls: Arc<dyn CallTracker>,
    pub sim: Arc<dyn SimRecords>,
}
