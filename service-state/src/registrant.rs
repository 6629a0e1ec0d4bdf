//! Registrant fan-out.
//!
//! A registrant is a `(handler, what, user_obj)` triple. Handlers are flume
//! senders; a notification is a [`Message`] pushed onto the handler's channel.
//! Lists keep insertion order and do not deduplicate.

use flume::Sender;
use std::{any::Any, fmt, sync::Arc};
use tracing::trace;

pub type Payload = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct Message {
    pub what: i32,
    pub user_obj: Option<Payload>,
    pub result: Option<Payload>,
}

impl Message {
    pub fn result<T: 'static>(&self) -> Option<&T> {
        self.result.as_ref()?.downcast_ref()
    }

    pub fn user_obj<T: 'static>(&self) -> Option<&T> {
        self.user_obj.as_ref()?.downcast_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("user_obj", &self.user_obj.is_some())
            .field("result", &self.result.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct Registrant {
    handler: Sender<Message>,
    what: i32,
    user_obj: Option<Payload>,
}

impl fmt::Debug for Registrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrant")
            .field("what", &self.what)
            .field("closed", &self.handler.is_disconnected())
            .finish()
    }
}

impl Registrant {
    pub fn new(handler: Sender<Message>, what: i32, user_obj: Option<Payload>) -> Self {
        Self {
            handler,
            what,
            user_obj,
        }
    }

    pub fn handler(&self) -> &Sender<Message> {
        &self.handler
    }

    pub fn notify(&self) -> bool {
        self.notify_result(None)
    }

    /// Returns false once the receiving side is gone.
    pub fn notify_result(&self, result: Option<Payload>) -> bool {
        self.handler
            .send(Message {
                what: self.what,
                user_obj: self.user_obj.clone(),
                result,
            })
            .is_ok()
    }

    fn is_for(&self, handler: &Sender<Message>) -> bool {
        self.handler.same_channel(handler)
    }
}

#[derive(Debug, Default)]
pub struct RegistrantList {
    registrants: Vec<Registrant>,
}

impl RegistrantList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, registrant: Registrant) {
        self.registrants.push(registrant);
    }

    /// Removes every registrant posting to `handler`.
    pub fn remove(&mut self, handler: &Sender<Message>) {
        self.registrants.retain(|r| !r.is_for(handler));
    }

    pub fn len(&self) -> usize {
        self.registrants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrants.is_empty()
    }

    pub fn notify_all(&mut self) {
        self.notify_result(None);
    }

    /// Notifies in insertion order. Registrants whose receiver was dropped are
    /// pruned.
    pub fn notify_result(&mut self, result: Option<Payload>) {
        self.registrants.retain(|r| {
            let alive = r.notify_result(result.clone());
            if !alive {
                trace!(what = r.what, "pruning registrant with closed handler");
            }

            alive
        });
    }
}

/// The events the tracker fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrantKind {
    VoiceRoamingOn,
    VoiceRoamingOff,
    DataRoamingOn,
    DataRoamingOff,
    NetworkAttached,
    NetworkDetached,
    DataAttached,
    DataDetached,
    /// Result payload is `(RegState, RadioTech)` of the data registration.
    DataRegStateOrRatChanged,
    PsRestrictEnabled,
    PsRestrictDisabled,
    SubscriptionInfoReady,
}

impl RegistrantKind {
    pub const ALL: [RegistrantKind; 12] = [
        RegistrantKind::VoiceRoamingOn,
        RegistrantKind::VoiceRoamingOff,
        RegistrantKind::DataRoamingOn,
        RegistrantKind::DataRoamingOff,
        RegistrantKind::NetworkAttached,
        RegistrantKind::NetworkDetached,
        RegistrantKind::DataAttached,
        RegistrantKind::DataDetached,
        RegistrantKind::DataRegStateOrRatChanged,
        RegistrantKind::PsRestrictEnabled,
        RegistrantKind::PsRestrictDisabled,
        RegistrantKind::SubscriptionInfoReady,
    ];
}

/// One list per [`RegistrantKind`].
#[derive(Debug, Default)]
pub struct Registrants {
    lists: std::collections::HashMap<RegistrantKind, RegistrantList>,
}

impl Registrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: RegistrantKind, registrant: Registrant) {
        self.lists.entry(kind).or_default().add(registrant);
    }

    pub fn remove(&mut self, kind: RegistrantKind, handler: &Sender<Message>) {
        if let Some(list) = self.lists.get_mut(&kind) {
            list.remove(handler);
        }
    }

    pub fn len(&self, kind: RegistrantKind) -> usize {
        self.lists.get(&kind).map_or(0, RegistrantList::len)
    }

    pub fn notify(&mut self, kind: RegistrantKind) {
        self.notify_result(kind, None);
    }

    pub fn notify_result(&mut self, kind: RegistrantKind, result: Option<Payload>) {
        if let Some(list) = self.lists.get_mut(&kind) {
            list.notify_result(result);
        }
    }
}
