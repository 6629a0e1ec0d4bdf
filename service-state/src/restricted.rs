//! Access restrictions announced by the network.

pub const RESTRICTED_CS_EMERGENCY: i32 = 0x01;
pub const RESTRICTED_CS_NORMAL: i32 = 0x02;
pub const RESTRICTED_CS_ALL: i32 = 0x04;
pub const RESTRICTED_PS_ALL: i32 = 0x10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestrictedState {
    pub cs_emergency: bool,
    pub cs_normal: bool,
    pub ps: bool,
}

/// Circuit-switched restriction notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsNotification {
    /// All CS calls restricted.
    Enabled,
    Disabled,
    NormalEnabled,
    EmergencyEnabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestrictedChange {
    /// `Some(true)` when PS became restricted, `Some(false)` when lifted.
    pub ps: Option<bool>,
    pub cs: Option<CsNotification>,
}

impl RestrictedState {
    /// Normal call and data restrictions are ignored before the SIM is ready.
    pub fn from_bits(bits: i32, sim_ready: bool) -> Self {
        let cs_all = bits & RESTRICTED_CS_ALL != 0;
        let mut rs = Self {
            cs_emergency: bits & RESTRICTED_CS_EMERGENCY != 0 || cs_all,
            ..Default::default()
        };
        if sim_ready {
            rs.cs_normal = bits & RESTRICTED_CS_NORMAL != 0 || cs_all;
            rs.ps = bits & RESTRICTED_PS_ALL != 0;
        }

        rs
    }

    pub fn is_cs_restricted(&self) -> bool {
        self.cs_emergency && self.cs_normal
    }

    pub fn is_any_cs_restricted(&self) -> bool {
        self.cs_emergency || self.cs_normal
    }

    pub fn transition_to(&self, new: &RestrictedState) -> RestrictedChange {
        use CsNotification::*;

        let ps = match (self.ps, new.ps) {
            (false, true) => Some(true),
            (true, false) => Some(false),
            _ => None,
        };

        let cs = match (self.cs_emergency, self.cs_normal) {
            (true, true) => {
                if !new.is_any_cs_restricted() {
                    Some(Disabled)
                } else if !new.cs_normal {
                    Some(EmergencyEnabled)
                } else if !new.cs_emergency {
                    Some(NormalEnabled)
                } else {
                    None
                }
            }
            (true, false) => {
                if !new.is_any_cs_restricted() {
                    Some(Disabled)
                } else if new.is_cs_restricted() {
                    Some(Enabled)
                } else if new.cs_normal {
                    Some(NormalEnabled)
                } else {
                    None
                }
            }
            (false, true) => {
                if !new.is_any_cs_restricted() {
                    Some(Disabled)
                } else if new.is_cs_restricted() {
                    Some(Enabled)
                } else if new.cs_emergency {
                    Some(EmergencyEnabled)
                } else {
                    None
                }
            }
            (false, false) => {
                if new.is_cs_restricted() {
                    Some(Enabled)
                } else if new.cs_emergency {
                    Some(EmergencyEnabled)
                } else if new.cs_normal {
                    Some(NormalEnabled)
                } else {
                    None
                }
            }
        };

        RestrictedChange { ps, cs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_ignores_normal_and_ps_before_sim_ready() {
        let rs = RestrictedState::from_bits(
            RESTRICTED_CS_NORMAL | RESTRICTED_PS_ALL | RESTRICTED_CS_EMERGENCY,
            false,
        );

        assert_eq!(
            rs,
            RestrictedState {
                cs_emergency: true,
                cs_normal: false,
                ps: false
            }
        );
    }

    #[test]
    fn it_expands_cs_all() {
        let rs = RestrictedState::from_bits(RESTRICTED_CS_ALL, true);

        assert!(rs.is_cs_restricted());
        assert!(!rs.ps);
    }

    #[test]
    fn it_walks_the_cs_transition_table() {
        let none = RestrictedState::default();
        let emergency = RestrictedState::from_bits(RESTRICTED_CS_EMERGENCY, true);
        let normal = RestrictedState::from_bits(RESTRICTED_CS_NORMAL, true);
        let all = RestrictedState::from_bits(RESTRICTED_CS_ALL, true);

        let cases = [
            (none, all, Some(CsNotification::Enabled)),
            (none, emergency, Some(CsNotification::EmergencyEnabled)),
            (none, normal, Some(CsNotification::NormalEnabled)),
            (none, none, None),
            (all, none, Some(CsNotification::Disabled)),
            (all, emergency, Some(CsNotification::EmergencyEnabled)),
            (all, normal, Some(CsNotification::NormalEnabled)),
            (all, all, None),
            (emergency, none, Some(CsNotification::Disabled)),
            (emergency, all, Some(CsNotification::Enabled)),
            (emergency, normal, Some(CsNotification::NormalEnabled)),
            (emergency, emergency, None),
            (normal, none, Some(CsNotification::Disabled)),
            (normal, all, Some(CsNotification::Enabled)),
            (normal, emergency, Some(CsNotification::EmergencyEnabled)),
            (normal, normal, None),
        ];

        for (old, new, expected) in cases {
            assert_eq!(old.transition_to(&new).cs, expected, "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn it_reports_ps_transitions() {
        let free = RestrictedState::default();
        let ps = RestrictedState::from_bits(RESTRICTED_PS_ALL, true);

        assert_eq!(free.transition_to(&ps).ps, Some(true));
        assert_eq!(ps.transition_to(&free).ps, Some(false));
        assert_eq!(ps.transition_to(&ps).ps, None);
    }
}
