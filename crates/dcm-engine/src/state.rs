//! Per-slot settings and SIM identity

/// Settings applied to one slot by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotSettings {
    /// Mobile data enabled for this slot
    pub enabled: bool,
    /// Data roaming allowed
    pub roaming_enabled: bool,
    /// This slot carries the default data route
    pub is_default_slot: bool,
}

/// ICCIDs seen on a slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimIdentity {
    /// ICCID stored from a previous run
    pub previous: Option<String>,
    /// ICCID read from the card in this run
    pub current: Option<String>,
}

impl SimIdentity {
    /// A card is present and matches the stored identity
    pub fn is_confirmed(&self) -> bool {
        matches!((&self.previous, &self.current), (Some(p), Some(c)) if p == c)
    }
}
