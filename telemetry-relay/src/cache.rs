use crate::message::{CacheSlot, Inbound};

/// Most recent message of each cacheable type.
///
/// One slot per [`CacheSlot`]; every `put` replaces the whole message, so a
/// slot never holds a partial update and no history is kept.
#[derive(Debug, Default)]
pub struct LatestValueCache {
    frame: Option<Inbound>,
    stats: Option<Inbound>,
}

impl LatestValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, slot: CacheSlot, message: Inbound) {
        *self.slot_mut(slot) = Some(message);
    }

    pub fn get(&self, slot: CacheSlot) -> Option<&Inbound> {
        match slot {
            CacheSlot::Frame => self.frame.as_ref(),
            CacheSlot::Stats => self.stats.as_ref(),
        }
    }

    /// Cached messages in replay order (frame before stats), skipping empty
    /// slots.
    pub fn replay(&self) -> impl Iterator<Item = &Inbound> {
        CacheSlot::REPLAY_ORDER
            .into_iter()
            .filter_map(|slot| self.get(slot))
    }

    fn slot_mut(&mut self, slot: CacheSlot) -> &mut Option<Inbound> {
        match slot {
            CacheSlot::Frame => &mut self.frame,
            CacheSlot::Stats => &mut self.stats,
        }
    }
}
