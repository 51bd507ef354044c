use crate::network::{Epid, LinkId, MAX_TOTAL_EPIDS};

/// EPID to link lookup, array backed so a lookup is a bounds check and a load.
#[derive(Debug)]
pub struct RoutingTable {
    slots: Vec<Option<LinkId>>,
    mapped: usize,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_TOTAL_EPIDS as usize],
            mapped: 0,
        }
    }

    pub fn lookup(&self, epid: Epid) -> Option<LinkId> {
        self.slots.get(epid.index()).copied().flatten()
    }

    /// Points `epid` at `link`, returning whatever it pointed at before.
    /// Out of range EPIDs are ignored; config validation keeps them out.
    pub fn map(&mut self, epid: Epid, link: LinkId) -> Option<LinkId> {
        let slot = self.slots.get_mut(epid.index())?;
        let previous = slot.replace(link);
        if previous.is_none() {
            self.mapped += 1;
        }
        previous
    }

    pub fn unmap(&mut self, epid: Epid) -> Option<LinkId> {
        let previous = self.slots.get_mut(epid.index())?.take();
        if previous.is_some() {
            self.mapped -= 1;
        }
        previous
    }

    pub fn len(&self) -> usize {
        self.mapped
    }

    pub fn is_empty(&self) -> bool {
        self.mapped == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
