//! Debugging view over a context's mirrors.

use crate::context::NativeContext;
use crate::mirror::Handle;
use crate::switch::PromotionSwitch;
use crate::vector::Sexp;
use indexmap::IndexMap;
use rvec_val::ElemType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectorSnapshot {
    pub mirrors: usize,
    pub registered: u64,
    pub pending: u64,
    pub released: u64,
    pub live_bytes: usize,
    pub handle_counter: u64,
    pub address_index: bool,
    pub switches: IndexMap<String, PromotionSwitch>,
}

#[derive(Debug, Clone)]
pub struct NativeDataInspector {
    ctx: NativeContext,
}

impl NativeDataInspector {
    pub fn new(ctx: NativeContext) -> Self {
        Self { ctx }
    }

    pub fn mirrors_size(&self) -> usize {
        self.ctx.registry().len()
    }

    /// Description of the object behind a handle
    pub fn object(&self, handle: Handle) -> String {
        match self.ctx.registry().get(handle) {
            None => format!("no mirror for {}", handle),
            Some(mirror) => match mirror.owner() {
                None => format!("{:?} (owner collected)", mirror),
                Some(Sexp::Vector(vector)) => format!("{:?}", vector),
                Some(Sexp::Char(string)) => format!("CharSxp({:?})", string),
            },
        }
    }

    pub fn handle_from_address(&self, address: usize) -> Option<Handle> {
        self.ctx.registry().handle_from_address(address)
    }

    pub fn allocation_site(&self, handle: Handle) -> Option<String> {
        self.ctx.registry().allocation_site(handle)
    }

    pub fn snapshot(&self) -> InspectorSnapshot {
        let registry = self.ctx.registry();
        let stats = self.ctx.reclaim_stats();
        InspectorSnapshot {
            mirrors: registry.len(),
            registered: registry.registered(),
            pending: stats.pending(),
            released: stats.released(),
            live_bytes: registry.live_bytes(),
            handle_counter: registry.counter(),
            address_index: registry.has_address_index(),
            switches: ElemType::all()
                .map(|ty| (ty.to_string(), self.ctx.switch(ty)))
                .collect(),
        }
    }
}
