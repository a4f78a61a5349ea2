//! Per-object property cache tree
//!
//! A shadow stores one [`PropertyCache`] node per class in the object's
//! inheritance chain, mirroring the schema structure. Each node holds one
//! slot per property of that class. Nodes for base classes hang off their
//! derived node, so a cache built for a derived class can serve reads
//! against any of its bases.

use std::any::TypeId;
use std::sync::LazyLock;

use objshadow_probe::RawObject;

use crate::schema::{ClassSchema, PropertyValue};

/// Cache node for one class of one object.
pub struct PropertyCache {
    schema: &'static ClassSchema,
    /// Pointer to the object, adjusted to this node's class
    raw: RawObject,
    /// One slot per property, in schema order
    slots: Vec<PropertyValue>,
    /// One child per base class, in schema order
    bases: Vec<PropertyCache>,
    /// Set until this node's slots are first fetched
    fresh: bool,
}

impl PropertyCache {
    /// Builds the cache tree for `schema` with every slot unfilled.
    ///
    /// Every node starts out marked fresh; the mark clears when the node's
    /// slots are first fetched.
    pub fn new_unfilled(schema: &'static ClassSchema, raw: RawObject) -> Self {
        let bases = schema
            .bases()
            .iter()
            .map(|base| Self::new_unfilled(base.schema(), base.project(raw)))
            .collect();
        Self {
            schema,
            raw,
            slots: vec![PropertyValue::Unit; schema.properties().len()],
            bases,
            fresh: true,
        }
    }

    /// Grows a cache tree rooted at some ancestor class into the tree for
    /// `target`, reusing `existing` (and its slots) as the matching
    /// subtree.
    ///
    /// Nodes created here are marked fresh; reused nodes keep their cached
    /// values and stay unmarked, so a later
    /// [`update_fresh`](Self::update_fresh) fills exactly the added nodes.
    /// The marks single nodes out by identity, not class: a diamond
    /// ancestor reached through the reused path is left alone even when
    /// another path to the same class is freshly built. The caller must
    /// have verified that `target` includes the existing tree's class.
    pub fn expand(target: &'static ClassSchema, raw: RawObject, existing: PropertyCache) -> Self {
        if existing.schema.type_id() == target.type_id() {
            return existing;
        }

        let mut existing = Some(existing);
        let mut bases = Vec::with_capacity(target.bases().len());
        for base in target.bases() {
            let base_raw = base.project(raw);
            let reusable = existing
                .as_ref()
                .is_some_and(|e| base.schema().includes(e.schema.type_id()));
            if reusable {
                // Absorb the old tree into the first base path that leads
                // to it. A second path to the same class gets fresh nodes.
                let subtree = match existing.take() {
                    Some(subtree) => subtree,
                    None => unreachable!(),
                };
                bases.push(Self::expand(base.schema(), base_raw, subtree));
            } else {
                bases.push(Self::new_unfilled(base.schema(), base_raw));
            }
        }
        debug_assert!(
            existing.is_none(),
            "expansion target {} does not include the existing cache class",
            target.class_name()
        );

        Self {
            schema: target,
            raw,
            slots: vec![PropertyValue::Unit; target.properties().len()],
            bases,
            fresh: true,
        }
    }

    /// An empty node used to move a tree out of its lock during expansion.
    pub(crate) fn detached(raw: RawObject) -> Self {
        enum Detached {}
        static SCHEMA: LazyLock<ClassSchema> =
            LazyLock::new(|| ClassSchema::builder::<Detached>("<detached>").build());
        Self {
            schema: LazyLock::force(&SCHEMA),
            raw,
            slots: Vec::new(),
            bases: Vec::new(),
            fresh: false,
        }
    }

    pub fn schema(&self) -> &'static ClassSchema {
        self.schema
    }

    pub fn raw(&self) -> RawObject {
        self.raw
    }

    /// Child nodes, one per base class in schema order.
    pub fn base_nodes(&self) -> &[PropertyCache] {
        &self.bases
    }

    /// Finds the node for a class, depth-first from this node.
    pub fn find(&self, ty: TypeId) -> Option<&PropertyCache> {
        if self.schema.type_id() == ty {
            return Some(self);
        }
        self.bases.iter().find_map(|base| base.find(ty))
    }

    pub fn find_mut(&mut self, ty: TypeId) -> Option<&mut PropertyCache> {
        if self.schema.type_id() == ty {
            return Some(self);
        }
        self.bases.iter_mut().find_map(|base| base.find_mut(ty))
    }

    /// Finds a property by name: this node's own properties first, then
    /// the base chain depth-first. Returns the declaring node and the slot
    /// index within it.
    pub fn find_named(&self, name: &str) -> Option<(&PropertyCache, usize)> {
        if let Some((index, _)) = self.schema.property(name) {
            return Some((self, index));
        }
        self.bases.iter().find_map(|base| base.find_named(name))
    }

    pub fn find_named_mut(&mut self, name: &str) -> Option<(&mut PropertyCache, usize)> {
        if let Some((index, _)) = self.schema.property(name) {
            return Some((self, index));
        }
        self.bases
            .iter_mut()
            .find_map(|base| base.find_named_mut(name))
    }

    pub fn slot(&self, index: usize) -> &PropertyValue {
        &self.slots[index]
    }

    pub fn set_slot(&mut self, index: usize, value: PropertyValue) {
        self.slots[index] = value;
    }

    /// Re-fetches every slot of this node from the live object, clearing
    /// the fresh mark.
    fn update_own_slots(&mut self) {
        for (index, descriptor) in self.schema.properties().iter().enumerate() {
            self.slots[index] = descriptor.fetch_live(self.raw);
        }
        self.fresh = false;
    }

    /// Re-fetches every slot in the whole tree.
    pub fn update(&mut self) {
        self.update_own_slots();
        for base in &mut self.bases {
            base.update();
        }
    }

    /// Re-fetches only the nodes still awaiting their first fill.
    pub fn update_fresh(&mut self) {
        if self.fresh {
            self.update_own_slots();
        }
        for base in &mut self.bases {
            base.update_fresh();
        }
    }

    /// Clears the fresh marks without fetching anything, for trees whose
    /// class never caches.
    pub fn clear_fresh(&mut self) {
        self.fresh = false;
        for base in &mut self.bases {
            base.clear_fresh();
        }
    }

    /// Whether this node's slots have never been fetched.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Re-fetches a single slot of this node.
    pub fn refresh_slot(&mut self, index: usize) {
        self.slots[index] = self.schema.properties()[index].fetch_live(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Shadowed;
    use crate::testutil::{install_probe, Coupler, Gadget, InPlug, OutPlug, SmartGadget, Widget};

    fn tracked_gadget(probe: &objshadow_probe::LocalProbe) -> (Box<SmartGadget>, RawObject) {
        let gadget = Box::new(SmartGadget::sample());
        let raw = RawObject::from_ref(&*gadget);
        probe.track(raw, probe.adopt_current_thread());
        (gadget, raw)
    }

    #[test]
    fn unfilled_tree_mirrors_the_base_chain() {
        install_probe();
        let gadget = SmartGadget::sample();
        let raw = RawObject::from_ref(&gadget);

        let cache = PropertyCache::new_unfilled(SmartGadget::class_schema(), raw);

        assert!(cache.find(TypeId::of::<SmartGadget>()).is_some());
        assert!(cache.find(TypeId::of::<Gadget>()).is_some());
        assert!(cache.find(TypeId::of::<Widget>()).is_some());
        assert!(cache.is_fresh());
        assert!(cache.base_nodes().iter().all(PropertyCache::is_fresh));
        assert_eq!(*cache.slot(0), PropertyValue::Unit);
    }

    #[test]
    fn update_fills_every_node() {
        let probe = install_probe();
        let (_gadget, raw) = tracked_gadget(probe);

        let mut cache = PropertyCache::new_unfilled(Gadget::class_schema(), raw);
        cache.update();
        assert!(!cache.is_fresh());

        let (node, index) = cache.find_named("size").expect("inherited property");
        assert_eq!(node.slot(index).as_int(), Some(4));
        let (node, index) = cache.find_named("wireless").expect("own property");
        assert_eq!(node.slot(index).as_bool(), Some(false));
        probe.retire(raw);
    }

    #[test]
    fn expansion_reuses_the_existing_subtree() {
        let probe = install_probe();
        let (gadget, raw) = tracked_gadget(probe);

        let mut cache = PropertyCache::new_unfilled(Widget::class_schema(), raw);
        cache.update();

        // Mutate the live object after the base cache was filled. A reused
        // node must keep serving the old value.
        unsafe { raw.as_mut::<SmartGadget>() }.gadget.widget.size = 99;

        let mut expanded = PropertyCache::expand(SmartGadget::class_schema(), raw, cache);
        assert!(expanded.is_fresh());
        assert!(expanded.find(TypeId::of::<Gadget>()).unwrap().is_fresh());
        assert!(!expanded.find(TypeId::of::<Widget>()).unwrap().is_fresh());

        expanded.update_fresh();
        let (node, index) = expanded.find_named("size").expect("size survives expansion");
        assert_eq!(node.slot(index).as_int(), Some(4));
        let (node, index) = expanded.find_named("firmware").unwrap();
        assert_eq!(node.slot(index).as_uint(), Some(1));
        probe.retire(raw);
        drop(gadget);
    }

    #[test]
    fn diamond_expansion_reuses_one_path_only() {
        let probe = install_probe();
        let coupler = Box::new(Coupler::sample());
        let raw = RawObject::from_ref(&*coupler);
        probe.track(raw, probe.adopt_current_thread());

        let mut cache = PropertyCache::new_unfilled(InPlug::class_schema(), raw);
        cache.update();

        // Mutate both Port sub-objects, then expand to the diamond root.
        unsafe { raw.as_mut::<Coupler>() }.input.port.lanes = 2;
        unsafe { raw.as_mut::<Coupler>() }.output.port.lanes = 2;
        let mut expanded = PropertyCache::expand(Coupler::class_schema(), raw, cache);
        expanded.update_fresh();

        // Two Port nodes exist, one per inheritance path; only the freshly
        // built one was fetched.
        let reused = expanded.find(TypeId::of::<InPlug>()).unwrap();
        let (node, index) = reused.find_named("lanes").unwrap();
        assert_eq!(node.slot(index).as_int(), Some(1));
        let fresh_path = expanded.find(TypeId::of::<OutPlug>()).unwrap();
        let (node, index) = fresh_path.find_named("lanes").unwrap();
        assert_eq!(node.slot(index).as_int(), Some(2));

        probe.retire(raw);
    }

    #[test]
    fn update_fresh_skips_cleared_nodes() {
        let probe = install_probe();
        let (gadget, raw) = tracked_gadget(probe);

        let mut cache = PropertyCache::new_unfilled(SmartGadget::class_schema(), raw);
        cache.clear_fresh();
        cache.update_fresh();
        assert_eq!(*cache.slot(0), PropertyValue::Unit);

        probe.retire(raw);
        drop(gadget);
    }

    #[test]
    fn refresh_slot_updates_one_value() {
        let probe = install_probe();
        let (gadget, raw) = tracked_gadget(probe);

        let mut cache = PropertyCache::new_unfilled(Widget::class_schema(), raw);
        cache.update();

        unsafe { raw.as_mut::<SmartGadget>() }.gadget.widget.size = 11;
        let (index, _) = Widget::class_schema().property("size").unwrap();
        cache.refresh_slot(index);
        assert_eq!(cache.slot(index).as_int(), Some(11));
        probe.retire(raw);
        drop(gadget);
    }

    #[test]
    fn name_lookup_prefers_the_derived_class() {
        let probe = install_probe();
        let (gadget, raw) = tracked_gadget(probe);

        let mut cache = PropertyCache::new_unfilled(Gadget::class_schema(), raw);
        cache.update();

        // Both Gadget and Widget declare "label"; the derived one wins.
        let (node, index) = cache.find_named("label").unwrap();
        assert_eq!(node.schema().type_id(), TypeId::of::<Gadget>());
        assert_eq!(node.slot(index).as_text(), Some("gadget:probe"));

        // The base node still holds its own slot.
        let base = cache.find(TypeId::of::<Widget>()).unwrap();
        let (base_node, base_index) = base.find_named("label").unwrap();
        assert_eq!(base_node.slot(base_index).as_text(), Some("probe"));
        probe.retire(raw);
        drop(gadget);
    }
}
