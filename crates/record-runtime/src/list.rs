use crate::codec::{self, Token};
use crate::field::{rec, Dimensions, Extent, PollSchedule, ValueChangedTest};
use crate::record::{DependencyEdge, Record, RecordState};
use crate::{
    ClockTick, CreationFlags, DriverRegistry, FieldFlags, FieldScalar, FieldType, FieldValue,
    InitHardwareFlags, MetricsHub, RecordFlags, RecordHandle, Result, RuntimeConfig, RuntimeError,
    Scalar,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Placeholder {
    name: String,
    referenced_by: Vec<(RecordHandle, usize)>,
}

enum Node {
    Record(Box<Record>),
    Placeholder(Placeholder),
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of records plus the bookkeeping that ties them together.
///
/// Records are addressed by [`RecordHandle`]. The list owns both ends of every
/// dependency edge, so edge maintenance never needs shared mutable access.
pub struct RecordList {
    registry: Arc<DriverRegistry>,
    config: RuntimeConfig,
    metrics: Option<MetricsHub>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<String, RecordHandle>,
    placeholders: HashMap<String, RecordHandle>,
    head: Option<RecordHandle>,
    tail: Option<RecordHandle>,
    len: usize,
}

/// Default change test: the field differs from the last observed value.
pub fn default_value_changed(
    record: &Record,
    field_index: usize,
    last: Option<&FieldValue>,
) -> Result<bool> {
    let current = record.value(field_index)?;
    Ok(last != Some(current))
}

impl RecordList {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<DriverRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            metrics: None,
            slots: Vec::new(),
            free: Vec::new(),
            names: HashMap::new(),
            placeholders: HashMap::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_metrics(&mut self, hub: MetricsHub) {
        hub.runtime.records_loaded.set(self.len as i64);
        self.metrics = Some(hub);
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    /// Number of linked records; placeholders are not counted.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record handles in list order.
    pub fn handles(&self) -> Vec<RecordHandle> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(h) = cursor {
            out.push(h);
            cursor = self.record(h).ok().and_then(|r| r.next);
        }
        out
    }

    pub fn find(&self, name: &str) -> Option<RecordHandle> {
        self.names.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Result<RecordHandle> {
        self.find(name)
            .ok_or_else(|| RuntimeError::NotFound(format!("record '{name}'")))
    }

    fn node(&self, handle: RecordHandle) -> Option<&Node> {
        self.slots
            .get(handle.index())
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, handle: RecordHandle) -> Option<&mut Node> {
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.node.as_mut())
    }

    pub fn contains(&self, handle: RecordHandle) -> bool {
        self.node(handle).is_some()
    }

    pub fn record(&self, handle: RecordHandle) -> Result<&Record> {
        match self.node(handle) {
            Some(Node::Record(r)) => Ok(r),
            Some(Node::Placeholder(p)) => Err(RuntimeError::IllegalArgument(format!(
                "'{}' is an unresolved placeholder",
                p.name
            ))),
            None => Err(RuntimeError::NotFound(format!("record handle {handle} is stale"))),
        }
    }

    pub fn record_mut(&mut self, handle: RecordHandle) -> Result<&mut Record> {
        match self.node_mut(handle) {
            Some(Node::Record(r)) => Ok(r),
            Some(Node::Placeholder(p)) => Err(RuntimeError::IllegalArgument(format!(
                "'{}' is an unresolved placeholder",
                p.name
            ))),
            None => Err(RuntimeError::NotFound(format!("record handle {handle} is stale"))),
        }
    }

    pub fn record_by_name(&self, name: &str) -> Result<&Record> {
        self.record(self.get(name)?)
    }

    /// Name of a record or placeholder.
    pub fn name_of(&self, handle: RecordHandle) -> Result<&str> {
        match self.node(handle) {
            Some(Node::Record(r)) => Ok(r.name()),
            Some(Node::Placeholder(p)) => Ok(&p.name),
            None => Err(RuntimeError::NotFound(format!("record handle {handle} is stale"))),
        }
    }

    pub fn is_placeholder(&self, handle: RecordHandle) -> bool {
        matches!(self.node(handle), Some(Node::Placeholder(_)))
    }

    pub fn placeholder_named(&self, name: &str) -> Option<RecordHandle> {
        self.placeholders.get(name).copied()
    }

    pub fn placeholder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.placeholders.keys().cloned().collect();
        names.sort();
        names
    }

    fn reserve(&mut self) -> RecordHandle {
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation;
            RecordHandle { index, generation }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: None,
            });
            RecordHandle {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    fn release(&mut self, handle: RecordHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index()) {
            if slot.generation == handle.generation {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
            }
        }
    }

    fn link_tail(&mut self, handle: RecordHandle) -> Result<()> {
        let prev = self.tail;
        {
            let record = self.record_mut(handle)?;
            record.prev = prev;
            record.next = None;
        }
        match prev {
            Some(p) => self.record_mut(p)?.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.len += 1;
        Ok(())
    }

    fn unlink(&mut self, handle: RecordHandle) -> Result<()> {
        let (prev, next) = {
            let record = self.record(handle)?;
            (record.prev, record.next)
        };
        match prev {
            Some(p) => self.record_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.record_mut(n)?.prev = prev,
            None => self.tail = prev,
        }
        let record = self.record_mut(handle)?;
        record.prev = None;
        record.next = None;
        self.len -= 1;
        Ok(())
    }

    fn update_loaded_gauge(&self) {
        if let Some(m) = &self.metrics {
            m.runtime.records_loaded.set(self.len as i64);
        }
    }

    /// Creates a record from one description line and links it at the end of the list.
    ///
    /// The record is left in the `StructuresCreated` state; forward references become
    /// placeholders until [`RecordList::fixup_placeholder_records`] runs.
    pub fn create_record_from_description(
        &mut self,
        description: &str,
        flags: CreationFlags,
    ) -> Result<RecordHandle> {
        let result = self.create_record_inner(description, flags);
        if result.is_err() {
            if let Some(m) = &self.metrics {
                m.runtime.parse_failures.inc();
            }
        }
        result
    }

    fn create_record_inner(&mut self, description: &str, flags: CreationFlags) -> Result<RecordHandle> {
        if description.len() > self.config.max_description_length {
            return Err(RuntimeError::WouldExceedLimit(format!(
                "description of {} bytes exceeds {}",
                description.len(),
                self.config.max_description_length
            )));
        }
        let tokens = codec::tokenize(description)?;
        let (name, driver) = codec::identify(&self.registry, &tokens)?;

        if let Some(existing) = self.find(&name) {
            if flags.contains(CreationFlags::ALLOW_RECORD_REPLACEMENT) {
                debug!(record = %name, "replacing existing record");
                self.delete_record(existing)?;
            } else {
                return Err(RuntimeError::AlreadyExists(format!("record '{name}'")));
            }
        }

        let handle = self.reserve();
        let record = match Record::allocate(handle, Arc::clone(&driver), self.config.default_precision) {
            Ok(r) => r,
            Err(e) => {
                self.release(handle);
                return Err(e);
            }
        };
        self.slots[handle.index()].node = Some(Node::Record(Box::new(record)));

        if let Err(e) = self.construct(handle, &tokens) {
            self.discard(handle);
            return Err(e);
        }

        self.link_tail(handle)?;
        self.names.insert(name.clone(), handle);
        self.rebuild_reference_edges(handle)?;
        if let Some(m) = &self.metrics {
            m.runtime.records_created.inc();
        }
        self.update_loaded_gauge();
        debug!(record = %name, driver = %driver.name, "created record");
        Ok(handle)
    }

    fn construct(&mut self, handle: RecordHandle, tokens: &[Token]) -> Result<()> {
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        functions.create_record_structures(self, handle)?;
        self.record_mut(handle)?.state = RecordState::StructuresCreated;
        codec::parse_description(self, handle, tokens)
    }

    /// Drops a record that never made it into the list.
    fn discard(&mut self, handle: RecordHandle) {
        self.forget_placeholder_references(handle);
        if let Ok(record) = self.record_mut(handle) {
            record.release_states();
        }
        self.release(handle);
    }

    fn forget_placeholder_references(&mut self, handle: RecordHandle) {
        let mut emptied = Vec::new();
        for (name, &ph) in &self.placeholders {
            if let Some(Slot {
                node: Some(Node::Placeholder(p)),
                ..
            }) = self.slots.get(ph.index())
            {
                if p.referenced_by.iter().all(|(r, _)| *r == handle) {
                    emptied.push((name.clone(), ph));
                }
            }
        }
        for &ph in self.placeholders.values() {
            if let Some(Slot {
                node: Some(Node::Placeholder(p)),
                ..
            }) = self.slots.get_mut(ph.index())
            {
                p.referenced_by.retain(|(r, _)| *r != handle);
            }
        }
        for (name, ph) in emptied {
            self.placeholders.remove(&name);
            self.release(ph);
        }
    }

    /// Resolves `name` to a record, creating or reusing a placeholder when it is not loaded yet.
    pub(crate) fn reference_by_name(
        &mut self,
        name: &str,
        referrer: RecordHandle,
        field: usize,
    ) -> Result<RecordHandle> {
        if let Some(h) = self.find(name) {
            return Ok(h);
        }
        let ph = match self.placeholders.get(name) {
            Some(&ph) => ph,
            None => {
                let ph = self.reserve();
                self.slots[ph.index()].node = Some(Node::Placeholder(Placeholder {
                    name: name.to_string(),
                    referenced_by: Vec::new(),
                }));
                self.placeholders.insert(name.to_string(), ph);
                debug!(record = %name, "created placeholder for forward reference");
                ph
            }
        };
        if let Some(Node::Placeholder(p)) = self.node_mut(ph) {
            if !p.referenced_by.contains(&(referrer, field)) {
                p.referenced_by.push((referrer, field));
            }
        }
        Ok(ph)
    }

    /// Patches every reference to a placeholder once the real record exists.
    ///
    /// Unresolved names fail with `NotFound` unless `DELETE_BROKEN_RECORDS` is set,
    /// in which case the records holding them are deleted. Returns the number resolved.
    pub fn fixup_placeholder_records(&mut self, flags: CreationFlags) -> Result<usize> {
        let mut pending: Vec<(String, RecordHandle)> = self
            .placeholders
            .iter()
            .map(|(n, h)| (n.clone(), *h))
            .collect();
        pending.sort();
        let mut resolved = 0;
        let mut unresolved = Vec::new();
        for (name, ph) in pending {
            let Some(real) = self.find(&name) else {
                unresolved.push((name, ph));
                continue;
            };
            let referrers = self.take_placeholder(&name, ph);
            for (referrer, field) in referrers {
                if let Ok(record) = self.record_mut(referrer) {
                    record.value_mut(field)?.replace_reference(ph, Some(real));
                }
                if self.record(referrer).is_ok() {
                    self.refresh_field_edges(referrer, field)?;
                }
            }
            resolved += 1;
            if let Some(m) = &self.metrics {
                m.runtime.placeholders_resolved.inc();
            }
            debug!(record = %name, "resolved placeholder");
        }

        if unresolved.is_empty() {
            return Ok(resolved);
        }
        if !flags.contains(CreationFlags::DELETE_BROKEN_RECORDS) {
            let names: Vec<&str> = unresolved.iter().map(|(n, _)| n.as_str()).collect();
            return Err(RuntimeError::NotFound(format!(
                "unresolved record references: {}",
                names.join(", ")
            )));
        }
        for (name, ph) in unresolved {
            let referrers = self.take_placeholder(&name, ph);
            let mut seen = Vec::new();
            for (referrer, _) in referrers {
                if seen.contains(&referrer) || self.record(referrer).is_err() {
                    continue;
                }
                seen.push(referrer);
                let referrer_name = self.name_of(referrer)?.to_string();
                warn!(record = %referrer_name, missing = %name, "deleting record with unresolved reference");
                self.delete_record(referrer)?;
            }
        }
        Ok(resolved)
    }

    fn take_placeholder(&mut self, name: &str, ph: RecordHandle) -> Vec<(RecordHandle, usize)> {
        let referrers = match self.node_mut(ph) {
            Some(Node::Placeholder(p)) => std::mem::take(&mut p.referenced_by),
            _ => Vec::new(),
        };
        self.placeholders.remove(name);
        self.release(ph);
        referrers
    }

    /// Parses, fixes up and initializes a batch of description lines.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn load_descriptions<'a, I>(&mut self, lines: I, flags: CreationFlags) -> Result<Vec<RecordHandle>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut created = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            created.push(self.create_record_from_description(line, flags)?);
        }
        self.fixup_placeholder_records(flags)?;
        self.finish_database_initialization()?;
        created.retain(|h| self.record(*h).is_ok());
        info!(records = created.len(), "loaded record descriptions");
        Ok(created)
    }

    pub fn finish_record_initialization(&mut self, handle: RecordHandle) -> Result<()> {
        let state = self.record(handle)?.state;
        if state != RecordState::StructuresCreated {
            return Err(RuntimeError::IllegalArgument(format!(
                "record '{}' cannot finish initialization from state {state:?}",
                self.name_of(handle)?
            )));
        }
        codec::resolve_deferred_cookies(self, handle)?;
        self.rebuild_reference_edges(handle)?;
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        functions.finish_record_initialization(self, handle)?;
        let record = self.record_mut(handle)?;
        record.state = RecordState::Initialized;
        record.update_flags(RecordFlags::INITIALIZED, RecordFlags::empty())?;
        Ok(())
    }

    /// Finishes initialization of every record still waiting for it, in list order.
    pub fn finish_database_initialization(&mut self) -> Result<()> {
        for handle in self.handles() {
            if self.record(handle)?.state == RecordState::StructuresCreated {
                self.finish_record_initialization(handle)?;
            }
        }
        Ok(())
    }

    pub fn open_record(&mut self, handle: RecordHandle) -> Result<()> {
        let state = self.record(handle)?.state;
        if !matches!(state, RecordState::Initialized | RecordState::Closed) {
            return Err(RuntimeError::IllegalArgument(format!(
                "record '{}' cannot be opened from state {state:?}",
                self.name_of(handle)?
            )));
        }
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        match functions.open(self, handle) {
            Ok(()) => {
                let record = self.record_mut(handle)?;
                record.state = RecordState::Open;
                record.update_flags(RecordFlags::OPEN | RecordFlags::ENABLED, RecordFlags::FAULTED)
            }
            Err(e) => {
                let record = self.record_mut(handle)?;
                record.update_flags(RecordFlags::FAULTED, RecordFlags::empty())?;
                warn!(record = %record.name(), error = %e, "open failed, record marked faulted");
                Err(e)
            }
        }
    }

    /// Closes an open or faulted record. The record ends up `Closed` even if the driver fails.
    pub fn close_record(&mut self, handle: RecordHandle) -> Result<()> {
        let record = self.record(handle)?;
        let closable = record.state == RecordState::Open || record.flags().contains(RecordFlags::FAULTED);
        if !closable {
            return Err(RuntimeError::IllegalArgument(format!(
                "record '{}' is not open",
                record.name()
            )));
        }
        let functions = Arc::clone(&record.driver.record_functions);
        let result = functions.close(self, handle);
        let record = self.record_mut(handle)?;
        record.state = RecordState::Closed;
        record.update_flags(RecordFlags::empty(), RecordFlags::OPEN)?;
        result
    }

    /// Opens every initialized record in list order, then runs delayed initialization.
    pub fn initialize_hardware(&mut self, flags: InitHardwareFlags) -> Result<()> {
        let abort = flags.contains(InitHardwareFlags::ABORT_ON_FAULT);
        for handle in self.handles() {
            let record = self.record(handle)?;
            if !matches!(record.state, RecordState::Initialized | RecordState::Closed) {
                continue;
            }
            if flags.contains(InitHardwareFlags::TRACE_OPENS) {
                info!(record = %record.name(), "opening record");
            }
            if let Err(e) = self.open_record(handle) {
                if abort {
                    return Err(e);
                }
            }
        }
        for handle in self.handles() {
            if self.record(handle)?.state != RecordState::Open {
                continue;
            }
            let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
            if let Err(e) = functions.finish_delayed_initialization(self, handle) {
                let name = self.name_of(handle)?;
                warn!(record = %name, error = %e, "delayed initialization failed");
                if abort {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Closes records in reverse list order. Every close is attempted; the first error is returned.
    pub fn shutdown_hardware(&mut self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles().into_iter().rev() {
            let record = self.record(handle)?;
            if record.state != RecordState::Open && !record.flags().contains(RecordFlags::FAULTED) {
                continue;
            }
            if let Err(e) = self.close_record(handle) {
                let name = self.name_of(handle)?;
                warn!(record = %name, error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn resynchronize(&mut self, handle: RecordHandle) -> Result<()> {
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        functions.resynchronize(self, handle)
    }

    /// Deletes a record: driver teardown, edges removed on both ends, every reference
    /// to it nulled, then unlinked.
    pub fn delete_record(&mut self, handle: RecordHandle) -> Result<()> {
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        functions.delete_record(self, handle)?;

        let others: Vec<RecordHandle> = self.handles().into_iter().filter(|h| *h != handle).collect();
        for other in others {
            let record = self.record_mut(other)?;
            let mut changed = false;
            for index in 0..record.num_fields() {
                if record.descriptor(index)?.datatype.is_reference() {
                    changed |= record.value_mut(index)?.replace_reference(handle, None) > 0;
                }
            }
            let before = record.parents.len() + record.children.len();
            record.parents.retain(|e| e.record != handle);
            record.children.retain(|e| e.record != handle);
            changed |= before != record.parents.len() + record.children.len();
            if changed {
                self.sync_dependency_fields(other)?;
            }
        }
        self.forget_placeholder_references(handle);

        let name = self.record(handle)?.name().to_string();
        self.unlink(handle)?;
        if self.names.get(&name) == Some(&handle) {
            self.names.remove(&name);
        }
        let record = self.record_mut(handle)?;
        record.release_states();
        record.state = RecordState::Deleted;
        self.release(handle);
        if let Some(m) = &self.metrics {
            m.runtime.records_deleted.inc();
        }
        self.update_loaded_gauge();
        debug!(record = %name, "deleted record");
        Ok(())
    }

    /// Adds `child -> parent` for `field`; adding the same edge twice is a no-op.
    pub fn add_dependency(&mut self, child: RecordHandle, parent: RecordHandle, field: usize) -> Result<()> {
        self.record(parent)?;
        self.record(child)?;
        let up = DependencyEdge { record: parent, field };
        let down = DependencyEdge { record: child, field };
        let c = self.record_mut(child)?;
        if !c.parents.contains(&up) {
            c.parents.push(up);
        }
        let p = self.record_mut(parent)?;
        if !p.children.contains(&down) {
            p.children.push(down);
        }
        self.sync_dependency_fields(child)?;
        self.sync_dependency_fields(parent)
    }

    pub fn remove_dependency(&mut self, child: RecordHandle, parent: RecordHandle, field: usize) -> Result<()> {
        let up = DependencyEdge { record: parent, field };
        let down = DependencyEdge { record: child, field };
        self.record_mut(child)?.parents.retain(|e| *e != up);
        self.record_mut(parent)?.children.retain(|e| *e != down);
        self.sync_dependency_fields(child)?;
        self.sync_dependency_fields(parent)
    }

    /// Records that `handle` depends on (its parents), without duplicates.
    pub fn dependencies(&self, handle: RecordHandle) -> Result<Vec<RecordHandle>> {
        Ok(unique(self.record(handle)?.parents.iter().map(|e| e.record)))
    }

    /// Records that depend on `handle` (its children), without duplicates.
    pub fn dependents(&self, handle: RecordHandle) -> Result<Vec<RecordHandle>> {
        Ok(unique(self.record(handle)?.children.iter().map(|e| e.record)))
    }

    fn sync_dependency_fields(&mut self, handle: RecordHandle) -> Result<()> {
        let record = self.record_mut(handle)?;
        let parents: Vec<Option<RecordHandle>> =
            unique(record.parents.iter().map(|e| e.record)).into_iter().map(Some).collect();
        let children: Vec<Option<RecordHandle>> =
            unique(record.children.iter().map(|e| e.record)).into_iter().map(Some).collect();
        record.write_index(rec::NUM_PARENT_RECORDS, Scalar::Long(parents.len() as i64))?;
        record.write_index(rec::NUM_CHILD_RECORDS, Scalar::Long(children.len() as i64))?;
        let array = record.value_mut(rec::PARENT_RECORD_ARRAY)?;
        array.resize(vec![parents.len()])?;
        array.write_all(parents)?;
        let array = record.value_mut(rec::CHILD_RECORD_ARRAY)?;
        array.resize(vec![children.len()])?;
        array.write_all(children)?;
        Ok(())
    }

    /// Re-derives the edges contributed by every reference field of `handle`.
    pub(crate) fn rebuild_reference_edges(&mut self, handle: RecordHandle) -> Result<()> {
        let fields: Vec<usize> = {
            let record = self.record(handle)?;
            (0..record.num_fields())
                .filter(|&i| {
                    record
                        .descriptor(i)
                        .map(|d| d.datatype.is_reference())
                        .unwrap_or(false)
                })
                .collect()
        };
        for field in fields {
            self.refresh_field_edges(handle, field)?;
        }
        Ok(())
    }

    /// Brings the edges owned by one reference field in line with its current value.
    pub(crate) fn refresh_field_edges(&mut self, handle: RecordHandle, field: usize) -> Result<()> {
        let (targets, suppressed) = {
            let record = self.record(handle)?;
            let descriptor = record.descriptor(field)?;
            let suppressed = descriptor.flags.contains(FieldFlags::NO_PARENT_DEPENDENCY);
            (record.value(field)?.references(), suppressed)
        };
        let mut wanted = Vec::new();
        for target in targets {
            if target == handle || wanted.contains(&target) {
                continue;
            }
            if self.is_placeholder(target) {
                self.reference_placeholder(target, handle, field)?;
                continue;
            }
            if !suppressed && self.record(target).is_ok() {
                wanted.push(target);
            }
        }
        let stale: Vec<RecordHandle> = self
            .record(handle)?
            .parents
            .iter()
            .filter(|e| e.field == field && !wanted.contains(&e.record))
            .map(|e| e.record)
            .collect();
        for parent in stale {
            self.remove_dependency(handle, parent, field)?;
        }
        for parent in wanted {
            self.add_dependency(handle, parent, field)?;
        }
        Ok(())
    }

    fn reference_placeholder(&mut self, ph: RecordHandle, referrer: RecordHandle, field: usize) -> Result<()> {
        match self.node_mut(ph) {
            Some(Node::Placeholder(p)) => {
                if !p.referenced_by.contains(&(referrer, field)) {
                    p.referenced_by.push((referrer, field));
                }
                Ok(())
            }
            _ => Err(RuntimeError::IllegalArgument(format!("{ph} is not a placeholder"))),
        }
    }

    /// Stores one element of a reference field and updates the dependency edges.
    pub fn set_reference(
        &mut self,
        handle: RecordHandle,
        field: usize,
        element: usize,
        value: Scalar,
    ) -> Result<()> {
        let flags = {
            let record = self.record(handle)?;
            let descriptor = record.descriptor(field)?;
            if !descriptor.datatype.is_reference() {
                return Err(RuntimeError::IllegalArgument(format!(
                    "field '{}' is not a reference field",
                    descriptor.name
                )));
            }
            descriptor.flags
        };
        let target = match &value {
            Scalar::Record(r) => *r,
            Scalar::Interface(i) => i.as_ref().map(|i| i.record),
            Scalar::RecordField(f) => f.as_ref().map(|f| f.record),
            _ => None,
        };
        if let Some(target) = target {
            if !self.contains(target) {
                return Err(RuntimeError::NotFound(format!("record handle {target} is stale")));
            }
        }
        let record = self.record_mut(handle)?;
        record.value_mut(field)?.set(element, value)?;
        record.touch(flags);
        self.refresh_field_edges(handle, field)
    }

    fn checked_index(&self, handle: RecordHandle, name: &str) -> Result<(usize, FieldFlags, FieldType)> {
        let record = self.record(handle)?;
        let index = record.field_index(name)?;
        let descriptor = record.descriptor(index)?;
        if descriptor.flags.contains(FieldFlags::NO_ACCESS) {
            return Err(RuntimeError::IllegalArgument(format!(
                "field '{name}' of '{}' is not accessible",
                record.name()
            )));
        }
        Ok((index, descriptor.flags, descriptor.datatype))
    }

    /// Client-side typed read; honours the no-access flag.
    pub fn read_field<T: FieldScalar>(&self, handle: RecordHandle, name: &str) -> Result<T> {
        let (index, _, _) = self.checked_index(handle, name)?;
        self.record(handle)?.read_index(index)
    }

    /// Client-side typed write; honours the read-only and no-access flags.
    pub fn write_field<T: FieldScalar>(&mut self, handle: RecordHandle, name: &str, value: T) -> Result<()> {
        let (index, flags, datatype) = self.checked_index(handle, name)?;
        if flags.contains(FieldFlags::READ_ONLY) {
            return Err(RuntimeError::IllegalArgument(format!("field '{name}' is read-only")));
        }
        if datatype.is_reference() {
            self.set_reference(handle, index, 0, value.into_scalar())
        } else {
            self.record_mut(handle)?.set_element(index, 0, value.into_scalar())
        }
    }

    pub fn read_field_by_label<T: FieldScalar>(&self, handle: RecordHandle, label: i64) -> Result<T> {
        let record = self.record(handle)?;
        let index = record.field_index_by_label(label)?;
        let name = record.descriptor(index)?.name.clone();
        self.read_field(handle, &name)
    }

    pub fn write_field_by_label<T: FieldScalar>(&mut self, handle: RecordHandle, label: i64, value: T) -> Result<()> {
        let record = self.record(handle)?;
        let index = record.field_index_by_label(label)?;
        let name = record.descriptor(index)?.name.clone();
        self.write_field(handle, &name, value)
    }

    /// Resizes a one-dimensional variable-length field, keeping its sizing field in step.
    pub fn set_1d_field_array_length(&mut self, handle: RecordHandle, name: &str, length: usize) -> Result<()> {
        let record = self.record(handle)?;
        let index = record.field_index(name)?;
        let descriptor = record.descriptor(index)?.clone();
        let Dimensions::Extents(extents) = &descriptor.dimensions else {
            return Err(RuntimeError::IllegalArgument(format!(
                "field '{name}' does not have a declared rank"
            )));
        };
        let element_rank = if descriptor.datatype == FieldType::String {
            extents.len().saturating_sub(1)
        } else {
            extents.len()
        };
        if element_rank != 1 {
            return Err(RuntimeError::IllegalArgument(format!(
                "field '{name}' is not a one-dimensional array"
            )));
        }
        if extents[0].is_fixed() {
            return Err(RuntimeError::IllegalArgument(format!(
                "field '{name}' has a fixed length"
            )));
        }
        let mut shape = record.value(index)?.extents().to_vec();
        shape[0] = length;

        let record = self.record_mut(handle)?;
        let sizing = match extents[0] {
            Extent::FromField {
                field_index,
                array_index,
            } => {
                let datatype = record.descriptor(field_index)?.datatype;
                Some((field_index, array_index, integer_scalar(datatype, length)?))
            }
            _ => None,
        };
        let previous = record.value(index)?.clone();
        record.value_mut(index)?.resize(shape)?;
        if let Some((field_index, array_index, count)) = sizing {
            if let Err(e) = record.set_element(field_index, array_index, count) {
                *record.value_mut(index)? = previous;
                return Err(e);
            }
        }
        record.touch(descriptor.flags);
        if descriptor.datatype.is_reference() {
            self.refresh_field_edges(handle, index)?;
        }
        Ok(())
    }

    /// Re-reads the sizing fields of `index` and reshapes its storage to match.
    ///
    /// Data is kept when the rank is unchanged and discarded otherwise.
    pub fn resolve_field_shape(&mut self, handle: RecordHandle, index: usize) -> Result<()> {
        let shape = codec::resolve_shape(self.record(handle)?, index, codec::CookiePass::Deferred)?;
        let record = self.record_mut(handle)?;
        record.value_mut(index)?.reshape(shape)?;
        record.instance_mut(index)?.resolved = true;
        if record.descriptor(index)?.datatype.is_reference() {
            self.refresh_field_edges(handle, index)?;
        }
        Ok(())
    }

    /// Runs the field's change test and, when it reports a change, caches the current value.
    pub fn check_value_changed(&mut self, handle: RecordHandle, field: usize) -> Result<bool> {
        let record = self.record(handle)?;
        let instance = record.instance(field)?;
        let test = instance
            .value_changed
            .unwrap_or(default_value_changed as ValueChangedTest);
        let changed = test(record, field, instance.last_value.as_ref())?;
        if changed {
            let current = record.value(field)?.clone();
            self.record_mut(handle)?.instance_mut(field)?.last_value = Some(current);
        }
        Ok(changed)
    }

    pub fn set_poll_interval(&mut self, handle: RecordHandle, name: &str, seconds: f64) -> Result<()> {
        let record = self.record_mut(handle)?;
        let index = record.field_index(name)?;
        if !record.descriptor(index)?.flags.contains(FieldFlags::POLL) {
            return Err(RuntimeError::IllegalArgument(format!(
                "field '{name}' is not poll-eligible"
            )));
        }
        let interval = ClockTick::from_seconds(seconds);
        let instance = record.instance_mut(index)?;
        instance.poll = Some(PollSchedule {
            interval,
            next_due: ClockTick::now() + interval,
        });
        instance.active = true;
        Ok(())
    }

    /// Fields whose poll interval has elapsed; each is rescheduled.
    pub fn due_poll_fields(&mut self, handle: RecordHandle) -> Result<Vec<usize>> {
        let now = ClockTick::now();
        let record = self.record_mut(handle)?;
        let mut due = Vec::new();
        for instance in record.fields.iter_mut() {
            if let Some(poll) = instance.poll.as_mut() {
                if instance.active && poll.next_due <= now {
                    poll.next_due = now + poll.interval;
                    due.push(instance.index);
                }
            }
        }
        Ok(due)
    }

    pub fn create_description_from_record(&self, handle: RecordHandle) -> Result<String> {
        codec::create_description(self, handle)
    }

    pub fn summary(&self, handle: RecordHandle) -> Result<String> {
        codec::summary(self, handle)
    }

    pub fn to_json(&self, handle: RecordHandle) -> Result<serde_json::Value> {
        codec::to_json(self, handle)
    }

    pub fn field_to_string(&self, handle: RecordHandle, name: &str) -> Result<String> {
        codec::field_to_string(self, handle, name)
    }

    /// Parses `text` into a field using the description grammar.
    pub fn set_field_from_string(&mut self, handle: RecordHandle, name: &str, text: &str) -> Result<()> {
        let (index, flags, datatype) = self.checked_index(handle, name)?;
        if flags.contains(FieldFlags::READ_ONLY) {
            return Err(RuntimeError::IllegalArgument(format!("field '{name}' is read-only")));
        }
        codec::parse_field(self, handle, index, text)?;
        self.record_mut(handle)?.touch(flags);
        if datatype.is_reference() {
            self.refresh_field_edges(handle, index)?;
        }
        Ok(())
    }

    /// Driver-specific report when the driver provides one, the generic field dump otherwise.
    pub fn print_structure(&self, handle: RecordHandle, out: &mut dyn fmt::Write) -> Result<()> {
        let functions = Arc::clone(&self.record(handle)?.driver.record_functions);
        match functions.print_structure(self, handle, out) {
            Err(e) if e.kind() == crate::ErrorKind::Unsupported => codec::write_field_report(self, handle, out),
            other => other,
        }
    }
}

impl fmt::Debug for RecordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordList")
            .field("len", &self.len)
            .field("placeholders", &self.placeholders.len())
            .field("drivers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn unique(handles: impl Iterator<Item = RecordHandle>) -> Vec<RecordHandle> {
    let mut out: Vec<RecordHandle> = Vec::new();
    for h in handles {
        if !out.contains(&h) {
            out.push(h);
        }
    }
    out
}

/// `n` as a scalar of an integer datatype, failing if it does not fit.
pub(crate) fn integer_scalar(datatype: FieldType, n: usize) -> Result<Scalar> {
    let too_big = || RuntimeError::WouldExceedLimit(format!("{n} does not fit in a {datatype} field"));
    Ok(match datatype {
        FieldType::Char => Scalar::Char(i8::try_from(n).map_err(|_| too_big())?),
        FieldType::UChar => Scalar::UChar(u8::try_from(n).map_err(|_| too_big())?),
        FieldType::Short => Scalar::Short(i16::try_from(n).map_err(|_| too_big())?),
        FieldType::UShort => Scalar::UShort(u16::try_from(n).map_err(|_| too_big())?),
        FieldType::Long => Scalar::Long(i64::try_from(n).map_err(|_| too_big())?),
        FieldType::Int64 => Scalar::Int64(i64::try_from(n).map_err(|_| too_big())?),
        FieldType::ULong | FieldType::Hex => Scalar::ULong(n as u64),
        FieldType::UInt64 => Scalar::UInt64(n as u64),
        other => {
            return Err(RuntimeError::TypeMismatch(format!(
                "{other} field cannot hold an array length"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{probe, probe_line, probe_list, probe_registry};
    use crate::ErrorKind;
    use std::sync::atomic::Ordering;

    fn create(list: &mut RecordList, line: &str) -> RecordHandle {
        list.create_record_from_description(line, CreationFlags::empty())
            .unwrap()
    }

    #[test]
    fn test_create_links_in_order() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[1.0]));
        let b = create(&mut list, &probe_line("b", &[]));
        assert_eq!(list.len(), 2);
        assert_eq!(list.handles(), vec![a, b]);
        assert_eq!(list.find("b"), Some(b));
        assert_eq!(list.get("zz").unwrap_err().kind(), ErrorKind::NotFound);
        let record = list.record(a).unwrap();
        assert_eq!(record.state(), RecordState::StructuresCreated);
        assert_eq!(record.next(), Some(b));
        assert_eq!(record.read_vec::<f64>("readings").unwrap(), vec![1.0]);
    }

    #[test]
    fn test_duplicate_name_and_replacement() {
        let mut list = probe_list();
        let old = create(&mut list, &probe_line("a", &[1.0]));
        let err = list
            .create_record_from_description(&probe_line("a", &[2.0]), CreationFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let new = list
            .create_record_from_description(&probe_line("a", &[2.0]), CreationFlags::ALLOW_RECORD_REPLACEMENT)
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(list.len(), 1);
        assert_eq!(list.record(old).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(list.record(new).unwrap().read_vec::<f64>("readings").unwrap(), vec![2.0]);
    }

    #[test]
    fn test_description_length_limit() {
        let mut list = probe_list();
        let line = probe_line("a", &[0.5; 800]);
        let err = list.create_record_from_description(&line, CreationFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldExceedLimit);
    }

    #[test]
    fn test_forward_reference_through_placeholder() {
        let mut list = probe_list();
        let a = create(
            &mut list,
            "a device sensor probe \"\" 0 ( ) t b b:ctl NULL 0 0 probe 0",
        );
        let ph = list.record(a).unwrap().read::<Option<RecordHandle>>("peer").unwrap().unwrap();
        assert!(list.is_placeholder(ph));
        assert_eq!(list.placeholder_named("b"), Some(ph));
        assert_eq!(list.record(ph).unwrap_err().kind(), ErrorKind::IllegalArgument);
        assert!(list.dependencies(a).unwrap().is_empty());

        let b = create(&mut list, &probe_line("b", &[]));
        assert_eq!(list.fixup_placeholder_records(CreationFlags::empty()).unwrap(), 1);
        assert!(list.placeholder_names().is_empty());
        assert!(!list.contains(ph));

        let record = list.record(a).unwrap();
        assert_eq!(record.read::<Option<RecordHandle>>("peer").unwrap(), Some(b));
        let port = record.read::<Option<crate::InterfaceRef>>("port").unwrap().unwrap();
        assert_eq!(port.record, b);
        assert_eq!(port.address_name, "ctl");

        assert_eq!(list.dependencies(a).unwrap(), vec![b]);
        assert_eq!(list.dependents(b).unwrap(), vec![a]);
        assert_eq!(list.record(a).unwrap().parents().len(), 2);
        assert_eq!(list.read_field::<i64>(a, "num_parent_records").unwrap(), 1);
        assert_eq!(list.read_field::<i64>(b, "num_child_records").unwrap(), 1);
        assert_eq!(
            list.record(b).unwrap().read_vec::<Option<RecordHandle>>("child_record_array").unwrap(),
            vec![Some(a)]
        );
    }

    #[test]
    fn test_unresolved_reference_is_not_found() {
        let mut list = probe_list();
        create(&mut list, "a device sensor probe \"\" 0 ( ) t ghost NULL NULL 0 0 probe 0");
        let err = list.fixup_placeholder_records(CreationFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn test_delete_broken_records() {
        let mut list = probe_list();
        create(&mut list, "a device sensor probe \"\" 0 ( ) t ghost NULL NULL 0 0 probe 0");
        let keep = create(&mut list, &probe_line("keep", &[]));
        let resolved = list
            .fixup_placeholder_records(CreationFlags::DELETE_BROKEN_RECORDS)
            .unwrap();
        assert_eq!(resolved, 0);
        assert_eq!(list.handles(), vec![keep]);
        assert!(list.find("a").is_none());
        assert!(list.placeholder_names().is_empty());
    }

    #[test]
    fn test_delete_clears_references_and_edges() {
        let mut list = probe_list();
        let b = create(&mut list, &probe_line("b", &[]));
        let a = create(&mut list, "a device sensor probe \"\" 0 ( ) t b NULL b.count 0 0 probe 0");
        list.write_field(a, "owner", Some(b)).unwrap();
        assert_eq!(list.dependencies(a).unwrap(), vec![b]);

        list.delete_record(b).unwrap();
        assert_eq!(list.record(b).unwrap_err().kind(), ErrorKind::NotFound);
        let record = list.record(a).unwrap();
        assert_eq!(record.read::<Option<RecordHandle>>("peer").unwrap(), None);
        assert_eq!(record.read::<Option<RecordHandle>>("owner").unwrap(), None);
        assert_eq!(record.read::<Option<crate::FieldRef>>("source").unwrap(), None);
        assert!(list.dependencies(a).unwrap().is_empty());
        assert_eq!(list.read_field::<i64>(a, "num_parent_records").unwrap(), 0);
        assert_eq!(list.handles(), vec![a]);
    }

    #[test]
    fn test_edges_are_idempotent_and_skip_suppressed_fields() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[]));
        let b = create(&mut list, &probe_line("b", &[]));
        list.add_dependency(a, b, probe::PEER).unwrap();
        list.add_dependency(a, b, probe::PEER).unwrap();
        assert_eq!(list.record(a).unwrap().parents().len(), 1);

        list.remove_dependency(a, b, probe::PEER).unwrap();
        list.set_reference(a, probe::OWNER, 0, Scalar::Record(Some(b))).unwrap();
        assert!(list.dependencies(a).unwrap().is_empty());

        list.set_reference(a, probe::PEER, 0, Scalar::Record(Some(b))).unwrap();
        assert_eq!(list.dependents(b).unwrap(), vec![a]);
        list.set_reference(a, probe::PEER, 0, Scalar::Record(None)).unwrap();
        assert!(list.dependents(b).unwrap().is_empty());
    }

    #[test]
    fn test_lifecycle_through_hardware_init() {
        let (registry, driver) = probe_registry();
        let mut list = RecordList::new(Arc::new(registry));
        let lines = [
            "# bench setup",
            "",
            "a device sensor probe \"\" 0 ( ) t b NULL NULL 0 0 probe 3",
            "b device sensor probe \"\" 0 ( ) t NULL NULL NULL 0 0 probe 0",
        ];
        let created = list.load_descriptions(lines, CreationFlags::empty()).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(driver.finished.load(Ordering::SeqCst), 2);
        let a = created[0];
        let record = list.record(a).unwrap();
        assert_eq!(record.state(), RecordState::Initialized);
        assert!(record.flags().contains(RecordFlags::INITIALIZED));
        assert_eq!(record.value(probe::LATE).unwrap().extents(), &[3]);
        assert!(record.instance(probe::LATE).unwrap().is_resolved());

        let err = list.finish_record_initialization(a).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        list.initialize_hardware(InitHardwareFlags::TRACE_OPENS).unwrap();
        assert_eq!(driver.opens.load(Ordering::SeqCst), 2);
        let flags = list.record(a).unwrap().flags();
        assert!(flags.contains(RecordFlags::OPEN | RecordFlags::ENABLED));
        assert_eq!(list.record(a).unwrap().state(), RecordState::Open);

        list.shutdown_hardware().unwrap();
        assert_eq!(driver.closes.load(Ordering::SeqCst), 2);
        assert_eq!(list.record(a).unwrap().state(), RecordState::Closed);
        assert!(!list.record(a).unwrap().flags().contains(RecordFlags::OPEN));
    }

    #[test]
    fn test_open_failure_marks_faulted() {
        let (registry, driver) = probe_registry();
        let mut list = RecordList::new(Arc::new(registry));
        let created = list
            .load_descriptions([probe_line("a", &[]).as_str()], CreationFlags::empty())
            .unwrap();
        let a = created[0];
        driver.fail_open.store(true, Ordering::SeqCst);

        let err = list.initialize_hardware(InitHardwareFlags::ABORT_ON_FAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FunctionFailed);
        list.initialize_hardware(InitHardwareFlags::empty()).unwrap();
        let record = list.record(a).unwrap();
        assert!(record.flags().contains(RecordFlags::FAULTED));
        assert_eq!(record.state(), RecordState::Initialized);

        list.shutdown_hardware().unwrap();
        assert_eq!(list.record(a).unwrap().state(), RecordState::Closed);

        driver.fail_open.store(false, Ordering::SeqCst);
        list.open_record(a).unwrap();
        assert!(!list.record(a).unwrap().flags().contains(RecordFlags::FAULTED));
    }

    #[test]
    fn test_cookie_forward_reference_in_description() {
        let mut list = probe_list();
        let err = list
            .create_record_from_description(
                "s device sensor skewed \"\" ( 1.0 2.0 ) 2",
                CreationFlags::empty(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparseableString);
        assert!(list.is_empty());
    }

    #[test]
    fn test_client_field_access_flags() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[1.0, 2.0]));
        let err = list.write_field(a, "name", "renamed".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        let err = list.read_field::<i64>(a, "secret").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        let err = list.write_field(a, "count", 1.5f64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(list.read_field::<i64>(a, "count").unwrap(), 2);

        list.write_field_by_label(a, rec::LABEL_RESYNCHRONIZE, true).unwrap();
        assert!(list.read_field_by_label::<bool>(a, rec::LABEL_RESYNCHRONIZE).unwrap());
    }

    #[test]
    fn test_set_field_from_string() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[1.0, 2.0]));
        let b = create(&mut list, &probe_line("b", &[]));
        list.set_field_from_string(a, "readings", "( 7.5 8.5 )").unwrap();
        list.set_field_from_string(a, "peer", "b").unwrap();
        assert_eq!(list.record(a).unwrap().read_vec::<f64>("readings").unwrap(), vec![7.5, 8.5]);
        assert_eq!(list.dependencies(a).unwrap(), vec![b]);
        let err = list.set_field_from_string(a, "readings", "( 1.0 )").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparseableString);
    }

    #[test]
    fn test_set_1d_array_length() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[1.0, 2.0]));
        list.set_1d_field_array_length(a, "readings", 4).unwrap();
        let record = list.record(a).unwrap();
        assert_eq!(record.read::<i64>("count").unwrap(), 4);
        assert_eq!(record.read_vec::<f64>("readings").unwrap(), vec![1.0, 2.0, 0.0, 0.0]);

        list.set_1d_field_array_length(a, "history", 3).unwrap();
        assert_eq!(list.record(a).unwrap().read_vec::<i64>("history").unwrap().len(), 3);

        for fixed in ["tag", "count"] {
            let err = list.set_1d_field_array_length(a, fixed, 2).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IllegalArgument, "{fixed}");
        }
    }

    #[test]
    fn test_failed_resize_keeps_sizing_field() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[]));
        list.set_1d_field_array_length(a, "samples", 2).unwrap();
        assert_eq!(list.record(a).unwrap().read::<u64>("sample_count").unwrap(), 2);

        let err = list.set_1d_field_array_length(a, "samples", usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        let record = list.record(a).unwrap();
        assert_eq!(record.read::<u64>("sample_count").unwrap(), 2);
        assert_eq!(record.read_vec::<f64>("samples").unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_value_changed_tests() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[]));
        assert!(list.check_value_changed(a, probe::COUNT).unwrap());
        assert!(!list.check_value_changed(a, probe::COUNT).unwrap());
        list.write_field(a, "count", 5i64).unwrap();
        assert!(list.check_value_changed(a, probe::COUNT).unwrap());

        assert!(list.check_value_changed(a, probe::THRESHOLD).unwrap());
        list.write_field(a, "threshold", 0.25f64).unwrap();
        assert!(!list.check_value_changed(a, probe::THRESHOLD).unwrap());
        list.write_field(a, "threshold", 1.0f64).unwrap();
        assert!(list.check_value_changed(a, probe::THRESHOLD).unwrap());
    }

    #[test]
    fn test_polling_requires_poll_flag() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[]));
        let err = list.set_poll_interval(a, "count", 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        list.set_poll_interval(a, "rate", 0.0).unwrap();
        assert_eq!(list.due_poll_fields(a).unwrap(), vec![probe::RATE]);
    }

    #[test]
    fn test_metrics_follow_list() {
        let mut list = probe_list();
        let hub = MetricsHub::new().unwrap();
        list.set_metrics(hub.clone());
        let a = create(&mut list, &probe_line("a", &[]));
        let _ = list.create_record_from_description("broken", CreationFlags::empty());
        list.delete_record(a).unwrap();
        assert_eq!(hub.runtime.records_created.get(), 1);
        assert_eq!(hub.runtime.records_deleted.get(), 1);
        assert_eq!(hub.runtime.parse_failures.get(), 1);
        assert_eq!(hub.runtime.records_loaded.get(), 0);
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut list = probe_list();
        let a = create(&mut list, &probe_line("a", &[]));
        list.delete_record(a).unwrap();
        let b = create(&mut list, &probe_line("b", &[]));
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!list.contains(a));
    }
}
