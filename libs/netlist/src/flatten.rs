//! Hierarchy flattening and global-net conversion.
//!
//! Flattening replaces subcircuit instances with copies of their
//! definitions, renumbering nets and prefixing names with the instance
//! path. Global conversion rewrites hierarchically-shared nets into
//! local nets plus explicit ports.

use arcstr::ArcStr;

use crate::{
    CellId, FileId, Library, Object, ObjectKind, StoreError, DISCONNECTED, SEPARATOR,
};

impl Library {
    /// Flattens every subcircuit instance inside the named cell,
    /// depth-first.
    ///
    /// Cells already visited in this call are not re-flattened; self
    /// recursion is skipped.
    pub fn flatten_cell(&mut self, name: &str, file: Option<FileId>) -> Result<(), StoreError> {
        let id = self.lookup(name, file).ok_or_else(|| StoreError::UndefinedCell {
            name: ArcStr::from(name),
        })?;
        self.clear_dumped();
        self.flatten_cell_inner(id, None);
        Ok(())
    }

    /// Flattens only the instances of `child` inside the named parent.
    pub fn flatten_instances_of(
        &mut self,
        parent: &str,
        file: Option<FileId>,
        child: &str,
    ) -> Result<(), StoreError> {
        let id = self.lookup(parent, file).ok_or_else(|| StoreError::UndefinedCell {
            name: ArcStr::from(parent),
        })?;
        self.clear_dumped();
        self.flatten_cell_inner(id, Some(ArcStr::from(child)));
        Ok(())
    }

    /// Flattens instances of `child` in every cell of the given file.
    pub fn flatten_instances_everywhere(&mut self, file: FileId, child: &str) {
        self.clear_dumped();
        for id in self.cell_ids() {
            let cell = self.cell(id);
            if cell.file() != file || cell.name().eq_ignore_ascii_case(child) {
                continue;
            }
            if cell.class().is_flattenable() || cell.first_pins().next().is_some() {
                self.flatten_cell_inner(id, Some(ArcStr::from(child)));
            }
        }
    }

    fn flatten_cell_inner(&mut self, this: CellId, only_model: Option<ArcStr>) {
        tracing::debug!("flattening cell {}", self.cell(this).name());
        let file = self.cell(this).file();
        loop {
            // Find the next flattenable instance in the current object
            // list. Splicing invalidates positions, so rescan each time.
            let mut target = None;
            {
                let cell = self.cell(this);
                for idx in cell.first_pins() {
                    let ob = &cell.objects()[idx];
                    let Some(model) = ob.model.clone() else {
                        continue;
                    };
                    if let Some(only) = &only_model {
                        let matches = if cell.nocase() {
                            model.eq_ignore_ascii_case(only)
                        } else {
                            model.as_str() == only.as_str()
                        };
                        if !matches {
                            continue;
                        }
                    }
                    let Some(child) = self.lookup(&model, Some(file)) else {
                        continue;
                    };
                    if child == this || !self.cell(child).class().is_flattenable() {
                        continue;
                    }
                    target = Some((idx, child));
                    break;
                }
            }
            let Some((idx, child)) = target else {
                break;
            };

            // Depth-first: make sure the child itself is flat before
            // copying it in. Restricted flattens do not descend.
            if only_model.is_none() && !self.cell(child).dumped() {
                self.flatten_cell_inner(child, None);
            }
            self.splice_instance(this, idx, child, only_model.is_some());
        }
        self.cell_mut(this).set_dumped(true);
    }

    /// Replaces the instance pin run at `idx` with a renumbered,
    /// renamed copy of the child's object list.
    fn splice_instance(&mut self, this: CellId, idx: usize, child: CellId, reattach: bool) {
        let mut clone: Vec<Object> = self.cell(child).objects().to_vec();

        let (run_len, inst_name, mut next_node) = {
            let cell = self.cell(this);
            (
                cell.pin_run_len(idx),
                cell.objects()[idx]
                    .instance
                    .clone()
                    .unwrap_or_else(|| cell.objects()[idx].name.clone()),
                cell.max_node() + 1,
            )
        };

        // Give every positive child net a fresh number in the parent's
        // space.
        let old_max = clone.iter().map(|ob| ob.node).max().unwrap_or(0);
        let mut remap = std::collections::HashMap::new();
        for ob in &mut clone {
            if ob.node > 0 && ob.node <= old_max {
                let new = *remap.entry(ob.node).or_insert_with(|| {
                    let n = next_node;
                    next_node += 1;
                    n
                });
                ob.node = new;
            }
        }

        // Seal child ports to the nets seen at the parent's instance
        // pins, in declaration order. Malformed inputs may have drifted
        // port/pin counts; the zip guards against overrun.
        let parent_pins: Vec<(ArcStr, i32)> = {
            let cell = self.cell(this);
            cell.objects()[idx..idx + run_len]
                .iter()
                .map(|ob| (ob.name.clone(), ob.node))
                .collect()
        };
        let port_positions: Vec<usize> = clone
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.kind == ObjectKind::Port)
            .map(|(i, _)| i)
            .collect();
        for (pi, (pin_name, mut pin_node)) in port_positions.iter().zip(parent_pins.iter().cloned())
        {
            if reattach && pin_node == DISCONNECTED {
                // A restricted flatten may find the parent pin
                // unconnected; reattach through another parent object
                // of the same name that has a valid net.
                let cell = self.cell(this);
                if let Some(other) = cell
                    .objects()
                    .iter()
                    .find(|ob| ob.name == pin_name && ob.node >= 0)
                {
                    pin_node = other.node;
                }
            }
            let old = clone[*pi].node;
            if old != DISCONNECTED {
                for ob in &mut clone {
                    if ob.node == old {
                        ob.node = pin_node;
                    }
                }
            }
        }

        // Ports are now internal; drop them.
        clone.retain(|ob| ob.kind != ObjectKind::Port);

        // Rename the spliced objects with the instance prefix. Globals
        // keep their names and merge with same-named parent nets;
        // property records pass through untouched.
        let mut merged_globals: Vec<(i32, i32)> = Vec::new();
        {
            let cell = self.cell(this);
            for ob in &mut clone {
                match ob.kind {
                    ObjectKind::Property => {}
                    ObjectKind::Global | ObjectKind::UniqueGlobal => {
                        let found = cell.objects().iter().find(|pob| {
                            pob.kind == ob.kind
                                && if cell.nocase() {
                                    pob.name.eq_ignore_ascii_case(&ob.name)
                                } else {
                                    pob.name == ob.name
                                }
                        });
                        if let Some(pob) = found {
                            if pob.node >= 0 && ob.node != pob.node {
                                merged_globals.push((ob.node, pob.node));
                            }
                        }
                    }
                    _ => {
                        ob.name =
                            ArcStr::from(format!("{}{}{}", inst_name, SEPARATOR, ob.name));
                        if let Some(inst) = &ob.instance {
                            ob.instance =
                                Some(ArcStr::from(format!("{}{}{}", inst_name, SEPARATOR, inst)));
                        }
                    }
                }
            }
        }
        for (from, to) in merged_globals {
            for ob in &mut clone {
                if ob.node == from {
                    ob.node = to;
                }
            }
        }

        // Splice the clone into place of the instance's pin run.
        let cell = self.cell_mut(this);
        let mut objects = cell.take_objects();
        objects.splice(idx..idx + run_len, clone);
        cell.replace_objects(objects);
    }

    /// Rewrites the globals of the named cell into ports, connecting the
    /// new pin in every parent cell that instantiates it.
    ///
    /// The freed global's name continues to resolve to the replacement
    /// port, which later flatten passes rely on.
    pub fn convert_globals(&mut self, name: &str, file: Option<FileId>) -> Result<(), StoreError> {
        let this = self.lookup(name, file).ok_or_else(|| StoreError::UndefinedCell {
            name: ArcStr::from(name),
        })?;
        let file = self.cell(this).file();

        // A cell with no ports is a top-level cell; globals stay.
        if self.cell(this).port_count() == 0 {
            return Ok(());
        }

        loop {
            // Pick the next global whose net is not already exposed as a
            // port.
            let target = {
                let cell = self.cell(this);
                cell.objects()
                    .iter()
                    .find(|ob| {
                        ob.kind.is_global()
                            && !cell
                                .ports()
                                .any(|(_, p)| p.node == ob.node && ob.node >= 0)
                    })
                    .map(|ob| (ob.name.clone(), ob.node))
            };
            let Some((gname, gnode)) = target else {
                break;
            };
            let gnode = if gnode == DISCONNECTED {
                let n = self.cell_mut(this).alloc_node();
                let cell = self.cell_mut(this);
                if let Some(gi) = cell.lookup_object(&gname) {
                    cell.object_mut(gi).node = n;
                }
                n
            } else {
                gnode
            };

            // Append the new port at the tail of the port run, carrying
            // the global's net, and alias the global's name to it.
            {
                let cell = self.cell_mut(this);
                let insert_at = cell
                    .objects()
                    .iter()
                    .rposition(|ob| ob.kind == ObjectKind::Port)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let mut port = Object::port(gname.clone());
                port.node = gnode;
                let mut objects = cell.take_objects();
                objects.insert(insert_at, port);
                cell.replace_objects(objects);
            }

            // Remove the global object itself, keeping the name alive
            // through the port.
            {
                let cell = self.cell_mut(this);
                let mut objects = cell.take_objects();
                objects.retain(|ob| !(ob.kind.is_global() && ob.name == gname));
                cell.replace_objects(objects);
                let port_idx = cell
                    .objects()
                    .iter()
                    .position(|ob| ob.kind == ObjectKind::Port && ob.name == gname)
                    .unwrap();
                cell.alias_object_name(&gname, port_idx);
            }

            // Wire the new pin into every parent cell in the same file.
            let child_name = self.cell(this).name().clone();
            for pid in self.cell_ids() {
                if pid == this || self.cell(pid).file() != file {
                    continue;
                }
                self.connect_new_global_pin(pid, this, &child_name, &gname)?;
            }
        }

        // Drop any remaining globals whose net a port already carries,
        // re-aliasing their names to that port.
        let leftovers: Vec<(ArcStr, i32)> = {
            let cell = self.cell(this);
            cell.objects()
                .iter()
                .filter(|ob| {
                    ob.kind.is_global()
                        && cell.ports().any(|(_, p)| p.node == ob.node && ob.node >= 0)
                })
                .map(|ob| (ob.name.clone(), ob.node))
                .collect()
        };
        if !leftovers.is_empty() {
            let cell = self.cell_mut(this);
            let mut objects = cell.take_objects();
            objects.retain(|ob| {
                !(ob.kind.is_global() && leftovers.iter().any(|(n, _)| *n == ob.name))
            });
            cell.replace_objects(objects);
            for (name, node) in leftovers {
                if let Some(idx) = cell
                    .objects()
                    .iter()
                    .position(|ob| ob.kind == ObjectKind::Port && ob.node == node)
                {
                    cell.alias_object_name(&name, idx);
                }
            }
        }
        Ok(())
    }

    /// Adds a pin for the child's newly-exposed global port to every
    /// instance of `child` inside `parent`, connecting it to the
    /// parent's same-named net (created as a global if absent).
    fn connect_new_global_pin(
        &mut self,
        parent: CellId,
        child: CellId,
        child_name: &ArcStr,
        gname: &ArcStr,
    ) -> Result<(), StoreError> {
        loop {
            // One instance at a time; adding pins shifts positions.
            let found = {
                let cell = self.cell(parent);
                let mut hit = None;
                for idx in cell.first_pins() {
                    let ob = &cell.objects()[idx];
                    let is_child = ob
                        .model
                        .as_deref()
                        .map(|m| {
                            if cell.nocase() {
                                m.eq_ignore_ascii_case(child_name)
                            } else {
                                m == child_name.as_str()
                            }
                        })
                        .unwrap_or(false);
                    if !is_child {
                        continue;
                    }
                    let inst = ob.instance.clone().unwrap_or_else(|| ob.name.clone());
                    let pin_name = format!("{}{}{}", inst, SEPARATOR, gname);
                    if cell.lookup_object(&pin_name).is_some() {
                        continue; // already wired
                    }
                    let run = cell.pin_run_len(idx);
                    let max_pin = cell.objects()[idx..idx + run]
                        .iter()
                        .filter_map(|ob| ob.kind.pin_index())
                        .max()
                        .unwrap_or(0);
                    hit = Some((idx + run, inst, pin_name, max_pin + 1));
                    break;
                }
                hit
            };
            let Some((insert_at, inst, pin_name, pin_no)) = found else {
                break;
            };

            {
                let cell = self.cell_mut(parent);
                let pin = Object::pin(pin_name.clone(), pin_no, child_name.clone(), inst);
                let mut objects = cell.take_objects();
                objects.insert(insert_at, pin);
                cell.replace_objects(objects);
            }

            // Connect to the parent's net of the same name, creating a
            // parent global when there is none.
            let have_net = {
                let cell = self.cell(parent);
                cell.lookup_object(gname)
                    .map(|i| cell.objects()[i].kind != ObjectKind::Property)
                    .unwrap_or(false)
            };
            if !have_net {
                let cell = self.cell_mut(parent);
                cell.add_object(Object::global(gname.clone()));
            }
            self.join(parent, gname, &pin_name)?;
        }
        Ok(())
    }
}
