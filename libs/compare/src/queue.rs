//! Bottom-up hierarchical comparison.
//!
//! Two hierarchies are walked level by level, deepest first. At each
//! level, cells are paired with an equivalent cell of the other
//! hierarchy (same class hash, or declared correspondence) and queued
//! for comparison; cells with no partner are flattened into their
//! parents. Comparison then proceeds from the queue head, so each
//! successful subcell match is available when its enclosing cells are
//! compared.

use arcstr::ArcStr;
use netlist::{CellId, FileId, Library, Object, ObjectKind, DISCONNECTED};
use serde::{Deserialize, Serialize};

use crate::{CompareEngine, CompareError, Graph, MatchStatus};

/// One queued pair of cells to compare.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComparePair {
    /// Cell name in the first hierarchy.
    pub name1: ArcStr,
    /// File of the first cell.
    pub file1: FileId,
    /// Cell name in the second hierarchy.
    pub name2: ArcStr,
    /// File of the second cell.
    pub file2: FileId,
}

impl CompareEngine {
    /// The deepest hierarchy level under the given cell.
    pub fn descend_count(&self, lib: &Library, cell: CellId) -> u32 {
        self.descend_count_inner(lib, cell, 0)
    }

    fn descend_count_inner(&self, lib: &Library, cell: CellId, level: u32) -> u32 {
        let c = lib.cell(cell);
        let mut deepest = level;
        for first in c.first_pins() {
            let Some(model) = c.objects()[first].model.as_deref() else {
                continue;
            };
            let Some(sub) = lib.lookup(model, Some(c.file())) else {
                continue;
            };
            if sub == cell || !lib.cell(sub).class().is_flattenable() {
                continue;
            }
            deepest = deepest.max(self.descend_count_inner(lib, sub, level + 1));
        }
        deepest
    }

    /// Builds the bottom-up compare queue for two hierarchies.
    ///
    /// Subcells at each level that find no equivalent in the peer
    /// hierarchy are flattened in place. The top-level pair is always
    /// enqueued last.
    pub fn create_compare_queue(
        &mut self,
        lib: &mut Library,
        name1: &str,
        file1: Option<FileId>,
        name2: &str,
        file2: Option<FileId>,
    ) -> Result<(), CompareError> {
        let tc1 = lib.lookup(name1, file1).ok_or_else(|| CompareError::NoSuchCell {
            name: ArcStr::from(name1),
        })?;
        let tc2 = lib.lookup(name2, file2).ok_or_else(|| CompareError::NoSuchCell {
            name: ArcStr::from(name2),
        })?;
        let f1 = lib.cell(tc1).file();
        let f2 = lib.cell(tc2).file();

        let mut level = self
            .descend_count(lib, tc1)
            .max(self.descend_count(lib, tc2));

        while level > 0 {
            self.descend_compare_queue(lib, tc1, f2, level, 0, false);
            self.descend_compare_queue(lib, tc2, f1, level, 0, true);
            self.flatten_unmatched(lib, tc1, level, 0);
            self.flatten_unmatched(lib, tc2, level, 0);
            level -= 1;
        }

        self.compare_queue.push_back(ComparePair {
            name1: lib.cell(tc1).name().clone(),
            file1: f1,
            name2: lib.cell(tc2).name().clone(),
            file2: f2,
        });
        lib.cell_mut(tc1).set_matched(true);
        lib.cell_mut(tc2).set_matched(true);
        Ok(())
    }

    /// Walks to `stoplevel`, pairing unmatched cells with their
    /// equivalents in the peer hierarchy's file.
    fn descend_compare_queue(
        &mut self,
        lib: &mut Library,
        tc: CellId,
        peer_file: FileId,
        stoplevel: u32,
        loclevel: u32,
        flip: bool,
    ) {
        let (name, file, matched) = {
            let cell = lib.cell(tc);
            (cell.name().clone(), cell.file(), cell.matched())
        };
        if loclevel == stoplevel {
            if matched {
                return;
            }
            // Exact-name (class hash) equivalents, or classes declared
            // equivalent by the user.
            let tc2 = lib
                .lookup_class_equivalent(&name, file, peer_file)
                .or_else(|| {
                    self.prematched_class(&name)
                        .and_then(|peer| lib.lookup(peer, Some(peer_file)))
                });
            if let Some(tc2) = tc2 {
                let pair = if flip {
                    ComparePair {
                        name1: lib.cell(tc2).name().clone(),
                        file1: peer_file,
                        name2: name.clone(),
                        file2: file,
                    }
                } else {
                    ComparePair {
                        name1: name.clone(),
                        file1: file,
                        name2: lib.cell(tc2).name().clone(),
                        file2: peer_file,
                    }
                };
                tracing::debug!(
                    "level {}: queueing {} vs. {}",
                    loclevel,
                    pair.name1,
                    pair.name2
                );
                self.compare_queue.push_back(pair);
                lib.cell_mut(tc).set_matched(true);
                lib.cell_mut(tc2).set_matched(true);
            } else {
                tracing::debug!("level {}: {} is unmatched; will be flattened", loclevel, name);
            }
            return;
        }

        let subs: Vec<CellId> = {
            let cell = lib.cell(tc);
            cell.first_pins()
                .filter_map(|first| cell.objects()[first].model.as_deref().map(String::from))
                .filter_map(|m| lib.lookup(&m, Some(file)))
                .filter(|&sub| sub != tc && lib.cell(sub).class().is_flattenable())
                .collect()
        };
        for sub in subs {
            self.descend_compare_queue(lib, sub, peer_file, stoplevel, loclevel + 1, flip);
        }
    }

    /// Flattens every unmatched subcell found at `stoplevel` into its
    /// parent.
    fn flatten_unmatched(
        &mut self,
        lib: &mut Library,
        tc: CellId,
        stoplevel: u32,
        loclevel: u32,
    ) -> bool {
        let (file, matched) = {
            let cell = lib.cell(tc);
            (cell.file(), cell.matched())
        };
        if loclevel == stoplevel {
            return !matched;
        }
        loop {
            let mut flattened_one = false;
            let subs: Vec<(CellId, ArcStr)> = {
                let cell = lib.cell(tc);
                cell.first_pins()
                    .filter_map(|first| cell.objects()[first].model.clone())
                    .filter_map(|m| lib.lookup(&m, Some(file)).map(|id| (id, m)))
                    .filter(|&(sub, _)| sub != tc && lib.cell(sub).class().is_flattenable())
                    .collect()
            };
            for (sub, model) in subs {
                if self.flatten_unmatched(lib, sub, stoplevel, loclevel + 1) {
                    tracing::info!(
                        "flattening unmatched subcell {} in circuit {}",
                        model,
                        lib.cell(tc).name()
                    );
                    let parent = lib.cell(tc).name().clone();
                    let _ = lib.flatten_instances_of(&parent, Some(file), &model);
                    flattened_one = true;
                    break;
                }
            }
            if !flattened_one {
                break;
            }
        }
        false
    }

    /// The pair at the head of the compare queue, without removing it.
    pub fn peek_compare_queue(&self) -> Option<&ComparePair> {
        self.compare_queue.front()
    }

    /// Pops the next pair of cells to compare.
    pub fn pop_compare_queue(&mut self) -> Option<ComparePair> {
        self.compare_queue.pop_front()
    }

    /// Discards the remaining compare queue.
    pub fn clear_compare_queue(&mut self) {
        self.compare_queue.clear();
    }

    /// Queued pairs, head first.
    pub fn compare_queue(&self) -> impl Iterator<Item = &ComparePair> {
        self.compare_queue.iter()
    }

    /// Starts a comparison of one pair: builds the bipartite graph and
    /// applies the declared pin permutations.
    pub fn start_compare(
        &mut self,
        lib: &mut Library,
        name1: &str,
        file1: Option<FileId>,
        name2: &str,
        file2: Option<FileId>,
    ) -> Result<(), CompareError> {
        self.create_two_lists(lib, name1, file1, name2, file2)?;
        self.apply_permutations(lib);
        Ok(())
    }

    /// Compares one queued pair to completion: converge, then resolve
    /// any automorphisms.
    pub fn compare_one(
        &mut self,
        lib: &mut Library,
        pair: &ComparePair,
    ) -> Result<MatchStatus, CompareError> {
        tracing::info!("comparing {} vs. {}", pair.name1, pair.name2);
        self.start_compare(
            lib,
            &pair.name1,
            Some(pair.file1),
            &pair.name2,
            Some(pair.file2),
        )?;
        self.run_converge();
        let status = self.verify_matching(lib);
        match status {
            MatchStatus::Automorphisms(_) => Ok(self.resolve_all(lib)),
            status => Ok(status),
        }
    }

    /// Runs a full hierarchical comparison.
    ///
    /// Pairs are compared from the deepest level up. A failed subcell
    /// pair is marked unmatched and its instances flattened in both
    /// hierarchies, so the enclosing level re-attempts the match on the
    /// expanded circuits.
    pub fn compare_hierarchical(
        &mut self,
        lib: &mut Library,
        name1: &str,
        file1: Option<FileId>,
        name2: &str,
        file2: Option<FileId>,
    ) -> Result<MatchStatus, CompareError> {
        self.create_compare_queue(lib, name1, file1, name2, file2)?;
        let mut last = MatchStatus::Illegal;
        while let Some(pair) = self.pop_compare_queue() {
            let is_top = self.compare_queue.is_empty();
            last = self.compare_one(lib, &pair)?;
            if !last.is_match() && is_top {
                // The top pair gets one more attempt on the fully
                // flattened hierarchies.
                tracing::info!(
                    "top-level {} vs. {} did not match; flattening both and retrying",
                    pair.name1,
                    pair.name2
                );
                self.match_fail(lib, &pair);
                let _ = lib.flatten_cell(&pair.name1, Some(pair.file1));
                let _ = lib.flatten_cell(&pair.name2, Some(pair.file2));
                last = self.compare_one(lib, &pair)?;
            }
            if last.is_match() {
                if let Some(id) = lib.lookup(&pair.name1, Some(pair.file1)) {
                    lib.cell_mut(id).set_matched(true);
                }
                if let Some(id) = lib.lookup(&pair.name2, Some(pair.file2)) {
                    lib.cell_mut(id).set_matched(true);
                }
                if let Err(err) = self.match_pins(lib, &pair) {
                    tracing::warn!("pin matching failed: {}", err);
                }
            } else if !is_top {
                tracing::info!(
                    "{} vs. {} did not match; flattening both",
                    pair.name1,
                    pair.name2
                );
                self.match_fail(lib, &pair);
                lib.flatten_instances_everywhere(pair.file1, &pair.name1);
                lib.flatten_instances_everywhere(pair.file2, &pair.name2);
            }
        }
        Ok(last)
    }

    /// Declares a pair non-matching, forcing flattening during
    /// hierarchical comparison.
    pub fn match_fail(&mut self, lib: &mut Library, pair: &ComparePair) {
        if let Some(id) = lib.lookup(&pair.name1, Some(pair.file1)) {
            lib.cell_mut(id).set_matched(false);
        }
        if let Some(id) = lib.lookup(&pair.name2, Some(pair.file2)) {
            lib.cell_mut(id).set_matched(false);
        }
    }

    /// After a successful compare, permutes the second cell's ports
    /// (and every instantiation of it in its file) into the first
    /// cell's port order.
    ///
    /// Ports with no fan-out are padded with dummy unconnected pins. A
    /// port whose net has fan-out but no matched counterpart fails the
    /// operation and demotes both cells' matched flags.
    pub fn match_pins(&mut self, lib: &mut Library, pair: &ComparePair) -> Result<(), CompareError> {
        let (c1, _) = self.circuit1.ok_or(CompareError::NotInitialized)?;
        let (c2, _) = self.circuit2.ok_or(CompareError::NotInitialized)?;

        // For each port of circuit 1, in order, find the corresponding
        // port position in circuit 2 through the matched node classes.
        enum Slot {
            Existing(usize),
            Dummy(ArcStr),
        }
        let mut order: Vec<Slot> = Vec::new();
        let mut used = vec![false; lib.cell(c2).objects().len()];
        let ports1: Vec<(usize, i32, ArcStr)> = lib
            .cell(c1)
            .ports()
            .map(|(i, ob)| (i, ob.node, ob.name.clone()))
            .collect();

        for (_, net1, pname) in ports1.iter() {
            let matched2 = self.node_map[0].get(net1).and_then(|&nid| {
                let class = &self.nclasses[self.nodes[nid.0 as usize].class.0 as usize];
                let mut other = None;
                let (mut n1, mut n2) = (0usize, 0usize);
                for &m in &class.members {
                    match self.nodes[m.0 as usize].graph {
                        Graph::One => n1 += 1,
                        Graph::Two => {
                            n2 += 1;
                            other = Some(m);
                        }
                    }
                }
                if n1 == 1 && n2 == 1 {
                    other
                } else {
                    None
                }
            });
            match matched2 {
                Some(n2id) => {
                    let net2 = self.nodes[n2id.0 as usize].net;
                    let cell2 = lib.cell(c2);
                    let slot = cell2
                        .ports()
                        .find(|(i, ob)| ob.node == net2 && !used[*i])
                        .map(|(i, _)| i);
                    match slot {
                        Some(i) => {
                            used[i] = true;
                            order.push(Slot::Existing(i));
                        }
                        None => {
                            self.match_fail(lib, pair);
                            return Err(CompareError::UnmatchedPort {
                                port: pname.clone(),
                                cell: lib.cell(c1).name().clone(),
                            });
                        }
                    }
                }
                None => {
                    // The port's net has no device fan-out: it can only
                    // be balanced by a dummy pin on the other side.
                    let has_fanout = self.node_map[0].contains_key(net1);
                    if has_fanout {
                        self.match_fail(lib, pair);
                        return Err(CompareError::UnmatchedPort {
                            port: pname.clone(),
                            cell: lib.cell(c1).name().clone(),
                        });
                    }
                    order.push(Slot::Dummy(pname.clone()));
                }
            }
        }

        // Leftover circuit-2 ports with fan-out have no counterpart.
        let leftovers: Vec<(usize, i32, ArcStr)> = lib
            .cell(c2)
            .ports()
            .filter(|(i, _)| !used[*i])
            .map(|(i, ob)| (i, ob.node, ob.name.clone()))
            .collect();
        for (i, net2, pname) in leftovers {
            if self.node_map[1].contains_key(&net2) {
                self.match_fail(lib, pair);
                return Err(CompareError::UnmatchedPort {
                    port: pname,
                    cell: lib.cell(c2).name().clone(),
                });
            }
            // Unconnected leftovers trail the matched ports.
            used[i] = true;
            order.push(Slot::Existing(i));
        }

        // Rebuild circuit 2's object list with the permuted port run.
        let old_ports: Vec<usize> = lib.cell(c2).ports().map(|(i, _)| i).collect();
        let port_perm: Vec<Option<usize>> = order
            .iter()
            .map(|slot| match slot {
                Slot::Existing(i) => Some(*i),
                Slot::Dummy(_) => None,
            })
            .collect();
        {
            let cell = lib.cell_mut(c2);
            let objects = cell.take_objects();
            let mut rebuilt: Vec<Object> = Vec::with_capacity(objects.len() + 4);
            for slot in order.iter() {
                match slot {
                    Slot::Existing(i) => rebuilt.push(objects[*i].clone()),
                    Slot::Dummy(name) => {
                        let mut dummy = Object::port(name.clone());
                        dummy.node = DISCONNECTED;
                        rebuilt.push(dummy);
                    }
                }
            }
            for (i, ob) in objects.into_iter().enumerate() {
                if !old_ports.contains(&i) {
                    rebuilt.push(ob);
                }
            }
            cell.replace_objects(rebuilt);
        }

        // Permute the pin runs of every instantiation of circuit 2
        // throughout its file, and renumber the pin indices.
        let c2_name = lib.cell(c2).name().clone();
        let file2 = lib.cell(c2).file();
        let old_index_of: Vec<usize> = old_ports.clone();
        for id in lib.cell_ids() {
            if lib.cell(id).file() != file2 || id == c2 {
                continue;
            }
            self.permute_instance_pins(lib, id, &c2_name, &port_perm, &old_index_of);
        }
        Ok(())
    }

    /// Reorders the pin run of every instance of `model` in `cell`
    /// according to the port permutation computed by
    /// [`match_pins`](CompareEngine::match_pins).
    fn permute_instance_pins(
        &self,
        lib: &mut Library,
        cell: CellId,
        model: &ArcStr,
        port_perm: &[Option<usize>],
        old_ports: &[usize],
    ) {
        let runs: Vec<(usize, usize)> = {
            let c = lib.cell(cell);
            c.first_pins()
                .filter(|&first| {
                    c.objects()[first]
                        .model
                        .as_deref()
                        .map(|m| m.eq_ignore_ascii_case(model))
                        .unwrap_or(false)
                })
                .map(|first| (first, c.pin_run_len(first)))
                .collect()
        };
        if runs.is_empty() {
            return;
        }
        let c = lib.cell_mut(cell);
        let mut objects = c.take_objects();
        // Process back to front so splice positions stay valid.
        for &(first, run) in runs.iter().rev() {
            let old_run: Vec<Object> = objects[first..first + run].to_vec();
            let inst = old_run[0]
                .instance
                .clone()
                .unwrap_or_else(|| old_run[0].name.clone());
            let mut new_run: Vec<Object> = Vec::with_capacity(port_perm.len());
            for (newpos, slot) in port_perm.iter().enumerate() {
                let mut ob = match slot {
                    // Map the old port position to its rank in the old
                    // port order, which matches the old pin order.
                    Some(oldpos) => {
                        let rank = old_ports.iter().position(|&p| p == *oldpos).unwrap_or(0);
                        old_run.get(rank).cloned().unwrap_or_else(|| {
                            let mut dummy = Object::pin(
                                format!("{}{}dummy{}", inst, netlist::SEPARATOR, newpos),
                                newpos as u16,
                                model.clone(),
                                inst.clone(),
                            );
                            dummy.node = DISCONNECTED;
                            dummy
                        })
                    }
                    None => {
                        let mut dummy = Object::pin(
                            format!("{}{}dummy{}", inst, netlist::SEPARATOR, newpos),
                            newpos as u16,
                            model.clone(),
                            inst.clone(),
                        );
                        dummy.node = DISCONNECTED;
                        dummy
                    }
                };
                ob.kind = ObjectKind::Pin(newpos as u16);
                new_run.push(ob);
            }
            objects.splice(first..first + run, new_run);
        }
        c.replace_objects(objects);
    }
}
