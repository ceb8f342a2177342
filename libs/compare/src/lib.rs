//! Netlist comparison by partition refinement.
//!
//! Two cells are compared by building a bipartite graph of *elements*
//! (device instances) and *nodes* (nets), placing the elements of both
//! circuits into one equivalence class (and likewise the nodes), and
//! then iteratively splitting classes whose members' neighbourhood
//! hashes differ. Two circuits are isomorphic exactly when refinement
//! reaches a fixed point with every class containing one member from
//! each circuit; remaining balanced multi-member classes are
//! automorphisms, broken arbitrarily.
//!
//! The engine only ever reads the netlist store; it owns the transient
//! element/node/class arenas, which are dropped wholesale on reset.
#![warn(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use netlist::{CellId, FileId, Library};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

mod permute;
mod queue;
mod resolve;
#[cfg(test)]
mod tests;

pub use permute::Permutation;
pub use queue::ComparePair;
pub use resolve::MatchStatus;

/// Index of an element record in the engine's arena.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ElementId(u32);

/// Index of a node record in the engine's arena.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(u32);

/// Index of an element class.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EClassId(u32);

/// Index of a node class.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NClassId(u32);

/// Which of the two compared circuits a record belongs to.
#[derive(
    Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum Graph {
    /// The first circuit.
    One,
    /// The second circuit.
    Two,
}

/// One pin of an element.
#[derive(Clone, Debug)]
pub(crate) struct Pin {
    /// Pins of one element with equal magic are permutable.
    pub magic: u64,
    /// The node this pin's wire belongs to; `None` when unconnected.
    pub node: Option<NodeId>,
}

/// One device instance.
#[derive(Clone, Debug)]
pub(crate) struct Element {
    pub hash: u64,
    pub graph: Graph,
    /// The cell the instance lives in.
    pub cell: CellId,
    /// Position of the instance's first pin in the cell's object list.
    pub object: usize,
    pub class: EClassId,
    pub pins: Vec<Pin>,
}

/// One fan-out entry of a node: a pin of an element.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Fanout {
    pub element: ElementId,
    /// Index into the element's pin list.
    pub pin: usize,
}

/// One electrical net.
#[derive(Clone, Debug)]
pub(crate) struct NodeRec {
    pub hash: u64,
    pub graph: Graph,
    pub cell: CellId,
    /// Position of a representative object in the cell's object list.
    pub object: usize,
    /// The net number inside its cell.
    pub net: i32,
    pub class: NClassId,
    pub fanout: Vec<Fanout>,
}

/// An equivalence class of elements.
#[derive(Clone, Debug, Default)]
pub(crate) struct EClass {
    pub magic: u64,
    pub members: Vec<ElementId>,
    pub legal: bool,
}

/// An equivalence class of nodes.
#[derive(Clone, Debug, Default)]
pub(crate) struct NClass {
    pub magic: u64,
    pub members: Vec<NodeId>,
    pub legal: bool,
}

/// A user-visible summary of one equivalence class.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassSummary {
    /// Member names, tagged with the circuit they came from.
    pub members: Vec<(Graph, ArcStr)>,
    /// Whether the class is balanced between the two circuits.
    pub legal: bool,
}

/// Errors arising from comparison operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompareError {
    /// The engine has no circuits loaded.
    #[error("need to initialize data structures first")]
    NotInitialized,
    /// A named cell was not found in the store.
    #[error("no cell named `{name}`")]
    NoSuchCell {
        /// The missing cell name.
        name: ArcStr,
    },
    /// A cell contains no devices or no nets.
    #[error("cell `{name}` contains no {what}")]
    EmptyCell {
        /// The offending cell.
        name: ArcStr,
        /// What was missing: "elements" or "nodes".
        what: &'static str,
    },
    /// A named object was not found.
    #[error("no object named `{name}` in `{cell}`")]
    NoSuchObject {
        /// The missing object name.
        name: ArcStr,
        /// The cell searched.
        cell: ArcStr,
    },
    /// A model does not declare the named pin.
    #[error("no pin `{pin}` in model `{model}`")]
    NoSuchPin {
        /// The model searched.
        model: ArcStr,
        /// The missing pin.
        pin: ArcStr,
    },
    /// Two objects were not found in a common equivalence class.
    #[error("`{name1}` and `{name2}` are not in the same equivalence class")]
    NotInSameClass {
        /// The first name.
        name1: ArcStr,
        /// The second name.
        name2: ArcStr,
    },
    /// Pin matching found a port with no counterpart.
    #[error("port `{port}` of `{cell}` has no topologically equivalent port")]
    UnmatchedPort {
        /// The port without a counterpart.
        port: ArcStr,
        /// Its cell.
        cell: ArcStr,
    },
}

/// The netlist comparison engine.
///
/// Holds the transient bipartite graph for one pair of circuits, the
/// declared pin permutations and class correspondences, and the
/// hierarchical compare queue.
pub struct CompareEngine {
    pub(crate) elements: Vec<Element>,
    pub(crate) nodes: Vec<NodeRec>,
    pub(crate) eclasses: Vec<EClass>,
    pub(crate) nclasses: Vec<NClass>,
    /// Live class lists, in a stable order.
    pub(crate) live_eclasses: Vec<EClassId>,
    pub(crate) live_nclasses: Vec<NClassId>,
    /// Net-number-to-node maps, one per circuit.
    pub(crate) node_map: [IndexMap<i32, NodeId>; 2],
    pub(crate) circuit1: Option<(CellId, FileId)>,
    pub(crate) circuit2: Option<(CellId, FileId)>,
    pub(crate) rng: StdRng,
    pub(crate) exhaustive: bool,
    pub(crate) bad_match: bool,
    pub(crate) property_error: bool,
    pub(crate) iterations: u32,
    pub(crate) permutations: Vec<Permutation>,
    pub(crate) correspondences: Vec<(ArcStr, ArcStr)>,
    pub(crate) compare_queue: std::collections::VecDeque<ComparePair>,
    interrupt: Arc<AtomicBool>,
}

impl Default for CompareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompareEngine {
    /// Creates an engine with an empty state.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            nodes: Vec::new(),
            eclasses: Vec::new(),
            nclasses: Vec::new(),
            live_eclasses: Vec::new(),
            live_nclasses: Vec::new(),
            node_map: [IndexMap::new(), IndexMap::new()],
            circuit1: None,
            circuit2: None,
            rng: StdRng::seed_from_u64(0x6e65_7463_6d70),
            exhaustive: false,
            bad_match: false,
            property_error: false,
            iterations: 0,
            permutations: Vec::new(),
            correspondences: Vec::new(),
            compare_queue: std::collections::VecDeque::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle through which a signal handler or host shell can
    /// request cancellation of the current operation.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Returns `true` if circuits are loaded and ready to iterate.
    pub fn initialized(&self) -> bool {
        self.circuit1.is_some() && self.circuit2.is_some()
    }

    /// Enables or disables exhaustive subdivision of size-2 classes.
    pub fn set_exhaustive(&mut self, exhaustive: bool) {
        self.exhaustive = exhaustive;
    }

    /// Whether exhaustive subdivision is enabled.
    pub fn exhaustive(&self) -> bool {
        self.exhaustive
    }

    /// Whether an illegal partition has been detected.
    pub fn bad_match(&self) -> bool {
        self.bad_match
    }

    /// Whether a property mismatch has been detected on a matched pair.
    pub fn property_error(&self) -> bool {
        self.property_error
    }

    /// Number of refinement iterations run since the last start.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// The two circuits being compared, if loaded.
    pub fn circuits(&self) -> Option<((CellId, FileId), (CellId, FileId))> {
        Some((self.circuit1?, self.circuit2?))
    }

    /// Tears down the bipartite graph and all classes.
    ///
    /// The netlist store is untouched; permutations, correspondences,
    /// and the compare queue survive.
    pub fn reset(&mut self) {
        self.elements.clear();
        self.nodes.clear();
        self.eclasses.clear();
        self.nclasses.clear();
        self.live_eclasses.clear();
        self.live_nclasses.clear();
        self.node_map[0].clear();
        self.node_map[1].clear();
        self.circuit1 = None;
        self.circuit2 = None;
        self.bad_match = false;
        self.property_error = false;
        self.iterations = 0;
    }

    pub(crate) fn magic(&mut self) -> u64 {
        self.rng.gen()
    }

    fn graph_index(g: Graph) -> usize {
        match g {
            Graph::One => 0,
            Graph::Two => 1,
        }
    }

    /// Builds the element list and node list for one circuit, appending
    /// to the engine arenas.
    fn build_graph(
        &mut self,
        lib: &Library,
        cell_id: CellId,
        graph: Graph,
    ) -> Result<(), CompareError> {
        let cell = lib.cell(cell_id);
        let gi = Self::graph_index(graph);
        let first_elem = self.elements.len();

        for first in cell.first_pins() {
            let run = cell.pin_run_len(first);
            let ob = &cell.objects()[first];
            let class_hash = ob
                .model
                .as_deref()
                .and_then(|m| lib.lookup(m, Some(cell.file())))
                .map(|mid| lib.cell(mid).class_hash())
                .unwrap_or_else(|| netlist::class_hash(ob.model.as_deref().unwrap_or("")));

            // Pin magics are drawn from a generator seeded with the
            // model's class hash, so the same model yields the same
            // magic sequence in both circuits.
            let mut pin_rng = StdRng::seed_from_u64(class_hash);
            let mut pins = Vec::with_capacity(run);
            for _ in 0..run {
                pins.push(Pin {
                    magic: pin_rng.gen(),
                    node: None,
                });
            }

            let eid = ElementId(self.elements.len() as u32);
            self.elements.push(Element {
                hash: class_hash,
                graph,
                cell: cell_id,
                object: first,
                class: EClassId(0),
                pins,
            });

            // Wire pins to nodes; nodes numbered <= 0 are unconnected
            // or dummy and take no part in matching.
            for (pi, pob) in cell.objects()[first..first + run].iter().enumerate() {
                if pob.node <= 0 {
                    continue;
                }
                let nid = match self.node_map[gi].get(&pob.node) {
                    Some(&nid) => nid,
                    None => {
                        let nid = NodeId(self.nodes.len() as u32);
                        let object = cell.node_object(pob.node).unwrap_or(first + pi);
                        self.nodes.push(NodeRec {
                            hash: 0,
                            graph,
                            cell: cell_id,
                            object,
                            net: pob.node,
                            class: NClassId(0),
                            fanout: Vec::new(),
                        });
                        self.node_map[gi].insert(pob.node, nid);
                        nid
                    }
                };
                self.nodes[nid.0 as usize].fanout.push(Fanout {
                    element: eid,
                    pin: pi,
                });
                self.elements[eid.0 as usize].pins[pi].node = Some(nid);
            }
        }

        if self.elements.len() == first_elem {
            return Err(CompareError::EmptyCell {
                name: cell.name().clone(),
                what: "elements",
            });
        }
        Ok(())
    }

    /// Creates the bipartite graph and the initial classes for a pair
    /// of cells, and performs the first fracture.
    pub fn create_two_lists(
        &mut self,
        lib: &mut Library,
        name1: &str,
        file1: Option<FileId>,
        name2: &str,
        file2: Option<FileId>,
    ) -> Result<(), CompareError> {
        self.reset();

        let c1 = lib.lookup(name1, file1).ok_or_else(|| CompareError::NoSuchCell {
            name: ArcStr::from(name1),
        })?;
        let c2 = lib.lookup(name2, file2).ok_or_else(|| CompareError::NoSuchCell {
            name: ArcStr::from(name2),
        })?;

        // Every named net gets a valid number before list building.
        lib.connect_all_nodes(c1);
        lib.connect_all_nodes(c2);

        self.build_graph(lib, c1, Graph::One)?;
        self.build_graph(lib, c2, Graph::Two)?;
        if self.nodes.is_empty() {
            return Err(CompareError::EmptyCell {
                name: lib.cell(c1).name().clone(),
                what: "nodes",
            });
        }
        self.circuit1 = Some((c1, lib.cell(c1).file()));
        self.circuit2 = Some((c2, lib.cell(c2).file()));

        // One initial class over each arena.
        let emagic = self.magic();
        self.eclasses.push(EClass {
            magic: emagic,
            members: (0..self.elements.len() as u32).map(ElementId).collect(),
            legal: true,
        });
        self.live_eclasses.push(EClassId(0));
        let nmagic = self.magic();
        self.nclasses.push(NClass {
            magic: nmagic,
            members: (0..self.nodes.len() as u32).map(NodeId).collect(),
            legal: true,
        });
        self.live_nclasses.push(NClassId(0));

        self.first_passes(lib);
        self.fracture_elements();
        self.fracture_nodes();
        Ok(())
    }

    /// Initial hashes: a device hashes to its class hash, a node to its
    /// fan-out count. Logs the element-population summary for the two
    /// circuits.
    fn first_passes(&mut self, lib: &Library) {
        let mut counts: IndexMap<u64, (ArcStr, usize, usize)> = IndexMap::new();
        let (mut c1, mut c2) = (0usize, 0usize);
        for e in self.elements.iter_mut() {
            let cell = lib.cell(e.cell);
            let ob = &cell.objects()[e.object];
            let model = ob.model.clone().unwrap_or_default();
            let hash = e.hash; // class hash, set at build time
            let entry = counts.entry(hash).or_insert((model, 0, 0));
            match e.graph {
                Graph::One => {
                    entry.1 += 1;
                    c1 += 1;
                }
                Graph::Two => {
                    entry.2 += 1;
                    c2 += 1;
                }
            }
        }
        tracing::info!("circuit 1: {} elements, circuit 2: {} elements", c1, c2);
        for (_, (model, n1, n2)) in counts.iter() {
            if n1 == n2 {
                tracing::info!("  {}: {} vs. {}", model, n1, n2);
            } else {
                tracing::warn!("  {}: {} vs. {} **mismatch**", model, n1, n2);
            }
        }

        let (mut n1, mut n2) = (0usize, 0usize);
        for n in self.nodes.iter_mut() {
            n.hash = n.fanout.len() as u64;
            match n.graph {
                Graph::One => n1 += 1,
                Graph::Two => n2 += 1,
            }
        }
        if n1 != n2 {
            tracing::warn!("node count mismatch: {} vs. {}", n1, n2);
        } else {
            tracing::info!("circuit 1: {} nodes, circuit 2: {} nodes", n1, n2);
        }
    }

    pub(crate) fn element_hash(&self, e: &Element) -> u64 {
        let mut hash: u64 = 0;
        for pin in e.pins.iter() {
            if let Some(nid) = pin.node {
                let class = self.nodes[nid.0 as usize].class;
                hash = hash.wrapping_add(pin.magic ^ self.nclasses[class.0 as usize].magic);
            }
        }
        // Folding in the element's own hash keeps two devices of
        // different classes in one class from masking each other.
        hash ^ e.hash
    }

    pub(crate) fn node_hash(&self, n: &NodeRec) -> u64 {
        let mut hash: u64 = 0;
        for f in n.fanout.iter() {
            let e = &self.elements[f.element.0 as usize];
            let pin = &e.pins[f.pin];
            hash = hash
                .wrapping_add(pin.magic ^ e.hash ^ self.eclasses[e.class.0 as usize].magic);
        }
        hash
    }

    /// Runs one refinement step.
    ///
    /// Returns `true` when the step made no new fractures, i.e. the
    /// partition is stable.
    pub fn iterate(&mut self) -> bool {
        if !self.initialized() {
            tracing::error!("need to initialize data structures first");
            return true;
        }
        self.iterations += 1;

        // Fresh colours for every class.
        for i in 0..self.live_eclasses.len() {
            let c = self.live_eclasses[i];
            self.eclasses[c.0 as usize].magic = self.rng.gen();
        }
        for i in 0..self.live_nclasses.len() {
            let c = self.live_nclasses[i];
            self.nclasses[c.0 as usize].magic = self.rng.gen();
        }

        // All element hashes are computed before any class splits, so
        // that splitting cannot perturb neighbour colours mid-step.
        for i in 0..self.elements.len() {
            self.elements[i].hash = self.element_hash(&self.elements[i]);
        }
        self.check_crossed_pairs_elements();
        let efrac = self.fracture_elements();

        for i in 0..self.nodes.len() {
            self.nodes[i].hash = self.node_hash(&self.nodes[i]);
        }
        self.check_crossed_pairs_nodes();
        let nfrac = self.fracture_nodes();

        !(efrac || nfrac)
    }

    /// A class of exactly two members from the same circuit can never
    /// be legal, whatever its hashes.
    fn check_crossed_pairs_elements(&mut self) {
        for &cid in self.live_eclasses.iter() {
            let class = &mut self.eclasses[cid.0 as usize];
            if class.members.len() == 2 {
                let g0 = self.elements[class.members[0].0 as usize].graph;
                let g1 = self.elements[class.members[1].0 as usize].graph;
                if g0 == g1 {
                    class.legal = false;
                    self.bad_match = true;
                }
            }
        }
    }

    fn check_crossed_pairs_nodes(&mut self) {
        for &cid in self.live_nclasses.iter() {
            let class = &mut self.nclasses[cid.0 as usize];
            if class.members.len() == 2 {
                let g0 = self.nodes[class.members[0].0 as usize].graph;
                let g1 = self.nodes[class.members[1].0 as usize].graph;
                if g0 == g1 {
                    class.legal = false;
                    self.bad_match = true;
                }
            }
        }
    }

    /// Splits every eligible element class into hash buckets.
    ///
    /// Unbalanced buckets across the whole pass are coalesced into a
    /// single illegal class. Returns `true` if anything split.
    pub(crate) fn fracture_elements(&mut self) -> bool {
        let old = std::mem::take(&mut self.live_eclasses);
        let mut illegal: Vec<ElementId> = Vec::new();
        let mut fractured = false;

        for cid in old {
            if self.interrupted() {
                self.live_eclasses.push(cid);
                continue;
            }
            let class = &self.eclasses[cid.0 as usize];
            // Stable matched pairs are left alone unless exhaustive
            // subdivision is on.
            if class.members.len() == 2 && class.legal && !self.exhaustive {
                self.live_eclasses.push(cid);
                continue;
            }
            let members = std::mem::take(&mut self.eclasses[cid.0 as usize].members);
            let mut buckets: IndexMap<u64, Vec<ElementId>> = IndexMap::new();
            for m in members {
                buckets
                    .entry(self.elements[m.0 as usize].hash)
                    .or_default()
                    .push(m);
            }
            let mut legal_buckets = 0usize;
            let mut had_illegal = false;
            for (_, bucket) in buckets {
                let (mut c1, mut c2) = (0usize, 0usize);
                for &m in &bucket {
                    match self.elements[m.0 as usize].graph {
                        Graph::One => c1 += 1,
                        Graph::Two => c2 += 1,
                    }
                }
                if c1 != c2 {
                    self.bad_match = true;
                    had_illegal = true;
                    illegal.extend(bucket);
                } else {
                    legal_buckets += 1;
                    self.install_eclass(bucket, true);
                }
            }
            // A split only counts as a fracture when it produced more
            // than one resulting class; a class that merely went
            // illegal wholesale is a fixed point, not progress.
            if legal_buckets + usize::from(had_illegal) > 1 {
                fractured = true;
            }
        }

        if !illegal.is_empty() {
            self.install_eclass(illegal, false);
        }
        fractured
    }

    pub(crate) fn fracture_nodes(&mut self) -> bool {
        let old = std::mem::take(&mut self.live_nclasses);
        let mut illegal: Vec<NodeId> = Vec::new();
        let mut fractured = false;

        for cid in old {
            if self.interrupted() {
                self.live_nclasses.push(cid);
                continue;
            }
            let class = &self.nclasses[cid.0 as usize];
            if class.members.len() == 2 && class.legal && !self.exhaustive {
                self.live_nclasses.push(cid);
                continue;
            }
            let members = std::mem::take(&mut self.nclasses[cid.0 as usize].members);
            let mut buckets: IndexMap<u64, Vec<NodeId>> = IndexMap::new();
            for m in members {
                buckets
                    .entry(self.nodes[m.0 as usize].hash)
                    .or_default()
                    .push(m);
            }
            let mut legal_buckets = 0usize;
            let mut had_illegal = false;
            for (_, bucket) in buckets {
                let (mut c1, mut c2) = (0usize, 0usize);
                for &m in &bucket {
                    match self.nodes[m.0 as usize].graph {
                        Graph::One => c1 += 1,
                        Graph::Two => c2 += 1,
                    }
                }
                if c1 != c2 {
                    self.bad_match = true;
                    had_illegal = true;
                    illegal.extend(bucket);
                } else {
                    legal_buckets += 1;
                    self.install_nclass(bucket, true);
                }
            }
            if legal_buckets + usize::from(had_illegal) > 1 {
                fractured = true;
            }
        }

        if !illegal.is_empty() {
            self.install_nclass(illegal, false);
        }
        fractured
    }

    /// Installs a fresh element class over the given members.
    pub(crate) fn install_eclass(&mut self, members: Vec<ElementId>, legal: bool) -> EClassId {
        let id = EClassId(self.eclasses.len() as u32);
        let magic = self.magic();
        for &m in &members {
            self.elements[m.0 as usize].class = id;
        }
        self.eclasses.push(EClass {
            magic,
            members,
            legal,
        });
        self.live_eclasses.push(id);
        id
    }

    /// Installs a fresh node class over the given members.
    pub(crate) fn install_nclass(&mut self, members: Vec<NodeId>, legal: bool) -> NClassId {
        let id = NClassId(self.nclasses.len() as u32);
        let magic = self.magic();
        for &m in &members {
            self.nodes[m.0 as usize].class = id;
        }
        self.nclasses.push(NClass {
            magic,
            members,
            legal,
        });
        self.live_nclasses.push(id);
        id
    }

    /// Iterates until the partition stops fracturing, the match is
    /// known bad, or an interrupt is requested.
    ///
    /// Returns the number of iterations run.
    pub fn run_converge(&mut self) -> u32 {
        let start = self.iterations;
        while !self.iterate() {
            if self.bad_match || self.interrupted() {
                break;
            }
        }
        self.iterations - start
    }

    /// Number of live element classes and elements.
    pub fn element_summary(&self) -> (usize, usize) {
        (self.live_eclasses.len(), self.elements.len())
    }

    /// Number of live node classes and nodes.
    pub fn node_summary(&self) -> (usize, usize) {
        (self.live_nclasses.len(), self.nodes.len())
    }

    /// The name of an element for reporting: its instance name.
    pub(crate) fn element_name(&self, lib: &Library, id: ElementId) -> ArcStr {
        let e = &self.elements[id.0 as usize];
        let ob = &lib.cell(e.cell).objects()[e.object];
        ob.instance.clone().unwrap_or_else(|| ob.name.clone())
    }

    /// The name of a node for reporting: the name of its net.
    pub(crate) fn node_name(&self, lib: &Library, id: NodeId) -> ArcStr {
        let n = &self.nodes[id.0 as usize];
        let cell = lib.cell(n.cell);
        cell.node_name(n.net)
            .cloned()
            .unwrap_or_else(|| cell.objects()[n.object].name.clone())
    }

    /// Summaries of all element classes, optionally only illegal ones.
    pub fn element_classes(&self, lib: &Library, only_illegal: bool) -> Vec<ClassSummary> {
        let mut out = Vec::new();
        for &cid in self.live_eclasses.iter() {
            let class = &self.eclasses[cid.0 as usize];
            if only_illegal && class.legal {
                continue;
            }
            out.push(ClassSummary {
                members: class
                    .members
                    .iter()
                    .map(|&m| {
                        (
                            self.elements[m.0 as usize].graph,
                            self.element_name(lib, m),
                        )
                    })
                    .collect(),
                legal: class.legal,
            });
        }
        out
    }

    /// Summaries of all node classes, optionally only illegal ones.
    pub fn node_classes(&self, lib: &Library, only_illegal: bool) -> Vec<ClassSummary> {
        let mut out = Vec::new();
        for &cid in self.live_nclasses.iter() {
            let class = &self.nclasses[cid.0 as usize];
            if only_illegal && class.legal {
                continue;
            }
            out.push(ClassSummary {
                members: class
                    .members
                    .iter()
                    .map(|&m| (self.nodes[m.0 as usize].graph, self.node_name(lib, m)))
                    .collect(),
                legal: class.legal,
            });
        }
        out
    }

    /// Checks the arena/class bookkeeping: every element and node
    /// belongs to exactly one live class.
    pub fn check_consistency(&self) -> bool {
        let esum: usize = self
            .live_eclasses
            .iter()
            .map(|&c| self.eclasses[c.0 as usize].members.len())
            .sum();
        let nsum: usize = self
            .live_nclasses
            .iter()
            .map(|&c| self.nclasses[c.0 as usize].members.len())
            .sum();
        esum == self.elements.len() && nsum == self.nodes.len()
    }
}
