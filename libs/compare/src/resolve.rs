//! Match verification, device-property checking, and automorphism
//! resolution.

use arcstr::ArcStr;
use netlist::{Library, ObjectKind, PropKind, PropertyValue, Slop};
use serde::{Deserialize, Serialize};

use crate::{CompareEngine, CompareError, EClassId, Graph};

/// The outcome of verifying the current partition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// An unbalanced class proves the circuits are not isomorphic.
    Illegal,
    /// Every class holds exactly one member per circuit.
    Unique,
    /// The given number of balanced classes remain unresolved.
    Automorphisms(u32),
}

impl MatchStatus {
    /// The conventional numeric code: −1, 0, or the automorphism count.
    pub fn as_code(&self) -> i32 {
        match self {
            MatchStatus::Illegal => -1,
            MatchStatus::Unique => 0,
            MatchStatus::Automorphisms(n) => *n as i32,
        }
    }

    /// Whether this status represents a topological match.
    pub fn is_match(&self) -> bool {
        matches!(self, MatchStatus::Unique)
    }
}

impl CompareEngine {
    /// Verifies the current partition.
    ///
    /// Property values of uniquely matched element pairs are checked as
    /// a side effect; a mismatch sets the property-error flag without
    /// invalidating the topological result.
    pub fn verify_matching(&mut self, lib: &Library) -> MatchStatus {
        if self.bad_match {
            return MatchStatus::Illegal;
        }

        let mut automorphisms = 0u32;
        for idx in 0..self.live_eclasses.len() {
            let cid = self.live_eclasses[idx];
            let class = &self.eclasses[cid.0 as usize];
            let (mut c1, mut c2) = (0usize, 0usize);
            for &m in &class.members {
                match self.elements[m.0 as usize].graph {
                    Graph::One => c1 += 1,
                    Graph::Two => c2 += 1,
                }
            }
            if c1 != c2 {
                return MatchStatus::Illegal;
            }
            if c1 != 1 {
                automorphisms += 1;
            } else if !self.property_error {
                match self.property_check(lib, cid, false) {
                    Ok(0) => {}
                    _ => self.property_error = true,
                }
            }
        }

        for &cid in self.live_nclasses.iter() {
            let class = &self.nclasses[cid.0 as usize];
            let (mut c1, mut c2) = (0usize, 0usize);
            for &m in &class.members {
                match self.nodes[m.0 as usize].graph {
                    Graph::One => c1 += 1,
                    Graph::Two => c2 += 1,
                }
            }
            if c1 != c2 {
                return MatchStatus::Illegal;
            }
            if c1 != 1 {
                automorphisms += 1;
            }
        }

        if automorphisms == 0 {
            MatchStatus::Unique
        } else {
            MatchStatus::Automorphisms(automorphisms)
        }
    }

    /// Checks the device properties of a uniquely matched element
    /// class, key by key, with the declared tolerances.
    ///
    /// Returns the number of mismatched properties, or an error if the
    /// class does not hold exactly one comparable member per circuit.
    pub fn property_check(
        &self,
        lib: &Library,
        class: EClassId,
        log: bool,
    ) -> Result<usize, CompareError> {
        let class = &self.eclasses[class.0 as usize];
        if class.members.len() != 2 {
            return Err(CompareError::NotInitialized);
        }
        let (mut e1, mut e2) = (
            &self.elements[class.members[0].0 as usize],
            &self.elements[class.members[1].0 as usize],
        );
        if e1.graph == e2.graph {
            return Err(CompareError::NotInitialized);
        }
        if e1.graph == Graph::Two {
            std::mem::swap(&mut e1, &mut e2);
        }

        let cell1 = lib.cell(e1.cell);
        let cell2 = lib.cell(e2.cell);
        let ob1 = &cell1.objects()[e1.object];
        let ob2 = &cell2.objects()[e2.object];

        // The reference key list comes from circuit 1's model.
        let model1 = ob1.model.as_deref().unwrap_or("");
        let Some(tc1) = lib.lookup(model1, Some(cell1.file())) else {
            return Ok(0);
        };
        let keys = &lib.cell(tc1).prop_keys;
        if keys.is_empty() {
            return Ok(0);
        }

        let p1 = cell1.property_of(e1.object).and_then(|ob| ob.props.as_deref());
        let p2 = cell2.property_of(e2.object).and_then(|ob| ob.props.as_deref());
        let (v1, v2) = match (p1, p2) {
            (None, None) => return Ok(0),
            (Some(p1), Some(p2)) => (&p1.values, &p2.values),
            // One side carries properties the other lacks.
            _ => return Ok(1),
        };

        let mut mismatches = 0;
        for (i, key) in keys.iter().enumerate() {
            let (Some(a), Some(b)) = (v1.get(i), v2.get(i)) else {
                break;
            };
            let ok = match (key.kind, a, b) {
                (PropKind::Double, PropertyValue::Double(a), PropertyValue::Double(b)) => {
                    let slop = match key.slop {
                        Slop::Double(s) => s,
                        Slop::Integer(s) => s as f64,
                    };
                    if a == b {
                        true
                    } else if *a != 0.0 {
                        ((a - b).abs() / a.abs()) <= slop
                    } else {
                        false
                    }
                }
                (PropKind::Integer, PropertyValue::Integer(a), PropertyValue::Integer(b)) => {
                    let slop = match key.slop {
                        Slop::Integer(s) => s,
                        Slop::Double(s) => s as i32,
                    };
                    (a - b).abs() <= slop
                }
                (PropKind::String, PropertyValue::Text(a), PropertyValue::Text(b)) => {
                    let range = match key.slop {
                        Slop::Integer(s) => s,
                        Slop::Double(_) => 0,
                    };
                    if range == 0 {
                        a.eq_ignore_ascii_case(b)
                    } else {
                        let n = range as usize;
                        let at = a.get(..n.min(a.len())).unwrap_or("");
                        let bt = b.get(..n.min(b.len())).unwrap_or("");
                        at.eq_ignore_ascii_case(bt)
                    }
                }
                // A type mismatch between aligned values never matches.
                _ => false,
            };
            if !ok {
                if log {
                    tracing::warn!(
                        "property `{}` differs: {} vs. {} ({:?} vs. {:?})",
                        key.key,
                        ob1.instance.as_deref().unwrap_or(""),
                        ob2.instance.as_deref().unwrap_or(""),
                        a,
                        b
                    );
                }
                mismatches += 1;
            }
        }
        // Value lists of different effective lengths cannot match.
        if v1.len() != v2.len() {
            mismatches += 1;
        }
        Ok(mismatches)
    }

    /// Logs property-check results for every matched element class.
    pub fn print_property_results(&self, lib: &Library) -> usize {
        let mut total = 0;
        for &cid in self.live_eclasses.iter() {
            if let Ok(n) = self.property_check(lib, cid, true) {
                total += n;
            }
        }
        total
    }

    /// Breaks one automorphism: picks one member per circuit from a
    /// balanced multi-member class, forces their hashes equal to a
    /// fresh random, and iterates exhaustively to stability.
    ///
    /// Returns the resulting status; call repeatedly (or use
    /// [`resolve_all`](CompareEngine::resolve_all)) until unique or
    /// illegal.
    pub fn resolve_step(&mut self, lib: &Library) -> MatchStatus {
        let mut broke = false;

        'outer: {
            for idx in 0..self.live_eclasses.len() {
                let cid = self.live_eclasses[idx];
                let class = &self.eclasses[cid.0 as usize];
                let mut first1 = None;
                let mut first2 = None;
                let (mut c1, mut c2) = (0usize, 0usize);
                for &m in &class.members {
                    match self.elements[m.0 as usize].graph {
                        Graph::One => {
                            c1 += 1;
                            first1.get_or_insert(m);
                        }
                        Graph::Two => {
                            c2 += 1;
                            first2.get_or_insert(m);
                        }
                    }
                }
                if c1 == c2 && c1 > 1 {
                    let h = self.magic();
                    self.elements[first1.unwrap().0 as usize].hash = h;
                    self.elements[first2.unwrap().0 as usize].hash = h;
                    broke = true;
                    break 'outer;
                }
            }
            for idx in 0..self.live_nclasses.len() {
                let cid = self.live_nclasses[idx];
                let class = &self.nclasses[cid.0 as usize];
                let mut first1 = None;
                let mut first2 = None;
                let (mut c1, mut c2) = (0usize, 0usize);
                for &m in &class.members {
                    match self.nodes[m.0 as usize].graph {
                        Graph::One => {
                            c1 += 1;
                            first1.get_or_insert(m);
                        }
                        Graph::Two => {
                            c2 += 1;
                            first2.get_or_insert(m);
                        }
                    }
                }
                if c1 == c2 && c1 > 1 {
                    let h = self.magic();
                    self.nodes[first1.unwrap().0 as usize].hash = h;
                    self.nodes[first2.unwrap().0 as usize].hash = h;
                    broke = true;
                    break 'outer;
                }
            }
        }

        if broke {
            self.fracture_elements();
            self.fracture_nodes();
        }
        self.exhaustive = true;
        while !self.iterate() {
            if self.bad_match || self.interrupted() {
                break;
            }
        }
        self.verify_matching(lib)
    }

    /// Resolves automorphisms until the match is unique or proven
    /// illegal.
    ///
    /// Refinement is first run to its fixed point, so that only genuine
    /// automorphisms get broken.
    pub fn resolve_all(&mut self, lib: &Library) -> MatchStatus {
        self.run_converge();
        let mut status = self.verify_matching(lib);
        while let MatchStatus::Automorphisms(_) = status {
            if self.interrupted() {
                break;
            }
            status = self.resolve_step(lib);
        }
        status
    }

    /// Converts node automorphism classes consisting entirely of ports
    /// into declared pin permutations on the respective cells.
    ///
    /// Useful before pin matching: symmetric ports (e.g. the inputs of
    /// a NAND gate) become permutable rather than being broken
    /// arbitrarily.
    pub fn permute_automorphisms(&mut self, lib: &Library) -> Result<(), CompareError> {
        let mut setups: Vec<(ArcStr, ArcStr, ArcStr)> = Vec::new();
        for &cid in self.live_nclasses.iter() {
            let class = &self.nclasses[cid.0 as usize];
            let (mut c1, mut c2) = (0usize, 0usize);
            let mut all_ports = true;
            for &m in &class.members {
                let n = &self.nodes[m.0 as usize];
                let cell = lib.cell(n.cell);
                if cell.objects()[n.object].kind != ObjectKind::Port {
                    all_ports = false;
                    break;
                }
                match n.graph {
                    Graph::One => c1 += 1,
                    Graph::Two => c2 += 1,
                }
            }
            if !all_ports || c1 != c2 || c1 < 2 {
                continue;
            }
            for graph in [Graph::One, Graph::Two] {
                let members: Vec<_> = class
                    .members
                    .iter()
                    .filter(|&&m| self.nodes[m.0 as usize].graph == graph)
                    .collect();
                if let Some((&first, rest)) = members.split_first() {
                    let n0 = &self.nodes[first.0 as usize];
                    let cellname = lib.cell(n0.cell).name().clone();
                    let p0 = lib.cell(n0.cell).objects()[n0.object].name.clone();
                    for &&m in rest {
                        let n = &self.nodes[m.0 as usize];
                        let p = lib.cell(n.cell).objects()[n.object].name.clone();
                        setups.push((cellname.clone(), p0.clone(), p.clone()));
                    }
                }
            }
        }
        for (model, p1, p2) in setups {
            self.permute_setup(lib, &model, &p1, &p2)?;
        }
        Ok(())
    }

    /// Count of balanced multi-member classes at the current point.
    pub fn automorphism_count(&self) -> u32 {
        let mut n = 0;
        for &cid in self.live_eclasses.iter() {
            let class = &self.eclasses[cid.0 as usize];
            if class.legal && class.members.len() > 2 {
                n += 1;
            }
        }
        for &cid in self.live_nclasses.iter() {
            let class = &self.nclasses[cid.0 as usize];
            if class.legal && class.members.len() > 2 {
                n += 1;
            }
        }
        n
    }

    /// The matched counterpart of a named node in circuit 1.
    pub fn matching_node(&self, lib: &Library, name: &str) -> Option<ArcStr> {
        let (c1, _) = self.circuit1?;
        let cell = lib.cell(c1);
        let idx = cell.lookup_object(name)?;
        let net = cell.objects()[idx].node;
        let nid = *self.node_map[0].get(&net)?;
        let class = &self.nclasses[self.nodes[nid.0 as usize].class.0 as usize];
        let mut other = None;
        let (mut c1n, mut c2n) = (0usize, 0usize);
        for &m in &class.members {
            match self.nodes[m.0 as usize].graph {
                Graph::One => c1n += 1,
                Graph::Two => {
                    c2n += 1;
                    other = Some(m);
                }
            }
        }
        if c1n == 1 && c2n == 1 {
            other.map(|m| self.node_name(lib, m))
        } else {
            None
        }
    }

    /// The matched counterpart of a named element in circuit 1.
    pub fn matching_element(&self, lib: &Library, name: &str) -> Option<ArcStr> {
        let (c1, _) = self.circuit1?;
        let cell = lib.cell(c1);
        for e in self.elements.iter() {
            if e.graph != Graph::One || e.cell != c1 {
                continue;
            }
            let ob = &cell.objects()[e.object];
            let matches = ob
                .instance
                .as_deref()
                .map(|inst| {
                    if cell.nocase() {
                        inst.eq_ignore_ascii_case(name)
                    } else {
                        inst == name
                    }
                })
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let class = &self.eclasses[e.class.0 as usize];
            let mut other = None;
            let (mut n1, mut n2) = (0usize, 0usize);
            for &m in &class.members {
                match self.elements[m.0 as usize].graph {
                    Graph::One => n1 += 1,
                    Graph::Two => {
                        n2 += 1;
                        other = Some(m);
                    }
                }
            }
            return if n1 == 1 && n2 == 1 {
                other.map(|m| self.element_name(lib, m))
            } else {
                None
            };
        }
        None
    }
}
