//! Declared pin permutations and user-supplied equivalences.

use arcstr::ArcStr;
use netlist::{DeviceClass, FileId, Library};
use serde::{Deserialize, Serialize};

use crate::{CompareEngine, CompareError, Graph};

/// A declared symmetry: two pins of a device class that may be matched
/// in either order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Permutation {
    /// The device class (cell) name.
    pub model: ArcStr,
    /// The first pin name.
    pub pin1: ArcStr,
    /// The second pin name.
    pub pin2: ArcStr,
}

impl CompareEngine {
    /// Declares that two pins of a device class are permutable.
    ///
    /// The declaration is persistent: it survives engine resets and is
    /// applied to the engine state whenever a comparison starts.
    pub fn permute_setup(
        &mut self,
        lib: &Library,
        model: &str,
        pin1: &str,
        pin2: &str,
    ) -> Result<(), CompareError> {
        let id = lib.lookup(model, None).ok_or_else(|| CompareError::NoSuchCell {
            name: ArcStr::from(model),
        })?;
        let cell = lib.cell(id);
        for pin in [pin1, pin2] {
            if cell.lookup_object(pin).is_none() {
                return Err(CompareError::NoSuchPin {
                    model: ArcStr::from(model),
                    pin: ArcStr::from(pin),
                });
            }
        }
        let perm = Permutation {
            model: cell.name().clone(),
            pin1: ArcStr::from(pin1),
            pin2: ArcStr::from(pin2),
        };
        let exists = self.permutations.iter().any(|p| {
            p.model.eq_ignore_ascii_case(&perm.model)
                && ((p.pin1.eq_ignore_ascii_case(&perm.pin1)
                    && p.pin2.eq_ignore_ascii_case(&perm.pin2))
                    || (p.pin1.eq_ignore_ascii_case(&perm.pin2)
                        && p.pin2.eq_ignore_ascii_case(&perm.pin1)))
        });
        if !exists {
            self.permutations.push(perm);
        }
        Ok(())
    }

    /// Removes a declared pin permutation, making it convenient to use
    /// the defaults and declare individual exceptions.
    pub fn permute_forget(
        &mut self,
        model: &str,
        pin1: &str,
        pin2: &str,
    ) -> Result<(), CompareError> {
        self.permutations.retain(|p| {
            !(p.model.eq_ignore_ascii_case(model)
                && ((p.pin1.eq_ignore_ascii_case(pin1) && p.pin2.eq_ignore_ascii_case(pin2))
                    || (p.pin1.eq_ignore_ascii_case(pin2) && p.pin2.eq_ignore_ascii_case(pin1))))
        });
        Ok(())
    }

    /// The declared permutations.
    pub fn permutations(&self) -> &[Permutation] {
        &self.permutations
    }

    /// Declares the default drain/source permutation for every
    /// transistor class in the store.
    pub fn permute_transistors(&mut self, lib: &Library) -> usize {
        self.permute_classes(lib, &[DeviceClass::Fet, DeviceClass::Nmos, DeviceClass::Pmos])
    }

    /// Declares the endpoint permutation for every resistor class.
    pub fn permute_resistors(&mut self, lib: &Library) -> usize {
        self.permute_classes(lib, &[DeviceClass::Resistor])
    }

    /// Declares the plate permutation for every capacitor class.
    pub fn permute_capacitors(&mut self, lib: &Library) -> usize {
        self.permute_classes(lib, &[DeviceClass::Capacitor, DeviceClass::Moscap])
    }

    /// Declares all default permutations: transistors, resistors, and
    /// capacitors.
    pub fn permute_default(&mut self, lib: &Library) -> usize {
        self.permute_transistors(lib)
            + self.permute_resistors(lib)
            + self.permute_capacitors(lib)
    }

    fn permute_classes(&mut self, lib: &Library, classes: &[DeviceClass]) -> usize {
        let targets: Vec<(ArcStr, &'static str, &'static str)> = lib
            .cells()
            .filter(|(_, cell)| classes.contains(&cell.class()))
            .filter_map(|(_, cell)| {
                cell.class()
                    .default_permutation()
                    .map(|(a, b)| (cell.name().clone(), a, b))
            })
            .collect();
        let mut count = 0;
        for (model, a, b) in targets {
            if self.permute_setup(lib, &model, a, b).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Applies every declared permutation to the engine's pin magics:
    /// the two pins of each permuted pair share one magic, so
    /// refinement cannot tell them apart.
    pub fn apply_permutations(&mut self, lib: &Library) {
        for pi in 0..self.permutations.len() {
            let perm = self.permutations[pi].clone();
            for ei in 0..self.elements.len() {
                let e = &self.elements[ei];
                let cell = lib.cell(e.cell);
                let ob = &cell.objects()[e.object];
                let matches = ob
                    .model
                    .as_deref()
                    .map(|m| m.eq_ignore_ascii_case(&perm.model))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
                let run = e.pins.len();
                let mut one = None;
                let mut two = None;
                for (k, pob) in cell.objects()[e.object..e.object + run].iter().enumerate() {
                    let local = pob.pin_name();
                    if local.eq_ignore_ascii_case(&perm.pin1) && one.is_none() {
                        one = Some(self.elements[ei].pins[k].magic);
                    }
                    if local.eq_ignore_ascii_case(&perm.pin2) && two.is_none() {
                        two = Some(self.elements[ei].pins[k].magic);
                    }
                }
                let (Some(one), Some(two)) = (one, two) else {
                    tracing::warn!(
                        "class {} does not have pins {} and {}",
                        perm.model,
                        perm.pin1,
                        perm.pin2
                    );
                    continue;
                };
                for pin in self.elements[ei].pins.iter_mut() {
                    if pin.magic == one {
                        pin.magic = two;
                    }
                }
            }
        }
    }

    /// Forces two named device instances, one per circuit, to match.
    ///
    /// Both must already sit in the same equivalence class; the class
    /// is refractured with the pair separated out.
    pub fn equivalence_elements(
        &mut self,
        lib: &Library,
        name1: &str,
        name2: &str,
    ) -> Result<(), CompareError> {
        for idx in 0..self.live_eclasses.len() {
            let cid = self.live_eclasses[idx];
            let class = &self.eclasses[cid.0 as usize];
            let mut e1 = None;
            let mut e2 = None;
            for &m in &class.members {
                let e = &self.elements[m.0 as usize];
                let name = self.element_name(lib, m);
                match e.graph {
                    Graph::One if e1.is_none() && name.eq_ignore_ascii_case(name1) => {
                        e1 = Some(m);
                    }
                    Graph::Two if e2.is_none() && name.eq_ignore_ascii_case(name2) => {
                        e2 = Some(m);
                    }
                    _ => {}
                }
            }
            if e1.is_none() && e2.is_none() {
                continue;
            }
            let (Some(e1), Some(e2)) = (e1, e2) else {
                return Err(CompareError::NotInSameClass {
                    name1: ArcStr::from(name1),
                    name2: ArcStr::from(name2),
                });
            };
            // Separate the pair by hash and refracture this class.
            let members = std::mem::take(&mut self.eclasses[cid.0 as usize].members);
            for &m in &members {
                self.elements[m.0 as usize].hash = u64::from(m == e1 || m == e2);
            }
            self.live_eclasses.retain(|&c| c != cid);
            let mut pair = Vec::new();
            let mut rest = Vec::new();
            for m in members {
                if m == e1 || m == e2 {
                    pair.push(m);
                } else {
                    rest.push(m);
                }
            }
            self.install_eclass(pair, true);
            if !rest.is_empty() {
                self.install_eclass(rest, true);
            }
            return Ok(());
        }
        Err(CompareError::NotInSameClass {
            name1: ArcStr::from(name1),
            name2: ArcStr::from(name2),
        })
    }

    /// Forces two named nodes, one per circuit, to match.
    pub fn equivalence_nodes(
        &mut self,
        lib: &Library,
        name1: &str,
        name2: &str,
    ) -> Result<(), CompareError> {
        let (c1, _) = self.circuit1.ok_or(CompareError::NotInitialized)?;
        let (c2, _) = self.circuit2.ok_or(CompareError::NotInitialized)?;
        let net1 = {
            let cell = lib.cell(c1);
            let idx = cell.lookup_object(name1).ok_or_else(|| CompareError::NoSuchObject {
                name: ArcStr::from(name1),
                cell: cell.name().clone(),
            })?;
            cell.objects()[idx].node
        };
        let net2 = {
            let cell = lib.cell(c2);
            let idx = cell.lookup_object(name2).ok_or_else(|| CompareError::NoSuchObject {
                name: ArcStr::from(name2),
                cell: cell.name().clone(),
            })?;
            cell.objects()[idx].node
        };
        let n1 = self.node_map[0].get(&net1).copied();
        let n2 = self.node_map[1].get(&net2).copied();
        let (Some(n1), Some(n2)) = (n1, n2) else {
            return Err(CompareError::NotInSameClass {
                name1: ArcStr::from(name1),
                name2: ArcStr::from(name2),
            });
        };

        let cid = self.nodes[n1.0 as usize].class;
        if self.nodes[n2.0 as usize].class != cid {
            return Err(CompareError::NotInSameClass {
                name1: ArcStr::from(name1),
                name2: ArcStr::from(name2),
            });
        }
        let members = std::mem::take(&mut self.nclasses[cid.0 as usize].members);
        for &m in &members {
            self.nodes[m.0 as usize].hash = u64::from(m == n1 || m == n2);
        }
        self.live_nclasses.retain(|&c| c != cid);
        let mut pair = Vec::new();
        let mut rest = Vec::new();
        for m in members {
            if m == n1 || m == n2 {
                pair.push(m);
            } else {
                rest.push(m);
            }
        }
        self.install_nclass(pair, true);
        if !rest.is_empty() {
            self.install_nclass(rest, true);
        }
        Ok(())
    }

    /// Declares two device classes equivalent.
    ///
    /// With both files given, the second class's hash is overwritten by
    /// the first's, so their instances initially collide. With a file
    /// unresolved, the correspondence is recorded by name and applied
    /// across files as the compare queue is built; when ambiguous, the
    /// first file wins.
    pub fn equivalence_classes(
        &mut self,
        lib: &mut Library,
        name1: &str,
        file1: Option<FileId>,
        name2: &str,
        file2: Option<FileId>,
    ) -> Result<(), CompareError> {
        match (file1, file2) {
            (Some(f1), Some(f2)) => {
                let id1 = lib.lookup(name1, Some(f1)).ok_or_else(|| CompareError::NoSuchCell {
                    name: ArcStr::from(name1),
                })?;
                let id2 = lib.lookup(name2, Some(f2)).ok_or_else(|| CompareError::NoSuchCell {
                    name: ArcStr::from(name2),
                })?;
                let hash = lib.cell(id1).class_hash();
                lib.cell_mut(id2).set_class_hash(hash);
            }
            _ => {
                self.correspondences
                    .push((ArcStr::from(name1), ArcStr::from(name2)));
            }
        }
        Ok(())
    }

    /// Finds the class correspondence partner of a cell name, if one
    /// was declared.
    pub(crate) fn prematched_class(&self, name: &str) -> Option<&ArcStr> {
        self.correspondences.iter().find_map(|(a, b)| {
            if a.eq_ignore_ascii_case(name) {
                Some(b)
            } else if b.eq_ignore_ascii_case(name) {
                Some(a)
            } else {
                None
            }
        })
    }
}
