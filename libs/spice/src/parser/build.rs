//! Populate the netlist store from a parsed SPICE AST.
//!
//! Device models referenced by cards are auto-defined as primitive
//! cells with the conventional pin names and property keys; unknown
//! subcircuit calls produce placeholder cells with numbered pins that a
//! later real definition replaces.

use std::collections::HashSet;

use arcstr::ArcStr;
use netlist::{CellId, DeviceClass, FileId, Library, Object, SEPARATOR};
use unicase::UniCase;

use super::{Ast, Component, Elem, Instance, ParsedSpice, Subckt, Substr, TwoTerminal};

/// Builds netlist-store cells from a SPICE AST.
pub struct StoreBuilder<'a> {
    lib: &'a mut Library,
    file: FileId,
    /// Names declared `.GLOBAL`, case-folded.
    globals: HashSet<UniCase<String>>,
    top_name: ArcStr,
    top: Option<CellId>,
}

impl<'a> StoreBuilder<'a> {
    /// Builds the parsed netlist into the library, returning the tag of
    /// the newly-registered file.
    pub fn build(lib: &'a mut Library, parsed: &ParsedSpice) -> FileId {
        let file_name = parsed
            .root
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| parsed.name.to_string());
        let file = lib.register_file(&file_name);
        let mut builder = Self {
            lib,
            file,
            globals: HashSet::new(),
            top_name: parsed.name.clone(),
            top: None,
        };
        builder.collect_globals(&parsed.ast);
        for elem in parsed.ast.elems.iter() {
            match elem {
                Elem::Subckt(s) => builder.build_subckt(s),
                Elem::Component(c) => {
                    let top = builder.ensure_top();
                    builder.build_component(top, c);
                }
                Elem::Global(_) => {}
                Elem::Model { .. } => {}
            }
        }
        for elem in parsed.ast.elems.iter() {
            if let Elem::Model { name, kind } = elem {
                builder.apply_model(name, kind);
            }
        }
        // An empty input still defines an (empty) cell.
        if parsed.ast.elems.is_empty() {
            builder.ensure_top();
        }
        file
    }

    fn collect_globals(&mut self, ast: &Ast) {
        for elem in ast.elems.iter() {
            match elem {
                Elem::Global(nodes) => {
                    for n in nodes {
                        self.globals.insert(UniCase::new(n.to_string()));
                    }
                }
                Elem::Subckt(s) => {
                    for n in s.globals.iter() {
                        self.globals.insert(UniCase::new(n.to_string()));
                    }
                }
                _ => {}
            }
        }
    }

    fn is_global_name(&self, name: &str) -> bool {
        name.ends_with('!') || self.globals.contains(&UniCase::new(name.to_string()))
    }

    fn ensure_top(&mut self) -> CellId {
        if let Some(top) = self.top {
            return top;
        }
        let id = self
            .lib
            .reopen_or_define(self.top_name.clone(), self.file, true);
        self.lib.cell_mut(id).set_class(DeviceClass::Subcircuit);
        self.top = Some(id);
        id
    }

    /// Defines a subcircuit cell, handling duplicate names.
    ///
    /// A placeholder created for a forward reference is replaced in
    /// place; a genuine duplicate is renamed `name[[n]]`.
    fn build_subckt(&mut self, s: &Subckt) {
        let mut name = ArcStr::from(s.name.as_str());
        if let Some(existing) = self.lib.lookup(&name, Some(self.file)) {
            if !self.lib.cell(existing).is_placeholder() {
                let mut n = 1;
                loop {
                    let renamed = arcstr::format!("{}[[{}]]", s.name, n);
                    if self.lib.lookup(&renamed, Some(self.file)).is_none() {
                        self.lib
                            .input_warning(format!("duplicate subcircuit `{}`; renamed `{}`", name, renamed));
                        name = renamed;
                        break;
                    }
                    n += 1;
                }
            }
        }
        let id = self.lib.define_cell(name, self.file, true);
        {
            let cell = self.lib.cell_mut(id);
            cell.set_class(DeviceClass::Subcircuit);
            for port in s.ports.iter() {
                cell.add_object(Object::port(port.as_str()));
            }
            // Subcircuit parameters become exact-match property keys.
            for (k, _) in s.params.iter() {
                cell.property_double(k.as_str(), 0.0);
            }
        }
        for c in s.components.iter() {
            self.build_component(id, c);
        }
        for (a, b) in s.connects.iter() {
            self.ensure_node(id, a);
            self.ensure_node(id, b);
            if let Err(err) = self.lib.join(id, a, b) {
                self.lib.input_warning(err);
            }
        }
    }

    /// Makes sure a node token names an object in the cell.
    fn ensure_node(&mut self, cell: CellId, name: &Substr) {
        if self.lib.cell(cell).lookup_object(name).is_some() {
            return;
        }
        let ob = if self.is_global_name(name) {
            Object::global(name.as_str())
        } else {
            Object::internal(name.as_str())
        };
        self.lib.cell_mut(cell).add_object(ob);
    }

    fn build_component(&mut self, cell: CellId, c: &Component) {
        match c {
            Component::Mos(mos) => {
                self.ensure_device_model(&mos.model, DeviceClass::Fet, &[
                    "drain", "gate", "source", "bulk",
                ], &["length", "width"]);
                let kvpairs = collect_kvpairs(mos.params.iter(), &[("l", "length"), ("w", "width")]);
                self.emit_device(
                    cell,
                    &mos.model,
                    &mos.name,
                    &[
                        ("drain", &mos.d),
                        ("gate", &mos.g),
                        ("source", &mos.s),
                        ("bulk", &mos.b),
                    ],
                    kvpairs,
                    device_count(&mos.params),
                );
            }
            Component::Bjt(bjt) => {
                let ports: &[&str] = if bjt.substrate.is_some() {
                    &["collector", "base", "emitter", "substrate"]
                } else {
                    &["collector", "base", "emitter"]
                };
                self.ensure_device_model(&bjt.model, DeviceClass::Bjt, ports, &[]);
                let kvpairs = collect_kvpairs(bjt.params.iter(), &[]);
                let mut nodes = vec![
                    ("collector", &bjt.collector),
                    ("base", &bjt.base),
                    ("emitter", &bjt.emitter),
                ];
                if let Some(sub) = &bjt.substrate {
                    nodes.push(("substrate", sub));
                }
                self.emit_device(
                    cell,
                    &bjt.model,
                    &bjt.name,
                    &nodes,
                    kvpairs,
                    device_count(&bjt.params),
                );
            }
            Component::Diode(d) => {
                self.ensure_device_model(&d.model, DeviceClass::Diode, &["anode", "cathode"], &[]);
                let kvpairs = collect_kvpairs(d.params.iter(), &[]);
                self.emit_device(
                    cell,
                    &d.model,
                    &d.name,
                    &[("anode", &d.pos), ("cathode", &d.neg)],
                    kvpairs,
                    device_count(&d.params),
                );
            }
            Component::Res(r) => {
                self.build_two_terminal(cell, r, "res", DeviceClass::Resistor, ("end_a", "end_b"));
            }
            Component::Cap(c2) => {
                self.build_two_terminal(cell, c2, "cap", DeviceClass::Capacitor, ("top", "bottom"));
            }
            Component::Ind(l) => {
                self.build_two_terminal(cell, l, "ind", DeviceClass::Inductor, ("end_a", "end_b"));
            }
            Component::Xline(t) => {
                let model = t
                    .model
                    .as_ref()
                    .map(|m| ArcStr::from(m.as_str()))
                    .unwrap_or_else(|| arcstr::literal!("xline"));
                self.ensure_device_model_named(
                    &model,
                    DeviceClass::Xline,
                    &["node1", "node2", "node3", "node4"],
                    &[],
                );
                let kvpairs = collect_kvpairs(t.params.iter(), &[]);
                self.emit_device_named(
                    cell,
                    &model,
                    &t.name,
                    &[
                        ("node1", &t.nodes[0]),
                        ("node2", &t.nodes[1]),
                        ("node3", &t.nodes[2]),
                        ("node4", &t.nodes[3]),
                    ],
                    kvpairs,
                    device_count(&t.params),
                );
            }
            Component::Instance(inst) => self.build_instance(cell, inst),
        }
    }

    fn build_two_terminal(
        &mut self,
        cell: CellId,
        dev: &TwoTerminal,
        default_model: &str,
        class: DeviceClass,
        pins: (&'static str, &'static str),
    ) {
        let model = dev
            .model
            .as_ref()
            .map(|m| ArcStr::from(m.as_str()))
            .unwrap_or_else(|| ArcStr::from(default_model));
        self.ensure_device_model_named(&model, class, &[pins.0, pins.1], &["value"]);
        let mut kvpairs = Vec::new();
        if let Some(v) = &dev.value {
            kvpairs.push((ArcStr::from("value"), ArcStr::from(v.as_str())));
        }
        kvpairs.extend(collect_kvpairs(dev.params.iter(), &[]));
        self.emit_device_named(
            cell,
            &model,
            &dev.name,
            &[(pins.0, &dev.pos), (pins.1, &dev.neg)],
            kvpairs,
            device_count(&dev.params),
        );
    }

    fn ensure_device_model(
        &mut self,
        model: &Substr,
        class: DeviceClass,
        ports: &[&str],
        double_props: &[&str],
    ) {
        let model = ArcStr::from(model.as_str());
        self.ensure_device_model_named(&model, class, ports, double_props);
    }

    /// Treat each distinct model name as its own device class; define
    /// the cell on first reference.
    fn ensure_device_model_named(
        &mut self,
        model: &ArcStr,
        class: DeviceClass,
        ports: &[&str],
        double_props: &[&str],
    ) {
        if self.lib.lookup(model, Some(self.file)).is_some() {
            return;
        }
        let id = self.lib.define_cell(model.clone(), self.file, true);
        let cell = self.lib.cell_mut(id);
        for port in ports {
            cell.add_object(Object::port(*port));
        }
        for key in double_props {
            cell.property_double(*key, 0.01);
        }
        cell.set_class(class);
    }

    fn emit_device(
        &mut self,
        cell: CellId,
        model: &Substr,
        card_name: &Substr,
        nodes: &[(&str, &Substr)],
        kvpairs: Vec<(ArcStr, ArcStr)>,
        ndev: u32,
    ) {
        let model = ArcStr::from(model.as_str());
        self.emit_device_named(cell, &model, card_name, nodes, kvpairs, ndev);
    }

    /// Emits `ndev` copies of a device instance, wiring each pin to its
    /// node and attaching the property record.
    ///
    /// A single device is named `<model><suffix>`; multiple devices get
    /// `.1`, `.2`, ... appended.
    fn emit_device_named(
        &mut self,
        cell: CellId,
        model: &ArcStr,
        card_name: &Substr,
        nodes: &[(&str, &Substr)],
        kvpairs: Vec<(ArcStr, ArcStr)>,
        ndev: u32,
    ) {
        for (_, node) in nodes {
            self.ensure_node(cell, node);
        }
        let suffix = &card_name[1.min(card_name.len())..];
        let base = format!("{}{}", model, suffix);
        for k in 1..=ndev.max(1) {
            let inst = if ndev > 1 {
                ArcStr::from(format!("{}.{}", base, k))
            } else {
                ArcStr::from(base.clone())
            };
            if let Err(err) = self.lib.instantiate(cell, model, &inst) {
                self.lib.input_warning(err);
                return;
            }
            for (portname, node) in nodes {
                let pin = format!("{}{}{}", inst, SEPARATOR, portname);
                if let Err(err) = self.lib.join(cell, node, &pin) {
                    self.lib.input_warning(err);
                }
            }
            if !kvpairs.is_empty() {
                if let Err(err) = self.lib.link_properties(cell, model, &inst, &kvpairs) {
                    self.lib.input_warning(err);
                }
            }
        }
    }

    /// Builds a subcircuit call, creating a numbered-pin placeholder if
    /// the child has not been defined yet.
    fn build_instance(&mut self, cell: CellId, inst: &Instance) {
        let child = ArcStr::from(inst.child.as_str());
        let child_id = self.lib.lookup(&child, Some(self.file));
        let child_id = match child_id {
            Some(id) => id,
            None => {
                self.lib.input_warning(format!(
                    "call to undefined subcircuit `{}`; creating placeholder",
                    child
                ));
                let id = self.lib.define_cell(child.clone(), self.file, true);
                let cell = self.lib.cell_mut(id);
                for i in 1..=inst.ports.len() {
                    cell.add_object(Object::port(format!("pin{}", i)));
                }
                cell.set_class(DeviceClass::Subcircuit);
                cell.set_placeholder(true);
                id
            }
        };
        let child_ports: Vec<ArcStr> = self
            .lib
            .cell(child_id)
            .ports()
            .map(|(_, ob)| ob.name.clone())
            .collect();
        if child_ports.len() != inst.ports.len() {
            self.lib.input_warning(format!(
                "instance `{}` of `{}` connects {} pins, subcircuit has {}",
                inst.name,
                child,
                inst.ports.len(),
                child_ports.len()
            ));
        }

        for node in inst.ports.iter() {
            self.ensure_node(cell, node);
        }
        let suffix = &inst.name[1.min(inst.name.len())..];
        let ndev = device_count(&inst.params);
        for k in 1..=ndev.max(1) {
            let iname = if ndev > 1 {
                ArcStr::from(format!("{}.{}", suffix, k))
            } else {
                ArcStr::from(suffix)
            };
            if let Err(err) = self.lib.instantiate(cell, &child, &iname) {
                self.lib.input_warning(err);
                return;
            }
            for (portname, node) in child_ports.iter().zip(inst.ports.iter()) {
                let pin = format!("{}{}{}", iname, SEPARATOR, portname);
                if let Err(err) = self.lib.join(cell, node, &pin) {
                    self.lib.input_warning(err);
                }
            }
            let kvpairs = collect_kvpairs(inst.params.iter(), &[]);
            if !kvpairs.is_empty() {
                if let Err(err) = self.lib.link_properties(cell, &child, &iname, &kvpairs) {
                    self.lib.input_warning(err);
                }
            }
        }
    }

    /// Applies a `.MODEL` statement, refining the device class of the
    /// named model cell.
    fn apply_model(&mut self, name: &Substr, kind: &Substr) {
        let Some(id) = self.lib.lookup(name, Some(self.file)) else {
            return;
        };
        let kind = kind.to_uppercase();
        let class = if kind.starts_with("NMOS") {
            DeviceClass::Nmos
        } else if kind.starts_with("PMOS") {
            DeviceClass::Pmos
        } else if kind.starts_with("NPN") {
            DeviceClass::Npn
        } else if kind.starts_with("PNP") {
            DeviceClass::Pnp
        } else if kind.starts_with("R") {
            DeviceClass::Resistor
        } else if kind.starts_with("C") {
            DeviceClass::Capacitor
        } else if kind.starts_with("D") {
            DeviceClass::Diode
        } else {
            return;
        };
        if let Err(err) = self.lib.set_cell_class(id, class) {
            self.lib.input_warning(err);
        }
    }
}

/// Extracts the `M=` device multiplier from a parameter list.
fn device_count(params: &super::Params) -> u32 {
    params
        .get("m")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|f| f.round().max(1.0) as u32)
        .unwrap_or(1)
}

/// Collects card parameters into property pairs, applying key aliases
/// (e.g. `L` to `length`) and dropping the `M=` multiplier.
fn collect_kvpairs<'b>(
    params: impl Iterator<Item = (&'b Substr, &'b Substr)>,
    aliases: &[(&str, &str)],
) -> Vec<(ArcStr, ArcStr)> {
    let mut out = Vec::new();
    for (k, v) in params {
        if k.eq_ignore_ascii_case("m") {
            continue;
        }
        let key = aliases
            .iter()
            .find(|(from, _)| k.eq_ignore_ascii_case(from))
            .map(|(_, to)| ArcStr::from(*to))
            .unwrap_or_else(|| ArcStr::from(k.as_str()));
        out.push((key, ArcStr::from(v.as_str())));
    }
    out
}
