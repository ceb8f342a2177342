//! SPICE netlist reader and exporter for the netlist store.
#![warn(missing_docs)]

use std::collections::HashSet;
use std::io::prelude::*;
use std::path::Path;

use itertools::Itertools;
use netlist::{CellId, DeviceClass, FileId, Library};

pub mod parser;

pub use parser::build::StoreBuilder;
pub use parser::{Dialect, ParsedSpice, Parser, ParserError};

/// An error reading or writing a SPICE netlist.
#[derive(Debug, thiserror::Error)]
pub enum SpiceError {
    /// The input could not be parsed.
    #[error(transparent)]
    Parser(#[from] ParserError),
    /// An I/O error while writing.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads a SPICE file into the library.
///
/// Returns the file tag of the newly-read netlist.
pub fn read_spice(
    lib: &mut Library,
    dialect: Dialect,
    path: impl AsRef<Path>,
) -> Result<FileId, SpiceError> {
    let parsed = Parser::parse_file(dialect, path)?;
    Ok(StoreBuilder::build(lib, &parsed))
}

/// Reads SPICE source text into the library under the given netlist
/// name.
pub fn read_spice_source(
    lib: &mut Library,
    dialect: Dialect,
    name: &str,
    source: &str,
) -> Result<FileId, SpiceError> {
    let mut parsed = Parser::parse(dialect, source)?;
    parsed.name = arcstr::ArcStr::from(name);
    Ok(StoreBuilder::build(lib, &parsed))
}

/// The SPICE card prefix letter for a device class.
fn card_letter(class: DeviceClass) -> Option<char> {
    Some(match class {
        DeviceClass::Nmos | DeviceClass::Pmos | DeviceClass::Fet => 'M',
        DeviceClass::Npn | DeviceClass::Pnp | DeviceClass::Bjt => 'Q',
        DeviceClass::Diode => 'D',
        DeviceClass::Resistor => 'R',
        DeviceClass::Capacitor | DeviceClass::Moscap => 'C',
        DeviceClass::Inductor => 'L',
        DeviceClass::Xline => 'T',
        _ => return None,
    })
}

/// Writes the named cell and all subcircuits below it as a SPICE
/// netlist, sub-cells first.
pub fn write_spice<W: Write>(lib: &Library, top: CellId, out: &mut W) -> Result<(), SpiceError> {
    writeln!(out, "* SPICE netlist written by netcmp")?;
    writeln!(out, "* Cell: {}", lib.cell(top).name())?;
    writeln!(out)?;
    let mut visited = HashSet::new();
    write_cell_recursive(lib, top, &mut visited, out)?;
    Ok(())
}

fn write_cell_recursive<W: Write>(
    lib: &Library,
    id: CellId,
    visited: &mut HashSet<CellId>,
    out: &mut W,
) -> Result<(), SpiceError> {
    if !visited.insert(id) {
        return Ok(());
    }
    let cell = lib.cell(id);
    // Emit children before their parents.
    for first in cell.first_pins() {
        let ob = &cell.objects()[first];
        let Some(model) = &ob.model else { continue };
        if let Some(child) = lib.lookup(model, Some(cell.file())) {
            if child != id && lib.cell(child).class().is_flattenable() {
                write_cell_recursive(lib, child, visited, out)?;
            }
        }
    }
    write_subckt(lib, id, out)?;
    Ok(())
}

/// The display name of a pin's net: the net name if the pin is
/// connected, else the pin's own name.
fn net_name<'a>(cell: &'a netlist::Cell, pin: &'a netlist::Object) -> &'a str {
    cell.node_name(pin.node)
        .map(|n| n.as_str())
        .unwrap_or(pin.name.as_str())
}

fn write_subckt<W: Write>(lib: &Library, id: CellId, out: &mut W) -> Result<(), SpiceError> {
    let cell = lib.cell(id);
    let ports = cell.ports().map(|(_, p)| p.name.as_str()).join(" ");
    writeln!(out, ".SUBCKT {} {}", cell.name(), ports)?;

    for first in cell.first_pins() {
        let ob = &cell.objects()[first];
        let run = cell.pin_run_len(first);
        let inst = ob
            .instance
            .as_ref()
            .map(|i| i.as_str())
            .unwrap_or(ob.name.as_str());
        let model = ob.model.as_ref().map(|m| m.as_str()).unwrap_or("");
        let class = lib
            .lookup(model, Some(cell.file()))
            .map(|mid| lib.cell(mid).class())
            .unwrap_or(DeviceClass::Undefined);

        match card_letter(class) {
            Some(letter) => {
                write!(out, "{}{}", letter, inst)?;
                for pin in &cell.objects()[first..first + run] {
                    write!(out, " {}", net_name(cell, pin))?;
                }
                // R/C/L values print bare; everything else keeps its
                // key. Modelled devices print the model name.
                let props = cell.property_of(first).and_then(|ob| ob.props.as_deref());
                let bare_value = matches!(letter, 'R' | 'C' | 'L');
                let mut value = None;
                if bare_value {
                    if let Some(props) = props {
                        value = props
                            .raw
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case("value"))
                            .map(|(_, v)| v.clone());
                    }
                }
                match (&value, letter) {
                    (Some(v), _) => write!(out, " {}", v)?,
                    (None, 'M' | 'Q' | 'D' | 'T') => write!(out, " {}", model)?,
                    // A modelled R/C prints its model in place of a
                    // value.
                    (None, _) if !matches!(model, "res" | "cap" | "ind") => {
                        write!(out, " {}", model)?
                    }
                    _ => {}
                }
                if let Some(props) = props {
                    for (k, v) in props.raw.iter() {
                        if bare_value && k.eq_ignore_ascii_case("value") {
                            continue;
                        }
                        write!(out, " {}={}", k, v)?;
                    }
                }
                writeln!(out)?;
            }
            None => {
                // Subcircuit call.
                write!(out, "X{}", inst)?;
                for pin in &cell.objects()[first..first + run] {
                    write!(out, " {}", net_name(cell, pin))?;
                }
                write!(out, " {}", model)?;
                if let Some(props) = cell.property_of(first).and_then(|ob| ob.props.as_deref()) {
                    for (k, v) in props.raw.iter() {
                        write!(out, " {}={}", k, v)?;
                    }
                }
                writeln!(out)?;
            }
        }
    }
    writeln!(out, ".ENDS {}", cell.name())?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests;
