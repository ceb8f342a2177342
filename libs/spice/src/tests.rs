use crate::parser::Dialect;
use crate::{read_spice_source, write_spice};
use netlist::{DeviceClass, Library, ObjectKind, PropertyValue};

const INVERTER: &str = "
.subckt inv in out vdd gnd
Mp out in vdd vdd p w=2 l=0.5
Mn out in gnd gnd n w=1 l=0.5
.ends
";

#[test]
fn builds_inverter_into_store() {
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", INVERTER).unwrap();

    let inv = lib.lookup("inv", Some(f)).expect("inv defined");
    let cell = lib.cell(inv);
    assert_eq!(cell.class(), DeviceClass::Subcircuit);
    assert_eq!(cell.port_count(), 4);
    assert_eq!(cell.first_pins().count(), 2);

    // Auto-defined FET models with the conventional pins and keys.
    let p = lib.lookup("p", Some(f)).expect("model p defined");
    let pcell = lib.cell(p);
    assert_eq!(pcell.class(), DeviceClass::Fet);
    assert_eq!(pcell.port_count(), 4);
    assert_eq!(pcell.prop_keys.len(), 2);

    // Instance name is model + card suffix; pins wired to the ports.
    let first = cell.lookup_instance("pp").expect("instance pp");
    assert_eq!(cell.pin_run_len(first), 4);
    let drain = &cell.objects()[first];
    let out = cell.objects()[cell.lookup_object("out").unwrap()].node;
    assert_eq!(drain.node, out);

    // Properties aligned with the declared key order (length, width).
    let props = cell.property_of(first).unwrap().props.as_ref().unwrap();
    assert_eq!(props.values[0], PropertyValue::Double(0.5));
    assert_eq!(props.values[1], PropertyValue::Double(2.0));
}

#[test]
fn multiplier_emits_numbered_copies() {
    let source = "
.subckt pair a b vdd gnd
Mx a b vdd vdd p m=2 w=4 l=1
.ends
";
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", source).unwrap();
    let cell = lib.cell(lib.lookup("pair", Some(f)).unwrap());
    assert!(cell.lookup_instance("px.1").is_some());
    assert!(cell.lookup_instance("px.2").is_some());
    assert!(cell.lookup_instance("px").is_none());
    assert_eq!(cell.first_pins().count(), 2);
}

#[test]
fn placeholder_replaced_by_real_definition() {
    let source = "
.subckt top a b
Xi a b child
.ends
.subckt child p q
R1 p q 100
.ends
";
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", source).unwrap();
    let child = lib.lookup("child", Some(f)).unwrap();
    let cell = lib.cell(child);
    assert!(!cell.is_placeholder());
    // Real ports replaced the numbered placeholder pins.
    assert!(cell.has_port_named("p"));
    assert_eq!(cell.first_pins().count(), 1);
}

#[test]
fn duplicate_subckt_renamed() {
    let source = "
.subckt dup a
R1 a a 1
.ends
.subckt dup a
R1 a a 2
.ends
";
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", source).unwrap();
    assert!(lib.lookup("dup", Some(f)).is_some());
    assert!(lib.lookup("dup[[1]]", Some(f)).is_some());
}

#[test]
fn globals_become_global_objects() {
    let source = "
.global vdd!
.subckt g in
Mp in in vdd! vdd! p w=1 l=1
Mn in in gnd! gnd! n w=1 l=1
.ends
";
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", source).unwrap();
    let cell = lib.cell(lib.lookup("g", Some(f)).unwrap());
    let vdd = cell.lookup_object("vdd!").unwrap();
    assert_eq!(cell.objects()[vdd].kind, ObjectKind::Global);
    // The bang suffix marks globals even without a .GLOBAL line.
    let gnd = cell.lookup_object("gnd!").unwrap();
    assert_eq!(cell.objects()[gnd].kind, ObjectKind::Global);
}

#[test]
fn model_statement_refines_class() {
    let source = "
.model nfet NMOS
.subckt m a b vdd gnd
Mx a b gnd gnd nfet w=1 l=1
.ends
";
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", source).unwrap();
    let nfet = lib.lookup("nfet", Some(f)).unwrap();
    assert_eq!(lib.cell(nfet).class(), DeviceClass::Nmos);
}

#[test]
fn empty_file_defines_empty_cell() {
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "empty", "").unwrap();
    let top = lib.lookup("empty", Some(f)).expect("top cell defined");
    assert_eq!(lib.cell(top).objects().len(), 0);
}

#[test]
fn write_then_read_back_preserves_structure() {
    let mut lib = Library::new();
    let f = read_spice_source(&mut lib, Dialect::Spice, "a", INVERTER).unwrap();
    let inv = lib.lookup("inv", Some(f)).unwrap();

    let mut out = Vec::new();
    write_spice(&lib, inv, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains(".SUBCKT inv in out vdd gnd"));

    let mut lib2 = Library::new();
    let f2 = read_spice_source(&mut lib2, Dialect::Spice, "b", &text).unwrap();
    let inv2 = lib2.lookup("inv", Some(f2)).expect("re-read inv");
    let c1 = lib.cell(inv);
    let c2 = lib2.cell(inv2);
    assert_eq!(c1.port_count(), c2.port_count());
    assert_eq!(c1.first_pins().count(), c2.first_pins().count());

    // Property values survive the round trip.
    let first = c2
        .lookup_instance("ppp")
        .or_else(|| c2.lookup_instance("pp"))
        .expect("pmos instance");
    let props = c2.property_of(first).unwrap().props.as_ref().unwrap();
    assert!(props
        .values
        .iter()
        .any(|v| *v == PropertyValue::Double(0.5)));
}
