use arcstr::ArcStr;

use crate::*;

fn fet_cell(lib: &mut Library, file: FileId, name: &str, class: DeviceClass) -> CellId {
    let id = lib.define_cell(name, file, true);
    let cell = lib.cell_mut(id);
    for port in ["drain", "gate", "source", "bulk"] {
        cell.add_object(Object::port(port));
    }
    cell.property_double("length", 0.01);
    cell.property_double("width", 0.01);
    cell.set_class(class);
    id
}

/// A CMOS inverter: two FETs, ports in/out/vdd/gnd.
fn inverter(lib: &mut Library, file: FileId, name: &str) -> CellId {
    fet_cell(lib, file, "p", DeviceClass::Pmos);
    fet_cell(lib, file, "n", DeviceClass::Nmos);
    let inv = lib.define_cell(name, file, true);
    {
        let cell = lib.cell_mut(inv);
        for port in ["in", "out", "vdd", "gnd"] {
            cell.add_object(Object::port(port));
        }
        cell.set_class(DeviceClass::Subcircuit);
    }
    lib.instantiate(inv, "p", "p1").unwrap();
    lib.instantiate(inv, "n", "n1").unwrap();
    for (a, b) in [
        ("out", "p1/drain"),
        ("in", "p1/gate"),
        ("vdd", "p1/source"),
        ("vdd", "p1/bulk"),
        ("out", "n1/drain"),
        ("in", "n1/gate"),
        ("gnd", "n1/source"),
        ("gnd", "n1/bulk"),
    ] {
        lib.join(inv, a, b).unwrap();
    }
    inv
}

#[test]
fn instance_creates_contiguous_pin_run() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    let cell = lib.cell(inv);

    let first = cell.lookup_instance("p1").unwrap();
    assert_eq!(cell.objects()[first].kind, ObjectKind::Pin(0));
    assert_eq!(cell.pin_run_len(first), 4);
    assert_eq!(cell.objects()[first].name.as_str(), "p1/drain");
    assert_eq!(cell.objects()[first + 3].name.as_str(), "p1/bulk");

    // Exactly one first pin per instance.
    assert_eq!(cell.first_pins().count(), 2);
}

#[test]
fn join_allocates_and_renumbers() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let c = lib.define_cell("top", f, true);
    {
        let cell = lib.cell_mut(c);
        cell.add_object(Object::internal("a"));
        cell.add_object(Object::internal("b"));
        cell.add_object(Object::internal("c"));
    }
    // Both disconnected: fresh node.
    lib.join(c, "a", "b").unwrap();
    let n1 = lib.cell(c).objects()[0].node;
    assert!(n1 > 0);
    assert_eq!(lib.cell(c).objects()[1].node, n1);

    // One side connected: adopt its node.
    lib.join(c, "b", "c").unwrap();
    assert_eq!(lib.cell(c).objects()[2].node, n1);

    // Two distinct nodes: smaller number wins everywhere.
    let d = {
        let cell = lib.cell_mut(c);
        cell.add_object(Object::internal("d"));
        cell.add_object(Object::internal("e"));
        cell.alloc_node()
    };
    lib.cell_mut(c).object_mut(3).node = d;
    lib.cell_mut(c).object_mut(4).node = d;
    lib.join(c, "a", "d").unwrap();
    let cell = lib.cell(c);
    assert!(cell.objects().iter().take(5).all(|ob| ob.node == n1));
}

#[test]
fn connect_expands_wildcards() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let c = lib.define_cell("top", f, true);
    {
        let cell = lib.cell_mut(c);
        for name in ["bit0", "bit1", "bit2", "common"] {
            cell.add_object(Object::internal(name));
        }
    }
    lib.connect(c, "common", "bit*").unwrap();
    let cell = lib.cell(c);
    let common = cell.objects()[3].node;
    assert!(common > 0);
    assert!(cell.objects().iter().all(|ob| ob.node == common));

    // Unequal N-to-M is an error.
    let c2 = lib.define_cell("top2", f, true);
    {
        let cell = lib.cell_mut(c2);
        for name in ["a1", "a2", "b1", "b2", "b3"] {
            cell.add_object(Object::internal(name));
        }
    }
    assert!(matches!(
        lib.connect(c2, "a*", "b*"),
        Err(StoreError::UnequalConnectLists { .. })
    ));
}

#[test]
fn positive_nodes_connect_at_least_two_objects() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    let cell = lib.cell(inv);
    for ob in cell.objects() {
        if ob.node > 0 {
            let count = cell.objects().iter().filter(|o| o.node == ob.node).count();
            assert!(count >= 2, "node {} appears only once", ob.node);
        }
    }
}

#[test]
fn flatten_prefixes_and_seals() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    inverter(&mut lib, f, "inv");
    let top = lib.define_cell("buf", f, true);
    {
        let cell = lib.cell_mut(top);
        for port in ["in", "out", "vdd", "gnd"] {
            cell.add_object(Object::port(port));
        }
        cell.add_object(Object::internal("mid"));
        cell.set_class(DeviceClass::Subcircuit);
    }
    lib.instantiate(top, "inv", "i1").unwrap();
    lib.instantiate(top, "inv", "i2").unwrap();
    for (a, b) in [
        ("in", "i1/in"),
        ("mid", "i1/out"),
        ("mid", "i2/in"),
        ("out", "i2/out"),
        ("vdd", "i1/vdd"),
        ("gnd", "i1/gnd"),
        ("vdd", "i2/vdd"),
        ("gnd", "i2/gnd"),
    ] {
        lib.join(top, a, b).unwrap();
    }

    lib.flatten_cell("buf", Some(f)).unwrap();
    let cell = lib.cell(top);

    // All four transistors survive with path-prefixed names.
    let firsts: Vec<_> = cell.first_pins().collect();
    assert_eq!(firsts.len(), 4);
    assert!(cell.lookup_instance("i1/p1").is_some());
    assert!(cell.lookup_instance("i2/n1").is_some());

    // The two inverters share the rail nets.
    let vdd = cell.objects()[cell.lookup_object("vdd").unwrap()].node;
    let p1_src = cell.objects()[cell.lookup_object("i1/p1/source").unwrap()].node;
    let p2_src = cell.objects()[cell.lookup_object("i2/p1/source").unwrap()].node;
    assert_eq!(vdd, p1_src);
    assert_eq!(vdd, p2_src);

    // i1/out and i2/in collapsed onto the same net as mid.
    let mid = cell.objects()[cell.lookup_object("mid").unwrap()].node;
    let gate2 = cell.objects()[cell.lookup_object("i2/p1/gate").unwrap()].node;
    assert_eq!(mid, gate2);
}

#[test]
fn convert_globals_creates_port_and_parent_pins() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    fet_cell(&mut lib, f, "p", DeviceClass::Pmos);
    let child = lib.define_cell("cellA", f, true);
    {
        let cell = lib.cell_mut(child);
        cell.add_object(Object::port("in"));
        cell.add_object(Object::global("vdd!"));
        cell.set_class(DeviceClass::Subcircuit);
    }
    lib.instantiate(child, "p", "p1").unwrap();
    lib.join(child, "in", "p1/gate").unwrap();
    lib.join(child, "vdd!", "p1/source").unwrap();

    let parent = lib.define_cell("top", f, true);
    {
        let cell = lib.cell_mut(parent);
        cell.add_object(Object::port("a"));
        cell.add_object(Object::port("b"));
        cell.set_class(DeviceClass::Subcircuit);
    }
    lib.instantiate(parent, "cellA", "x1").unwrap();
    lib.instantiate(parent, "cellA", "x2").unwrap();
    lib.join(parent, "a", "x1/in").unwrap();
    lib.join(parent, "b", "x2/in").unwrap();

    lib.convert_globals("cellA", Some(f)).unwrap();

    // The child gained a port carrying the old global net, and the name
    // still resolves.
    let cell = lib.cell(child);
    assert_eq!(cell.port_count(), 2);
    let idx = cell.lookup_object("vdd!").unwrap();
    assert_eq!(cell.objects()[idx].kind, ObjectKind::Port);
    assert!(cell.objects()[idx].node > 0);

    // Each parent instance gained a connected pin, and the parent now
    // carries the global net.
    let cell = lib.cell(parent);
    let p1 = cell.lookup_object("x1/vdd!").unwrap();
    let p2 = cell.lookup_object("x2/vdd!").unwrap();
    let g = cell.lookup_object("vdd!").unwrap();
    assert!(cell.objects()[g].kind.is_global());
    assert_eq!(cell.objects()[p1].node, cell.objects()[g].node);
    assert_eq!(cell.objects()[p2].node, cell.objects()[g].node);
}

#[test]
fn class_delete_removes_instances_and_properties() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    lib.link_properties(
        inv,
        "n",
        "n1",
        &[(ArcStr::from("W"), ArcStr::from("1u"))],
    )
    .unwrap();

    lib.class_delete("n", None);
    let cell = lib.cell(inv);
    assert!(cell.lookup_instance("n1").is_none());
    assert!(cell
        .objects()
        .iter()
        .all(|ob| ob.kind != ObjectKind::Property));
    // The PMOS instance survives.
    assert!(cell.lookup_instance("p1").is_some());
}

#[test]
fn instance_rename_rewrites_models() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    lib.instance_rename("p", "pfet", None);
    let cell = lib.cell(inv);
    let first = cell.lookup_instance("p1").unwrap();
    assert_eq!(cell.objects()[first].model.as_deref(), Some("pfet"));
}

#[test]
fn lookup_respects_case_rules() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    inverter(&mut lib, f, "Inv");
    // SPICE cells are case-insensitive.
    assert!(lib.lookup("INV", Some(f)).is_some());
    assert!(lib.lookup("inv", None).is_some());

    let g = lib.register_file("other.ext");
    let exact = lib.define_cell("Case", g, false);
    assert_eq!(lib.lookup("Case", Some(g)), Some(exact));
    assert_eq!(lib.lookup("case", Some(g)), None);
}

#[test]
fn next_instance_name_skips_used_names() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    assert_eq!(lib.next_instance_name(inv, "p").as_str(), "p2");
    assert_eq!(lib.next_instance_name(inv, "q").as_str(), "q1");
}

#[test]
fn connect_all_nodes_numbers_dangling_names() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let c = lib.define_cell("top", f, true);
    {
        let cell = lib.cell_mut(c);
        cell.add_object(Object::port("a"));
        cell.add_object(Object::internal("floating"));
    }
    lib.connect_all_nodes(c);
    let cell = lib.cell(c);
    assert!(cell.objects().iter().all(|ob| ob.node > 0));
    assert_ne!(cell.objects()[0].node, cell.objects()[1].node);
}

#[test]
fn cell_rehash_renames_and_rehashes() {
    let mut lib = Library::new();
    let f = lib.register_file("test.spice");
    let inv = inverter(&mut lib, f, "inv");
    let old_hash = lib.cell(inv).class_hash();
    assert!(lib.cell_rehash("inv", "inv[[1]]", Some(f)));
    assert!(lib.lookup("inv", Some(f)).is_none());
    assert_eq!(lib.lookup("inv[[1]]", Some(f)), Some(inv));
    assert_ne!(lib.cell(inv).class_hash(), old_hash);
}
