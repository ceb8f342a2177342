use crate::{CompareEngine, MatchStatus};
use netlist::Library;
use spice::parser::Dialect;
use spice::read_spice_source;

const INV: &str = "
.subckt inv in out vdd gnd
Mp out in vdd vdd p w=2 l=0.5
Mn out in gnd gnd n w=1 l=0.5
.ends
";

const INV_PINSWAP: &str = "
.subckt inv in out vdd gnd
Mp vdd in out vdd p w=2 l=0.5
Mn out in gnd gnd n w=1 l=0.5
.ends
";

const INV_SHORT_PMOS: &str = "
.subckt inv in out vdd gnd
Mp out in vdd vdd p w=2 l=0.25
Mn out in gnd gnd n w=1 l=0.5
.ends
";

const NAND4: &str = "
.subckt nand4 a b c d out vdd gnd
Mp1 out a vdd vdd p w=4 l=1
Mp2 out b vdd vdd p w=4 l=1
Mp3 out c vdd vdd p w=4 l=1
Mp4 out d vdd vdd p w=4 l=1
Mn1 out a n1 gnd n w=2 l=1
Mn2 n1 b n2 gnd n w=2 l=1
Mn3 n2 c n3 gnd n w=2 l=1
Mn4 n3 d gnd gnd n w=2 l=1
.ends
";

// Same gate with two of the series NMOS devices written with their
// channel terminals exchanged.
const NAND4_REORDERED: &str = "
.subckt nand4 a b c d out vdd gnd
Mp1 out a vdd vdd p w=4 l=1
Mp2 out b vdd vdd p w=4 l=1
Mp3 out c vdd vdd p w=4 l=1
Mp4 out d vdd vdd p w=4 l=1
Mn1 out a n1 gnd n w=2 l=1
Mn2 n2 b n1 gnd n w=2 l=1
Mn3 n3 c n2 gnd n w=2 l=1
Mn4 n3 d gnd gnd n w=2 l=1
.ends
";

fn load(name: &str, source: &str, lib: &mut Library) -> netlist::FileId {
    read_spice_source(lib, Dialect::Spice, name, source).unwrap()
}

fn compare_cells(
    engine: &mut CompareEngine,
    lib: &mut Library,
    c1: (&str, netlist::FileId),
    c2: (&str, netlist::FileId),
) -> MatchStatus {
    engine
        .start_compare(lib, c1.0, Some(c1.1), c2.0, Some(c2.1))
        .unwrap();
    engine.run_converge();
    let status = engine.verify_matching(lib);
    match status {
        MatchStatus::Automorphisms(_) => engine.resolve_all(lib),
        status => status,
    }
}

#[test]
fn identical_cell_matches_itself() {
    let mut lib = Library::new();
    let f = load("a", INV, &mut lib);
    let mut engine = CompareEngine::new();
    let status = compare_cells(&mut engine, &mut lib, ("inv", f), ("inv", f));
    assert_eq!(status, MatchStatus::Unique);
    assert!(!engine.property_error());
    assert!(engine.check_consistency());
}

#[test]
fn pin_swapped_inverter_needs_permutation() {
    let mut lib = Library::new();
    let f1 = load("a", INV, &mut lib);
    let f2 = load("b", INV_PINSWAP, &mut lib);

    // Without the drain/source permutation the rails disagree.
    let mut engine = CompareEngine::new();
    let status = compare_cells(&mut engine, &mut lib, ("inv", f1), ("inv", f2));
    assert_eq!(status, MatchStatus::Illegal);

    // With it, the match is unique and free of automorphisms.
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("inv", f1), ("inv", f2));
    assert_eq!(status, MatchStatus::Unique);
    assert_eq!(engine.automorphism_count(), 0);
    assert!(!engine.property_error());
}

#[test]
fn property_mismatch_flags_but_still_matches() {
    let mut lib = Library::new();
    let f1 = load("a", INV, &mut lib);
    let f2 = load("b", INV_SHORT_PMOS, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("inv", f1), ("inv", f2));
    assert_eq!(status, MatchStatus::Unique);
    assert!(engine.property_error());
}

#[test]
fn reordered_series_stack_matches_with_permutation() {
    let mut lib = Library::new();
    let f1 = load("a", NAND4, &mut lib);
    let f2 = load("b", NAND4_REORDERED, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("nand4", f1), ("nand4", f2));
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn nand_vs_nor_is_illegal_and_hierarchy_recovers() {
    const FILE1: &str = "
.subckt gate a b out vdd gnd
Mp1 out a vdd vdd p w=2 l=1
Mp2 out b vdd vdd p w=2 l=1
Mn1 out a mid gnd n w=1 l=1
Mn2 mid b gnd gnd n w=1 l=1
.ends
.subckt top a b out vdd gnd
X1 a b out vdd gnd gate
.ends
";
    const FILE2: &str = "
.subckt gate a b out vdd gnd
Mp1 out a mid vdd p w=2 l=1
Mp2 mid b vdd vdd p w=2 l=1
Mn1 out a gnd gnd n w=1 l=1
Mn2 out b gnd gnd n w=1 l=1
.ends
.subckt top a b out vdd gnd
X1 a b out vdd gnd gate
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE1, &mut lib);
    let f2 = load("b", FILE2, &mut lib);

    // Direct comparison proves non-isomorphism.
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("gate", f1), ("gate", f2));
    assert_eq!(status, MatchStatus::Illegal);

    // Hierarchical comparison flattens the unmatched gates and
    // re-attempts at the parent level; the circuits still differ.
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = engine
        .compare_hierarchical(&mut lib, "top", Some(f1), "top", Some(f2))
        .unwrap();
    assert_eq!(status, MatchStatus::Illegal);

    // The gates were flattened into the parents.
    let top1 = lib.lookup("top", Some(f1)).unwrap();
    let cell = lib.cell(top1);
    assert!(cell
        .first_pins()
        .all(|i| cell.objects()[i].model.as_deref() != Some("gate")));
    let gate1 = lib.lookup("gate", Some(f1)).unwrap();
    assert!(!lib.cell(gate1).matched());
}

#[test]
fn hierarchical_compare_lifts_subcell_match() {
    const FILE1: &str = "
.subckt g in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt a in out vdd gnd
X1 in mid vdd gnd g
X2 mid out vdd gnd g
.ends
";
    const FILE2: &str = "
.subckt g in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt a in out vdd gnd
X1 in mid vdd gnd g
Mp out mid vdd vdd p w=2 l=1
Mn out mid gnd gnd n w=1 l=1
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE1, &mut lib);
    let f2 = load("b", FILE2, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = engine
        .compare_hierarchical(&mut lib, "a", Some(f1), "a", Some(f2))
        .unwrap();
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn converted_global_matches_manual_port() {
    const FILE1: &str = "
.global vdd!
.subckt cella in out gnd
Mp out in vdd! vdd! p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt top1 a b gnd
X1 a mid gnd cella
X2 mid b gnd cella
.ends
";
    const FILE2: &str = "
.subckt cellb in out gnd vddp
Mp out in vddp vddp p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt top2 a b gnd vdd2
X1 a mid gnd vdd2 cellb
X2 mid b gnd vdd2 cellb
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE1, &mut lib);
    let f2 = load("b", FILE2, &mut lib);

    lib.convert_globals("cella", Some(f1)).unwrap();
    {
        // The converted global became a port, visible to the parent.
        let cella = lib.lookup("cella", Some(f1)).unwrap();
        assert_eq!(lib.cell(cella).port_count(), 4);
        let top1 = lib.lookup("top1", Some(f1)).unwrap();
        assert!(lib.cell(top1).lookup_object("1/vdd!").is_some());
    }

    lib.flatten_cell("top1", Some(f1)).unwrap();
    lib.flatten_cell("top2", Some(f2)).unwrap();

    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("top1", f1), ("top2", f2));
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn flattened_cell_still_matches_itself() {
    const FILE: &str = "
.subckt g in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt buf in out vdd gnd
X1 in mid vdd gnd g
X2 mid out vdd gnd g
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE, &mut lib);
    let f2 = load("b", FILE, &mut lib);
    lib.flatten_cell("buf", Some(f1)).unwrap();

    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("buf", f1), ("buf", f2));
    // Hierarchy on one side only cannot match without flattening the
    // other side too.
    assert_eq!(status, MatchStatus::Illegal);

    lib.flatten_cell("buf", Some(f2)).unwrap();
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("buf", f1), ("buf", f2));
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn equated_classes_compare_equal() {
    const FILE1: &str = "
.subckt cell1 in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
";
    const FILE2: &str = "
.subckt cell2 in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE1, &mut lib);
    let f2 = load("b", FILE2, &mut lib);
    let mut engine = CompareEngine::new();
    engine
        .equivalence_classes(&mut lib, "cell1", Some(f1), "cell2", Some(f2))
        .unwrap();
    assert!(lib.lookup_class_equivalent("cell1", f1, f2).is_some());

    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("cell1", f1), ("cell2", f2));
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn class_membership_is_conserved_across_iterations() {
    let mut lib = Library::new();
    let f1 = load("a", NAND4, &mut lib);
    let f2 = load("b", NAND4_REORDERED, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    engine
        .start_compare(&mut lib, "nand4", Some(f1), "nand4", Some(f2))
        .unwrap();
    for _ in 0..12 {
        assert!(engine.check_consistency());
        let (_, elems) = engine.element_summary();
        assert_eq!(elems, 16);
        if engine.iterate() {
            break;
        }
    }
    assert!(engine.check_consistency());
}

#[test]
fn matching_queries_report_counterparts() {
    let mut lib = Library::new();
    let f1 = load("a", INV, &mut lib);
    let f2 = load("b", INV_PINSWAP, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = compare_cells(&mut engine, &mut lib, ("inv", f1), ("inv", f2));
    assert_eq!(status, MatchStatus::Unique);

    let m = engine.matching_node(&lib, "out").expect("out matched");
    assert_eq!(m.as_str(), "out");
    let e = engine.matching_element(&lib, "pp").expect("pp matched");
    assert_eq!(e.as_str(), "pp");
}

#[test]
fn equivalence_nodes_requires_common_class() {
    let mut lib = Library::new();
    let f1 = load("a", INV, &mut lib);
    let f2 = load("b", INV, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    engine
        .start_compare(&mut lib, "inv", Some(f1), "inv", Some(f2))
        .unwrap();
    // Before any refinement all nodes share one class, so any pair can
    // be equated.
    engine.equivalence_nodes(&lib, "in", "in").unwrap();
    engine.run_converge();
    let status = engine.verify_matching(&lib);
    assert_eq!(status, MatchStatus::Unique);
}

#[test]
fn pin_matching_reorders_second_circuit_ports() {
    const FILE1: &str = "
.subckt leaf in out vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt top a b vdd gnd
X1 a b vdd gnd leaf
.ends
";
    // Same leaf with its ports declared in a different order.
    const FILE2: &str = "
.subckt leaf out in vdd gnd
Mp out in vdd vdd p w=2 l=1
Mn out in gnd gnd n w=1 l=1
.ends
.subckt top a b vdd gnd
X1 b a vdd gnd leaf
.ends
";
    let mut lib = Library::new();
    let f1 = load("a", FILE1, &mut lib);
    let f2 = load("b", FILE2, &mut lib);
    let mut engine = CompareEngine::new();
    engine.permute_transistors(&lib);
    let status = engine
        .compare_hierarchical(&mut lib, "top", Some(f1), "top", Some(f2))
        .unwrap();
    assert_eq!(status, MatchStatus::Unique);

    // The second leaf's port order now matches the first's.
    let l1 = lib.lookup("leaf", Some(f1)).unwrap();
    let l2 = lib.lookup("leaf", Some(f2)).unwrap();
    let names1: Vec<_> = lib.cell(l1).ports().map(|(_, p)| p.name.clone()).collect();
    let names2: Vec<_> = lib.cell(l2).ports().map(|(_, p)| p.name.clone()).collect();
    assert_eq!(names1, names2);
}
