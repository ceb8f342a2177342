use super::*;

pub const SPICE_RESISTOR: &str = r#"
.subckt my_resistor p n
R1 p n 100
.ends
"#;

pub const SPICE_INVERTER: &str = r#"
* A CMOS inverter.
.subckt inv in out vdd gnd
Mp out in vdd vdd p w=2 l=0.5
Mn out in gnd gnd n w=1 l=0.5
.ends
"#;

#[test]
fn spice_resistor_tokens() {
    let tok = Tokenizer::new(Dialect::Spice, SPICE_RESISTOR);
    let toks = tok.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        toks,
        vec![
            Token::Directive(Substr(".subckt".into())),
            Token::Ident(Substr("my_resistor".into())),
            Token::Ident(Substr("p".into())),
            Token::Ident(Substr("n".into())),
            Token::LineEnd,
            Token::Ident(Substr("R1".into())),
            Token::Ident(Substr("p".into())),
            Token::Ident(Substr("n".into())),
            Token::Ident(Substr("100".into())),
            Token::LineEnd,
            Token::Directive(Substr(".ends".into())),
            Token::LineEnd,
        ]
    );
}

#[test]
fn continuation_lines_join_tokens() {
    let source = "
.subckt wide a b
+ c d
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    assert_eq!(subckt.name.as_str(), "wide");
    assert_eq!(subckt.ports.len(), 4);
}

#[test]
fn parses_inverter_components() {
    let parsed = Parser::parse(Dialect::Spice, SPICE_INVERTER).unwrap();
    assert_eq!(parsed.ast.elems.len(), 1);
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    assert_eq!(subckt.components.len(), 2);
    let mos = match &subckt.components[0] {
        Component::Mos(m) => m,
        c => panic!("expected mos, got {:?}", c),
    };
    assert_eq!(mos.model.as_str(), "p");
    assert_eq!(mos.d.as_str(), "out");
    assert_eq!(mos.b.as_str(), "vdd");
    assert_eq!(mos.params.get("w").unwrap().as_str(), "2");
    assert_eq!(mos.params.get("L").unwrap().as_str(), "0.5");
}

#[test]
fn resistor_value_vs_model() {
    let source = "
.subckt rs a b c
R1 a b 100k
R2 b c rmodel
R3 a c $[rmod2] w=2
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    let res = |i: usize| match &subckt.components[i] {
        Component::Res(r) => r,
        c => panic!("expected res, got {:?}", c),
    };
    assert_eq!(res(0).value.as_ref().unwrap().as_str(), "100k");
    assert!(res(0).model.is_none());
    assert_eq!(res(1).model.as_ref().unwrap().as_str(), "rmodel");
    assert!(res(1).value.is_none());
    assert_eq!(res(2).model.as_ref().unwrap().as_str(), "rmod2");
    assert_eq!(res(2).params.get("w").unwrap().as_str(), "2");
}

#[test]
fn global_and_model_lines() {
    let source = "
.global vdd! gnd!
.model nfet NMOS level=8
.subckt x a
Mn1 a a gnd! gnd! nfet
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    assert!(matches!(&parsed.ast.elems[0], Elem::Global(nodes) if nodes.len() == 2));
    assert!(
        matches!(&parsed.ast.elems[1], Elem::Model { name, kind } if name.as_str() == "nfet" && kind.as_str() == "NMOS")
    );
}

#[test]
fn comments_and_dollar_comments_are_skipped() {
    let source = "
* a comment line
.subckt c a b
C1 a b 10p $ trailing comment
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    let cap = match &subckt.components[0] {
        Component::Cap(c) => c,
        c => panic!("expected cap, got {:?}", c),
    };
    assert_eq!(cap.value.as_ref().unwrap().as_str(), "10p");
    assert!(cap.params.is_empty());
}

#[test]
fn malformed_card_is_skipped() {
    let source = "
.subckt bad a b
Zq a b nonsense
R1 a b 100
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    // The unknown card is dropped; the resistor survives.
    assert_eq!(subckt.components.len(), 1);
    assert_eq!(parsed.warnings, 1);
}

#[test]
fn subckt_params_split_from_ports() {
    let source = "
.subckt r2 a b w=2 l=1
R1 a b 10
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    assert_eq!(subckt.ports.len(), 2);
    assert_eq!(subckt.params.get("w").unwrap().as_str(), "2");
    assert_eq!(subckt.params.get("l").unwrap().as_str(), "1");
}

#[test]
fn cdl_instance_port_slashes() {
    let source = "
.subckt top a b
X1 / a / b sub
.ends
.subckt sub p q
.ends
";
    let parsed = Parser::parse(Dialect::Cdl, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    let inst = match &subckt.components[0] {
        Component::Instance(i) => i,
        c => panic!("expected instance, got {:?}", c),
    };
    assert_eq!(inst.ports.len(), 2);
    assert_eq!(inst.child.as_str(), "sub");
}

#[test]
fn multiplier_parameter_is_parsed() {
    let source = "
.subckt m a b
Mx a a b b fet m=2 w=4
.ends
";
    let parsed = Parser::parse(Dialect::Spice, source).unwrap();
    let subckt = match &parsed.ast.elems[0] {
        Elem::Subckt(s) => s,
        elem => panic!("expected subckt, got {:?}", elem),
    };
    let mos = match &subckt.components[0] {
        Component::Mos(m) => m,
        c => panic!("expected mos, got {:?}", c),
    };
    assert_eq!(mos.params.get("m").unwrap().as_str(), "2");
    assert_eq!(mos.params.get("w").unwrap().as_str(), "4");
}
