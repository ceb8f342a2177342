//! SPICE netlist parser.

pub mod build;
#[cfg(test)]
mod tests;

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt::Display;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use arcstr::ArcStr;
use nom::bytes::complete::{take_till, take_while};
use thiserror::Error;

/// The type representing nodes in a parsed SPICE circuit.
pub type Node = Substr;

/// A substring of a file being parsed.
#[derive(Clone, Default, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Substr(pub arcstr::Substr);

/// The SPICE dialect to parse.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub enum Dialect {
    /// Vanilla SPICE.
    ///
    /// Selected by default.
    #[default]
    Spice,
    /// CDL.
    Cdl,
}

/// An error parsing a SPICE dialect from a string.
#[derive(Copy, Clone, Debug, Error)]
#[error("error parsing SPICE dialect")]
pub struct ParseDialectError;

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spice => write!(f, "spice"),
            Self::Cdl => write!(f, "cdl"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ParseDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spice" | "sp" => Ok(Self::Spice),
            "cdl" => Ok(Self::Cdl),
            _ => Err(ParseDialectError),
        }
    }
}

/// Parses SPICE netlists.
#[derive(Clone, Default, Debug)]
pub struct Parser {
    dialect: Dialect,
    buffer: Vec<Token>,
    ast: Ast,
    state: ParserState,
    warnings: u32,
}

#[derive(Clone, Default, Debug)]
struct ParserState {
    include_stack: Vec<PathBuf>,
    reader_state: ReaderState,
}

#[derive(Clone, Default, Debug)]
enum ReaderState {
    #[default]
    Top,
    Subckt(Subckt),
}

impl Parser {
    /// Makes a new parser for the given SPICE dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Parse the given file.
    pub fn parse_file(
        dialect: Dialect,
        path: impl AsRef<Path>,
    ) -> Result<ParsedSpice, ParserError> {
        let path = path.as_ref();
        tracing::debug!("reading SPICE file: {:?}", path);
        let s: ArcStr = std::fs::read_to_string(path)
            .map_err(|err| ParserError::FailedToRead {
                path: path.into(),
                err: err.to_string(),
            })?
            .into();
        let s = Substr(arcstr::Substr::full(s));
        let mut parser = Self::new(dialect);
        parser.state.include_stack.push(path.into());
        let name = path
            .file_stem()
            .map(|s| ArcStr::from(s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| arcstr::format!("{:?}", path));
        parser.parse_inner(s)?;

        let parsed = ParsedSpice {
            ast: parser.ast,
            root: Some(path.to_path_buf()),
            name,
            warnings: parser.warnings,
        };
        Ok(parsed)
    }

    fn parse_file_inner(&mut self, path: impl AsRef<Path>) -> Result<(), ParserError> {
        let path = path.as_ref();
        let s: ArcStr = std::fs::read_to_string(path)
            .map_err(|err| ParserError::FailedToRead {
                path: path.into(),
                err: err.to_string(),
            })?
            .into();
        let s = Substr(arcstr::Substr::full(s));
        self.state.include_stack.push(path.into());
        let res = self.parse_inner(s);
        self.state.include_stack.pop().unwrap();
        res?;
        Ok(())
    }

    /// Parse the given string.
    pub fn parse(dialect: Dialect, data: impl Into<Substr>) -> Result<ParsedSpice, ParserError> {
        let data = data.into();
        let mut parser = Self::new(dialect);
        parser.parse_inner(data)?;

        let parsed = ParsedSpice {
            ast: parser.ast,
            root: None,
            name: arcstr::literal!("spice_library"),
            warnings: parser.warnings,
        };
        Ok(parsed)
    }

    fn parse_inner(&mut self, data: Substr) -> Result<(), ParserError> {
        let mut tok = Tokenizer::new(self.dialect, data);
        loop {
            let line = match self.parse_line(&mut tok) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err @ (ParserError::FailedToRead { .. } | ParserError::Tokenizer(_))) => {
                    return Err(err)
                }
                Err(err) => {
                    // A malformed statement is skipped; parsing goes on.
                    self.warn(&err);
                    self.buffer.clear();
                    continue;
                }
            };
            match (&mut self.state.reader_state, line) {
                (
                    ReaderState::Top,
                    Line::SubcktDecl {
                        name,
                        ports,
                        params,
                    },
                ) => {
                    self.state.reader_state = ReaderState::Subckt(Subckt {
                        name,
                        ports,
                        params,
                        components: vec![],
                        connects: vec![],
                        globals: vec![],
                    });
                }
                (ReaderState::Top, Line::Component(c)) => {
                    self.ast.elems.push(Elem::Component(c));
                }
                (ReaderState::Top, Line::Global { nodes }) => {
                    self.ast.elems.push(Elem::Global(nodes));
                }
                (ReaderState::Top, Line::Model { name, kind }) => {
                    self.ast.elems.push(Elem::Model { name, kind });
                }
                (ReaderState::Top, Line::Include { path }) => {
                    let resolved_path = Path::new::<str>(path.0.as_ref());
                    let resolved_path = if resolved_path.is_relative() {
                        let root = self
                            .state
                            .include_stack
                            .last()
                            .ok_or(ParserError::UnexpectedRelativePath(path.clone()))?;
                        root.parent().unwrap().join(resolved_path)
                    } else {
                        resolved_path.into()
                    };
                    self.parse_file_inner(resolved_path)?;
                }
                (ReaderState::Subckt(subckt), Line::Component(c)) => {
                    subckt.components.push(c);
                }
                (ReaderState::Subckt(subckt), Line::Connect { node1, node2 }) => {
                    subckt.connects.push((node1, node2));
                }
                (ReaderState::Subckt(subckt), Line::Global { mut nodes }) => {
                    subckt.globals.append(&mut nodes);
                }
                (ReaderState::Subckt(subckt), Line::EndSubckt) => {
                    let subckt = std::mem::take(subckt);
                    self.ast.elems.push(Elem::Subckt(subckt));
                    self.state.reader_state = ReaderState::Top;
                }
                (_, line) => {
                    self.warn(&ParserError::UnexpectedLine(Box::new(line)));
                }
            }
        }
        // An unterminated subcircuit is closed at EOF.
        if let ReaderState::Subckt(subckt) = &mut self.state.reader_state {
            let subckt = std::mem::take(subckt);
            self.warn(&ParserError::UnterminatedSubckt(subckt.name.clone()));
            self.ast.elems.push(Elem::Subckt(subckt));
            self.state.reader_state = ReaderState::Top;
        }
        Ok(())
    }

    fn warn(&mut self, err: &dyn Display) {
        self.warnings += 1;
        if self.warnings <= netlist::MAX_REPORTED_WARNINGS {
            tracing::warn!("skipping statement: {}", err);
        }
    }

    fn parse_line(&mut self, tok: &mut Tokenizer) -> Result<Option<Line>, ParserError> {
        while let Some(token) = tok.get()? {
            if token == Token::LineEnd {
                if self.buffer.is_empty() {
                    continue;
                }
                let line = self.parse_line_inner();
                self.buffer.clear();
                if let Some(line) = line? {
                    return Ok(Some(line));
                }
            } else {
                self.buffer.push(token);
            }
        }

        Ok(None)
    }

    /// Parses `key=value` triples starting at `start`.
    fn parse_params(&self, start: usize) -> Result<Params, ParserError> {
        let mut params = Params::default();
        let mut i = start;
        while i < self.buffer.len() {
            let k = self.buffer[i].try_ident()?.clone();
            if !matches!(self.buffer.get(i + 1), Some(Token::Equals)) {
                return Err(ParserError::InvalidLine {
                    line: self.buffer.clone(),
                    reason: format!("expected `=` after parameter `{}`", k),
                });
            }
            let v = self
                .buffer
                .get(i + 2)
                .ok_or_else(|| ParserError::InvalidLine {
                    line: self.buffer.clone(),
                    reason: format!("missing value for parameter `{}`", k),
                })?
                .try_ident()?
                .clone();
            params.insert(k, v);
            i += 3;
        }
        Ok(params)
    }

    /// Position of the first `=` token, if any.
    fn first_equals(&self) -> Option<usize> {
        self.buffer.iter().position(|t| matches!(t, Token::Equals))
    }

    /// Number of card tokens before the first parameter assignment.
    fn positional_end(&self) -> usize {
        self.first_equals()
            .map(|p| p - 1)
            .unwrap_or(self.buffer.len())
    }

    fn ident_at(&self, i: usize) -> Result<Substr, ParserError> {
        self.buffer
            .get(i)
            .ok_or_else(|| ParserError::InvalidLine {
                line: self.buffer.clone(),
                reason: "card has too few tokens".to_string(),
            })?
            .try_ident()
            .cloned()
    }

    fn parse_line_inner(&mut self) -> Result<Option<Line>, ParserError> {
        let line = match self.buffer.first().unwrap() {
            Token::Directive(d) => {
                if d.eq_ignore_ascii_case(".subckt") {
                    let name = self.ident_at(1)?;
                    let pend = self.positional_end();
                    let ports = self.buffer[2..pend]
                        .iter()
                        .map(|tok| tok.try_ident().cloned())
                        .collect::<Result<_, _>>()?;
                    let params = self.parse_params(pend)?;
                    Line::SubcktDecl {
                        name,
                        ports,
                        params,
                    }
                } else if d.eq_ignore_ascii_case(".ends") {
                    Line::EndSubckt
                } else if d.eq_ignore_ascii_case(".global") {
                    let nodes = self.buffer[1..]
                        .iter()
                        .map(|tok| tok.try_ident().cloned())
                        .collect::<Result<_, _>>()?;
                    Line::Global { nodes }
                } else if d.eq_ignore_ascii_case(".model") {
                    let name = self.ident_at(1)?;
                    let kind = self.ident_at(2)?;
                    Line::Model { name, kind }
                } else if d.eq_ignore_ascii_case(".include") {
                    let mut path = self.ident_at(1)?;
                    // remove enclosing quotation marks, if any.
                    if path.starts_with('"') || path.starts_with('\'') {
                        let mut chars = path.chars();
                        chars.next().unwrap();
                        chars.next_back();
                        path = Substr(path.substr_from(chars.as_str()));
                    }
                    Line::Include { path }
                } else if d.eq_ignore_ascii_case(".end") {
                    // end-of-netlist marker; nothing to parse.
                    return Ok(None);
                } else {
                    return Err(ParserError::UnexpectedDirective(d.clone()));
                }
            }
            Token::MetaDirective(d) => {
                if d.eq_ignore_ascii_case("connect") {
                    if self.buffer.len() != 3 {
                        return Err(ParserError::InvalidLine {
                            line: self.buffer.clone(),
                            reason: "CONNECT statements must specify exactly 2 nodes".to_string(),
                        });
                    }
                    let node1 = self.ident_at(1)?;
                    let node2 = self.ident_at(2)?;
                    Line::Connect { node1, node2 }
                } else {
                    // Ignore other metadata directives.
                    return Ok(None);
                }
            }
            Token::Ident(id) => {
                let kind = id.chars().next().unwrap().to_ascii_uppercase();

                match kind {
                    'M' => {
                        let name = self.ident_at(0)?;
                        let d = self.ident_at(1)?;
                        let g = self.ident_at(2)?;
                        let s = self.ident_at(3)?;
                        let b = self.ident_at(4)?;
                        let model = self.ident_at(5)?;
                        let params = self.parse_params(6)?;
                        Line::Component(Component::Mos(Mos {
                            name,
                            d,
                            g,
                            s,
                            b,
                            model,
                            params,
                        }))
                    }
                    'Q' => {
                        // The token before the first `key=` pair (or the
                        // last token) is the model; the rest are pins.
                        let pend = self.positional_end();
                        if pend < 5 {
                            return Err(ParserError::InvalidLine {
                                line: self.buffer.clone(),
                                reason: "BJT requires at least 3 pins and a model".to_string(),
                            });
                        }
                        let child_idx = pend - 1;
                        let model = self.ident_at(child_idx)?;
                        let ports = self.buffer[1..child_idx]
                            .iter()
                            .map(|x| x.try_ident().cloned())
                            .collect::<Result<Vec<_>, _>>()?;
                        let params = self.parse_params(child_idx + 1)?;
                        Line::Component(Component::Bjt(Bjt {
                            name: self.ident_at(0)?,
                            collector: ports[0].clone(),
                            base: ports[1].clone(),
                            emitter: ports[2].clone(),
                            substrate: ports.get(3).cloned(),
                            model,
                            params,
                        }))
                    }
                    'D' => {
                        let params = self.parse_params(4)?;
                        Line::Component(Component::Diode(Diode {
                            name: self.ident_at(0)?,
                            pos: self.ident_at(1)?,
                            neg: self.ident_at(2)?,
                            model: self.ident_at(3)?,
                            params,
                        }))
                    }
                    'R' | 'C' | 'L' => {
                        let pend = self.positional_end();
                        let name = self.ident_at(0)?;
                        let pos = self.ident_at(1)?;
                        let neg = self.ident_at(2)?;
                        let mut value = None;
                        let mut model = None;
                        for i in 3..pend {
                            let tok = self.ident_at(i)?;
                            if let Some(inner) = cdl_model_selector(&tok) {
                                model = Some(inner);
                            } else if is_numeric_literal(&tok) && value.is_none() {
                                value = Some(tok);
                            } else {
                                model = Some(tok);
                            }
                        }
                        let params = self.parse_params(pend.max(3))?;
                        let body = TwoTerminal {
                            name,
                            pos,
                            neg,
                            value,
                            model,
                            params,
                        };
                        Line::Component(match kind {
                            'R' => Component::Res(body),
                            'C' => Component::Cap(body),
                            _ => Component::Ind(body),
                        })
                    }
                    'T' => {
                        let pend = self.positional_end();
                        if pend < 5 {
                            return Err(ParserError::InvalidLine {
                                line: self.buffer.clone(),
                                reason: "transmission line requires 4 nodes".to_string(),
                            });
                        }
                        let nodes = [
                            self.ident_at(1)?,
                            self.ident_at(2)?,
                            self.ident_at(3)?,
                            self.ident_at(4)?,
                        ];
                        let model = if pend > 5 {
                            Some(self.ident_at(5)?)
                        } else {
                            None
                        };
                        let params = self.parse_params(pend)?;
                        Line::Component(Component::Xline(Xline {
                            name: self.ident_at(0)?,
                            nodes,
                            model,
                            params,
                        }))
                    }
                    'X' => {
                        // An X instance line looks like this:
                        //
                        // ```spice
                        // Xname port0 port1 port2 child param1=value1 param2=value2
                        // ```
                        //
                        // The index of "child" is the index of the first
                        // equals sign minus 2. If there is no equals
                        // sign, it is buffer.len() - 1.
                        let pend = self.positional_end();
                        if pend < 2 {
                            return Err(ParserError::InvalidLine {
                                line: self.buffer.clone(),
                                reason: "subcircuit call names no child".to_string(),
                            });
                        }
                        let child_idx = pend - 1;
                        let child = self.ident_at(child_idx)?;
                        let ports = self.buffer[1..child_idx]
                            .iter()
                            .map(|x| x.try_ident().cloned())
                            .collect::<Result<Vec<_>, _>>()?;

                        let ports = if self.dialect == Dialect::Cdl {
                            ports
                                .into_iter()
                                .flat_map(|x| match x.as_str() {
                                    "/" => None,
                                    _ => Some(Substr(x.substr_from(x.trim_start_matches('/')))),
                                })
                                .collect::<Vec<_>>()
                        } else {
                            ports
                        };

                        let params = self.parse_params(child_idx + 1)?;

                        Line::Component(Component::Instance(Instance {
                            name: self.ident_at(0)?,
                            ports,
                            child,
                            params,
                        }))
                    }
                    kind => return Err(ParserError::UnexpectedComponentType(kind)),
                }
            }
            tok => return Err(ParserError::UnexpectedToken(tok.clone())),
        };
        Ok(Some(line))
    }
}

/// Extracts the model name from a CDL `$[model]` selector token.
pub fn cdl_model_selector(tok: &Substr) -> Option<Substr> {
    let inner = tok.strip_prefix("$[")?.strip_suffix(']')?;
    Some(Substr(tok.substr_from(inner)))
}

/// Returns `true` if the token reads as a numeric device value.
///
/// Plain decimal literals are recognised directly; values with metric
/// suffixes (`10k`, `2.5p`) fall back to the store's SPICE number
/// parser.
pub fn is_numeric_literal(tok: &str) -> bool {
    rust_decimal::Decimal::from_str(tok).is_ok() || netlist::props::string_is_value(tok)
}

/// Data associated with parsing a SPICE file.
pub struct ParsedSpice {
    /// The parsed contents of the spice file.
    pub ast: Ast,

    /// The file path at the root of the `include` tree.
    pub root: Option<PathBuf>,

    /// The name of the netlist, from the root file's stem.
    pub name: ArcStr,

    /// Number of statements skipped due to input problems.
    pub warnings: u32,
}

/// The abstract syntax tree (AST) of a parsed SPICE netlist.
#[derive(Debug, Default, Clone)]
pub struct Ast {
    /// The list of elements in the SPICE netlist.
    pub elems: Vec<Elem>,
}

/// A single logical line in a SPICE netlist.
///
/// A logical line may contain multiple lines in a file
/// if all lines after the first are separated by the line continuation
/// character (typically '+').
#[derive(Debug, Clone)]
pub enum Line {
    /// A subcircuit declaration.
    SubcktDecl {
        /// The name of the subcircuit.
        name: Substr,
        /// A list of ports.
        ///
        /// Each port is the name of a node exposed by the subcircuit.
        ports: Vec<Node>,
        /// Subcircuit parameters with default values.
        params: Params,
    },
    /// A component instantiation.
    Component(Component),
    /// The end of a subcircuit.
    EndSubckt,
    /// An include directive.
    Include {
        /// The path to include.
        path: Substr,
    },
    /// A list of hierarchically-shared node names.
    Global {
        /// The global node names.
        nodes: Vec<Substr>,
    },
    /// A device model statement refining a model's device class.
    Model {
        /// The model name.
        name: Substr,
        /// The model kind, e.g. `NMOS`.
        kind: Substr,
    },
    /// Connect (i.e. deep short) two nodes.
    Connect {
        /// The first node.
        node1: Substr,
        /// The second node.
        node2: Substr,
    },
}

/// An element of a SPICE netlist AST.
#[derive(Debug, Clone)]
pub enum Elem {
    /// A subcircuit declaration.
    Subckt(Subckt),
    /// A top-level component instance.
    Component(Component),
    /// Global node declarations.
    Global(Vec<Substr>),
    /// A device model statement.
    Model {
        /// The model name.
        name: Substr,
        /// The model kind.
        kind: Substr,
    },
}

/// The contents of a subcircuit.
#[derive(Debug, Default, Clone)]
pub struct Subckt {
    /// The subcircuit name.
    pub name: Substr,
    /// The list of ports.
    ///
    /// Each port is a node exposed by this subcircuit.
    pub ports: Vec<Node>,
    /// Subcircuit parameters with default values.
    pub params: Params,
    /// List of components in the subcircuit.
    pub components: Vec<Component>,
    /// A set of deep shorted nodes from `.CONNECT` statements.
    pub connects: Vec<(Node, Node)>,
    /// Global declarations local to this subcircuit.
    pub globals: Vec<Substr>,
}

/// A SPICE netlist component.
#[derive(Debug, Clone)]
pub enum Component {
    /// A MOSFET (declared with an 'M').
    Mos(Mos),
    /// A resistor (declared with an 'R').
    Res(TwoTerminal),
    /// A capacitor (declared with a 'C').
    Cap(TwoTerminal),
    /// An inductor (declared with an 'L').
    Ind(TwoTerminal),
    /// A diode (declared with a 'D').
    Diode(Diode),
    /// A bipolar junction transistor (BJT, declared with a 'Q').
    Bjt(Bjt),
    /// A transmission line (declared with a 'T').
    Xline(Xline),
    /// An instance of a subcircuit (declared with an 'X').
    Instance(Instance),
}

impl Component {
    /// The card name of the component.
    pub fn name(&self) -> &Substr {
        match self {
            Component::Mos(c) => &c.name,
            Component::Res(c) | Component::Cap(c) | Component::Ind(c) => &c.name,
            Component::Diode(c) => &c.name,
            Component::Bjt(c) => &c.name,
            Component::Xline(c) => &c.name,
            Component::Instance(c) => &c.name,
        }
    }
}

/// A two-terminal device: resistor, capacitor, or inductor.
#[derive(Debug, Clone)]
pub struct TwoTerminal {
    /// The name of the device instance.
    pub name: Substr,
    /// The node connected to the positive terminal.
    pub pos: Node,
    /// The node connected to the negative terminal.
    pub neg: Node,
    /// The nominal value, e.g. `10p`, if given.
    pub value: Option<Substr>,
    /// The model computing the value, if given.
    pub model: Option<Substr>,
    /// Parameters and their values.
    pub params: Params,
}

/// A diode.
#[derive(Debug, Clone)]
pub struct Diode {
    /// The name of the diode instance.
    pub name: Substr,
    /// The node connected to the positive terminal.
    pub pos: Node,
    /// The node connected to the negative terminal.
    pub neg: Node,
    /// The name of the associated diode model.
    pub model: Substr,
    /// Parameters and their values.
    pub params: Params,
}

/// A bipolar junction transistor (BJT).
#[derive(Debug, Clone)]
pub struct Bjt {
    /// The name of the BJT instance.
    pub name: Substr,
    /// The node connected to the collector.
    pub collector: Node,
    /// The node connected to the base.
    pub base: Node,
    /// The node connected to the emitter.
    pub emitter: Node,
    /// The node connected to the substrate.
    pub substrate: Option<Node>,
    /// The name of the associated BJT model.
    pub model: Substr,
    /// Parameters and their values.
    pub params: Params,
}

/// A transmission line.
#[derive(Debug, Clone)]
pub struct Xline {
    /// The name of the instance.
    pub name: Substr,
    /// The four terminal nodes.
    pub nodes: [Node; 4],
    /// The associated model, if any.
    pub model: Option<Substr>,
    /// Parameters and their values.
    pub params: Params,
}

/// A subcircuit instance.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The name of the instance.
    pub name: Substr,
    /// The list of port connections.
    pub ports: Vec<Node>,
    /// The name of the child cell.
    pub child: Substr,
    /// Instance parameters.
    pub params: Params,
}

/// A MOSFET.
#[derive(Debug, Clone)]
pub struct Mos {
    /// The name of the MOSFET instance.
    pub name: Substr,
    /// The drain.
    pub d: Node,
    /// The gate.
    pub g: Node,
    /// The source.
    pub s: Node,
    /// The body/substrate.
    pub b: Node,
    /// The name of the associated MOSFET model.
    pub model: Substr,
    /// Parameters and their values.
    pub params: Params,
}

/// Parameter values, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct Params {
    values: Vec<(Substr, Substr)>,
}

impl Params {
    /// Create a new, empty parameter set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key-value pair into the parameter set.
    pub fn insert(&mut self, k: impl Into<Substr>, v: impl Into<Substr>) {
        self.values.push((k.into(), v.into()));
    }

    /// Get the value corresponding to the given key, matched
    /// case-insensitively.
    pub fn get(&self, k: &str) -> Option<&Substr> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(k))
            .map(|(_, v)| v)
    }

    /// An iterator over all key-value pairs, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Substr, &Substr)> {
        self.values.iter().map(|(k, v)| (k, v))
    }

    /// Returns `true` if no parameters are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[inline]
fn is_newline(c: char) -> bool {
    c == '\n' || c == '\r'
}

#[inline]
fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

#[inline]
fn is_space_or_newline(c: char) -> bool {
    is_space(c) || is_newline(c)
}

#[inline]
fn is_special(c: char) -> bool {
    is_space_or_newline(c) || c == '='
}

struct Tokenizer {
    data: Substr,
    rem: Substr,
    state: TokState,
    comments: HashSet<char>,
    line_continuation: char,
    /// The string used to prefix metadata SPICE directives.
    ///
    /// In CDL format, this is "*.".
    meta_directive_prefix: Option<String>,
}

/// A SPICE token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Token {
    /// A SPICE directive that starts with a leading dot.
    ///
    /// Examples: ".subckt", ".ends", ".include".
    ///
    /// The tokenizer returns tokens with case matching the input file.
    /// No conversion to upper/lowercase is made.
    Directive(Substr),
    /// A SPICE identifier.
    Ident(Substr),
    /// A line end indicator.
    LineEnd,
    /// An equal sign token ('=').
    Equals,
    /// A metadata directive.
    ///
    /// Examples: "*.CONNECT", "*.PININFO".
    MetaDirective(Substr),
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
enum TokState {
    /// Initial state.
    #[default]
    Init,
    /// Parsing a line.
    Line,
}

/// An error arising from parsing a SPICE netlist.
#[derive(Debug, Error)]
pub enum ParserError {
    /// A tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    /// Found a SPICE line in the wrong context.
    ///
    /// For example, a ".ends" line with no matching ".subckt" line.
    #[error("unexpected line: {0:?}")]
    UnexpectedLine(Box<Line>),
    /// A subcircuit left open at the end of input.
    #[error("subcircuit `{0}` not terminated by .ends")]
    UnterminatedSubckt(Substr),
    /// An unsupported or unexpected SPICE directive.
    #[error("unexpected SPICE directive: {0}")]
    UnexpectedDirective(Substr),
    /// An unsupported or unexpected SPICE component type.
    #[error("unexpected component type: {0}")]
    UnexpectedComponentType(char),
    /// An unsupported or unexpected token.
    #[error("unexpected token: {0:?}")]
    UnexpectedToken(Token),
    /// A relative path was used in an unsupported position.
    ///
    /// For example, relative paths are forbidden when parsing inline spice.
    #[error("unexpected relative path: {0:?}")]
    UnexpectedRelativePath(Substr),
    /// An invalid line.
    #[error("invalid line `{line:?}`: {reason}")]
    InvalidLine {
        /// The tokens in the offending line.
        line: Vec<Token>,
        /// The reason the line is invalid.
        reason: String,
    },
    /// Error trying to read the given file.
    #[error("failed to read file at path `{path:?}`: {err}")]
    FailedToRead {
        /// The path we attempted to read.
        path: PathBuf,
        /// The underlying error message.
        err: String,
    },
}

/// A tokenizer error.
#[derive(Debug, Error)]
#[allow(dead_code)]
pub struct TokenizerError {
    /// The state of the tokenizer at the time this error occurred.
    state: TokState,
    /// The byte offset in the file being tokenized.
    ofs: usize,
    /// The contents of the input that have not yet been processed.
    rem: Substr,
    message: ArcStr,
    token: Substr,
}

impl Tokenizer {
    fn new(dialect: Dialect, data: impl Into<arcstr::Substr>) -> Self {
        let data = data.into();
        let rem = data.clone();
        let meta_directive_prefix = match dialect {
            Dialect::Spice => None,
            Dialect::Cdl => Some("*.".to_string()),
        };
        Self {
            data: Substr(data),
            rem: Substr(rem),
            state: TokState::Init,
            comments: HashSet::from(['*', '$']),
            line_continuation: '+',
            meta_directive_prefix,
        }
    }

    fn next_is_meta_directive(&self) -> bool {
        self.meta_directive_prefix
            .as_ref()
            .map(|s| self.rem.starts_with(s))
            .unwrap_or_default()
    }

    /// A `$[model]` selector is a token, not a comment.
    fn next_is_model_selector(&self) -> bool {
        self.rem.starts_with("$[")
    }

    fn try_meta_directive(&mut self) -> Option<Substr> {
        if self.next_is_meta_directive() {
            let s = self.meta_directive_prefix.as_ref().unwrap();
            self.rem = Substr(self.rem.substr(s.len()..));
            Some(self.take_ident())
        } else {
            None
        }
    }

    pub fn get(&mut self) -> Result<Option<Token>, TokenizerError> {
        loop {
            self.take_ws();
            if self.rem.is_empty() {
                // handle EOF
                if self.state == TokState::Line {
                    // At EOF, but have not yet returned a final LineEnd token.
                    self.state = TokState::Init;
                    return Ok(Some(Token::LineEnd));
                } else {
                    // At EOF, no more tokens.
                    return Ok(None);
                }
            }

            let c = self.peek().unwrap();
            if c == '=' && self.state == TokState::Line {
                self.take1();
                return Ok(Some(Token::Equals));
            }
            match self.state {
                TokState::Init => {
                    if self.comments.contains(&c) && !self.next_is_meta_directive() {
                        self.take_until_newline();
                    } else if c.is_whitespace() {
                        self.take1();
                    } else if c == self.line_continuation {
                        self.err("unexpected line continuation", c)?;
                    } else {
                        self.state = TokState::Line;
                    }
                }
                TokState::Line => {
                    if let Some(md) = self.try_meta_directive() {
                        return Ok(Some(Token::MetaDirective(md)));
                    } else if is_newline(c) {
                        self.take1();
                        self.take_ws();
                        if self.peek().unwrap_or(self.line_continuation) != self.line_continuation {
                            self.state = TokState::Init;
                            return Ok(Some(Token::LineEnd));
                        }
                    } else if c == self.line_continuation {
                        self.take1();
                    } else if self.comments.contains(&c) && !self.next_is_model_selector() {
                        self.take_until_newline();
                    } else if c == '.' {
                        let word = self.take_ident();
                        return Ok(Some(Token::Directive(word)));
                    } else {
                        let word = self.take_ident();
                        return Ok(Some(Token::Ident(word)));
                    }
                }
            }
        }
    }

    fn err(
        &self,
        message: impl Into<ArcStr>,
        token: impl Into<Substr>,
    ) -> Result<(), TokenizerError> {
        Err(TokenizerError {
            state: self.state,
            ofs: self.data.len() - self.rem.len(),
            rem: self.rem.clone(),
            message: message.into(),
            token: token.into(),
        })
    }

    fn take1(&mut self) -> Option<char> {
        let c = self.rem.chars().next()?;
        self.rem = Substr(self.rem.substr(c.len_utf8()..));
        Some(c)
    }

    fn take_until_newline(&mut self) -> Substr {
        let (rest, comment) = take_till::<_, &str, ()>(is_newline)(self.rem.as_str()).unwrap();
        let comment = Substr(self.rem.substr_from(comment));
        self.rem = Substr(self.rem.substr_from(rest));
        comment
    }

    fn take_ident(&mut self) -> Substr {
        let (rest, value) = take_till::<_, &str, ()>(is_special)(self.rem.as_str()).unwrap();
        let value = Substr(self.rem.substr_from(value));
        self.rem = Substr(self.rem.substr_from(rest));
        value
    }

    fn take_ws(&mut self) {
        let (rest, _) = take_while::<_, &str, ()>(is_space)(self.rem.as_str()).unwrap();
        self.rem = Substr(self.rem.substr_from(rest));
    }

    fn peek(&self) -> Option<char> {
        self.rem.chars().next()
    }
}

struct Tokens {
    tok: Tokenizer,
}

impl Iterator for Tokens {
    type Item = Result<Token, TokenizerError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.tok.get().transpose()
    }
}

impl IntoIterator for Tokenizer {
    type Item = Result<Token, TokenizerError>;
    type IntoIter = Tokens;
    fn into_iter(self) -> Self::IntoIter {
        Tokens { tok: self }
    }
}

impl Deref for Substr {
    type Target = arcstr::Substr;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Substr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for Substr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Substr> for arcstr::Substr {
    fn from(value: Substr) -> Self {
        value.0
    }
}

impl From<&str> for Substr {
    fn from(value: &str) -> Self {
        Self(arcstr::Substr::from(value))
    }
}

impl From<arcstr::Substr> for Substr {
    fn from(value: arcstr::Substr) -> Self {
        Self(value)
    }
}

impl From<ArcStr> for Substr {
    fn from(value: ArcStr) -> Self {
        Self(arcstr::Substr::full(value))
    }
}

impl From<char> for Substr {
    fn from(value: char) -> Self {
        Self(arcstr::Substr::from(value.to_string()))
    }
}

impl Token {
    fn try_ident(&self) -> Result<&Substr, ParserError> {
        match self {
            Self::Ident(x) => Ok(x),
            _ => Err(ParserError::UnexpectedToken(self.clone())),
        }
    }
}

impl Borrow<str> for Substr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for TokenizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (token {} at offset {})",
            self.message, self.token, self.ofs
        )
    }
}
