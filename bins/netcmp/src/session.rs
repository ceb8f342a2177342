//! The netcmp command interpreter.
//!
//! One session owns the netlist store and the comparison engine; each
//! command line mutates them in place. The command vocabulary follows
//! the classic netlist-comparison shells: `readnet`, `compare`, `run`,
//! `verify`, `equate`, `permute`, and friends.

use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use compare::{CompareEngine, ComparePair, Graph, MatchStatus};
use netlist::{DeviceClass, FileId, Library, ObjectKind};
use spice::parser::Dialect;

/// Entries printed per page when listing classes or cells.
const PAGE: usize = 40;

/// A netcmp session: store, engine, and logging state.
pub struct Session {
    pub lib: Library,
    pub engine: CompareEngine,
    /// The last pair handed to `compare`, for `restart`.
    last_compare: Option<(String, Option<FileId>, String, Option<FileId>)>,
    log: Option<File>,
    log_path: Option<PathBuf>,
    log_suspended: bool,
    echo: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self {
            lib: Library::new(),
            engine: CompareEngine::new(),
            last_compare: None,
            log: None,
            log_path: None,
            log_suspended: false,
            echo: false,
        }
    }

    /// Prints a line to stdout and the transcript log.
    fn emit(&mut self, msg: impl Display) {
        let text = msg.to_string();
        println!("{}", text);
        if !self.log_suspended {
            if let Some(log) = self.log.as_mut() {
                let _ = writeln!(log, "{}", text);
            }
        }
    }

    fn log_command(&mut self, line: &str) {
        if self.echo {
            println!("> {}", line);
        }
        if !self.log_suspended {
            if let Some(log) = self.log.as_mut() {
                let _ = writeln!(log, "> {}", line);
            }
        }
    }

    /// Executes one command line.
    ///
    /// Returns `false` when the session should end.
    pub fn execute(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(true);
        }
        self.log_command(line);
        // Brace-grouped {file cell} arguments flatten into plain
        // tokens.
        let cleaned = line.replace(['{', '}'], " ");
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return Ok(true);
        };

        match cmd.to_lowercase().as_str() {
            "readnet" => self.cmd_readnet(args)?,
            "writenet" => self.cmd_writenet(args)?,
            "flatten" => self.cmd_flatten(args)?,
            "cells" => self.cmd_cells(args)?,
            "ports" => self.cmd_ports(args)?,
            "instances" => self.cmd_instances(args)?,
            "leaves" => self.cmd_leaves(args)?,
            "describe" => self.cmd_describe(args)?,
            "nodes" => self.cmd_nodes(args)?,
            "elements" => self.cmd_elements(args)?,
            "model" => self.cmd_model(args)?,
            "compare" => self.cmd_compare(args)?,
            "iterate" => self.cmd_iterate()?,
            "run" => self.cmd_run(args)?,
            "verify" => self.cmd_verify(args)?,
            "print" => self.cmd_print(args)?,
            "summary" => self.cmd_summary(args)?,
            "automorphisms" => self.cmd_automorphisms()?,
            "equate" => self.cmd_equate(args)?,
            "ignore" => self.cmd_ignore(args)?,
            "permute" => self.cmd_permute(args)?,
            "exhaustive" => self.cmd_exhaustive(args)?,
            "restart" => self.cmd_restart()?,
            "global" => self.cmd_global(args)?,
            "convert" => self.cmd_convert(args)?,
            "matching" => self.cmd_matching(args)?,
            "log" => self.cmd_log(args)?,
            "quit" | "exit" => return Ok(false),
            other => self.emit(format!("unknown command: {}", other)),
        }
        Ok(true)
    }

    fn parse_file(&self, tok: &str) -> Result<FileId> {
        let idx: u32 = tok
            .parse()
            .with_context(|| format!("`{}` is not a file tag", tok))?;
        self.lib
            .file_tag(idx)
            .ok_or_else(|| anyhow!("no file with tag {}", idx))
    }

    fn cmd_readnet(&mut self, args: &[&str]) -> Result<()> {
        let (dialect, path) = match args {
            [path] => (dialect_for_path(path), *path),
            [format, path] => (
                format
                    .parse::<Dialect>()
                    .map_err(|_| anyhow!("unsupported netlist format `{}`", format))?,
                *path,
            ),
            _ => bail!("usage: readnet [format] <file>"),
        };
        let tag = spice::read_spice(&mut self.lib, dialect, path)
            .with_context(|| format!("failed to read `{}`", path))?;
        self.emit(format!("{}", tag.index()));
        Ok(())
    }

    fn cmd_writenet(&mut self, args: &[&str]) -> Result<()> {
        let (format, cell, file) = match args {
            [format, cell] => (*format, *cell, None),
            [format, cell, file] => (*format, *cell, Some(self.parse_file(file)?)),
            _ => bail!("usage: writenet <format> <cell> [<filetag>]"),
        };
        if !format.eq_ignore_ascii_case("spice") {
            bail!("unsupported output format `{}`", format);
        }
        let id = self
            .lib
            .lookup(cell, file)
            .ok_or_else(|| anyhow!("no cell named `{}`", cell))?;
        let path = format!("{}.spice", cell);
        let mut out = File::create(&path)?;
        spice::write_spice(&self.lib, id, &mut out)?;
        self.emit(format!("wrote {}", path));
        Ok(())
    }

    fn cmd_flatten(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["class", cell, rest @ ..] => {
                let file = match rest {
                    [] => None,
                    [f] => Some(self.parse_file(f)?),
                    _ => bail!("usage: flatten class <cell> [<filetag>]"),
                };
                match file {
                    Some(f) => self.lib.flatten_instances_everywhere(f, cell),
                    None => {
                        let files: Vec<FileId> =
                            self.lib.files().map(|(_, id)| id).collect();
                        for f in files {
                            self.lib.flatten_instances_everywhere(f, cell);
                        }
                    }
                }
                self.emit(format!("flattened instances of {}", cell));
            }
            [cell, rest @ ..] => {
                let file = match rest {
                    [] => None,
                    [f] => Some(self.parse_file(f)?),
                    _ => bail!("usage: flatten <cell> [<filetag>]"),
                };
                self.lib.flatten_cell(cell, file)?;
                self.emit(format!("flattened {}", cell));
            }
            [] => bail!("usage: flatten [class] <cell> [<filetag>]"),
        }
        Ok(())
    }

    fn cmd_cells(&mut self, args: &[&str]) -> Result<()> {
        let (all, file) = match args {
            [] | ["list"] => (false, None),
            ["all"] => (true, None),
            ["list", f] | [f] => (false, Some(self.parse_file(f)?)),
            ["all", f] => (true, Some(self.parse_file(f)?)),
            _ => bail!("usage: cells [list|all] [<file>]"),
        };
        let mut lines = Vec::new();
        for (_, cell) in self.lib.cells() {
            if let Some(f) = file {
                if cell.file() != f {
                    continue;
                }
            }
            if !all && cell.class().is_primitive() && cell.first_pins().next().is_none() {
                continue;
            }
            lines.push(format!(
                "{} ({}, {}, {} objects)",
                cell.name(),
                cell.class(),
                cell.file(),
                cell.objects().len()
            ));
        }
        self.emit_paged(lines);
        Ok(())
    }

    fn cmd_ports(&mut self, args: &[&str]) -> Result<()> {
        let [cell] = args else {
            bail!("usage: ports <cell>");
        };
        let id = self
            .lib
            .lookup(cell, None)
            .ok_or_else(|| anyhow!("no cell named `{}`", cell))?;
        let lines: Vec<String> = self
            .lib
            .cell(id)
            .ports()
            .map(|(_, p)| format!("{} (node {})", p.name, p.node))
            .collect();
        self.emit_paged(lines);
        Ok(())
    }

    fn cmd_instances(&mut self, args: &[&str]) -> Result<()> {
        let [cell] = args else {
            bail!("usage: instances <cell>");
        };
        let id = self
            .lib
            .lookup(cell, None)
            .ok_or_else(|| anyhow!("no cell named `{}`", cell))?;
        let c = self.lib.cell(id);
        let lines: Vec<String> = c
            .first_pins()
            .map(|i| {
                let ob = &c.objects()[i];
                format!(
                    "{} ({})",
                    ob.instance.as_deref().unwrap_or(""),
                    ob.model.as_deref().unwrap_or("")
                )
            })
            .collect();
        self.emit_paged(lines);
        Ok(())
    }

    fn cmd_leaves(&mut self, args: &[&str]) -> Result<()> {
        let filter: Option<&str> = args.first().copied();
        let mut lines = Vec::new();
        match filter {
            None => {
                for (_, cell) in self.lib.cells() {
                    if cell.class().is_primitive() {
                        lines.push(cell.name().to_string());
                    }
                }
            }
            Some(name) => {
                let id = self
                    .lib
                    .lookup(name, None)
                    .ok_or_else(|| anyhow!("no cell named `{}`", name))?;
                let mut stack = vec![id];
                let mut seen = std::collections::HashSet::new();
                while let Some(id) = stack.pop() {
                    if !seen.insert(id) {
                        continue;
                    }
                    let cell = self.lib.cell(id);
                    if cell.class().is_primitive() {
                        lines.push(cell.name().to_string());
                        continue;
                    }
                    for first in cell.first_pins() {
                        if let Some(model) = cell.objects()[first].model.as_deref() {
                            if let Some(sub) = self.lib.lookup(model, Some(cell.file())) {
                                stack.push(sub);
                            }
                        }
                    }
                }
            }
        }
        lines.sort();
        lines.dedup();
        self.emit_paged(lines);
        Ok(())
    }

    fn cmd_describe(&mut self, args: &[&str]) -> Result<()> {
        let (cell, file) = match args {
            [cell] => (*cell, None),
            [cell, f] => (*cell, Some(self.parse_file(f)?)),
            _ => bail!("usage: describe <cell> [<file>]"),
        };
        let id = self
            .lib
            .lookup(cell, file)
            .ok_or_else(|| anyhow!("no cell named `{}`", cell))?;
        let c = self.lib.cell(id);
        let nets: std::collections::HashSet<i32> = c
            .objects()
            .iter()
            .filter(|ob| ob.node > 0)
            .map(|ob| ob.node)
            .collect();
        let msg = format!(
            "cell {} ({}): {} ports, {} instances, {} nets, {} objects",
            c.name(),
            c.class(),
            c.port_count(),
            c.first_pins().count(),
            nets.len(),
            c.objects().len()
        );
        self.emit(msg);
        Ok(())
    }

    fn cmd_nodes(&mut self, args: &[&str]) -> Result<()> {
        let (element, cell, file) = match args {
            [cell] => (None, *cell, None),
            [element, cell] => (Some(*element), *cell, None),
            [element, cell, f] => (Some(*element), *cell, Some(self.parse_file(f)?)),
            _ => bail!("usage: nodes [<element>] <cell> [<file>]"),
        };
        // A two-token form may also be `nodes <cell> <file>`.
        let (element, cell, file) = match (element, file) {
            (Some(e), None) if self.lib.lookup(cell, None).is_none() => {
                (None, e, Some(self.parse_file(cell)?))
            }
            other => (other.0, cell, other.1),
        };
        let id = self
            .lib
            .lookup(cell, file)
            .ok_or_else(|| anyhow!("no cell named `{}`", cell))?;
        let c = self.lib.cell(id);

        if let Some(element) = element {
            // The nets on each pin of one device instance.
            let first = c
                .lookup_instance(element)
                .ok_or_else(|| anyhow!("no instance `{}` in `{}`", element, cell))?;
            let run = c.pin_run_len(first);
            let lines: Vec<String> = c.objects()[first..first + run]
                .iter()
                .map(|ob| {
                    format!(
                        "{}: {} (net {})",
                        ob.pin_name(),
                        c.node_name(ob.node).map(|s| s.as_str()).unwrap_or("-"),
                        ob.node
                    )
                })
                .collect();
            self.emit_paged(lines);
            return Ok(());
        }

        let mut nets: Vec<i32> = c
            .objects()
            .iter()
            .filter(|ob| ob.node > 0)
            .map(|ob| ob.node)
            .collect();
        nets.sort_unstable();
        nets.dedup();
        let lines: Vec<String> = nets
            .iter()
            .map(|&n| {
                let count = c.objects().iter().filter(|ob| ob.node == n).count();
                format!(
                    "{} (net {}, {} connections)",
                    c.node_name(n).map(|s| s.as_str()).unwrap_or("?"),
                    n,
                    count
                )
            })
            .collect();
        self.emit_paged(lines);
        Ok(())
    }

    fn cmd_elements(&mut self, args: &[&str]) -> Result<()> {
        // With a node name, list the device pins fanning out from it.
        if let [node, cell] = args {
            if let Some(id) = self.lib.lookup(cell, None) {
                let c = self.lib.cell(id);
                if let Some(idx) = c.lookup_object(node) {
                    let net = c.objects()[idx].node;
                    if net > 0 {
                        let lines: Vec<String> = c
                            .objects()
                            .iter()
                            .filter(|ob| ob.node == net && ob.kind.is_pin())
                            .map(|ob| ob.name.to_string())
                            .collect();
                        self.emit_paged(lines);
                        return Ok(());
                    }
                }
            }
        }
        self.cmd_instances(args)
    }

    fn cmd_model(&mut self, args: &[&str]) -> Result<()> {
        let [name, class] = args else {
            bail!("usage: model <name> <class>");
        };
        let class: DeviceClass = class
            .parse()
            .map_err(|_| anyhow!("unknown device class `{}`", class))?;
        let id = self
            .lib
            .lookup(name, None)
            .ok_or_else(|| anyhow!("no cell named `{}`", name))?;
        self.lib.set_cell_class(id, class)?;
        self.emit(format!("{} is now class {}", name, class));
        Ok(())
    }

    /// Resolves the two cells named on a `compare` line.
    ///
    /// With plain cell names, the second cell is preferentially taken
    /// from a different file than the first, so `compare c c` compares
    /// the two read netlists.
    fn parse_compare_args(
        &self,
        args: &[&str],
    ) -> Result<(String, Option<FileId>, String, Option<FileId>)> {
        match args {
            [c1, c2] => {
                let f1 = self
                    .lib
                    .lookup(c1, None)
                    .map(|id| self.lib.cell(id).file());
                let f2 = f1.and_then(|f1| {
                    self.lib
                        .cells()
                        .find(|(_, cell)| {
                            cell.file() != f1 && cell.name().eq_ignore_ascii_case(c2)
                        })
                        .map(|(_, cell)| cell.file())
                });
                Ok((c1.to_string(), f1, c2.to_string(), f2))
            }
            [f1, c1, f2, c2] => Ok((
                c1.to_string(),
                Some(self.parse_file(f1)?),
                c2.to_string(),
                Some(self.parse_file(f2)?),
            )),
            _ => bail!("usage: compare [hierarchical] <cell1> <cell2> | <file1> <cell1> <file2> <cell2>"),
        }
    }

    fn cmd_compare(&mut self, args: &[&str]) -> Result<()> {
        let (hierarchical, rest) = match args.split_first() {
            Some((&"hierarchical", rest)) => (true, rest),
            _ => (false, args),
        };
        let (c1, f1, c2, f2) = self.parse_compare_args(rest)?;
        self.last_compare = Some((c1.clone(), f1, c2.clone(), f2));
        if hierarchical {
            let status = self
                .engine
                .compare_hierarchical(&mut self.lib, &c1, f1, &c2, f2)?;
            self.report_status(status);
        } else {
            self.engine.start_compare(&mut self.lib, &c1, f1, &c2, f2)?;
            let (ec, es) = self.engine.element_summary();
            let (nc, ns) = self.engine.node_summary();
            self.emit(format!(
                "comparison started: {} elements in {} classes, {} nodes in {} classes",
                es, ec, ns, nc
            ));
        }
        Ok(())
    }

    fn cmd_iterate(&mut self) -> Result<()> {
        if self.engine.iterate() {
            self.emit("no new fractures made");
        } else {
            self.emit("new fractures made");
        }
        Ok(())
    }

    fn cmd_run(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["converge"] => {
                let n = self.engine.run_converge();
                self.emit(format!("converged after {} iterations", n));
            }
            ["resolve"] => {
                let status = self.engine.resolve_all(&self.lib);
                self.report_status(status);
            }
            _ => bail!("usage: run {{converge|resolve}}"),
        }
        Ok(())
    }

    fn report_status(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Unique => {
                if self.engine.property_error() {
                    self.emit("circuits match uniquely, with property errors");
                } else {
                    self.emit("circuits match uniquely");
                }
            }
            MatchStatus::Illegal => self.emit("netlists do not match"),
            MatchStatus::Automorphisms(n) => {
                self.emit(format!("circuits match with {} automorphisms", n))
            }
        }
    }

    fn cmd_verify(&mut self, args: &[&str]) -> Result<()> {
        match args {
            [] | ["only"] | ["all"] | ["nodes"] | ["elements"] => {
                let status = self.engine.verify_matching(&self.lib);
                self.emit(format!("{}", status.as_code()));
                self.report_status(status);
            }
            ["properties"] => {
                let mismatches = self.engine.print_property_results(&self.lib);
                self.emit(format!("{} property mismatches", mismatches));
            }
            ["equivalent"] => {
                let status = self.engine.verify_matching(&self.lib);
                self.emit(format!("{}", status.as_code() >= 0));
            }
            ["unique"] => {
                let status = self.engine.verify_matching(&self.lib);
                self.emit(format!("{}", status == MatchStatus::Unique));
            }
            _ => bail!("usage: verify [nodes|elements|properties|only|all|equivalent|unique]"),
        }
        Ok(())
    }

    fn cmd_print(&mut self, args: &[&str]) -> Result<()> {
        let args: Vec<&str> = args.iter().filter(|&&a| a != "-list").copied().collect();
        let only_illegal = args.contains(&"illegal");
        let what = args
            .iter()
            .find(|&&a| matches!(a, "nodes" | "elements" | "queue"))
            .copied()
            .unwrap_or("elements");
        match what {
            "queue" => {
                let lines: Vec<String> = self
                    .engine
                    .compare_queue()
                    .map(|pair| {
                        format!(
                            "{} ({}) vs. {} ({})",
                            pair.name1, pair.file1, pair.name2, pair.file2
                        )
                    })
                    .collect();
                self.emit_paged(lines);
            }
            "nodes" => {
                let classes = self.engine.node_classes(&self.lib, only_illegal);
                self.print_classes(classes);
            }
            _ => {
                let classes = self.engine.element_classes(&self.lib, only_illegal);
                self.print_classes(classes);
            }
        }
        Ok(())
    }

    fn print_classes(&mut self, classes: Vec<compare::ClassSummary>) {
        let mut lines = Vec::new();
        for (i, class) in classes.iter().enumerate() {
            lines.push(format!(
                "class {} ({}, {} members):",
                i,
                if class.legal { "legal" } else { "ILLEGAL" },
                class.members.len()
            ));
            for (graph, name) in class.members.iter() {
                let tag = match graph {
                    Graph::One => "1",
                    Graph::Two => "2",
                };
                lines.push(format!("  [{}] {}", tag, name));
            }
        }
        self.emit_paged(lines);
    }

    /// Prints long listings a page at a time rather than truncating.
    fn emit_paged(&mut self, lines: Vec<String>) {
        let total = lines.len();
        for (i, line) in lines.into_iter().enumerate() {
            self.emit(line);
            if (i + 1) % PAGE == 0 && i + 1 < total {
                self.emit(format!("  ... ({} of {})", i + 1, total));
            }
        }
    }

    fn cmd_summary(&mut self, args: &[&str]) -> Result<()> {
        let what = args.first().copied();
        if what.is_none() || what == Some("elements") {
            let (classes, elements) = self.engine.element_summary();
            self.emit(format!("{} elements in {} classes", elements, classes));
        }
        if what.is_none() || what == Some("nodes") {
            let (classes, nodes) = self.engine.node_summary();
            self.emit(format!("{} nodes in {} classes", nodes, classes));
        }
        Ok(())
    }

    fn cmd_automorphisms(&mut self) -> Result<()> {
        let n = self.engine.automorphism_count();
        self.emit(format!("{} automorphisms", n));
        // Port-only automorphisms become pin permutations.
        self.engine.permute_automorphisms(&self.lib)?;
        Ok(())
    }

    fn cmd_equate(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["nodes", n1, n2] => {
                self.engine.equivalence_nodes(&self.lib, n1, n2)?;
                self.emit(format!("nodes {} and {} equated", n1, n2));
            }
            ["elements", e1, e2] => {
                self.engine.equivalence_elements(&self.lib, e1, e2)?;
                self.emit(format!("elements {} and {} equated", e1, e2));
            }
            ["classes", rest @ ..] => {
                let (c1, f1, c2, f2) = match rest {
                    [c1, c2] => (*c1, None, *c2, None),
                    [f1, c1, f2, c2] => (
                        *c1,
                        Some(self.parse_file(f1)?),
                        *c2,
                        Some(self.parse_file(f2)?),
                    ),
                    _ => bail!("usage: equate classes [<file1>] <c1> [<file2>] <c2>"),
                };
                self.engine
                    .equivalence_classes(&mut self.lib, c1, f1, c2, f2)?;
                self.emit(format!("classes {} and {} equated", c1, c2));
            }
            ["pins", ..] => {
                let Some((c1, f1, c2, f2)) = self.last_compare.clone() else {
                    bail!("no comparison in progress");
                };
                let (Some(f1), Some(f2)) = (
                    f1.or_else(|| self.lib.lookup(&c1, None).map(|id| self.lib.cell(id).file())),
                    f2.or_else(|| self.lib.lookup(&c2, None).map(|id| self.lib.cell(id).file())),
                ) else {
                    bail!("no comparison in progress");
                };
                let pair = ComparePair {
                    name1: c1.as_str().into(),
                    file1: f1,
                    name2: c2.as_str().into(),
                    file2: f2,
                };
                self.engine.match_pins(&mut self.lib, &pair)?;
                self.emit("pins matched");
            }
            _ => bail!("usage: equate {{nodes|elements|classes|pins}} <n1> <n2>"),
        }
        Ok(())
    }

    fn cmd_ignore(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["class", name] => {
                self.lib.ignore_class(*name, None);
                self.emit(format!("ignoring class {}", name));
            }
            ["class", name, f] => {
                let f = self.parse_file(f)?;
                self.lib.ignore_class(*name, Some(f));
                self.emit(format!("ignoring class {} in {}", name, f));
            }
            _ => bail!("usage: ignore class <name> [<file>]"),
        }
        Ok(())
    }

    fn cmd_permute(&mut self, args: &[&str]) -> Result<()> {
        match args {
            [] | ["default"] => {
                let n = self.engine.permute_default(&self.lib);
                self.emit(format!("{} permutations declared", n));
            }
            ["transistors"] => {
                let n = self.engine.permute_transistors(&self.lib);
                self.emit(format!("{} permutations declared", n));
            }
            ["resistors"] => {
                let n = self.engine.permute_resistors(&self.lib);
                self.emit(format!("{} permutations declared", n));
            }
            ["capacitors"] => {
                let n = self.engine.permute_capacitors(&self.lib);
                self.emit(format!("{} permutations declared", n));
            }
            ["pins", model, p1, p2] => {
                self.engine.permute_setup(&self.lib, model, p1, p2)?;
                self.emit(format!("pins {} and {} of {} permute", p1, p2, model));
            }
            ["forget", model, p1, p2] => {
                self.engine.permute_forget(model, p1, p2)?;
                self.emit(format!("pins {} and {} of {} no longer permute", p1, p2, model));
            }
            _ => bail!(
                "usage: permute {{transistors|resistors|capacitors|default|pins <cell> <p1> <p2>|forget <cell> <p1> <p2>}}"
            ),
        }
        Ok(())
    }

    fn cmd_exhaustive(&mut self, args: &[&str]) -> Result<()> {
        match args {
            [] => {
                let state = self.engine.exhaustive();
                self.emit(format!("exhaustive is {}", if state { "on" } else { "off" }));
            }
            ["on"] => self.engine.set_exhaustive(true),
            ["off"] => self.engine.set_exhaustive(false),
            _ => bail!("usage: exhaustive [on|off]"),
        }
        Ok(())
    }

    fn cmd_restart(&mut self) -> Result<()> {
        let Some((c1, f1, c2, f2)) = self.last_compare.clone() else {
            bail!("no comparison to restart");
        };
        self.engine.start_compare(&mut self.lib, &c1, f1, &c2, f2)?;
        self.emit("comparison restarted");
        Ok(())
    }

    fn cmd_global(&mut self, args: &[&str]) -> Result<()> {
        let [scope, pattern] = args else {
            bail!("usage: global <cell|file> <pattern>");
        };
        // The scope is a cell name, or a file tag applying to all of
        // its cells.
        let targets: Vec<netlist::CellId> = if let Ok(file) = self.parse_file(scope) {
            self.lib
                .cells()
                .filter(|(_, c)| c.file() == file)
                .map(|(id, _)| id)
                .collect()
        } else {
            let id = self
                .lib
                .lookup(scope, None)
                .ok_or_else(|| anyhow!("no cell or file named `{}`", scope))?;
            vec![id]
        };
        let mut changed = 0;
        for id in targets {
            let matches = self.lib.expand_pattern(id, pattern);
            let cell = self.lib.cell_mut(id);
            for idx in matches {
                if cell.objects()[idx].kind == ObjectKind::Node {
                    cell.object_mut(idx).kind = ObjectKind::Global;
                    changed += 1;
                }
            }
        }
        self.emit(format!("{} nodes made global", changed));
        Ok(())
    }

    fn cmd_convert(&mut self, args: &[&str]) -> Result<()> {
        let (cell, file) = match args {
            [cell] => (*cell, None),
            [cell, f] => (*cell, Some(self.parse_file(f)?)),
            _ => bail!("usage: convert <cell> [<file>]"),
        };
        self.lib.convert_globals(cell, file)?;
        self.emit(format!("globals of {} converted to ports", cell));
        Ok(())
    }

    fn cmd_matching(&mut self, args: &[&str]) -> Result<()> {
        let [kind, name] = args else {
            bail!("usage: matching {{node|element}} <name>");
        };
        let found = match *kind {
            "node" => self.engine.matching_node(&self.lib, name),
            "element" => self.engine.matching_element(&self.lib, name),
            _ => bail!("usage: matching {{node|element}} <name>"),
        };
        match found {
            Some(peer) => self.emit(peer),
            None => bail!("no match for {} {}", kind, name),
        }
        Ok(())
    }

    fn cmd_log(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["start"] => {
                let path = self
                    .log_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("netcmp.log"));
                self.log = Some(File::options().create(true).append(true).open(&path)?);
                self.log_path = Some(path);
                self.log_suspended = false;
            }
            ["end"] => {
                self.log = None;
            }
            ["reset"] => {
                if let Some(path) = self.log_path.clone() {
                    self.log = Some(File::create(&path)?);
                }
            }
            ["suspend"] => self.log_suspended = true,
            ["resume"] => self.log_suspended = false,
            ["file", path] => {
                self.log_path = Some(PathBuf::from(path));
                self.log = Some(File::create(path)?);
                self.log_suspended = false;
            }
            ["echo", "on"] => self.echo = true,
            ["echo", "off"] => self.echo = false,
            ["put", rest @ ..] => {
                let text = rest.join(" ");
                self.emit(text);
            }
            _ => bail!(
                "usage: log {{start|end|reset|suspend|resume|file <name>|echo {{on|off}}|put <text>}}"
            ),
        }
        Ok(())
    }
}

/// Chooses a dialect from a path extension.
fn dialect_for_path(path: &str) -> Dialect {
    if path.to_lowercase().ends_with(".cdl") {
        Dialect::Cdl
    } else {
        Dialect::Spice
    }
}
