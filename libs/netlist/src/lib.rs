//! Hierarchical netlist store.
//!
//! An ordered-object representation of circuit cells, designed for
//! netlist comparison. Each [`Cell`] owns an ordered list of [`Object`]s:
//! ports, internal nodes, globals, device pins, and property records.
//! Object order is significant: flattening, netlist emission, and port
//! numbering all depend on it.
//!
//! Cells are identified by `(name, file)`, where the file tag
//! distinguishes the input netlists being compared. Names may be matched
//! case-sensitively or case-insensitively per cell, depending on the
//! source format.
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use unicase::UniCase;

pub mod flatten;
pub mod props;
#[cfg(test)]
mod tests;

pub use props::{parse_si_float, PropKind, PropertyData, PropertyKey, PropertyValue, Slop};

/// The hierarchy separator used in flattened object names.
pub const SEPARATOR: &str = "/";

/// The delimiter used when synthesising unique global names.
pub const INSTANCE_DELIMITER: &str = "#";

/// Node number of an unconnected pin or node.
pub const DISCONNECTED: i32 = -1;

/// Node number of a dummy net, ignored by the comparison engine.
pub const DUMMY_NET: i32 = 0;

/// Node number carried by property records.
pub const PROPERTY_NODE: i32 = -2;

/// Cap on the number of input problems reported before going quiet.
pub const MAX_REPORTED_WARNINGS: u32 = 100;

/// An opaque file tag.
///
/// Every distinct input netlist gets its own tag. Lookups may pass
/// `Option<FileId>`, where `None` means "any file" and resolves to the
/// match from the lowest-numbered file.
#[derive(
    Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct FileId(u32);

impl FileId {
    /// The raw tag number.
    #[inline]
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "file{}", self.0)
    }
}

/// An opaque cell identifier.
///
/// A cell ID created in the context of one library must *not* be used in
/// the context of another library.
#[derive(
    Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct CellId(u64);

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "cell{}", self.0)
    }
}

/// The device class of a cell.
///
/// Primitive classes describe leaf devices; [`DeviceClass::Subcircuit`]
/// and [`DeviceClass::Module`] describe compositions that can be
/// flattened. [`DeviceClass::Blackbox`] is a composition whose contents
/// are deliberately opaque.
#[derive(
    Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum DeviceClass {
    /// No class assigned yet.
    #[default]
    Undefined,
    /// An n-channel MOSFET.
    Nmos,
    /// A p-channel MOSFET.
    Pmos,
    /// A MOSFET of unspecified polarity.
    Fet,
    /// An NPN bipolar transistor.
    Npn,
    /// A PNP bipolar transistor.
    Pnp,
    /// A bipolar transistor of unspecified polarity.
    Bjt,
    /// A resistor.
    Resistor,
    /// A capacitor.
    Capacitor,
    /// A MOS capacitor.
    Moscap,
    /// A diode.
    Diode,
    /// An inductor.
    Inductor,
    /// A transmission line.
    Xline,
    /// A subcircuit definition.
    Subcircuit,
    /// A module (treated like a subcircuit for flattening).
    Module,
    /// An opaque composition that is never descended into.
    Blackbox,
}

impl DeviceClass {
    /// Returns `true` if instances of this class can be flattened into
    /// their parents.
    pub fn is_flattenable(&self) -> bool {
        matches!(self, DeviceClass::Subcircuit | DeviceClass::Module)
    }

    /// Returns `true` if this class is a leaf device.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            DeviceClass::Subcircuit | DeviceClass::Module | DeviceClass::Blackbox
        )
    }

    /// The port counts a cell of this class may legally declare, or
    /// `None` if any count is acceptable.
    pub fn allowed_port_counts(&self) -> Option<&'static [usize]> {
        match self {
            DeviceClass::Nmos | DeviceClass::Pmos => Some(&[4]),
            DeviceClass::Fet => Some(&[3, 4]),
            DeviceClass::Npn | DeviceClass::Pnp => Some(&[3]),
            DeviceClass::Bjt => Some(&[3, 4]),
            DeviceClass::Resistor | DeviceClass::Capacitor => Some(&[2, 3]),
            DeviceClass::Moscap => Some(&[2, 3]),
            DeviceClass::Diode | DeviceClass::Inductor => Some(&[2]),
            DeviceClass::Xline => Some(&[3, 4]),
            _ => None,
        }
    }

    /// The pin pair permutable by default for this class, if any.
    ///
    /// Pin names are those given to auto-defined device cells by the
    /// SPICE reader.
    pub fn default_permutation(&self) -> Option<(&'static str, &'static str)> {
        match self {
            DeviceClass::Nmos | DeviceClass::Pmos | DeviceClass::Fet => Some(("drain", "source")),
            DeviceClass::Resistor => Some(("end_a", "end_b")),
            DeviceClass::Capacitor | DeviceClass::Moscap => Some(("top", "bottom")),
            _ => None,
        }
    }
}

impl Display for DeviceClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::Undefined => "undefined",
            DeviceClass::Nmos => "nmos",
            DeviceClass::Pmos => "pmos",
            DeviceClass::Fet => "mosfet",
            DeviceClass::Npn => "npn",
            DeviceClass::Pnp => "pnp",
            DeviceClass::Bjt => "bjt",
            DeviceClass::Resistor => "resistor",
            DeviceClass::Capacitor => "capacitor",
            DeviceClass::Moscap => "moscap",
            DeviceClass::Diode => "diode",
            DeviceClass::Inductor => "inductor",
            DeviceClass::Xline => "xline",
            DeviceClass::Subcircuit => "subcircuit",
            DeviceClass::Module => "module",
            DeviceClass::Blackbox => "blackbox",
        };
        write!(f, "{}", s)
    }
}

/// An error parsing a [`DeviceClass`] from a string.
#[derive(Copy, Clone, Debug, thiserror::Error)]
#[error("unknown device class")]
pub struct ParseDeviceClassError;

impl FromStr for DeviceClass {
    type Err = ParseDeviceClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "undefined" => DeviceClass::Undefined,
            "nmos" => DeviceClass::Nmos,
            "pmos" => DeviceClass::Pmos,
            "mosfet" | "fet" => DeviceClass::Fet,
            "npn" => DeviceClass::Npn,
            "pnp" => DeviceClass::Pnp,
            "bjt" => DeviceClass::Bjt,
            "resistor" => DeviceClass::Resistor,
            "capacitor" => DeviceClass::Capacitor,
            "moscap" | "ecap" => DeviceClass::Moscap,
            "diode" => DeviceClass::Diode,
            "inductor" => DeviceClass::Inductor,
            "xline" => DeviceClass::Xline,
            "subcircuit" => DeviceClass::Subcircuit,
            "module" => DeviceClass::Module,
            "blackbox" => DeviceClass::Blackbox,
            _ => return Err(ParseDeviceClassError),
        })
    }
}

/// The kind of an entry in a cell's ordered object list.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ObjectKind {
    /// An external pin of the cell.
    Port,
    /// An internal named wire.
    Node,
    /// A node whose name is shared hierarchically.
    Global,
    /// A global uniquified per instance.
    UniqueGlobal,
    /// A device property record; not a circuit element.
    Property,
    /// The `n`-th pin of a device instance, 0-based.
    ///
    /// `Pin(0)` starts a contiguous pin run; all pins of the run share
    /// their `instance` tag.
    Pin(u16),
}

impl ObjectKind {
    /// Returns `true` for device pins.
    #[inline]
    pub fn is_pin(&self) -> bool {
        matches!(self, ObjectKind::Pin(_))
    }

    /// Returns `true` for the first pin of an instance.
    #[inline]
    pub fn is_first_pin(&self) -> bool {
        matches!(self, ObjectKind::Pin(0))
    }

    /// The pin index, if this is a pin.
    #[inline]
    pub fn pin_index(&self) -> Option<u16> {
        match self {
            ObjectKind::Pin(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns `true` for globals (unique or shared).
    #[inline]
    pub fn is_global(&self) -> bool {
        matches!(self, ObjectKind::Global | ObjectKind::UniqueGlobal)
    }

    /// Returns `true` if the object carries an electrical node.
    #[inline]
    pub fn is_connectable(&self) -> bool {
        !matches!(self, ObjectKind::Property)
    }
}

/// One entry in a cell's ordered object list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Object {
    /// The object name, unique within its cell.
    ///
    /// Pins are named `instance/pinname`.
    pub name: ArcStr,
    /// The object kind.
    pub kind: ObjectKind,
    /// The referenced cell name, for pins; `None` for ports and nodes.
    pub model: Option<ArcStr>,
    /// The instance tag shared by all pins of one device instance.
    pub instance: Option<ArcStr>,
    /// The electrical net: [`DISCONNECTED`], [`DUMMY_NET`], or a
    /// positive net number unique within the cell.
    pub node: i32,
    /// Property payload; present only on [`ObjectKind::Property`].
    pub props: Option<Box<PropertyData>>,
}

impl Object {
    /// Creates a port object.
    pub fn port(name: impl Into<ArcStr>) -> Self {
        Self::bare(name, ObjectKind::Port)
    }

    /// Creates an internal node object.
    pub fn internal(name: impl Into<ArcStr>) -> Self {
        Self::bare(name, ObjectKind::Node)
    }

    /// Creates a global node object.
    pub fn global(name: impl Into<ArcStr>) -> Self {
        Self::bare(name, ObjectKind::Global)
    }

    /// Creates a per-instance unique global node object.
    pub fn unique_global(name: impl Into<ArcStr>) -> Self {
        Self::bare(name, ObjectKind::UniqueGlobal)
    }

    fn bare(name: impl Into<ArcStr>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            model: None,
            instance: None,
            node: DISCONNECTED,
            props: None,
        }
    }

    /// Creates a device pin object.
    pub fn pin(
        name: impl Into<ArcStr>,
        index: u16,
        model: impl Into<ArcStr>,
        instance: impl Into<ArcStr>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Pin(index),
            model: Some(model.into()),
            instance: Some(instance.into()),
            node: DISCONNECTED,
            props: None,
        }
    }

    /// Creates a property record for the given device instance.
    pub fn property(model: impl Into<ArcStr>, instance: impl Into<ArcStr>, data: PropertyData) -> Self {
        Self {
            name: arcstr::literal!("properties"),
            kind: ObjectKind::Property,
            model: Some(model.into()),
            instance: Some(instance.into()),
            node: PROPERTY_NODE,
            props: Some(Box::new(data)),
        }
    }

    /// The local pin name, with the instance prefix stripped.
    pub fn pin_name(&self) -> &str {
        match &self.instance {
            Some(inst) if self.name.len() > inst.len() => &self.name[inst.len() + 1..],
            _ => &self.name,
        }
    }
}

/// Errors arising from netlist store operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    /// Reference to a cell that has not been defined.
    #[error("no cell named `{name}`")]
    UndefinedCell {
        /// The missing cell name.
        name: ArcStr,
    },
    /// Reference to an object that does not exist in the given cell.
    #[error("no object named `{name}` in cell `{cell}`")]
    UndefinedObject {
        /// The missing object name.
        name: ArcStr,
        /// The cell that was searched.
        cell: ArcStr,
    },
    /// `connect` was called with lists of incompatible lengths.
    #[error("unequal connect lists: `{pattern1}` has {len1}, `{pattern2}` has {len2}")]
    UnequalConnectLists {
        /// The first pattern.
        pattern1: ArcStr,
        /// Number of objects matching the first pattern.
        len1: usize,
        /// The second pattern.
        pattern2: ArcStr,
        /// Number of objects matching the second pattern.
        len2: usize,
    },
    /// A cell's port count is not legal for the requested device class.
    #[error("cell `{cell}` has {ports} ports, not valid for class {class}")]
    PortCountMismatch {
        /// The cell being reclassified.
        cell: ArcStr,
        /// Its current port count.
        ports: usize,
        /// The rejected class.
        class: DeviceClass,
    },
}

/// Computes the class hash of a cell name.
///
/// The hash is stable for a given name regardless of case, so
/// identically-named cells read from different files collide, which is
/// how same-class instances are recognised across netlists.
pub fn class_hash(name: &str) -> u64 {
    // FNV-1a over the case-folded name.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        h ^= b.to_ascii_lowercase() as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// A circuit cell: an ordered object list plus lookup indices.
#[derive(Clone, Debug)]
pub struct Cell {
    name: ArcStr,
    file: FileId,
    class: DeviceClass,
    class_hash: u64,
    nocase: bool,
    matched: bool,
    placeholder: bool,
    dumped: bool,
    num_instances: u32,
    next_node: i32,
    /// Ordered property keys declared for this device class.
    pub prop_keys: Vec<PropertyKey>,
    objects: Vec<Object>,
    object_index: HashMap<ArcStr, usize>,
    instance_index: HashMap<ArcStr, usize>,
}

impl Cell {
    fn new(name: ArcStr, file: FileId, nocase: bool) -> Self {
        let hash = class_hash(&name);
        Self {
            name,
            file,
            class: DeviceClass::Undefined,
            class_hash: hash,
            nocase,
            matched: false,
            placeholder: false,
            dumped: false,
            num_instances: 0,
            next_node: 1,
            prop_keys: Vec::new(),
            objects: Vec::new(),
            object_index: HashMap::new(),
            instance_index: HashMap::new(),
        }
    }

    /// The cell name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The file this cell belongs to.
    #[inline]
    pub fn file(&self) -> FileId {
        self.file
    }

    /// The device class.
    #[inline]
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Sets the device class.
    pub fn set_class(&mut self, class: DeviceClass) {
        self.class = class;
    }

    /// The class hash used to group same-class instances across files.
    #[inline]
    pub fn class_hash(&self) -> u64 {
        self.class_hash
    }

    /// Overrides the class hash (used by class equivalences).
    pub fn set_class_hash(&mut self, hash: u64) {
        self.class_hash = hash;
    }

    /// Returns `true` if names in this cell match case-insensitively.
    #[inline]
    pub fn nocase(&self) -> bool {
        self.nocase
    }

    /// Returns `true` if this cell has been matched to a peer.
    #[inline]
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Sets or clears the matched flag.
    pub fn set_matched(&mut self, matched: bool) {
        self.matched = matched;
    }

    /// Returns `true` if this cell was auto-defined as a placeholder for
    /// an unknown subcircuit call.
    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Marks or clears the placeholder flag.
    pub fn set_placeholder(&mut self, placeholder: bool) {
        self.placeholder = placeholder;
    }

    /// Per-walk visit marker used by flattening and bottom-up emission.
    #[inline]
    pub fn dumped(&self) -> bool {
        self.dumped
    }

    /// Sets or clears the visit marker.
    pub fn set_dumped(&mut self, dumped: bool) {
        self.dumped = dumped;
    }

    /// Number of instances of this cell created so far.
    #[inline]
    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    /// The ordered object list.
    #[inline]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Mutable access to a single object.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn object_mut(&mut self, idx: usize) -> &mut Object {
        &mut self.objects[idx]
    }

    /// Replaces the entire object list and rebuilds the lookup indices.
    ///
    /// Used by operations that splice or permute the list wholesale,
    /// such as flattening and pin reordering.
    pub fn replace_objects(&mut self, objects: Vec<Object>) {
        self.objects = objects;
        self.next_node = self.max_node() + 1;
        self.rebuild_indices();
    }

    /// Takes the object list out of the cell for wholesale editing.
    ///
    /// The caller must hand the edited list back via
    /// [`replace_objects`](Cell::replace_objects) before the cell is
    /// used again; until then the lookup indices are stale.
    pub fn take_objects(&mut self) -> Vec<Object> {
        std::mem::take(&mut self.objects)
    }

    /// Case-folds a name according to this cell's matching rule.
    pub fn fold(&self, name: &str) -> ArcStr {
        if self.nocase {
            ArcStr::from(name.to_lowercase())
        } else {
            ArcStr::from(name)
        }
    }

    /// Appends an object, updating the lookup indices.
    ///
    /// Returns the position of the new object.
    pub fn add_object(&mut self, ob: Object) -> usize {
        let idx = self.objects.len();
        let key = self.fold(&ob.name);
        self.object_index.insert(key, idx);
        if ob.kind.is_first_pin() {
            if let Some(inst) = &ob.instance {
                self.instance_index.insert(self.fold(inst), idx);
            }
        }
        self.objects.push(ob);
        idx
    }

    /// Looks up an object position by name.
    pub fn lookup_object(&self, name: &str) -> Option<usize> {
        self.object_index.get(&self.fold(name)).copied()
    }

    /// Looks up the first pin of an instance by instance name.
    pub fn lookup_instance(&self, name: &str) -> Option<usize> {
        self.instance_index.get(&self.fold(name)).copied()
    }

    /// Repoints the object-index entry for `name` at the object at
    /// position `idx`.
    ///
    /// Global conversion uses this so that the name of a removed GLOBAL
    /// object continues to resolve to the port that replaced it.
    pub fn alias_object_name(&mut self, name: &str, idx: usize) {
        self.object_index.insert(self.fold(name), idx);
    }

    /// Rebuilds both lookup indices from the object list.
    pub fn rebuild_indices(&mut self) {
        self.object_index.clear();
        self.instance_index.clear();
        for (idx, ob) in self.objects.iter().enumerate() {
            let key = if self.nocase {
                ArcStr::from(ob.name.to_lowercase())
            } else {
                ob.name.clone()
            };
            self.object_index.insert(key, idx);
            if ob.kind.is_first_pin() {
                if let Some(inst) = &ob.instance {
                    let ikey = if self.nocase {
                        ArcStr::from(inst.to_lowercase())
                    } else {
                        inst.clone()
                    };
                    self.instance_index.insert(ikey, idx);
                }
            }
        }
    }

    /// Iterates over `(position, object)` pairs for the cell's ports,
    /// in declaration order.
    pub fn ports(&self) -> impl Iterator<Item = (usize, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.kind == ObjectKind::Port)
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.ports().count()
    }

    /// Positions of all first pins, i.e. one per device instance.
    pub fn first_pins(&self) -> impl Iterator<Item = usize> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.kind.is_first_pin())
            .map(|(idx, _)| idx)
    }

    /// The length of the contiguous pin run starting at `first`.
    ///
    /// The run covers all pins sharing the first pin's instance tag.
    pub fn pin_run_len(&self, first: usize) -> usize {
        let inst = self.objects[first].instance.clone();
        self.objects[first..]
            .iter()
            .take_while(|ob| ob.kind.is_pin() && ob.instance == inst)
            .count()
    }

    /// The property record following the pin run at `first`, if any.
    pub fn property_of(&self, first: usize) -> Option<&Object> {
        let end = first + self.pin_run_len(first);
        self.objects
            .get(end)
            .filter(|ob| ob.kind == ObjectKind::Property)
    }

    /// The name of the net with the given node number: the name of the
    /// first object carrying it.
    pub fn node_name(&self, node: i32) -> Option<&ArcStr> {
        if node <= 0 {
            return None;
        }
        self.objects
            .iter()
            .find(|ob| ob.node == node && ob.kind.is_connectable())
            .map(|ob| &ob.name)
    }

    /// The preferred (non-pin, if possible) object position for a node.
    pub fn node_object(&self, node: i32) -> Option<usize> {
        if node <= 0 {
            return None;
        }
        self.objects
            .iter()
            .position(|ob| ob.node == node && ob.kind.is_connectable())
    }

    /// The largest node number used in this cell.
    pub fn max_node(&self) -> i32 {
        self.objects.iter().map(|ob| ob.node).max().unwrap_or(0).max(0)
    }

    /// Allocates a fresh node number.
    pub fn alloc_node(&mut self) -> i32 {
        let n = self.next_node.max(self.max_node() + 1);
        self.next_node = n + 1;
        n
    }

    /// Renumbers every object carrying node `from` to node `to`.
    pub fn renumber(&mut self, from: i32, to: i32) {
        for ob in &mut self.objects {
            if ob.node == from {
                ob.node = to;
            }
        }
    }

    /// Declares a double-valued property key with relative tolerance
    /// `slop`.
    pub fn property_double(&mut self, key: impl Into<ArcStr>, slop: f64) {
        self.prop_keys.push(PropertyKey {
            key: key.into(),
            kind: PropKind::Double,
            slop: Slop::Double(slop),
        });
    }

    /// Declares an integer-valued property key with absolute tolerance
    /// `slop`.
    pub fn property_integer(&mut self, key: impl Into<ArcStr>, slop: i32) {
        self.prop_keys.push(PropertyKey {
            key: key.into(),
            kind: PropKind::Integer,
            slop: Slop::Integer(slop),
        });
    }

    /// Declares a string-valued property key compared to `range`
    /// characters (0 = exact).
    pub fn property_string(&mut self, key: impl Into<ArcStr>, range: i32) {
        self.prop_keys.push(PropertyKey {
            key: key.into(),
            kind: PropKind::String,
            slop: Slop::Integer(range),
        });
    }

    /// True if the named object exists and names a port of this cell.
    pub fn has_port_named(&self, name: &str) -> bool {
        self.lookup_object(name)
            .map(|idx| self.objects[idx].kind == ObjectKind::Port)
            .unwrap_or(false)
    }
}

/// A library of cells keyed by `(name, file)`.
///
/// The library is the single mutable store shared by the readers, the
/// hierarchy operations, and the comparison engine. The engine only ever
/// reads it; readers append to it.
pub struct Library {
    cell_id: u64,
    cells: IndexMap<CellId, Cell>,
    name_map: HashMap<UniCase<String>, Vec<CellId>>,
    files: IndexMap<UniCase<String>, FileId>,
    ignored: Vec<(ArcStr, Option<FileId>)>,
    warnings: u32,
}

impl Default for Library {
    fn default() -> Self {
        Self {
            cell_id: 0,
            cells: IndexMap::new(),
            name_map: HashMap::new(),
            files: IndexMap::new(),
            ignored: Vec::new(),
            warnings: 0,
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Library");
        let _ = builder.field("cells", &self.cells);
        let _ = builder.field("files", &self.files);
        builder.finish()
    }
}

impl Library {
    /// Creates a new, empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an input file, returning its tag.
    ///
    /// File naming is case-independent: registering the same path twice
    /// (in any case) returns the original tag.
    pub fn register_file(&mut self, name: &str) -> FileId {
        let key = UniCase::new(name.to_string());
        if let Some(&id) = self.files.get(&key) {
            return id;
        }
        let id = FileId(self.files.len() as u32);
        self.files.insert(key, id);
        id
    }

    /// The registered file tags, in registration order.
    pub fn files(&self) -> impl Iterator<Item = (&str, FileId)> {
        self.files.iter().map(|(name, &id)| (name.as_ref(), id))
    }

    /// Resolves a numeric tag back to its [`FileId`].
    pub fn file_tag(&self, index: u32) -> Option<FileId> {
        self.files
            .values()
            .find(|id| id.index() == index)
            .copied()
    }

    /// Reports an input problem, capped at [`MAX_REPORTED_WARNINGS`].
    pub fn input_warning(&mut self, msg: impl Display) {
        self.warnings += 1;
        if self.warnings < MAX_REPORTED_WARNINGS {
            tracing::warn!("{}", msg);
        } else if self.warnings == MAX_REPORTED_WARNINGS {
            tracing::warn!("{}", msg);
            tracing::warn!("further input warnings suppressed");
        }
    }

    /// Total number of input warnings recorded.
    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    #[inline]
    fn alloc_cell_id(&mut self) -> CellId {
        self.cell_id += 1;
        CellId(self.cell_id)
    }

    /// Defines a new cell, deleting any existing cell of the same name
    /// and file first.
    ///
    /// Returns the ID of the new, empty cell.
    pub fn define_cell(&mut self, name: impl Into<ArcStr>, file: FileId, nocase: bool) -> CellId {
        let name = name.into();
        if let Some(old) = self.lookup(&name, Some(file)) {
            self.delete_cell(old);
        }
        let id = self.alloc_cell_id();
        let cell = Cell::new(name.clone(), file, nocase);
        self.name_map
            .entry(UniCase::new(name.to_string()))
            .or_default()
            .push(id);
        self.cells.insert(id, cell);
        id
    }

    /// Reopens an existing cell for appending, or defines it if absent.
    pub fn reopen_or_define(
        &mut self,
        name: impl Into<ArcStr>,
        file: FileId,
        nocase: bool,
    ) -> CellId {
        let name = name.into();
        match self.lookup(&name, Some(file)) {
            Some(id) => id,
            None => self.define_cell(name, file, nocase),
        }
    }

    /// Removes a cell from the library.
    pub fn delete_cell(&mut self, id: CellId) {
        if let Some(cell) = self.cells.shift_remove(&id) {
            let key = UniCase::new(cell.name.to_string());
            if let Some(ids) = self.name_map.get_mut(&key) {
                ids.retain(|&c| c != id);
                if ids.is_empty() {
                    self.name_map.remove(&key);
                }
            }
        }
    }

    /// Gets the cell with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if no cell has the given ID. For a non-panicking
    /// alternative, see [`try_cell`](Library::try_cell).
    pub fn cell(&self, id: CellId) -> &Cell {
        self.cells.get(&id).unwrap()
    }

    /// Gets the cell with the given ID.
    #[inline]
    pub fn try_cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    /// Gets mutable access to the cell with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if no cell has the given ID.
    pub fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        self.cells.get_mut(&id).unwrap()
    }

    /// Iterates over the `(id, cell)` pairs in this library.
    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell)> {
        self.cells.iter().map(|(id, cell)| (*id, cell))
    }

    /// IDs of all cells, in definition order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        self.cells.keys().copied().collect()
    }

    /// Looks up a cell by name and optional file tag.
    ///
    /// `None` for the file returns the match from the lowest-numbered
    /// file. Case folding follows each candidate cell's own rule.
    pub fn lookup(&self, name: &str, file: Option<FileId>) -> Option<CellId> {
        let candidates = self.name_map.get(&UniCase::new(name.to_string()))?;
        let mut best: Option<(FileId, CellId)> = None;
        for &id in candidates {
            let cell = self.cells.get(&id)?;
            let name_ok = if cell.nocase {
                cell.name.eq_ignore_ascii_case(name)
            } else {
                cell.name.as_str() == name
            };
            if !name_ok {
                continue;
            }
            match file {
                Some(f) => {
                    if cell.file == f {
                        return Some(id);
                    }
                }
                None => {
                    if best.map(|(bf, _)| cell.file < bf).unwrap_or(true) {
                        best = Some((cell.file, id));
                    }
                }
            }
        }
        best.map(|(_, id)| id)
    }

    /// Finds the cell in `file` equivalent to the given cell: same class
    /// hash, as set at definition or by a class equivalence.
    pub fn lookup_class_equivalent(&self, name: &str, file: FileId, other: FileId) -> Option<CellId> {
        let id = self.lookup(name, Some(file))?;
        let hash = self.cell(id).class_hash();
        self.cells
            .iter()
            .find(|(_, c)| c.file == other && c.class_hash() == hash)
            .map(|(&id, _)| id)
    }

    /// Renames a cell, updating the name index.
    ///
    /// Returns `false` if the old name was not found.
    pub fn cell_rehash(&mut self, old: &str, new: impl Into<ArcStr>, file: Option<FileId>) -> bool {
        let Some(id) = self.lookup(old, file) else {
            return false;
        };
        let new = new.into();
        let old_key = UniCase::new(self.cell(id).name.to_string());
        if let Some(ids) = self.name_map.get_mut(&old_key) {
            ids.retain(|&c| c != id);
            if ids.is_empty() {
                self.name_map.remove(&old_key);
            }
        }
        let cell = self.cells.get_mut(&id).unwrap();
        cell.name = new.clone();
        cell.class_hash = class_hash(&new);
        self.name_map
            .entry(UniCase::new(new.to_string()))
            .or_default()
            .push(id);
        true
    }

    /// Marks a device class as ignored and removes its existing
    /// instances from the store.
    pub fn ignore_class(&mut self, name: impl Into<ArcStr>, file: Option<FileId>) {
        let name = name.into();
        self.ignored.push((name.clone(), file));
        self.class_delete(&name, file);
    }

    /// Returns `true` if the named class is being ignored for the given
    /// file.
    pub fn is_ignored(&self, name: &str, file: FileId) -> bool {
        self.ignored.iter().any(|(n, f)| {
            n.eq_ignore_ascii_case(name) && f.map(|f| f == file).unwrap_or(true)
        })
    }

    /// Removes every device instance of class `name` from every cell.
    pub fn class_delete(&mut self, name: &str, file: Option<FileId>) {
        let ids = self.cell_ids();
        for id in ids {
            let cell = self.cells.get_mut(&id).unwrap();
            if let Some(f) = file {
                if cell.file != f {
                    continue;
                }
            }
            let mut kept = Vec::with_capacity(cell.objects.len());
            let mut removed = false;
            let mut i = 0;
            while i < cell.objects.len() {
                let ob = &cell.objects[i];
                let is_target = ob.kind.is_first_pin()
                    && ob
                        .model
                        .as_deref()
                        .map(|m| m.eq_ignore_ascii_case(name))
                        .unwrap_or(false);
                if is_target {
                    let mut end = i + cell.pin_run_len(i);
                    if cell
                        .objects
                        .get(end)
                        .map(|ob| ob.kind == ObjectKind::Property)
                        .unwrap_or(false)
                    {
                        end += 1;
                    }
                    i = end;
                    removed = true;
                } else {
                    kept.push(cell.objects[i].clone());
                    i += 1;
                }
            }
            if removed {
                cell.replace_objects(kept);
            }
        }
    }

    /// Rewrites the `model` field of every instance of `old` to `new`.
    pub fn instance_rename(&mut self, old: &str, new: impl Into<ArcStr>, file: Option<FileId>) {
        let new = new.into();
        for (_, cell) in self.cells.iter_mut() {
            if let Some(f) = file {
                if cell.file != f {
                    continue;
                }
            }
            for ob in &mut cell.objects {
                if ob.kind.is_pin() {
                    if let Some(m) = &ob.model {
                        if m.eq_ignore_ascii_case(old) {
                            ob.model = Some(new.clone());
                        }
                    }
                }
            }
        }
    }

    /// Generates an instance name `prefix1`, `prefix2`, … unused in the
    /// given cell.
    pub fn next_instance_name(&self, cell: CellId, prefix: &str) -> ArcStr {
        let cell = self.cell(cell);
        let mut n = 1;
        loop {
            let candidate = format!("{}{}", prefix, n);
            if cell.lookup_instance(&candidate).is_none() {
                return ArcStr::from(candidate);
            }
            n += 1;
        }
    }

    /// Joins the nets of two named objects in a cell.
    ///
    /// If neither side is connected, a fresh node is allocated. If both
    /// are, the smaller number wins and every object carrying the larger
    /// number is renumbered.
    pub fn join(&mut self, cell: CellId, a: &str, b: &str) -> Result<(), StoreError> {
        let c = self.cell(cell);
        let ai = c.lookup_object(a).ok_or_else(|| StoreError::UndefinedObject {
            name: ArcStr::from(a),
            cell: c.name.clone(),
        })?;
        let bi = c.lookup_object(b).ok_or_else(|| StoreError::UndefinedObject {
            name: ArcStr::from(b),
            cell: c.name.clone(),
        })?;
        let cell = self.cell_mut(cell);
        let (na, nb) = (cell.objects[ai].node, cell.objects[bi].node);
        match (na, nb) {
            (DISCONNECTED, DISCONNECTED) => {
                let n = cell.alloc_node();
                cell.objects[ai].node = n;
                cell.objects[bi].node = n;
            }
            (DISCONNECTED, n) => cell.objects[ai].node = n,
            (n, DISCONNECTED) => cell.objects[bi].node = n,
            (x, y) if x == y => {}
            (x, y) => {
                let (keep, drop) = if x < y { (x, y) } else { (y, x) };
                cell.renumber(drop, keep);
            }
        }
        Ok(())
    }

    /// Expands a connect pattern into matching object positions.
    ///
    /// `*` matches any run of characters and `?` a single character;
    /// a pattern without wildcards is a plain name lookup.
    pub fn expand_pattern(&self, cell: CellId, pattern: &str) -> Vec<usize> {
        let cell = self.cell(cell);
        if !pattern.contains(['*', '?']) {
            return cell
                .lookup_object(pattern)
                .into_iter()
                .filter(|&i| cell.objects[i].kind.is_connectable())
                .collect();
        }
        let mut re = String::from("^");
        for ch in pattern.chars() {
            match ch {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');
        let builder = regex::RegexBuilder::new(&re)
            .case_insensitive(cell.nocase)
            .build();
        let Ok(re) = builder else {
            return Vec::new();
        };
        cell.objects
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.kind.is_connectable() && re.is_match(&ob.name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Connects the nets matched by two patterns pairwise.
    ///
    /// 1-to-N and N-to-1 fan out; unequal N-to-M is an error.
    pub fn connect(&mut self, cell: CellId, pat1: &str, pat2: &str) -> Result<(), StoreError> {
        let list1 = self.expand_pattern(cell, pat1);
        let list2 = self.expand_pattern(cell, pat2);
        let names = |lib: &Library, list: &[usize]| -> Vec<ArcStr> {
            list.iter().map(|&i| lib.cell(cell).objects[i].name.clone()).collect()
        };
        let (n1, n2) = (list1.len(), list2.len());
        if n1 == n2 && n1 > 0 {
            let (l1, l2) = (names(self, &list1), names(self, &list2));
            for (a, b) in l1.iter().zip(l2.iter()) {
                self.join(cell, a, b)?;
            }
        } else if n1 == 1 && n2 > 0 {
            let (l1, l2) = (names(self, &list1), names(self, &list2));
            for b in l2.iter() {
                self.join(cell, &l1[0], b)?;
            }
        } else if n2 == 1 && n1 > 0 {
            let (l1, l2) = (names(self, &list1), names(self, &list2));
            for a in l1.iter() {
                self.join(cell, a, &l2[0])?;
            }
        } else {
            return Err(StoreError::UnequalConnectLists {
                pattern1: ArcStr::from(pat1),
                len1: n1,
                pattern2: ArcStr::from(pat2),
                len2: n2,
            });
        }
        Ok(())
    }

    /// Assigns fresh node numbers to any named object still
    /// disconnected, so that every port and named net has a valid net
    /// before the comparison engine builds its lists.
    pub fn connect_all_nodes(&mut self, cell: CellId) {
        let cell = self.cell_mut(cell);
        for i in 0..cell.objects.len() {
            let ob = &cell.objects[i];
            if ob.node == DISCONNECTED
                && matches!(
                    ob.kind,
                    ObjectKind::Port | ObjectKind::Node | ObjectKind::Global | ObjectKind::UniqueGlobal
                )
            {
                let n = cell.alloc_node();
                cell.objects[i].node = n;
            }
        }
    }

    /// Instantiates `model` inside `parent` under the name `inst`.
    ///
    /// For each port of the model a pin object `inst/portname` is
    /// appended. Model globals are unified with same-named globals of
    /// the parent (created on demand); unique globals get a synthesised
    /// per-instance name. Ports of the model that are internally shorted
    /// together short the corresponding new pins.
    pub fn instantiate(
        &mut self,
        parent: CellId,
        model: &str,
        inst: &str,
    ) -> Result<(), StoreError> {
        let file = self.cell(parent).file;
        if self.is_ignored(model, file) {
            tracing::info!("class `{}` instanced in input but is being ignored", model);
            return Ok(());
        }
        let model_id = self.lookup(model, Some(file)).ok_or_else(|| StoreError::UndefinedCell {
            name: ArcStr::from(model),
        })?;
        let model_cell = self.cell(model_id);
        let model_name = model_cell.name.clone();
        let parent_name = self.cell(parent).name.clone();

        // Snapshot what we need from the model before mutating the parent.
        let ports: Vec<(ArcStr, i32)> = model_cell
            .ports()
            .map(|(_, ob)| (ob.name.clone(), ob.node))
            .collect();
        let globals: Vec<ArcStr> = model_cell
            .objects()
            .iter()
            .filter(|ob| ob.kind == ObjectKind::Global)
            .map(|ob| ob.name.clone())
            .collect();
        let uglobals: Vec<ArcStr> = model_cell
            .objects()
            .iter()
            .filter(|ob| ob.kind == ObjectKind::UniqueGlobal)
            .map(|ob| ob.name.clone())
            .collect();

        // Ports sharing a net inside the model short their pins outside.
        let mut shorted: Vec<(ArcStr, ArcStr)> = Vec::new();
        for (i, (name_i, node_i)) in ports.iter().enumerate() {
            if *node_i == DISCONNECTED {
                continue;
            }
            for (name_j, node_j) in ports.iter().skip(i + 1) {
                if node_i == node_j {
                    shorted.push((name_i.clone(), name_j.clone()));
                }
            }
        }

        // All pins go in first, keeping the instance's run contiguous;
        // net objects and joins follow.
        let mut joins: Vec<(String, String)> = Vec::new();
        {
            let cell = self.cell_mut(parent);
            cell.num_instances += 1;
            for (pinno, (pname, _)) in ports.iter().enumerate() {
                let name = format!("{}{}{}", inst, SEPARATOR, pname);
                cell.add_object(Object::pin(name, pinno as u16, model_name.clone(), inst));
            }
            let mut next_pin = ports.len() as u16;
            for gname in globals.iter().chain(uglobals.iter()) {
                let pin_name = format!("{}{}{}", inst, SEPARATOR, gname);
                cell.add_object(Object::pin(
                    pin_name.clone(),
                    next_pin,
                    model_name.clone(),
                    inst,
                ));
                next_pin += 1;
            }
        }
        {
            let cell = self.cell_mut(parent);
            for gname in globals.iter() {
                if cell.lookup_object(gname).is_none() {
                    cell.add_object(Object::global(gname.clone()));
                }
                joins.push((
                    gname.to_string(),
                    format!("{}{}{}", inst, SEPARATOR, gname),
                ));
            }
            for gname in uglobals.iter() {
                let unique = format!(
                    "{}{}{}{}{}",
                    parent_name, INSTANCE_DELIMITER, inst, SEPARATOR, gname
                );
                if cell.lookup_object(&unique).is_none() {
                    cell.add_object(Object::unique_global(unique.clone()));
                }
                joins.push((unique, format!("{}{}{}", inst, SEPARATOR, gname)));
            }
        }
        for (net, pin) in joins {
            self.join(parent, &net, &pin)?;
        }

        for (a, b) in shorted {
            let pa = format!("{}{}{}", inst, SEPARATOR, a);
            let pb = format!("{}{}{}", inst, SEPARATOR, b);
            self.join(parent, &pa, &pb)?;
        }
        Ok(())
    }

    /// Attaches a property record to the device instance just emitted in
    /// `parent`.
    ///
    /// Values are ordered to align with the model's declared key list;
    /// missing declared keys produce zero/empty values and a warning.
    /// Undeclared keys are retained verbatim in the raw sidecar.
    pub fn link_properties(
        &mut self,
        parent: CellId,
        model: &str,
        inst: &str,
        pairs: &[(ArcStr, ArcStr)],
    ) -> Result<(), StoreError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let file = self.cell(parent).file;
        if self.is_ignored(model, file) {
            return Ok(());
        }
        let model_id = self.lookup(model, Some(file)).ok_or_else(|| StoreError::UndefinedCell {
            name: ArcStr::from(model),
        })?;
        let keys = self.cell(model_id).prop_keys.clone();
        let model_name = self.cell(model_id).name.clone();
        let mut missing = Vec::new();
        let data = props::align_values(&keys, pairs, &mut missing);
        for key in missing {
            self.input_warning(format!(
                "instance of {} is missing property \"{}\"",
                model, key
            ));
        }
        // The record goes directly after the instance's pin run.
        let cell = self.cell_mut(parent);
        let record = Object::property(model_name, inst, data);
        match cell.lookup_instance(inst) {
            Some(first) => {
                let pos = first + cell.pin_run_len(first);
                if pos < cell.objects().len() {
                    let mut objects = cell.take_objects();
                    objects.insert(pos, record);
                    cell.replace_objects(objects);
                } else {
                    cell.add_object(record);
                }
            }
            None => {
                cell.add_object(record);
            }
        }
        Ok(())
    }

    /// Checks and sets a cell's device class.
    ///
    /// Fails if the cell's port count is not legal for the class.
    pub fn set_cell_class(&mut self, id: CellId, class: DeviceClass) -> Result<(), StoreError> {
        let cell = self.cell(id);
        if let Some(allowed) = class.allowed_port_counts() {
            let ports = cell.port_count();
            if !allowed.contains(&ports) {
                return Err(StoreError::PortCountMismatch {
                    cell: cell.name.clone(),
                    ports,
                    class,
                });
            }
        }
        self.cell_mut(id).set_class(class);
        Ok(())
    }

    /// Clears every cell's per-walk visit marker.
    pub fn clear_dumped(&mut self) {
        for (_, cell) in self.cells.iter_mut() {
            cell.dumped = false;
        }
    }
}
