//! Format registry: which handler deals with which input or output.
//!
//! Every loader and saver is published with an immutable
//! [`FormatDescriptor`] built through [`DescriptorBuilder`]. A [`Registry`]
//! is assembled once with [`RegistryBuilder`], validated, sorted by
//! descending priority (stable, so equal priorities keep registration
//! order) and then only read.
//!
//! # Discovery rules
//!
//! | Query | Candidates | Match |
//! |-------|------------|-------|
//! | [`find_load`](Registry::find_load) | file loaders | sniffers first, then suffix-only loaders |
//! | [`find_load_buffer`](Registry::find_load_buffer) | buffer loaders | sniff only |
//! | [`find_load_source`](Registry::find_load_source) | stream loaders | sniff only, rewinding before each |
//! | [`find_save`](Registry::find_save) | file savers | case-insensitive filename suffix |
//! | [`find_save_buffer`](Registry::find_save_buffer) / [`find_save_target`](Registry::find_save_target) | buffer / stream savers | normalized suffix |
//!
//! Blocked handlers never take part in discovery. Loaders named `rawload*`
//! accept any bytes and are only ever invoked by name.

use crate::error::ForeignError;
use crate::handler::{Loader, Saver};
use crate::image::{BandFormat, Coding};
use crate::io::{IoKind, LoadInput, Source};
use crate::options::split_filename;
use log::{debug, warn};
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

// =============================================================================
// Capability types
// =============================================================================

/// Per-input capabilities a loader reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ForeignFlags {
    partial: bool,
    sequential: bool,
    big_endian: bool,
}

impl ForeignFlags {
    pub const NONE: Self = Self::new();

    pub const fn new() -> Self {
        Self {
            partial: false,
            sequential: false,
            big_endian: false,
        }
    }

    /// Any region can be read cheaply without decoding the whole image.
    pub const fn with_partial(mut self, v: bool) -> Self {
        self.partial = v;
        self
    }

    /// Pixels can only be produced top to bottom.
    pub const fn with_sequential(mut self, v: bool) -> Self {
        self.sequential = v;
        self
    }

    /// Pixels are stored most significant byte first.
    pub const fn with_big_endian(mut self, v: bool) -> Self {
        self.big_endian = v;
        self
    }

    pub const fn partial(&self) -> bool {
        self.partial
    }

    pub const fn sequential(&self) -> bool {
        self.sequential
    }

    pub const fn big_endian(&self) -> bool {
        self.big_endian
    }
}

impl fmt::Display for ForeignFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.partial, "partial"),
            (self.sequential, "sequential"),
            (self.big_endian, "bigendian"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// Colour models a saver can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Saveable(u8);

impl Saveable {
    pub const MONO: Saveable = Saveable(1);
    pub const RGB: Saveable = Saveable(1 << 1);
    pub const CMYK: Saveable = Saveable(1 << 2);
    pub const ALPHA: Saveable = Saveable(1 << 3);
    /// Anything at all: no colour, alpha or band-count coercion.
    pub const ANY: Saveable = Saveable(1 << 4);

    pub const fn union(self, other: Saveable) -> Saveable {
        Saveable(self.0 | other.0)
    }

    pub const fn contains(self, other: Saveable) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_any(self) -> bool {
        self.contains(Saveable::ANY)
    }
}

impl std::ops::BitOr for Saveable {
    type Output = Saveable;

    fn bitor(self, rhs: Saveable) -> Saveable {
        self.union(rhs)
    }
}

impl fmt::Display for Saveable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Saveable::MONO, "mono"),
            (Saveable::RGB, "rgb"),
            (Saveable::CMYK, "cmyk"),
            (Saveable::ALPHA, "alpha"),
            (Saveable::ANY, "any"),
        ]
        .into_iter()
        .filter_map(|(s, name)| self.contains(s).then_some(name))
        .collect();
        f.write_str(&names.join("|"))
    }
}

impl Serialize for Saveable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Pixel codings a saver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodingSet(u8);

impl CodingSet {
    pub const NONE: CodingSet = CodingSet(1);
    pub const LABQ: CodingSet = CodingSet(1 << 1);
    pub const RAD: CodingSet = CodingSet(1 << 2);

    pub const fn union(self, other: CodingSet) -> CodingSet {
        CodingSet(self.0 | other.0)
    }

    pub const fn accepts(self, coding: Coding) -> bool {
        let bit = match coding {
            Coding::None => Self::NONE.0,
            Coding::LabQ => Self::LABQ.0,
            Coding::Rad => Self::RAD.0,
        };
        self.0 & bit != 0
    }
}

impl std::ops::BitOr for CodingSet {
    type Output = CodingSet;

    fn bitor(self, rhs: CodingSet) -> CodingSet {
        self.union(rhs)
    }
}

impl fmt::Display for CodingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [Coding::None, Coding::LabQ, Coding::Rad]
            .into_iter()
            .filter(|c| self.accepts(*c))
            .map(Coding::name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl Serialize for CodingSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// For every source band format, the format a saver wants instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatTable([BandFormat; 10]);

impl FormatTable {
    /// No promotion.
    pub const IDENTITY: FormatTable = FormatTable(BandFormat::ALL);
    /// Everything becomes uchar.
    pub const ALL_UCHAR: FormatTable = FormatTable([BandFormat::UChar; 10]);

    /// Table indexed in [`BandFormat::ALL`] order.
    pub const fn new(table: [BandFormat; 10]) -> Self {
        Self(table)
    }

    pub const fn get(&self, format: BandFormat) -> BandFormat {
        self.0[format.index()]
    }
}

impl Serialize for FormatTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(10))?;
        for format in BandFormat::ALL {
            map.serialize_entry(format.name(), self.get(format).name())?;
        }
        map.end()
    }
}

// =============================================================================
// Descriptors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Load,
    Save,
}

/// Immutable description of one handler operation.
#[derive(Debug, Clone, Serialize)]
pub struct FormatDescriptor {
    name: String,
    format: String,
    description: String,
    kind: OpKind,
    io: IoKind,
    priority: i32,
    suffixes: Vec<String>,
    blocked: bool,
    saveable: Saveable,
    format_table: FormatTable,
    coding: CodingSet,
}

impl FormatDescriptor {
    /// Start a loader descriptor. The operation name is derived from the
    /// format and I/O kind: `png` + buffer gives `pngload_buffer`.
    pub fn loader(format: &str, io: IoKind) -> DescriptorBuilder {
        DescriptorBuilder::new(format, OpKind::Load, io)
    }

    /// Start a saver descriptor: `png` + stream gives `pngsave_target`.
    pub fn saver(format: &str, io: IoKind) -> DescriptorBuilder {
        DescriptorBuilder::new(format, OpKind::Save, io)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn io(&self) -> IoKind {
        self.io
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    pub fn saveable(&self) -> Saveable {
        self.saveable
    }

    pub fn format_table(&self) -> &FormatTable {
        &self.format_table
    }

    pub fn coding(&self) -> CodingSet {
        self.coding
    }

    /// Case-insensitive match of a filename against the suffix list.
    pub fn matches_filename(&self, filename: &str) -> bool {
        let lower = filename.to_ascii_lowercase();
        self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }

    /// Whether discovery may pick this handler.
    fn discoverable(&self) -> bool {
        !self.blocked && !self.name.starts_with("rawload")
    }
}

/// Builds a [`FormatDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: FormatDescriptor,
}

impl DescriptorBuilder {
    fn new(format: &str, kind: OpKind, io: IoKind) -> Self {
        let verb = match kind {
            OpKind::Load => "load",
            OpKind::Save => "save",
        };
        let name = format!("{format}{verb}{}", io.suffix(kind == OpKind::Load));
        Self {
            descriptor: FormatDescriptor {
                name,
                format: format.to_string(),
                description: format.to_string(),
                kind,
                io,
                priority: 0,
                suffixes: Vec::new(),
                blocked: false,
                saveable: Saveable::ANY,
                format_table: FormatTable::IDENTITY,
                coding: CodingSet::NONE,
            },
        }
    }

    pub fn description(mut self, text: &str) -> Self {
        self.descriptor.description = text.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    /// Suffixes are stored lower-case with a leading dot.
    pub fn suffixes(mut self, suffixes: &[&str]) -> Self {
        self.descriptor.suffixes = suffixes.iter().map(|s| normalize_suffix(s)).collect();
        self
    }

    pub fn blocked(mut self, blocked: bool) -> Self {
        self.descriptor.blocked = blocked;
        self
    }

    pub fn saveable(mut self, saveable: Saveable) -> Self {
        self.descriptor.saveable = saveable;
        self
    }

    pub fn format_table(mut self, table: FormatTable) -> Self {
        self.descriptor.format_table = table;
        self
    }

    pub fn coding(mut self, coding: CodingSet) -> Self {
        self.descriptor.coding = coding;
        self
    }

    pub fn build(self) -> FormatDescriptor {
        self.descriptor
    }
}

/// Lower-case, options stripped, leading dot: `"x.JPG[Q=9]"` gives `".jpg"`.
pub fn normalize_suffix(name: &str) -> String {
    let (name, _) = split_filename(name);
    let lower = name.trim().to_ascii_lowercase();
    match lower.rfind('.') {
        Some(dot) => lower[dot..].to_string(),
        None => format!(".{lower}"),
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Clone)]
pub struct LoaderEntry {
    pub descriptor: Arc<FormatDescriptor>,
    pub loader: Arc<dyn Loader>,
}

impl fmt::Debug for LoaderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SaverEntry {
    pub descriptor: Arc<FormatDescriptor>,
    pub saver: Arc<dyn Saver>,
}

/// Collects handlers before they are frozen into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    loaders: Vec<LoaderEntry>,
    savers: Vec<SaverEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader. Misconfigured loaders are logged and left out.
    pub fn register_loader(
        &mut self,
        descriptor: FormatDescriptor,
        loader: Arc<dyn Loader>,
    ) -> Result<(), ForeignError> {
        let problem = if descriptor.kind != OpKind::Load {
            Some("registered as a loader but described as a saver")
        } else if descriptor.io != IoKind::File && !loader.sniffs() {
            Some("buffer and stream loaders must be able to sniff")
        } else if descriptor.io == IoKind::File
            && !loader.sniffs()
            && descriptor.suffixes.is_empty()
        {
            Some("loader can neither sniff nor match suffixes")
        } else {
            None
        };
        if let Some(reason) = problem {
            warn!("{}: {reason}", descriptor.name);
            return Err(ForeignError::MisconfiguredHandler {
                name: descriptor.name.clone(),
                reason: reason.to_string(),
            });
        }
        self.loaders.push(LoaderEntry {
            descriptor: Arc::new(descriptor),
            loader,
        });
        Ok(())
    }

    /// Add a saver. Savers without suffixes are logged and left out.
    pub fn register_saver(
        &mut self,
        descriptor: FormatDescriptor,
        saver: Arc<dyn Saver>,
    ) -> Result<(), ForeignError> {
        let problem = if descriptor.kind != OpKind::Save {
            Some("registered as a saver but described as a loader")
        } else if descriptor.suffixes.is_empty() {
            Some("saver has no suffixes")
        } else {
            None
        };
        if let Some(reason) = problem {
            warn!("{}: {reason}", descriptor.name);
            return Err(ForeignError::MisconfiguredHandler {
                name: descriptor.name.clone(),
                reason: reason.to_string(),
            });
        }
        self.savers.push(SaverEntry {
            descriptor: Arc::new(descriptor),
            saver,
        });
        Ok(())
    }

    pub fn build(mut self) -> Registry {
        self.loaders
            .sort_by_key(|e| Reverse(e.descriptor.priority));
        self.savers.sort_by_key(|e| Reverse(e.descriptor.priority));
        Registry {
            loaders: self.loaders,
            savers: self.savers,
        }
    }
}

/// Immutable set of handlers in priority order.
pub struct Registry {
    loaders: Vec<LoaderEntry>,
    savers: Vec<SaverEntry>,
}

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(crate::builtin::registry()));

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The process-wide registry of built-in handlers.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Every loader, highest priority first.
    pub fn loaders(&self) -> &[LoaderEntry] {
        &self.loaders
    }

    /// Every saver, highest priority first.
    pub fn savers(&self) -> &[SaverEntry] {
        &self.savers
    }

    fn candidates(&self, io: IoKind) -> impl Iterator<Item = &LoaderEntry> {
        self.loaders
            .iter()
            .filter(move |e| e.descriptor.io == io && e.descriptor.discoverable())
    }

    /// Loader for a file. `filename` may carry a `[options]` suffix.
    ///
    /// Existence is checked before any handler runs. Every sniffing loader
    /// gets a look at the file before any suffix-only loader is considered.
    pub fn find_load(&self, filename: &str) -> Result<&LoaderEntry, ForeignError> {
        let (name, _) = split_filename(filename);
        let path = Path::new(name);
        if !path.exists() {
            return Err(ForeignError::InputNotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Err(ForeignError::InputIsDirectory(path.to_path_buf()));
        }
        let input = LoadInput::File(path.to_path_buf());

        for entry in self.candidates(IoKind::File).filter(|e| e.loader.sniffs()) {
            if entry.loader.is_a(&input)? {
                debug!("{name}: sniffed by {}", entry.descriptor.name);
                return Ok(entry);
            }
        }
        for entry in self.candidates(IoKind::File).filter(|e| !e.loader.sniffs()) {
            if entry.descriptor.matches_filename(name) {
                debug!("{name}: suffix matched {}", entry.descriptor.name);
                return Ok(entry);
            }
        }
        Err(ForeignError::UnknownFormat(name.to_string()))
    }

    /// Loader for an in-memory buffer.
    pub fn find_load_buffer(&self, bytes: &[u8]) -> Result<&LoaderEntry, ForeignError> {
        self.find_load_input(&LoadInput::Buffer(Arc::from(bytes)))
    }

    /// Loader for a stream. The stream is rewound before each candidate.
    pub fn find_load_source(&self, source: &Source) -> Result<&LoaderEntry, ForeignError> {
        self.find_load_input(&LoadInput::Source(source.clone()))
    }

    /// Loader for a buffer or stream input.
    pub fn find_load_input(&self, input: &LoadInput) -> Result<&LoaderEntry, ForeignError> {
        if let LoadInput::File(path) = input {
            return self.find_load(&path.to_string_lossy());
        }
        for entry in self.candidates(input.kind()) {
            if let LoadInput::Source(source) = input {
                source.rewind()?;
            }
            if entry.loader.is_a(input)? {
                return Ok(entry);
            }
        }
        let what = match input {
            LoadInput::Buffer(_) => "buffer",
            _ => "source",
        };
        Err(ForeignError::UnknownFormat(what.to_string()))
    }

    /// Saver for a filename, by case-insensitive suffix.
    pub fn find_save(&self, filename: &str) -> Result<&SaverEntry, ForeignError> {
        let (name, _) = split_filename(filename);
        self.savers
            .iter()
            .filter(|e| e.descriptor.io == IoKind::File && e.descriptor.discoverable())
            .find(|e| e.descriptor.matches_filename(name))
            .ok_or_else(|| ForeignError::UnknownFormat(name.to_string()))
    }

    /// Buffer saver for a suffix such as `".png"` or `"png"`.
    pub fn find_save_buffer(&self, suffix: &str) -> Result<&SaverEntry, ForeignError> {
        self.find_save_by_suffix(IoKind::Buffer, suffix)
    }

    /// Stream saver for a suffix.
    pub fn find_save_target(&self, suffix: &str) -> Result<&SaverEntry, ForeignError> {
        self.find_save_by_suffix(IoKind::Stream, suffix)
    }

    fn find_save_by_suffix(&self, io: IoKind, suffix: &str) -> Result<&SaverEntry, ForeignError> {
        let wanted = normalize_suffix(suffix);
        self.savers
            .iter()
            .filter(|e| e.descriptor.io == io && e.descriptor.discoverable())
            .find(|e| e.descriptor.suffixes.contains(&wanted))
            .ok_or_else(|| ForeignError::UnknownFormat(suffix.to_string()))
    }

    /// Every suffix some saver can write, highest priority first.
    pub fn suffixes(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for entry in self.savers.iter().filter(|e| !e.descriptor.blocked) {
            for suffix in &entry.descriptor.suffixes {
                if !all.contains(suffix) {
                    all.push(suffix.clone());
                }
            }
        }
        all
    }

    /// Loader by operation name, blocked or not.
    pub fn loader(&self, name: &str) -> Result<&LoaderEntry, ForeignError> {
        self.loaders
            .iter()
            .find(|e| e.descriptor.name == name)
            .ok_or_else(|| ForeignError::NoSuchOperation(name.to_string()))
    }

    /// Saver by operation name.
    pub fn saver(&self, name: &str) -> Result<&SaverEntry, ForeignError> {
        self.savers
            .iter()
            .find(|e| e.descriptor.name == name)
            .ok_or_else(|| ForeignError::NoSuchOperation(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Option<&FormatDescriptor> {
        self.loaders
            .iter()
            .map(|e| e.descriptor.as_ref())
            .chain(self.savers.iter().map(|e| e.descriptor.as_ref()))
            .find(|d| d.name == name)
    }

    /// Flags the named loader reports for a file.
    pub fn flags(&self, loader: &str, filename: &str) -> Result<ForeignFlags, ForeignError> {
        let entry = self.loader(loader)?;
        let (name, _) = split_filename(filename);
        Ok(entry.loader.flags(&LoadInput::File(name.into())))
    }

    /// Whether the named loader recognises a file.
    pub fn is_a(&self, loader: &str, filename: &str) -> Result<bool, ForeignError> {
        let entry = self.loader(loader)?;
        let (name, _) = split_filename(filename);
        let input = LoadInput::File(name.into());
        if entry.loader.sniffs() {
            entry.loader.is_a(&input)
        } else {
            Ok(entry.descriptor.matches_filename(name))
        }
    }

    /// Whether the named loader recognises a buffer.
    pub fn is_a_buffer(&self, loader: &str, bytes: &[u8]) -> Result<bool, ForeignError> {
        let entry = self.loader(loader)?;
        entry.loader.is_a(&LoadInput::Buffer(Arc::from(bytes)))
    }

    /// Whether the named loader recognises a stream. The stream is rewound
    /// first.
    pub fn is_a_source(&self, loader: &str, source: &Source) -> Result<bool, ForeignError> {
        let entry = self.loader(loader)?;
        source.rewind()?;
        entry.loader.is_a(&LoadInput::Source(source.clone()))
    }
}
