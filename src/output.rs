//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Header
//!
//! ```text
//! photo.png: 640x480 uchar, 3 bands, srgb, pngload
//!     resolution: 2.835 x 2.835 pixels/mm
//!     icc-profile-data: 3144 bytes
//!     vips-loader: pngload
//! ```
//!
//! ## Formats
//!
//! ```text
//! Loaders
//!     pngload          file    200  .png          png via the image crate
//!     pngload_buffer   buffer  200  .png          png via the image crate
//!
//! Savers
//!     jpegsave         file     50  .jpg .jpeg .jpe  mono|rgb
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. With `--json`
//! the same reports are serialized with serde_json instead.

use crate::image::{meta, Header, Image, MetaValue};
use crate::io::IoKind;
use crate::registry::{FormatDescriptor, OpKind};
use serde::Serialize;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

// ============================================================================
// Header
// ============================================================================

/// One metadata field, value summarised for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub value: String,
}

/// What `imgport header` shows for one file.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderReport {
    pub filename: String,
    pub loader: Option<String>,
    #[serde(flatten)]
    pub header: Header,
    pub fields: Vec<FieldReport>,
}

impl HeaderReport {
    pub fn new(filename: &str, image: &Image) -> Self {
        let fields = image
            .meta()
            .iter()
            .map(|(name, value)| FieldReport {
                name: name.to_string(),
                value: summarise(value),
            })
            .collect();
        Self {
            filename: filename.to_string(),
            loader: image.meta().get_str(meta::LOADER).map(str::to_string),
            header: *image.header(),
            fields,
        }
    }
}

fn summarise(value: &MetaValue) -> String {
    match value {
        MetaValue::Int(v) => v.to_string(),
        MetaValue::Double(v) => v.to_string(),
        MetaValue::Str(s) => s.clone(),
        MetaValue::Blob(b) => format!("{} bytes", b.len()),
    }
}

pub fn format_header(report: &HeaderReport) -> Vec<String> {
    let h = &report.header;
    let mut summary = format!(
        "{}: {}x{} {}, {} band{}, {}",
        report.filename,
        h.width,
        h.height,
        h.format,
        h.bands,
        if h.bands == 1 { "" } else { "s" },
        h.interpretation
    );
    if h.coding != crate::image::Coding::None {
        summary.push_str(&format!(", {} coded", h.coding));
    }
    if let Some(loader) = &report.loader {
        summary.push_str(&format!(", {loader}"));
    }

    let mut lines = vec![summary];
    lines.push(format!(
        "{}resolution: {} x {} pixels/mm",
        indent(1),
        h.xres,
        h.yres
    ));
    for field in &report.fields {
        lines.push(format!("{}{}: {}", indent(1), field.name, field.value));
    }
    lines
}

pub fn print_header(report: &HeaderReport) {
    for line in format_header(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Formats
// ============================================================================

fn descriptor_line(d: &FormatDescriptor) -> String {
    let io = match d.io() {
        IoKind::File => "file",
        IoKind::Buffer => "buffer",
        IoKind::Stream => "stream",
    };
    let mut line = format!(
        "{}{:<16} {:<7} {:>4}  {}",
        indent(1),
        d.name(),
        io,
        d.priority(),
        d.suffixes().join(" ")
    );
    if d.kind() == OpKind::Save {
        line.push_str(&format!("  {}", d.saveable()));
    }
    if !d.description().is_empty() {
        line.push_str(&format!("  {}", d.description()));
    }
    if d.blocked() {
        line.push_str("  (blocked)");
    }
    line
}

/// Loaders then savers, each in the order they are tried.
pub fn format_formats<'a>(
    loaders: impl IntoIterator<Item = &'a FormatDescriptor>,
    savers: impl IntoIterator<Item = &'a FormatDescriptor>,
) -> Vec<String> {
    let mut lines = vec!["Loaders".to_string()];
    lines.extend(loaders.into_iter().map(descriptor_line));
    lines.push(String::new());
    lines.push("Savers".to_string());
    lines.extend(savers.into_iter().map(descriptor_line));
    lines
}

pub fn print_formats<'a>(
    loaders: impl IntoIterator<Item = &'a FormatDescriptor>,
    savers: impl IntoIterator<Item = &'a FormatDescriptor>,
) {
    for line in format_formats(loaders, savers) {
        println!("{}", line);
    }
}

pub fn format_suffixes(suffixes: &[String]) -> Vec<String> {
    vec![suffixes.join(" ")]
}

// ============================================================================
// JSON
// ============================================================================

/// Pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
