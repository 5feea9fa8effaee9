//! The netlist contract: anything that can write itself to a file.
//!
//! Plain paths are copied. `TextNetlist` holds generated netlist text in
//! memory and writes it on demand.

use std::io;
use std::path::{Path, PathBuf};


/// A circuit description that can be materialized for one run.
pub trait Netlist: Send + Sync {
    /// The file the netlist originates from. Its stem and extension name
    /// the per-run copies.
    fn circuit_file(&self) -> &Path;

    /// Write the netlist to `dest`.
    fn save_netlist(&self, dest: &Path) -> io::Result<()>;
}

impl Netlist for Path {
    fn circuit_file(&self) -> &Path {
        self
    }

    fn save_netlist(&self, dest: &Path) -> io::Result<()> {
        if same_file(self, dest) {
            return Ok(());
        }
        std::fs::copy(self, dest).map(|_| ())
    }
}

impl Netlist for PathBuf {
    fn circuit_file(&self) -> &Path {
        self
    }

    fn save_netlist(&self, dest: &Path) -> io::Result<()> {
        self.as_path().save_netlist(dest)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}


/// Netlist text produced in memory, e.g. by an editor or a sweep generator.
#[derive(Debug, Clone, PartialEq)]
pub struct TextNetlist {
    pub circuit_file: PathBuf,
    pub text: String,
}

impl TextNetlist {
    pub fn new(circuit_file: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        TextNetlist {
            circuit_file: circuit_file.into(),
            text: text.into(),
        }
    }
}

impl Netlist for TextNetlist {
    fn circuit_file(&self) -> &Path {
        &self.circuit_file
    }

    fn save_netlist(&self, dest: &Path) -> io::Result<()> {
        std::fs::write(dest, &self.text)
    }
}


/// `{stem}_{run}{ext}`. Schematic-only `.qsch` files become `.net`.
pub fn run_file_name(circuit: &Path, run: u64) -> String {
    let stem = circuit
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = match circuit.extension().map(|e| e.to_string_lossy().into_owned()) {
        Some(e) if e.eq_ignore_ascii_case("qsch") => ".net".to_string(),
        Some(e) => format!(".{}", e),
        None => String::new(),
    };
    format!("{}_{}{}", stem, run, ext)
}

/// Where a run's netlist goes: the output folder if set, else next to the
/// circuit file.
pub fn run_destination(output_folder: Option<&Path>, circuit: &Path, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(file_name));
    match output_folder {
        Some(folder) => folder.join(name),
        None => circuit
            .parent()
            .map(|p| p.join(&name))
            .unwrap_or(name),
    }
}
