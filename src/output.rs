use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::parser::text::normalize;

/// One extracted product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub name: String,
    pub flavor: Vec<String>,
    pub manufacturer: String,
}

impl ProductRecord {
    /// Trims every field; drops empty and case-insensitively repeated flavors.
    pub fn new(name: impl AsRef<str>, flavor: Vec<String>, manufacturer: impl AsRef<str>) -> Self {
        let mut seen = HashSet::new();
        let flavor = flavor
            .iter()
            .map(|f| normalize(f))
            .filter(|f| !f.is_empty() && seen.insert(f.to_lowercase()))
            .collect();
        Self {
            name: normalize(name.as_ref()),
            flavor,
            manufacturer: normalize(manufacturer.as_ref()),
        }
    }
}

#[derive(Serialize)]
struct Manufacturer<'a> {
    name: &'a str,
}

// {"name": .., "flavor": "a,b", "manufacturer": {"name": ..}}
impl Serialize for ProductRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ProductRecord", 3)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("flavor", &self.flavor.join(","))?;
        s.serialize_field(
            "manufacturer",
            &Manufacturer {
                name: &self.manufacturer,
            },
        )?;
        s.end()
    }
}

/// Line-per-record JSON sink. Every record is flushed as soon as it is
/// written, so an interrupted run leaves only whole lines behind.
pub struct JsonlWriter<W: Write> {
    out: W,
    written: usize,
}

impl JsonlWriter<BufWriter<File>> {
    /// Open `path` for appending, creating it (and its directory) if needed.
    pub fn append(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening output file {}", path.display()))?;
        // a previous run cut off mid-line must not glue onto our first record
        if ends_mid_line(path)? {
            file.write_all(b"\n")
                .with_context(|| format!("writing to {}", path.display()))?;
        }
        Ok(Self::new(BufWriter::new(file)))
    }
}

/// Is `path` non-empty without a trailing newline?
fn ends_mid_line(path: &Path) -> Result<bool> {
    let mut file = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write(&mut self, record: &ProductRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.out.write_all(&line)?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Records written through this writer (not counting prior file content).
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
