use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::output::ProductRecord;

/// `(manufacturer, name)`, both lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    manufacturer: String,
    name: String,
}

impl IdentityKey {
    pub fn new(manufacturer: &str, name: &str) -> Self {
        Self {
            manufacturer: manufacturer.trim().to_lowercase(),
            name: name.trim().to_lowercase(),
        }
    }

    pub fn of(record: &ProductRecord) -> Self {
        Self::new(&record.manufacturer, &record.name)
    }
}

/// Outcome of offering a record to [`Dedup::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
    MissingFlavor,
}

/// Run-wide identity set. Only ever grows.
#[derive(Debug, Default)]
pub struct Dedup {
    seen: HashSet<IdentityKey>,
    require_flavor: bool,
}

// Lenient view of a prior output line.
#[derive(Deserialize)]
struct SeedLine {
    #[serde(default)]
    name: String,
    #[serde(default)]
    manufacturer: SeedManufacturer,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum SeedManufacturer {
    Object {
        #[serde(default)]
        name: String,
    },
    Plain(String),
    #[default]
    Missing,
}

impl SeedManufacturer {
    fn name(&self) -> &str {
        match self {
            SeedManufacturer::Object { name } | SeedManufacturer::Plain(name) => name,
            SeedManufacturer::Missing => "",
        }
    }
}

impl Dedup {
    pub fn new(require_flavor: bool) -> Self {
        Self {
            seen: HashSet::new(),
            require_flavor,
        }
    }

    /// Add every key found in a prior JSONL output. Returns how many lines
    /// contributed a key; malformed lines are skipped.
    pub fn seed_from_reader<R: BufRead>(&mut self, reader: R) -> usize {
        let mut added = 0;
        for line in reader.lines().map_while(|l| l.ok()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(seed) = serde_json::from_str::<SeedLine>(line) else {
                debug!("seed: skipping malformed line");
                continue;
            };
            let manufacturer = seed.manufacturer.name();
            if manufacturer.trim().is_empty() && seed.name.trim().is_empty() {
                continue;
            }
            self.seen.insert(IdentityKey::new(manufacturer, &seed.name));
            added += 1;
        }
        added
    }

    pub fn seed_from_path(&mut self, path: &Path) -> Result<usize> {
        let file = File::open(path).with_context(|| format!("opening seed file {}", path.display()))?;
        Ok(self.seed_from_reader(BufReader::new(file)))
    }

    pub fn should_emit(&self, record: &ProductRecord) -> bool {
        self.check(record) == Admission::Accepted
    }

    pub fn record(&mut self, record: &ProductRecord) {
        self.seen.insert(IdentityKey::of(record));
    }

    /// [`should_emit`](Self::should_emit) and [`record`](Self::record) in one step.
    pub fn admit(&mut self, record: &ProductRecord) -> Admission {
        if self.should_emit(record) {
            self.record(record);
            Admission::Accepted
        } else {
            self.check(record)
        }
    }

    fn check(&self, record: &ProductRecord) -> Admission {
        // flavor policy first, so a flavorless record never claims its key
        if self.require_flavor && record.flavor.is_empty() {
            Admission::MissingFlavor
        } else if self.seen.contains(&IdentityKey::of(record)) {
            Admission::Duplicate
        } else {
            Admission::Accepted
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
