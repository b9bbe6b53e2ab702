//! Discovery and instantiation of submitted strategies.
//!
//! A submission is any directory below the registry root holding a
//! `submission.toml` manifest:
//!
//! ```toml
//! strategy = "food"
//!
//! [params]
//! seed = 3
//! ```
//!
//! The manifest selects a factory from a [`Catalog`]; no code is loaded at
//! runtime.

use crate::strategies::{Cautious, FoodSeeker, Straight, Wanderer};
use crate::strategy::Strategy;
use anyhow::{Context, Result, bail};
use glob::{Pattern, glob};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

pub const MANIFEST_FILE: &str = "submission.toml";

/// Constructs a fresh strategy instance from manifest params.
pub type Factory = fn(&toml::Table) -> Result<Box<dyn Strategy>>;

/// Strategy kinds that manifests may name.
#[derive(Clone, Default)]
pub struct Catalog {
    factories: BTreeMap<String, Factory>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        catalog.register("straight", Straight::build);
        catalog.register("food", FoodSeeker::build);
        catalog.register("cautious", Cautious::build);
        catalog.register("wanderer", Wanderer::build);
        catalog
    }

    pub fn register(&mut self, kind: &str, factory: Factory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn get(&self, kind: &str) -> Option<Factory> {
        self.factories.get(kind).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    strategy: String,
    #[serde(default)]
    params: toml::Table,
}

/// A discovered submission: its name plus everything needed to build it.
#[derive(Clone)]
pub struct Discovered {
    pub name: String,
    pub kind: String,
    pub params: toml::Table,
    factory: Factory,
}

impl Discovered {
    pub fn new(name: &str, kind: &str, params: toml::Table, factory: Factory) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            params,
            factory,
        }
    }

    pub fn build(&self) -> Result<Box<dyn Strategy>> {
        (self.factory)(&self.params)
            .with_context(|| format!("failed to build {:?} ({})", self.name, self.kind))
    }
}

impl fmt::Debug for Discovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discovered")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// A named, ready-to-run strategy instance.
pub struct Submission {
    pub name: String,
    pub strategy: Box<dyn Strategy>,
}

/// Scan `root` for submission manifests.
///
/// Every manifest must parse, name a known kind and build successfully;
/// otherwise the whole discovery fails. The result is sorted by name.
pub fn discover<P: AsRef<Path>>(root: P, catalog: &Catalog) -> Result<Vec<Discovered>> {
    let root = root.as_ref();
    if !root.is_dir() {
        bail!("submission root {root:?} is not a directory");
    }

    let escaped = Pattern::escape(root.to_str().context("root is not valid UTF-8")?);
    let pattern = Path::new(&escaped).join("**").join(MANIFEST_FILE);
    let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;

    let mut found = Vec::new();
    for entry in glob(pattern).context("failed to glob submission manifests")? {
        let file = entry.context("failed to read glob entry")?;
        let discovered = load_manifest(root, &file, catalog)
            .with_context(|| format!("failed to load {file:?}"))?;
        log::debug!("discovered {discovered:?}");
        found.push(discovered);
    }

    if found.is_empty() {
        bail!("no {MANIFEST_FILE} found under {root:?}");
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn load_manifest(root: &Path, file: &Path, catalog: &Catalog) -> Result<Discovered> {
    let dir = file.parent().context("manifest has no parent directory")?;
    let name = submission_name(root, dir)?;

    let contents = fs::read_to_string(file).context("failed to read manifest")?;
    let manifest: Manifest = toml::from_str(&contents).context("failed to parse manifest")?;

    let Some(factory) = catalog.get(&manifest.strategy) else {
        let known: Vec<_> = catalog.kinds().collect();
        bail!(
            "unknown strategy {:?}, expected one of {known:?}",
            manifest.strategy
        );
    };

    let discovered = Discovered::new(&name, &manifest.strategy, manifest.params, factory);
    discovered.build().context("failed probe construction")?;
    Ok(discovered)
}

fn submission_name(root: &Path, dir: &Path) -> Result<String> {
    let relative = dir
        .strip_prefix(root)
        .with_context(|| format!("{dir:?} is not below {root:?}"))?;

    let target: PathBuf = if relative.as_os_str().is_empty() {
        root.file_name()
            .map(PathBuf::from)
            .context("root has no final component")?
    } else {
        relative.to_path_buf()
    };

    let parts = target
        .components()
        .map(|part| part.as_os_str().to_str().context("path is not valid UTF-8"))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Build one instance per discovered submission, or `replicas` instances
/// named `{name}{index}` when `replicas > 1`. The result is sorted by name.
pub fn instantiate(discovered: &[Discovered], replicas: usize) -> Result<Vec<Submission>> {
    let mut submissions = Vec::with_capacity(discovered.len() * replicas.max(1));
    for candidate in discovered {
        if replicas > 1 {
            for idx in 0..replicas {
                submissions.push(Submission {
                    name: format!("{}{idx}", candidate.name),
                    strategy: candidate.build()?,
                });
            }
        } else {
            submissions.push(Submission {
                name: candidate.name.clone(),
                strategy: candidate.build()?,
            });
        }
    }
    submissions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(submissions)
}

/// A discovered roster, instantiated afresh for every run.
#[derive(Debug, Clone)]
pub struct Registry {
    discovered: Vec<Discovered>,
    replicas: usize,
}

impl Registry {
    pub fn from_dir<P: AsRef<Path>>(root: P, catalog: &Catalog, replicas: usize) -> Result<Self> {
        let discovered = discover(root, catalog)?;
        Ok(Self::from_discovered(discovered, replicas))
    }

    pub fn from_discovered(mut discovered: Vec<Discovered>, replicas: usize) -> Self {
        discovered.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            discovered,
            replicas,
        }
    }

    pub fn discovered(&self) -> &[Discovered] {
        &self.discovered
    }

    pub fn submissions(&self) -> Result<Vec<Submission>> {
        instantiate(&self.discovered, self.replicas)
    }
}
