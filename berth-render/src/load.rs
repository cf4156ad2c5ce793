//! Manifest parsing and artifact discovery
//!
//! A directory is loaded by starting from the `berth.yaml` manifest (or
//! the banking preset when there is none) and replacing each section with
//! the artifact found on disk. Without a manifest, a compose file found on
//! disk also drops the preset entry points, which name preset services.

use berth_core::domain::entrypoint::{EntryPoints, MakeTarget};
use berth_core::domain::stack::{Preset, Stack};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chart::{self, ChartTemplates};
use crate::error::{RenderError, Result};
use crate::{compose, dockerfile, makefile, workflow};

pub const MANIFEST_FILE: &str = "berth.yaml";

const COMPOSE_FILES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];
const VALUES_DIRS: [&str; 3] = [".", "chart", "helm"];
const MANIFEST_SECTIONS: [&str; 7] = [
    "name",
    "pipeline",
    "image",
    "values",
    "compose",
    "entrypoints",
    "app_services",
];

/// Everything discovered in one directory
#[derive(Debug, Clone)]
pub struct LoadedDir {
    pub root: PathBuf,
    pub stack: Stack,
    /// Files the stack was built from
    pub sources: Vec<PathBuf>,
    /// Every Makefile variant with its parsed targets
    pub makefiles: Vec<(PathBuf, Vec<MakeTarget>)>,
    /// Chart templates found next to the values file
    pub chart_templates: Option<ChartTemplates>,
    pub compose_file: Option<PathBuf>,
}

/// Parses a `berth.yaml` manifest
///
/// The optional `preset` key picks the base stack; every other section
/// is merged over it. Mappings merge key by key, sequences and scalars
/// replace, and a `null` removes the key (e.g. a preset compose service).
pub fn parse_manifest(yaml: &str) -> Result<Stack> {
    let doc: Value = if yaml.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(yaml)?
    };

    let Value::Mapping(mut doc) = doc else {
        return Err(RenderError::parse("manifest", 1, "expected a mapping"));
    };

    let preset: Preset = match doc.remove("preset") {
        Some(value) => serde_yaml::from_value(value)?,
        None => Preset::default(),
    };

    for key in doc.keys() {
        if let Some(key) = key.as_str()
            && !MANIFEST_SECTIONS.contains(&key)
        {
            warn!("Ignoring unknown manifest section '{}'", key);
        }
    }

    let mut base = serde_yaml::to_value(preset.stack())?;
    for section in MANIFEST_SECTIONS {
        if let Some(overlay) = doc.remove(section)
            && let Value::Mapping(base) = &mut base
        {
            let key = Value::from(section);
            match base.get_mut(&key) {
                Some(existing) => merge(existing, overlay),
                None => {
                    base.insert(key, overlay);
                }
            }
        }
    }

    Ok(serde_yaml::from_value(base)?)
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    base.remove(&key);
                    continue;
                }
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Loads the stack of a repository checkout
pub fn load_dir(root: impl AsRef<Path>) -> Result<LoadedDir> {
    let root = root.as_ref();
    let mut sources = Vec::new();

    let manifest_path = root.join(MANIFEST_FILE);
    let has_manifest = manifest_path.is_file();
    let mut stack = if has_manifest {
        let stack = parse_manifest(&read(&manifest_path)?)?;
        sources.push(manifest_path);
        stack
    } else {
        let mut stack = Stack::banking();
        if let Some(name) = root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            stack.name = name;
        }
        stack
    };

    let compose_file = COMPOSE_FILES
        .iter()
        .map(|f| root.join(f))
        .find(|p| p.is_file());
    if let Some(path) = &compose_file {
        debug!("Loading compose file {}", path.display());
        stack.compose = compose::parse(&read(path)?)?;
        if !has_manifest {
            stack.app_services = stack
                .compose
                .services
                .iter()
                .filter(|(_, svc)| svc.build.is_some())
                .map(|(name, _)| name.clone())
                .collect();
            stack.entrypoints = EntryPoints::default();
        }
        sources.push(path.clone());
    }

    let dockerfile_path = root.join("Dockerfile");
    if dockerfile_path.is_file() {
        debug!("Loading {}", dockerfile_path.display());
        stack.image = dockerfile::parse(&read(&dockerfile_path)?)?;
        sources.push(dockerfile_path);
    }

    let mut chart_templates = None;
    for dir in VALUES_DIRS {
        let values_path = root.join(dir).join("values.yaml");
        if !values_path.is_file() {
            continue;
        }
        debug!("Loading {}", values_path.display());
        stack.values = chart::parse_values(&read(&values_path)?)?;
        sources.push(values_path);
        chart_templates = load_chart_templates(&root.join(dir).join("templates"))?;
        break;
    }

    let workflows = files_in(&root.join(".github").join("workflows"), |name| {
        name.ends_with(".yml") || name.ends_with(".yaml")
    })?;
    if let Some(path) = workflows.first() {
        debug!("Loading workflow {}", path.display());
        stack.pipeline = workflow::parse(&read(path)?)?;
        sources.push(path.clone());
        if workflows.len() > 1 {
            warn!(
                "Found {} workflows, only {} is loaded",
                workflows.len(),
                path.display()
            );
        }
    }

    let mut makefiles = Vec::new();
    for path in files_in(root, is_makefile_name)? {
        debug!("Parsing {}", path.display());
        let targets = makefile::parse(&read(&path)?)?;
        makefiles.push((path, targets));
    }

    info!(
        "Loaded stack '{}' from {} ({} files, {} makefiles)",
        stack.name,
        root.display(),
        sources.len(),
        makefiles.len()
    );

    Ok(LoadedDir {
        root: root.to_path_buf(),
        stack,
        sources,
        makefiles,
        chart_templates,
        compose_file,
    })
}

/// Returns true for `Makefile`, `makefile`, `GNUmakefile`, `Makefile.<x>` and `*.mk`
pub fn is_makefile_name(name: &str) -> bool {
    matches!(name, "Makefile" | "makefile" | "GNUmakefile")
        || name.starts_with("Makefile.")
        || name.ends_with(".mk")
}

fn load_chart_templates(dir: &Path) -> Result<Option<ChartTemplates>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut templates = ChartTemplates::default();
    let mut found = false;
    for (file, slot) in [
        ("deployment.yaml", &mut templates.deployment),
        ("service.yaml", &mut templates.service),
        ("hpa.yaml", &mut templates.hpa),
    ] {
        let path = dir.join(file);
        if path.is_file() {
            *slot = read(&path)?;
            found = true;
        }
    }

    Ok(found.then_some(templates))
}

/// Regular files of `dir` whose name matches, sorted by name
fn files_in(dir: &Path, matches: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| RenderError::io(dir, e))? {
        let entry = entry.map_err(|e| RenderError::io(dir, e))?;
        let path = entry.path();
        if path.is_file()
            && let Some(name) = path.file_name().and_then(|n| n.to_str())
            && matches(name)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| RenderError::io(path, e))
}
