//! Layered configuration resolution
//!
//! Turns `project.yml` and everything it imports into one immutable
//! [`ProjectConfig`]:
//!
//! 1. Each document's `import` list is resolved depth-first, left to right,
//!    before the document's own keys, so the importer wins.
//! 2. Mappings merge key by key; scalars and lists are replaced wholesale by
//!    the later document. Lists are never concatenated.
//! 3. `project-user.yml`, if present, is merged on top with the same rule.
//! 4. `{{dotted.path}}` tokens are substituted from the merged document.

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::defaults;
use crate::core::project::ProjectConfig;
use crate::error::ConfigError;

const IMPORT_KEY: &str = "import";

/// Loads and merges the layered project configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    /// Directory holding bundled platform-default documents
    defaults_dir: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver without a defaults directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `dir` for imports not found next to the importer or in the project
    #[must_use]
    pub fn with_defaults_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.defaults_dir = dir;
        self
    }

    /// Resolve the configuration rooted at `root_path`
    pub fn resolve(&self, root_path: &Path) -> Result<ProjectConfig, ConfigError> {
        if !root_path.is_file() {
            return Err(ConfigError::NotFound {
                path: root_path.to_path_buf(),
            });
        }
        let project_dir = root_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let document = self.resolve_document(root_path, &project_dir)?;
        let document = resolve_references(&document)?;
        ProjectConfig::from_document(document, project_dir)
    }

    /// Merge imports, the root document and the user overlay, without
    /// substituting references
    pub fn resolve_document(&self, root_path: &Path, project_dir: &Path) -> Result<Value, ConfigError> {
        let mut stack = Vec::new();
        let mut document = self.load(root_path, project_dir, &mut stack)?;

        let user_path = project_dir.join(defaults::USER_CONFIG_FILE);
        if user_path.is_file() {
            tracing::debug!("Applying user overlay {}", user_path.display());
            let overlay = self.load(&user_path, project_dir, &mut stack)?;
            document = merge(document, overlay, "")?;
        }

        Ok(document)
    }

    fn load(&self, path: &Path, project_dir: &Path, stack: &mut Vec<PathBuf>) -> Result<Value, ConfigError> {
        let canonical = path.canonicalize().map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        if let Some(pos) = stack.iter().position(|p| p == &canonical) {
            let cycle = stack[pos..]
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|p| display_name(p, project_dir))
                .collect();
            return Err(ConfigError::ImportCycle { cycle });
        }

        let mut own = read_document(&canonical)?;
        let imports = take_imports(&mut own, &canonical)?;
        tracing::debug!("Loaded {} ({} imports)", canonical.display(), imports.len());

        stack.push(canonical.clone());
        let importer_dir = canonical.parent().unwrap_or(project_dir).to_path_buf();
        let mut merged = Value::Mapping(Mapping::new());
        for import in &imports {
            let import_path = self.locate(import, &importer_dir, project_dir, &canonical)?;
            let imported = self.load(&import_path, project_dir, stack)?;
            merged = merge(merged, imported, "")?;
        }
        stack.pop();

        merge(merged, own, "")
    }

    fn locate(
        &self,
        import: &str,
        importer_dir: &Path,
        project_dir: &Path,
        importer: &Path,
    ) -> Result<PathBuf, ConfigError> {
        let candidate = Path::new(import);
        if candidate.is_absolute() {
            if candidate.is_file() {
                return Ok(candidate.to_path_buf());
            }
        } else {
            let search = [Some(importer_dir), Some(project_dir), self.defaults_dir.as_deref()];
            if let Some(found) = search
                .into_iter()
                .flatten()
                .map(|dir| dir.join(candidate))
                .find(|p| p.is_file())
            {
                return Ok(found);
            }
        }

        Err(ConfigError::ImportNotFound {
            import: import.to_string(),
            importer: importer.to_path_buf(),
        })
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        other => Err(ConfigError::ParseError {
            path: path.to_path_buf(),
            error: format!("top level must be a mapping, found {}", type_name(&other)),
        }),
    }
}

fn take_imports(document: &mut Value, path: &Path) -> Result<Vec<String>, ConfigError> {
    let Value::Mapping(mapping) = document else {
        return Ok(Vec::new());
    };
    let mut imports = None;
    let mut rest = Mapping::with_capacity(mapping.len());
    for (key, value) in std::mem::take(mapping) {
        if key.as_str() == Some(IMPORT_KEY) {
            imports = Some(value);
        } else {
            rest.insert(key, value);
        }
    }
    *mapping = rest;

    let Some(imports) = imports else {
        return Ok(Vec::new());
    };

    match imports {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ConfigError::InvalidImport {
                    path: path.to_path_buf(),
                    error: format!("entries must be strings, found {}", type_name(&other)),
                }),
            })
            .collect(),
        other => Err(ConfigError::InvalidImport {
            path: path.to_path_buf(),
            error: format!("expected a list, found {}", type_name(&other)),
        }),
    }
}

fn display_name(path: &Path, project_dir: &Path) -> String {
    let project_dir = project_dir.canonicalize().unwrap_or_else(|_| project_dir.to_path_buf());
    path.strip_prefix(&project_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Merge `overlay` into `base`
///
/// Mappings merge recursively, keeping `base`'s key order and appending new
/// keys. Any other value in `overlay` replaces the one in `base`. A null on
/// either side never conflicts. `path` is the dotted key prefix used in error
/// messages.
pub fn merge(base: Value, overlay: Value, path: &str) -> Result<Value, ConfigError> {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let child = child_path(path, &key);
                if let Some(existing) = base.get_mut(&key) {
                    let previous = std::mem::replace(existing, Value::Null);
                    *existing = merge(previous, value, &child)?;
                } else {
                    base.insert(key, value);
                }
            }
            Ok(Value::Mapping(base))
        }
        (base @ Value::Mapping(_), overlay) | (base, overlay @ Value::Mapping(_))
            if !base.is_null() && !overlay.is_null() =>
        {
            Err(ConfigError::MergeConflict {
                key: path.to_string(),
                base: type_name(&base),
                overlay: type_name(&overlay),
            })
        }
        (_, overlay) => Ok(overlay),
    }
}

fn child_path(path: &str, key: &Value) -> String {
    let key = key_name(key);
    if path.is_empty() {
        key
    } else {
        format!("{path}.{key}")
    }
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn token_regex() -> &'static regex::Regex {
    static TOKEN: OnceLock<regex::Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        regex::Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("reference token regex is valid")
    })
}

/// Substitute every `{{dotted.path}}` token in `document`
///
/// A string consisting of a single token takes the referenced value as is,
/// keeping its type. Tokens embedded in longer strings are replaced by the
/// referenced scalar's text. Referenced values are themselves resolved, up to
/// [`defaults::MAX_REFERENCE_DEPTH`] levels.
pub fn resolve_references(document: &Value) -> Result<Value, ConfigError> {
    References { root: document }.resolve(document, "", 0)
}

struct References<'a> {
    root: &'a Value,
}

impl References<'_> {
    fn resolve(&self, value: &Value, key: &str, depth: usize) -> Result<Value, ConfigError> {
        match value {
            Value::String(s) => self.resolve_string(s, key, depth),
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve(item, &format!("{key}[{i}]"), depth))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Value::Mapping(mapping) => {
                let mut resolved = Mapping::with_capacity(mapping.len());
                for (k, v) in mapping {
                    resolved.insert(k.clone(), self.resolve(v, &child_path(key, k), depth)?);
                }
                Ok(Value::Mapping(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, s: &str, key: &str, depth: usize) -> Result<Value, ConfigError> {
        let tokens = token_regex();
        if !tokens.is_match(s) {
            return Ok(Value::String(s.to_string()));
        }
        if depth >= defaults::MAX_REFERENCE_DEPTH {
            return Err(ConfigError::ReferenceTooDeep {
                key: key.to_string(),
                depth: defaults::MAX_REFERENCE_DEPTH,
            });
        }

        if let Some(caps) = tokens.captures(s.trim()) {
            if caps.get(0).is_some_and(|m| m.as_str() == s.trim()) {
                let reference = &caps[1];
                let target = self.lookup(reference, key)?;
                return self.resolve(target, key, depth + 1);
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in tokens.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            let reference = &caps[1];
            out.push_str(&s[last..whole.start()]);
            let resolved = self.resolve(self.lookup(reference, key)?, key, depth + 1)?;
            out.push_str(&scalar_text(&resolved).ok_or_else(|| ConfigError::NonScalarReference {
                reference: reference.to_string(),
                key: key.to_string(),
            })?);
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn lookup(&self, reference: &str, key: &str) -> Result<&Value, ConfigError> {
        let mut current = self.root;
        for segment in reference.split(['.', '/']) {
            let next = match current {
                Value::Mapping(mapping) => mapping.get(segment),
                Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| ConfigError::UnresolvedReference {
                reference: reference.to_string(),
                key: key.to_string(),
            })?;
        }
        Ok(current)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    // ============================================
    // Unit Tests - merge
    // ============================================

    #[test]
    fn test_merge_mappings_recursively() {
        let base = yaml("a: {x: 1, y: 2}\nb: keep\n");
        let overlay = yaml("a: {y: 3, z: 4}\n");
        let merged = merge(base, overlay, "").unwrap();
        assert_eq!(merged, yaml("a: {x: 1, y: 3, z: 4}\nb: keep\n"));
    }

    #[test]
    fn test_merge_replaces_lists() {
        let base = yaml("patches: [a.patch, b.patch]\n");
        let overlay = yaml("patches: [c.patch]\n");
        assert_eq!(merge(base, overlay, "").unwrap(), yaml("patches: [c.patch]\n"));
    }

    #[test]
    fn test_merge_type_conflict_names_key() {
        let base = yaml("blocks: {kernel: {container: ubuntu}}\n");
        let overlay = yaml("blocks: {kernel: {container: {image: alma}}}\n");
        match merge(base, overlay, "").unwrap_err() {
            ConfigError::MergeConflict { key, base, overlay } => {
                assert_eq!(key, "blocks.kernel.container");
                assert_eq!(base, "a string");
                assert_eq!(overlay, "a mapping");
            }
            e => panic!("Expected MergeConflict, got: {e:?}"),
        }
    }

    #[test]
    fn test_merge_null_is_compatible() {
        let base = yaml("a:\n");
        let overlay = yaml("a: {b: 1}\n");
        assert_eq!(merge(base, overlay, "").unwrap(), yaml("a: {b: 1}\n"));
    }

    // ============================================
    // Unit Tests - references
    // ============================================

    #[test]
    fn test_references_embedded_and_whole() {
        let doc = yaml(
            "platform: {arch: arm64, cores: 4}\n\
             kernel: {target: 'Image-{{platform.arch}}', jobs: '{{platform.cores}}'}\n",
        );
        let resolved = resolve_references(&doc).unwrap();
        assert_eq!(resolved["kernel"]["target"], Value::from("Image-arm64"));
        assert_eq!(resolved["kernel"]["jobs"], Value::from(4));
    }

    #[test]
    fn test_references_are_nested() {
        let doc = yaml("a: '{{b}}'\nb: 'x-{{c}}'\nc: end\n");
        assert_eq!(resolve_references(&doc).unwrap()["a"], Value::from("x-end"));
    }

    #[test]
    fn test_references_accept_slash_separator() {
        let doc = yaml("a: {b: v}\nc: '{{a/b}}'\n");
        assert_eq!(resolve_references(&doc).unwrap()["c"], Value::from("v"));
    }

    #[test]
    fn test_unresolved_reference() {
        let doc = yaml("a: '{{missing.key}}'\n");
        match resolve_references(&doc).unwrap_err() {
            ConfigError::UnresolvedReference { reference, key } => {
                assert_eq!(reference, "missing.key");
                assert_eq!(key, "a");
            }
            e => panic!("Expected UnresolvedReference, got: {e:?}"),
        }
    }

    #[test]
    fn test_self_reference_hits_depth_bound() {
        let doc = yaml("a: '{{a}}'\n");
        assert!(matches!(
            resolve_references(&doc),
            Err(ConfigError::ReferenceTooDeep { .. })
        ));
    }

    #[test]
    fn test_embedded_mapping_reference_is_rejected() {
        let doc = yaml("a: {b: 1}\nc: 'x{{a}}'\n");
        assert!(matches!(
            resolve_references(&doc),
            Err(ConfigError::NonScalarReference { .. })
        ));
    }

    // ============================================
    // Unit Tests - imports
    // ============================================

    #[test]
    fn test_import_fold_order() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("a.yml"), "x: a\ny: a\nz: a\n").unwrap();
        std::fs::write(dir.join("b.yml"), "y: b\nz: b\n").unwrap();
        std::fs::write(dir.join("project.yml"), "import: [a.yml, b.yml]\nz: c\n").unwrap();

        let doc = ConfigResolver::new()
            .resolve_document(&dir.join("project.yml"), dir)
            .unwrap();
        assert_eq!(doc, yaml("x: a\ny: b\nz: c\n"));
    }

    #[test]
    fn test_import_cycle_is_named() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("a.yml"), "import: [b.yml]\n").unwrap();
        std::fs::write(dir.join("b.yml"), "import: [a.yml]\n").unwrap();

        match ConfigResolver::new()
            .resolve_document(&dir.join("a.yml"), dir)
            .unwrap_err()
        {
            ConfigError::ImportCycle { cycle } => assert_eq!(cycle, ["a.yml", "b.yml", "a.yml"]),
            e => panic!("Expected ImportCycle, got: {e:?}"),
        }
    }

    #[test]
    fn test_import_from_defaults_dir() {
        let project = TempDir::new().unwrap();
        let bundled = TempDir::new().unwrap();
        std::fs::write(bundled.path().join("zynqmp.yml"), "platform: zynqmp\n").unwrap();
        std::fs::write(project.path().join("project.yml"), "import: [zynqmp.yml]\n").unwrap();

        let doc = ConfigResolver::new()
            .with_defaults_dir(Some(bundled.path().to_path_buf()))
            .resolve_document(&project.path().join("project.yml"), project.path())
            .unwrap();
        assert_eq!(doc, yaml("platform: zynqmp\n"));

        let err = ConfigResolver::new()
            .resolve_document(&project.path().join("project.yml"), project.path())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ImportNotFound { import, .. } if import == "zynqmp.yml"));
    }

    #[test]
    fn test_user_overlay_wins() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("project.yml"), "tools: {container_tool: docker, jobs: 8}\n").unwrap();
        std::fs::write(dir.join("project-user.yml"), "tools: {container_tool: podman}\n").unwrap();

        let doc = ConfigResolver::new()
            .resolve_document(&dir.join("project.yml"), dir)
            .unwrap();
        assert_eq!(doc, yaml("tools: {container_tool: podman, jobs: 8}\n"));
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    fn flat_doc() -> impl Strategy<Value = Vec<(String, i64)>> {
        proptest::collection::vec(("[a-e]", 0i64..100), 0..6)
    }

    fn to_value(entries: &[(String, i64)]) -> Value {
        let mut mapping = Mapping::new();
        for (k, v) in entries {
            mapping.insert(Value::from(k.as_str()), Value::from(*v));
        }
        Value::Mapping(mapping)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Merging into an empty document is the identity
        #[test]
        fn prop_merge_identity(doc in flat_doc()) {
            let value = to_value(&doc);
            prop_assert_eq!(merge(Value::Mapping(Mapping::new()), value.clone(), "").unwrap(), value);
        }

        /// Every key of the overlay keeps the overlay's value
        #[test]
        fn prop_overlay_wins(base in flat_doc(), overlay in flat_doc()) {
            let merged = merge(to_value(&base), to_value(&overlay), "").unwrap();
            for (k, _) in &overlay {
                prop_assert_eq!(&merged[k.as_str()], &to_value(&overlay)[k.as_str()]);
            }
            for (k, _) in &base {
                if !overlay.iter().any(|(o, _)| o == k) {
                    prop_assert_eq!(&merged[k.as_str()], &to_value(&base)[k.as_str()]);
                }
            }
        }
    }
}
