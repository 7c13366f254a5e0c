//! Template catalog loaded from `<dir>/<category>/<subcategory>/<name>.json`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use hangar_container::{LaunchKind, Template};
use serde::Deserialize;

/// Image repository of the dedicated launch family.
pub const DEDICATED_IMAGE_REPOSITORY: &str = "itzg/minecraft-server";

#[derive(Debug, Deserialize)]
struct TemplateFile {
    name: String,
    #[serde(alias = "docker_image")]
    image: String,
    #[serde(default)]
    ports: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    environment: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    launch: Option<LaunchKind>,
}

fn scalar_to_string(key: &str, v: &serde_json::Value) -> anyhow::Result<String> {
    match v {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        _ => anyhow::bail!("value for {key} must be a string, number or boolean"),
    }
}

fn scalar_map(
    raw: &BTreeMap<String, serde_json::Value>,
) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|(k, v)| Ok((k.clone(), scalar_to_string(k, v)?)))
        .collect()
}

/// `docker.io/itzg/minecraft-server:java21` -> `itzg/minecraft-server`.
pub fn image_repository(image: &str) -> &str {
    let image = image.trim();
    let image = image.split('@').next().unwrap_or(image);
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    let image = match image[name_start..].find(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    };
    image
        .strip_prefix("docker.io/library/")
        .or_else(|| image.strip_prefix("docker.io/"))
        .unwrap_or(image)
}

/// Explicit `launch` wins; otherwise the image decides.
pub fn resolve_launch_kind(explicit: Option<LaunchKind>, image: &str) -> LaunchKind {
    explicit.unwrap_or_else(|| {
        if image_repository(image) == DEDICATED_IMAGE_REPOSITORY {
            LaunchKind::Dedicated
        } else {
            LaunchKind::Generic
        }
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_template_file(
    path: &Path,
    category: &str,
    subcategory: &str,
) -> anyhow::Result<Template> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("template file name is not valid UTF-8")?;
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let file: TemplateFile =
        serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))?;
    if file.image.trim().is_empty() {
        anyhow::bail!("{} has an empty image", path.display());
    }

    Ok(Template {
        id: format!("{category}/{subcategory}/{stem}"),
        name: file.name,
        launch_kind: resolve_launch_kind(file.launch, &file.image),
        image: file.image,
        ports: scalar_map(&file.ports)?,
        environment: scalar_map(&file.environment)?,
        category: capitalize(category),
        subcategory: capitalize(subcategory),
    })
}

fn sorted_dirs(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            out.push((name.to_string(), path));
        }
    }
    out.sort();
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Template>,
}

impl TemplateCatalog {
    /// Loads every template under `dir`. A missing directory gives an empty
    /// catalog; malformed files are skipped with a warning.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "template directory missing; catalog is empty");
            return Ok(Self::default());
        }

        let mut templates = BTreeMap::new();
        for (category, cat_path) in sorted_dirs(dir)? {
            if !cat_path.is_dir() {
                continue;
            }
            for (subcategory, sub_path) in sorted_dirs(&cat_path)? {
                if !sub_path.is_dir() {
                    continue;
                }
                for (_, file) in sorted_dirs(&sub_path)? {
                    if file.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match parse_template_file(&file, &category, &subcategory) {
                        Ok(t) => {
                            tracing::debug!(
                                template_id = %t.id,
                                launch = %t.launch_kind,
                                "loaded template"
                            );
                            templates.insert(t.id.clone(), t);
                        }
                        Err(e) => {
                            tracing::warn!(path = %file.display(), error = %format!("{e:#}"), "skipping template");
                        }
                    }
                }
            }
        }

        tracing::info!(count = templates.len(), dir = %dir.display(), "template catalog loaded");
        Ok(Self { templates })
    }

    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// First template (by id) whose image reference matches exactly.
    pub fn find_by_image(&self, image: &str) -> Option<&Template> {
        let image = image.trim();
        self.templates.values().find(|t| t.image == image)
    }

    pub fn list(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Category -> subcategory -> templates, all sorted.
    pub fn grouped(&self) -> BTreeMap<&str, BTreeMap<&str, Vec<&Template>>> {
        let mut out: BTreeMap<&str, BTreeMap<&str, Vec<&Template>>> = BTreeMap::new();
        for t in self.templates.values() {
            out.entry(t.category.as_str())
                .or_default()
                .entry(t.subcategory.as_str())
                .or_default()
                .push(t);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn repository_strips_tag_digest_and_default_registry() {
        assert_eq!(image_repository("itzg/minecraft-server"), "itzg/minecraft-server");
        assert_eq!(
            image_repository("docker.io/itzg/minecraft-server:java21"),
            "itzg/minecraft-server"
        );
        assert_eq!(image_repository("nginx@sha256:abc"), "nginx");
        assert_eq!(image_repository("localhost:5000/app:1"), "localhost:5000/app");
    }

    #[test]
    fn launch_kind_resolution() {
        assert_eq!(
            resolve_launch_kind(None, "itzg/minecraft-server:latest"),
            LaunchKind::Dedicated
        );
        assert_eq!(resolve_launch_kind(None, "nginx:latest"), LaunchKind::Generic);
        assert_eq!(
            resolve_launch_kind(Some(LaunchKind::Generic), "itzg/minecraft-server"),
            LaunchKind::Generic
        );
    }

    #[test]
    fn loads_grouped_templates_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "games/minecraft/paper.json",
            r#"{"name":"Paper","docker_image":"itzg/minecraft-server","environment":{"TYPE":"PAPER","MEMORY":"2G"}}"#,
        );
        write(
            dir.path(),
            "web/nginx/nginx.json",
            r#"{"name":"nginx","image":"nginx:latest","ports":{"8080":80},"environment":{"DEBUG":false}}"#,
        );
        write(dir.path(), "web/nginx/broken.json", "{ nope");
        write(dir.path(), "web/nginx/README.md", "not a template");

        let catalog = TemplateCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let paper = catalog.get("games/minecraft/paper").unwrap();
        assert_eq!(paper.launch_kind, LaunchKind::Dedicated);
        assert_eq!(paper.category, "Games");
        assert_eq!(paper.subcategory, "Minecraft");
        assert_eq!(paper.environment.get("TYPE").map(String::as_str), Some("PAPER"));

        let nginx = catalog.find_by_image("nginx:latest").unwrap();
        assert_eq!(nginx.id, "web/nginx/nginx");
        assert_eq!(nginx.launch_kind, LaunchKind::Generic);
        assert_eq!(nginx.ports.get("8080").map(String::as_str), Some("80"));
        assert_eq!(nginx.environment.get("DEBUG").map(String::as_str), Some("false"));

        let grouped = catalog.grouped();
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec!["Games", "Web"]);
        assert_eq!(grouped["Web"]["Nginx"].len(), 1);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::load(&dir.path().join("nope")).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.find_by_image("nginx").is_none());
    }
}
