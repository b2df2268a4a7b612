//! Page rendering seam and a renderer mirroring a source directory.

use async_trait::async_trait;
use preview_core::{EntityRef, Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Output of rendering one site path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    /// File the page was written to. `None` when nothing was written, e.g.
    /// the page is not viewable.
    pub destination: Option<PathBuf>,
    /// Site paths referenced by the page that still need rendering.
    pub discovered_paths: Vec<String>,
    /// Files copied into the output directory as a side effect.
    pub copied_files: Vec<String>,
}

/// Decides which entities a render may show.
#[async_trait]
pub trait EntityVisibility: Send + Sync {
    async fn is_visible(&self, entity: &EntityRef) -> Result<bool>;
}

/// Renders site paths into files.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `path` under `output_dir`, with links made absolute to `base_url`.
    ///
    /// Entities `visibility` rejects are neither rendered nor linked.
    async fn render(
        &self,
        path: &str,
        base_url: &str,
        output_dir: &Path,
        visibility: &dyn EntityVisibility,
    ) -> Result<RenderedPage>;

    /// Output file for `path`, relative to the output directory.
    fn destination_for(&self, path: &str) -> String;
}

static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:href|src)\s*=\s*["']([^"']+)["']"#).unwrap()
});

static CSS_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).unwrap());

static LOCAL_ORIGIN: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://preview.local/").unwrap());

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

/// Regex matching the site paths an item-path template produces, capturing
/// `type` and `id`. `None` when the template does not name both.
fn entity_path_regex(template: &str) -> Result<Option<Regex>> {
    if !template.contains("${entity.type}") || !template.contains("${entity.id}") {
        return Ok(None);
    }
    let mut pattern = String::from("^");
    let mut last = 0;
    for caps in PLACEHOLDER_REGEX.captures_iter(template) {
        let Some(placeholder) = caps.get(0) else {
            continue;
        };
        pattern.push_str(&regex::escape(&template[last..placeholder.start()]));
        pattern.push_str(match &caps[1] {
            "entity.type" => "(?P<type>[A-Za-z0-9_]+)",
            "entity.id" => "(?P<id>[A-Za-z0-9_-]+)",
            _ => "[^/?#]+",
        });
        last = placeholder.end();
    }
    pattern.push_str(&regex::escape(template[last..].trim_end_matches('/')));
    pattern.push_str("/?$");
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| Error::Plugin(format!("invalid item path '{}': {}", template, e)))
}

/// Strip query and fragment.
fn clean_path(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.contains('.')
}

/// Serves pages from a directory of prebuilt files.
///
/// Static files referenced by a page are copied straight into the output;
/// anything else is reported back as a discovered path. With entity paths
/// set, pages and links of entities the build may not show are skipped.
#[derive(Debug, Clone)]
pub struct MirrorRenderer {
    source_root: PathBuf,
    entity_paths: Option<Regex>,
}

impl MirrorRenderer {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            entity_paths: None,
        }
    }

    /// Recognise entity pages by the item-path template that produced them.
    pub fn with_entity_paths(mut self, item_path: &str) -> Result<Self> {
        self.entity_paths = entity_path_regex(item_path)?;
        Ok(self)
    }

    /// Entity whose page lives at `path`. Paths with a query are never
    /// entity pages.
    pub fn entity_for_path(&self, path: &str) -> Option<EntityRef> {
        let caps = self.entity_paths.as_ref()?.captures(path)?;
        Some(EntityRef::new(&caps["type"], &caps["id"]))
    }

    async fn is_hidden(&self, path: &str, visibility: &dyn EntityVisibility) -> Result<bool> {
        match self.entity_for_path(path) {
            Some(entity) => Ok(!visibility.is_visible(&entity).await?),
            None => Ok(false),
        }
    }

    fn source_for(&self, path: &str) -> PathBuf {
        let relative = clean_path(path).trim_start_matches('/');
        let candidate = self.source_root.join(relative);
        if candidate.is_dir() {
            candidate.join("index.html")
        } else {
            candidate
        }
    }

    /// Turn a reference found in `page_path` into a site path.
    /// External references give `None`.
    fn resolve_reference(&self, reference: &str, page_path: &str, base_url: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty()
            || reference.starts_with('#')
            || reference.starts_with("//")
            || reference.starts_with("data:")
            || reference.starts_with("mailto:")
            || reference.starts_with("tel:")
            || reference.starts_with("javascript:")
        {
            return None;
        }

        if let Ok(absolute) = Url::parse(reference) {
            let base = base_url.trim_end_matches('/');
            let rest = reference.strip_prefix(base)?;
            if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
                return None;
            }
            debug!(url = %absolute, "Rewriting reference under base URL");
            return Some(format!("/{}", rest.trim_start_matches('/')));
        }

        let page = LOCAL_ORIGIN.join(page_path).ok()?;
        let resolved = page.join(reference).ok()?;
        let mut site_path = resolved.path().to_string();
        if let Some(query) = resolved.query() {
            site_path.push('?');
            site_path.push_str(query);
        }
        Some(site_path)
    }

    fn references(content: &str) -> Vec<String> {
        ATTR_REGEX
            .captures_iter(content)
            .chain(CSS_URL_REGEX.captures_iter(content))
            .map(|caps| caps[1].to_string())
            .collect()
    }

    async fn copy_static(&self, site_path: &str, output_dir: &Path) -> Result<Option<String>> {
        let cleaned = clean_path(site_path);
        if !has_extension(cleaned) || cleaned.ends_with(".html") {
            return Ok(None);
        }
        let source = self.source_root.join(cleaned.trim_start_matches('/'));
        if !source.is_file() {
            return Ok(None);
        }
        let target = output_dir.join(cleaned.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &target).await?;
        Ok(Some(target.to_string_lossy().into_owned()))
    }
}

#[async_trait]
impl PageRenderer for MirrorRenderer {
    async fn render(
        &self,
        path: &str,
        base_url: &str,
        output_dir: &Path,
        visibility: &dyn EntityVisibility,
    ) -> Result<RenderedPage> {
        if self.is_hidden(path, visibility).await? {
            debug!(path = %path, "Entity is not visible in this build");
            return Ok(RenderedPage::default());
        }

        let source = self.source_for(path);
        if !source.is_file() {
            debug!(path = %path, source = %source.display(), "No source file for path");
            return Ok(RenderedPage::default());
        }

        let destination = output_dir.join(self.destination_for(path).trim_start_matches('/'));
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut page = RenderedPage::default();
        let is_text = destination
            .extension()
            .is_some_and(|ext| ext == "html" || ext == "css");

        if is_text {
            let content = tokio::fs::read_to_string(&source).await.map_err(|e| {
                Error::RenderFailed {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            })?;
            for reference in Self::references(&content) {
                let Some(site_path) = self.resolve_reference(&reference, clean_path(path), base_url)
                else {
                    continue;
                };
                if self.is_hidden(&site_path, visibility).await? {
                    debug!(path = %path, link = %site_path, "Dropping link to hidden entity");
                    continue;
                }
                match self.copy_static(&site_path, output_dir).await? {
                    Some(copied) => page.copied_files.push(copied),
                    None => page.discovered_paths.push(site_path),
                }
            }
            tokio::fs::write(&destination, content).await?;
        } else {
            tokio::fs::copy(&source, &destination).await?;
        }

        page.destination = Some(destination);
        Ok(page)
    }

    fn destination_for(&self, path: &str) -> String {
        let cleaned = clean_path(path);
        if has_extension(cleaned) {
            cleaned.to_string()
        } else {
            format!("{}/index.html", cleaned.trim_end_matches('/'))
        }
    }
}
