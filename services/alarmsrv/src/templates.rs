//! Notification template rendering
//!
//! Templates are handlebars: `{{ alarm.name }}`, `{{#if device}}..{{/if}}`.
//! Missing values render as an empty string. HTML bodies escape every
//! substituted value; plain-text bodies are rendered verbatim.

use crate::config::TemplatesConfig;
use crate::domain::TemplateSource;
use crate::error::{AlarmError, Result};
use handlebars::Handlebars;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use voltage_formula::Context;

/// Which email part a template renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Plain,
    Html,
}

/// Renders named templates and inline template text
pub trait TemplateRenderer: Send + Sync + 'static {
    fn render_named(&self, name: &str, markup: Markup, context: &Context) -> Result<String>;

    fn render_text(&self, text: &str, markup: Markup, context: &Context) -> Result<String>;

    fn render(&self, source: &TemplateSource, markup: Markup, context: &Context) -> Result<String> {
        match source {
            TemplateSource::Named(name) => self.render_named(name, markup, context),
            TemplateSource::Inline(text) => self.render_text(text, markup, context),
        }
    }
}

/// One registry per markup; both hold the same templates
struct Registries {
    plain: Handlebars<'static>,
    html: Handlebars<'static>,
}

impl Registries {
    fn new() -> Self {
        let mut plain = Handlebars::new();
        plain.register_escape_fn(handlebars::no_escape);
        Self {
            plain,
            html: Handlebars::new(),
        }
    }

    fn get(&self, markup: Markup) -> &Handlebars<'static> {
        match markup {
            Markup::Plain => &self.plain,
            Markup::Html => &self.html,
        }
    }

    fn register(&mut self, name: &str, body: &str) -> Result<()> {
        self.plain.register_template_string(name, body)?;
        self.html.register_template_string(name, body)?;
        Ok(())
    }
}

/// Loads named templates from a directory, with in-memory overrides
///
/// A directory template is registered on first use and cached from then on.
pub struct FileTemplateRenderer {
    dir: PathBuf,
    registries: RwLock<Registries>,
}

impl fmt::Debug for FileTemplateRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTemplateRenderer")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileTemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registries: RwLock::new(Registries::new()),
        }
    }

    pub fn from_config(config: &TemplatesConfig) -> Self {
        Self::new(config.dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a template body under a name; takes priority over the directory
    pub fn insert(&self, name: impl AsRef<str>, body: impl AsRef<str>) -> Result<()> {
        self.registries.write().register(name.as_ref(), body.as_ref())
    }

    /// Make sure `name` is registered, reading it from the directory if needed
    fn ensure_registered(&self, name: &str) -> Result<()> {
        if self.registries.read().plain.has_template(name) {
            return Ok(());
        }

        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AlarmError::not_found(format!("template '{}'", name)));
        }

        let path = self.dir.join(relative);
        debug!(template = %name, path = %path.display(), "Loading template");
        let body = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AlarmError::not_found(format!("template '{}'", name))
            } else {
                AlarmError::Io(e)
            }
        })?;

        let mut registries = self.registries.write();
        if !registries.plain.has_template(name) {
            registries.register(name, &body)?;
        }
        Ok(())
    }
}

impl TemplateRenderer for FileTemplateRenderer {
    fn render_named(&self, name: &str, markup: Markup, context: &Context) -> Result<String> {
        self.ensure_registered(name)?;
        Ok(self.registries.read().get(markup).render(name, context)?)
    }

    fn render_text(&self, text: &str, markup: Markup, context: &Context) -> Result<String> {
        Ok(self
            .registries
            .read()
            .get(markup)
            .render_template(text, context)?)
    }
}
