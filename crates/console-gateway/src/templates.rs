//! HTML page templates
//!
//! Each page parses its template on first use, exactly once per process.
//! Callers racing the first use wait for that single attempt, and a parse
//! failure is kept: every later caller sees the same error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use console_common::{ConsoleError, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

pub const SEARCH_TEMPLATE: &str = "search.html";
pub const CONTAINERS_TEMPLATE: &str = "containers.html";

const EMBEDDED_SEARCH: &str = include_str!("../templates/search.html");
const EMBEDDED_CONTAINERS: &str = include_str!("../templates/containers.html");

/// Where page templates are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemplateSource {
    /// Templates compiled into the binary
    #[default]
    Embedded,
    /// `<dir>/search.html`, `<dir>/containers.html`
    Directory(PathBuf),
}

impl From<Option<PathBuf>> for TemplateSource {
    fn from(dir: Option<PathBuf>) -> Self {
        dir.map_or(TemplateSource::Embedded, TemplateSource::Directory)
    }
}

/// Output of a render. `body` holds whatever was produced before an error.
#[derive(Debug)]
pub struct Rendered {
    pub body: Vec<u8>,
    pub error: Option<ConsoleError>,
}

pub struct PageTemplate {
    name: &'static str,
    embedded: &'static str,
    source: TemplateSource,
    parsed: OnceLock<std::result::Result<Environment<'static>, String>>,
    attempts: AtomicUsize,
}

impl PageTemplate {
    fn new(name: &'static str, embedded: &'static str, source: TemplateSource) -> Self {
        Self {
            name,
            embedded,
            source,
            parsed: OnceLock::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn search(source: TemplateSource) -> Self {
        Self::new(SEARCH_TEMPLATE, EMBEDDED_SEARCH, source)
    }

    pub fn containers(source: TemplateSource) -> Self {
        Self::new(CONTAINERS_TEMPLATE, EMBEDDED_CONTAINERS, source)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parsed template environment, parsing it on the first call.
    pub fn load(&self) -> Result<&Environment<'static>> {
        match self.parsed.get_or_init(|| self.parse()) {
            Ok(env) => Ok(env),
            Err(message) => Err(ConsoleError::Template(message.clone())),
        }
    }

    /// How many times parsing was attempted. Never more than one.
    pub fn parse_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn parse(&self) -> std::result::Result<Environment<'static>, String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        debug!(template = self.name, source = ?self.source, "parsing template");

        let text = match &self.source {
            TemplateSource::Embedded => self.embedded.to_string(),
            TemplateSource::Directory(dir) => {
                let path = dir.join(self.name);
                std::fs::read_to_string(&path)
                    .map_err(|e| format!("reading {}: {e}", path.display()))?
            }
        };

        let mut env = Environment::new();
        env.add_template_owned(self.name, text)
            .map_err(|e| e.to_string())?;
        Ok(env)
    }

    /// Render into a buffer. A failure part-way keeps the partial output.
    pub fn render<S: Serialize>(&self, env: &Environment<'static>, context: S) -> Rendered {
        let mut body = Vec::new();
        let result = env
            .get_template(self.name)
            .and_then(|template| template.render_to_write(context, &mut body).map(|_| ()));

        Rendered {
            body,
            error: result.err().map(|e| ConsoleError::Template(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_embedded_templates_parse() {
        let search = PageTemplate::search(TemplateSource::Embedded);
        let containers = PageTemplate::containers(TemplateSource::Embedded);
        assert!(search.load().is_ok());
        assert!(containers.load().is_ok());
    }

    #[test]
    fn test_load_parses_once() {
        let page = PageTemplate::search(TemplateSource::Embedded);
        page.load().unwrap();
        page.load().unwrap();
        assert_eq!(page.parse_attempts(), 1);
    }

    #[test]
    fn test_missing_template_failure_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let page = PageTemplate::search(TemplateSource::Directory(dir.path().to_path_buf()));

        let first = page.load().unwrap_err().to_string();
        // Creating the file afterwards does not help: the failure is kept.
        std::fs::write(dir.path().join(SEARCH_TEMPLATE), "ok").unwrap();
        let second = page.load().unwrap_err().to_string();

        assert_eq!(first, second);
        assert!(first.contains("search.html"));
        assert_eq!(page.parse_attempts(), 1);
    }

    #[test]
    fn test_syntax_error_is_template_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SEARCH_TEMPLATE), "{% if %}").unwrap();
        let page = PageTemplate::search(TemplateSource::Directory(dir.path().to_path_buf()));

        assert!(matches!(page.load(), Err(ConsoleError::Template(_))));
    }

    #[test]
    fn test_concurrent_first_use_shares_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(PageTemplate::containers(TemplateSource::Directory(
            dir.path().to_path_buf(),
        )));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let page = page.clone();
                std::thread::spawn(move || page.load().map(|_| ()).map_err(|e| e.to_string()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(page.parse_attempts(), 1);
        assert!(results.iter().all(|r| r == &results[0] && r.is_err()));
    }

    #[test]
    fn test_render_keeps_partial_output_on_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SEARCH_TEMPLATE), "before{{ missing_fn() }}after").unwrap();
        let page = PageTemplate::search(TemplateSource::Directory(dir.path().to_path_buf()));

        let env = page.load().unwrap();
        let rendered = page.render(env, ());
        assert!(rendered.error.is_some());
        assert!(String::from_utf8(rendered.body).unwrap().starts_with("before"));
    }

    #[test]
    fn test_template_source_from_option() {
        assert_eq!(TemplateSource::from(None), TemplateSource::Embedded);
        assert_eq!(
            TemplateSource::from(Some(PathBuf::from("/tmp/t"))),
            TemplateSource::Directory(PathBuf::from("/tmp/t"))
        );
    }
}
