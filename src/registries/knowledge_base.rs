use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::data::{PolicyEvidenceSource, PolicyHit};
use crate::error::EvidenceError;

const EXCERPT_LEAD: usize = 160;
const EXCERPT_CHARS: usize = 520;
const HTML_WIDTH: usize = 100;

/// Keyword search over policy documents kept in a local directory.
///
/// Markdown and text files are read as-is; HTML is converted to plain text
/// first. Documents are reloaded on every search.
#[derive(Debug, Clone)]
pub struct FileKnowledgeBase {
    root: PathBuf,
}

impl FileKnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads `(doc_id, text)` pairs in file-tree order.
    pub fn load_corpus(&self) -> Result<Vec<(String, String)>, EvidenceError> {
        if !self.root.is_dir() {
            return Err(EvidenceError::Unavailable(format!(
                "knowledge directory '{}' not found",
                self.root.display()
            )));
        }
        let mut files = Vec::new();
        collect_documents(&self.root, &mut files);

        let mut docs = Vec::with_capacity(files.len());
        for path in files {
            let doc_id = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            match read_document(&path) {
                Ok(text) => docs.push((doc_id, text)),
                Err(e) => debug!(doc = %doc_id, error = %e, "skipping unreadable document"),
            }
        }
        Ok(docs)
    }
}

impl PolicyEvidenceSource for FileKnowledgeBase {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<PolicyHit>, EvidenceError> {
        let docs = self.load_corpus()?;
        let hits = search_corpus(&docs, query, limit);
        debug!(query, hits = hits.len(), "knowledge base search");
        Ok(hits)
    }
}

fn collect_documents(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<(PathBuf, fs::FileType)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_type().ok().map(|t| (e.path(), t)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in entries {
        if file_type.is_dir() {
            collect_documents(&path, files);
            continue;
        }
        if file_type.is_symlink() && path.is_dir() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("md" | "markdown" | "txt" | "html" | "htm")) {
            files.push(path);
        }
    }
}

fn read_document(path: &Path) -> Result<String, EvidenceError> {
    let io_err = |source| EvidenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let is_html = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("html" | "htm")
    );
    if is_html {
        let bytes = fs::read(path).map_err(io_err)?;
        html2text::from_read(bytes.as_slice(), HTML_WIDTH).map_err(|e| {
            EvidenceError::Unavailable(format!("failed to convert {}: {}", path.display(), e))
        })
    } else {
        fs::read_to_string(path).map_err(io_err)
    }
}

fn token_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_]+").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Lowercase word tokens of at least three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    token_split_re()
        .split(&text.to_lowercase())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

/// Ranks documents by total occurrences of the query terms.
///
/// Documents scoring zero are dropped; ties keep corpus order.
pub fn search_corpus(docs: &[(String, String)], query: &str, limit: usize) -> Vec<PolicyHit> {
    let terms = tokenize(query);
    let mut scored: Vec<(usize, &str, &str)> = docs
        .iter()
        .filter_map(|(doc_id, text)| {
            let tokens = tokenize(text);
            let score: usize = terms
                .iter()
                .map(|term| tokens.iter().filter(|t| *t == term).count())
                .sum();
            (score > 0).then_some((score, doc_id.as_str(), text.as_str()))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(limit)
        .map(|(score, doc_id, text)| PolicyHit {
            doc_id: doc_id.to_string(),
            score: score as f64,
            excerpt: excerpt(text, &terms),
        })
        .collect()
}

fn excerpt(text: &str, terms: &[String]) -> String {
    let lower = text.to_lowercase();
    let first_hit = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .map(|byte_idx| lower[..byte_idx].chars().count())
        .unwrap_or(0);
    let start = first_hit.saturating_sub(EXCERPT_LEAD);
    let window: String = text.chars().skip(start).take(EXCERPT_CHARS).collect();
    whitespace_re().replace_all(&window, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> Vec<(String, String)> {
        vec![
            (
                "logging.md".to_string(),
                "# Logging\n\nAll services use structured logging for observability.".to_string(),
            ),
            (
                "health.md".to_string(),
                "Health endpoints: liveness at /healthz, readiness at /readyz. Kubernetes probes health endpoints.".to_string(),
            ),
            ("empty.md".to_string(), "Nothing relevant.".to_string()),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Health-endpoints, k8s & readiness_probe"),
            vec!["health", "endpoints", "k8s", "readiness_probe"]
        );
    }

    #[test]
    fn test_ranking_and_limit() {
        let hits = search_corpus(&corpus(), "health endpoints kubernetes readiness liveness", 2);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "health.md");
        assert_eq!(hits[0].score, 7.0);

        let hits = search_corpus(&corpus(), "structured logging observability", 1);
        assert_eq!(hits[0].doc_id, "logging.md");
        assert_eq!(hits[0].score, 4.0);
    }

    #[test]
    fn test_excerpt_collapses_whitespace() {
        let hits = search_corpus(&corpus(), "logging", 5);
        assert_eq!(
            hits[0].excerpt,
            "# Logging All services use structured logging for observability."
        );
    }

    #[test]
    fn test_excerpt_window_starts_before_first_hit() {
        let text = format!("{}needle{}", "a ".repeat(200), " b".repeat(400));
        let out = excerpt(&text, &["needle".to_string()]);
        assert!(out.starts_with("a a"));
        assert!(out.contains("needle"));
        assert!(out.chars().count() <= EXCERPT_CHARS);
    }

    #[test]
    fn test_directory_search_reads_html() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("ops")).unwrap();
        fs::write(
            dir.path().join("ops/tracing.html"),
            "<html><body><h1>Tracing</h1><p>Propagate the trace context on every request.</p></body></html>",
        )
        .unwrap();
        fs::write(dir.path().join("notes.bin"), "trace trace trace").unwrap();

        let kb = FileKnowledgeBase::new(dir.path());
        let hits = kb.search("trace propagation correlation request context", 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "ops/tracing.html");
    }

    #[test]
    fn test_unreadable_document_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a_binary.txt"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        fs::write(dir.path().join("b_logging.md"), "Use structured logging everywhere.").unwrap();

        let kb = FileKnowledgeBase::new(dir.path());
        let docs = kb.load_corpus().unwrap();
        assert_eq!(docs.len(), 1);
        let hits = kb.search("structured logging", 2).unwrap();
        assert_eq!(hits[0].doc_id, "b_logging.md");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_not_followed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ops.md"), "health probes").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let docs = FileKnowledgeBase::new(dir.path()).load_corpus().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "ops.md");
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let kb = FileKnowledgeBase::new("/nonexistent/knowledge");
        assert!(matches!(
            kb.search("anything", 2),
            Err(EvidenceError::Unavailable(_))
        ));
    }
}
