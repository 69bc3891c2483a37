//! Local document directory used when the remote service is unreachable.
//!
//! Documents live under `<root>/<account>/` as `.md` or `.txt` files. Each
//! paragraph is scored by the share of query terms it contains.

use super::{RetrievalError, RetrievalService, Snippet};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[derive(Debug, Clone)]
pub struct LocalRetrievalClient {
    root: PathBuf,
    top_k: usize,
    min_relevance: f64,
}

impl LocalRetrievalClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            top_k: 3,
            min_relevance: 0.3,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    fn account_dir(&self, account: &str) -> PathBuf {
        let name: String = account
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.root.join(name)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[async_trait]
impl RetrievalService for LocalRetrievalClient {
    async fn retrieve(&self, account: &str, query: &str) -> Result<Vec<Snippet>, RetrievalError> {
        let dir = self.account_dir(account);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RetrievalError::Unavailable(format!(
                    "no local documents for '{}' in {}",
                    account,
                    self.root.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            let source = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
                let found = terms(paragraph);
                let matched = query_terms.iter().filter(|term| found.contains(*term)).count();
                let relevance = matched as f64 / query_terms.len() as f64;
                if relevance >= self.min_relevance {
                    scored.push(
                        Snippet::new(paragraph)
                            .with_source(source.clone())
                            .with_relevance(relevance),
                    );
                }
            }
        }

        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(self.top_k);
        Ok(scored)
    }

    fn name(&self) -> &str {
        "local documents"
    }
}
