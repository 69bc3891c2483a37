//! Brand context retrieval
//!
//! The planning stage is grounded in documents about the account: brand
//! voice, content pillars, past campaigns and so on. [`RetrievalAdapter`]
//! asks a [`RetrievalService`] for each [`ContextCategory`], falling back from
//! the remote service to a local document directory, and renders what it
//! found as one text block.
//!
//! Missing context never fails a workflow. It is reported as degraded and
//! the block carries a placeholder instead.

pub mod http;
pub mod local;

pub use http::HttpRetrievalClient;
pub use local::LocalRetrievalClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Text used when no category produced anything
pub const NO_CONTEXT_PLACEHOLDER: &str = "No brand intelligence documents available.";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Retrieval service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub relevance: f64,
}

impl Snippet {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
            relevance: 1.0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }
}

/// Semantic document search scoped to one account.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn retrieve(&self, account: &str, query: &str) -> Result<Vec<Snippet>, RetrievalError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// The kinds of brand context gathered for planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    BrandVoice,
    ContentPillars,
    ProductCatalog,
    DesignGuidelines,
    PreviousCampaigns,
    TargetAudience,
    SeasonalThemes,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 7] = [
        ContextCategory::BrandVoice,
        ContextCategory::ContentPillars,
        ContextCategory::ProductCatalog,
        ContextCategory::DesignGuidelines,
        ContextCategory::PreviousCampaigns,
        ContextCategory::TargetAudience,
        ContextCategory::SeasonalThemes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextCategory::BrandVoice => "brand_voice",
            ContextCategory::ContentPillars => "content_pillars",
            ContextCategory::ProductCatalog => "product_catalog",
            ContextCategory::DesignGuidelines => "design_guidelines",
            ContextCategory::PreviousCampaigns => "previous_campaigns",
            ContextCategory::TargetAudience => "target_audience",
            ContextCategory::SeasonalThemes => "seasonal_themes",
        }
    }

    /// Query sent to the retrieval service
    pub fn query(&self) -> &'static str {
        match self {
            ContextCategory::BrandVoice => "brand voice guidelines and tone of voice",
            ContextCategory::ContentPillars => "content pillars and themes",
            ContextCategory::ProductCatalog => "product catalog and offerings",
            ContextCategory::DesignGuidelines => "design guidelines and visual standards",
            ContextCategory::PreviousCampaigns => "previous campaign examples and performance",
            ContextCategory::TargetAudience => "target audience and customer personas",
            ContextCategory::SeasonalThemes => "seasonal themes and calendar events",
        }
    }

    /// Section heading in the rendered context
    pub fn heading(&self) -> &'static str {
        match self {
            ContextCategory::BrandVoice => "Brand Voice Guidelines",
            ContextCategory::ContentPillars => "Content Pillars",
            ContextCategory::ProductCatalog => "Product Catalog",
            ContextCategory::DesignGuidelines => "Design Guidelines",
            ContextCategory::PreviousCampaigns => "Previous Campaign Examples",
            ContextCategory::TargetAudience => "Target Audience",
            ContextCategory::SeasonalThemes => "Seasonal Themes",
        }
    }
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snippets found for one category and where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSection {
    pub category: ContextCategory,
    pub source: String,
    pub snippets: Vec<Snippet>,
}

/// Brand context for one account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub sections: Vec<ContextSection>,
    /// Some category could not be served by any source
    pub degraded: bool,
    pub advisories: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.snippets.is_empty())
    }

    /// Markdown block with one heading per category that produced snippets.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in self.sections.iter().filter(|s| !s.snippets.is_empty()) {
            out.push_str("## ");
            out.push_str(section.category.heading());
            out.push_str("\n\n");
            let body: Vec<&str> = section.snippets.iter().map(|s| s.content.trim()).collect();
            out.push_str(&body.join("\n\n"));
            out.push_str(&format!("\n\n*Retrieved via {}*\n\n", section.source));
        }
        if out.is_empty() {
            return NO_CONTEXT_PLACEHOLDER.to_string();
        }
        out.trim_end().to_string()
    }
}

/// Gathers every context category with remote → local fallback.
#[derive(Clone, Default)]
pub struct RetrievalAdapter {
    remote: Option<Arc<dyn RetrievalService>>,
    local: Option<Arc<dyn RetrievalService>>,
}

impl fmt::Debug for RetrievalAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalAdapter")
            .field("remote", &self.remote.as_ref().map(|s| s.name().to_string()))
            .field("local", &self.local.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

impl RetrievalAdapter {
    /// Adapter with no sources; every gather is degraded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, service: Arc<dyn RetrievalService>) -> Self {
        self.remote = Some(service);
        self
    }

    pub fn with_local(mut self, service: Arc<dyn RetrievalService>) -> Self {
        self.local = Some(service);
        self
    }

    /// Query every category for `account`.
    pub async fn gather(&self, account: &str) -> RetrievedContext {
        let mut context = RetrievedContext::default();
        let mut unserved = Vec::new();

        for category in ContextCategory::ALL {
            match self.gather_category(account, category).await {
                Some(section) => context.sections.push(section),
                None => unserved.push(category.as_str()),
            }
        }

        if !unserved.is_empty() {
            context.degraded = true;
            context.advisories.push(format!(
                "brand context unavailable for {}",
                unserved.join(", ")
            ));
        }
        info!(
            account = account,
            categories = context.sections.iter().filter(|s| !s.snippets.is_empty()).count(),
            degraded = context.degraded,
            "Brand context gathered"
        );
        context
    }

    async fn gather_category(&self, account: &str, category: ContextCategory) -> Option<ContextSection> {
        for service in [&self.remote, &self.local].into_iter().flatten() {
            match service.retrieve(account, category.query()).await {
                Ok(snippets) => {
                    debug!(
                        account = account,
                        category = %category,
                        source = service.name(),
                        snippets = snippets.len(),
                        "Retrieved context"
                    );
                    return Some(ContextSection {
                        category,
                        source: service.name().to_string(),
                        snippets,
                    });
                }
                Err(e) => {
                    warn!(
                        account = account,
                        category = %category,
                        source = service.name(),
                        error = %e,
                        "Retrieval failed, trying next source"
                    );
                }
            }
        }
        None
    }
}
