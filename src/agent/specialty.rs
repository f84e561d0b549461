use serde::{Deserialize, Serialize};

use crate::project::Team;

/// Closed set of worker specialties.
///
/// A specialty is informational: it selects a prompt template and (for QA
/// variants) the atomic time bound. It never changes the worker contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    #[default]
    General,
    Html,
    Css,
    Js,
    Api,
    Db,
    Security,
    QaHtml,
    QaCss,
    QaJs,
    QaPerformance,
}

/// Keywords that mark a task as atomic validation work. Leads use this to
/// spawn a specialty-matched QA-bounded worker.
const VALIDATION_KEYWORDS: &[&str] = &[
    "validate",
    "check",
    "verify",
    "test",
    "audit",
    "html",
    "css",
    "javascript",
    "performance",
];

pub fn is_validation_task(description: &str) -> bool {
    let lower = description.to_lowercase();
    VALIDATION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

impl Specialty {
    /// Pure mapping from team and task text to a specialty.
    pub fn from_task(team: Team, text: &str) -> Self {
        let lower = text.to_lowercase();

        if team == Team::Qa {
            return Self::qa_concern(&lower);
        }

        match team {
            Team::Frontend => {
                if lower.contains("css") || lower.contains("style") {
                    Self::Css
                } else if lower.contains("javascript")
                    || lower.contains(" js ")
                    || lower.contains("interactiv")
                {
                    Self::Js
                } else if lower.contains("html") || lower.contains("markup") || lower.contains("page")
                {
                    Self::Html
                } else {
                    Self::General
                }
            }
            Team::Backend => {
                if lower.contains("database")
                    || lower.contains("schema")
                    || lower.contains(" db ")
                    || lower.contains("storage")
                {
                    Self::Db
                } else if lower.contains("security")
                    || lower.contains("auth")
                    || lower.contains("permission")
                {
                    Self::Security
                } else if lower.contains("api") || lower.contains("endpoint") || lower.contains("server")
                {
                    Self::Api
                } else {
                    Self::General
                }
            }
            Team::Qa => unreachable!("handled above"),
            Team::General => Self::General,
        }
    }

    fn qa_concern(lower: &str) -> Self {
        if lower.contains("performance") || lower.contains("perf") || lower.contains("speed") {
            Self::QaPerformance
        } else if lower.contains("css") || lower.contains("style") {
            Self::QaCss
        } else if lower.contains("javascript") || lower.contains(" js ") || lower.contains("script")
        {
            Self::QaJs
        } else {
            Self::QaHtml
        }
    }

    /// QA specialties carry the hard atomic time bound.
    pub fn is_qa(&self) -> bool {
        matches!(
            self,
            Self::QaHtml | Self::QaCss | Self::QaJs | Self::QaPerformance
        )
    }

    /// Identifier of the prompt template this specialty uses.
    pub fn template_id(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Html => "frontend_html",
            Self::Css => "frontend_css",
            Self::Js => "frontend_js",
            Self::Api => "backend_api",
            Self::Db => "backend_db",
            Self::Security => "backend_security",
            Self::QaHtml => "qa_html",
            Self::QaCss => "qa_css",
            Self::QaJs => "qa_js",
            Self::QaPerformance => "qa_performance",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Html => "html",
            Self::Css => "css",
            Self::Js => "js",
            Self::Api => "api",
            Self::Db => "db",
            Self::Security => "security",
            Self::QaHtml => "qa_html",
            Self::QaCss => "qa_css",
            Self::QaJs => "qa_js",
            Self::QaPerformance => "qa_performance",
        }
    }
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
