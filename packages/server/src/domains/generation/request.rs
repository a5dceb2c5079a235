//! Generation request model.
//!
//! Option fields (`content_type`, `tone`, `length`) arrive either as the
//! canonical snake_case value or as a loose string ("Blog Post", "blog-post",
//! "BLOG_POST"). Both are normalized here, at ingestion, into one canonical
//! enum per category. Stage logic only ever sees the enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_TOPIC_CHARS: usize = 300;
const MAX_KEYWORDS: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("topic exceeds {MAX_TOPIC_CHARS} characters")]
    TopicTooLong,

    #[error("at most {MAX_KEYWORDS} keywords are allowed")]
    TooManyKeywords,

    #[error("invalid language_code {0:?}")]
    InvalidLanguage(String),

    #[error("invalid location_code {0}")]
    InvalidLocation(u32),

    #[error("unknown {category} {value:?}")]
    UnknownOption {
        category: &'static str,
        value: String,
    },
}

/// Lowercase, and fold spaces and dashes into underscores.
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ContentType {
    #[default]
    BlogPost,
    Article,
    Guide,
    Listicle,
    ProductReview,
    LandingPage,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::BlogPost => "blog_post",
            ContentType::Article => "article",
            ContentType::Guide => "guide",
            ContentType::Listicle => "listicle",
            ContentType::ProductReview => "product_review",
            ContentType::LandingPage => "landing_page",
        }
    }
}

impl FromStr for ContentType {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "blog_post" | "blog" | "post" => Ok(ContentType::BlogPost),
            "article" => Ok(ContentType::Article),
            "guide" | "how_to" | "tutorial" => Ok(ContentType::Guide),
            "listicle" | "list" => Ok(ContentType::Listicle),
            "product_review" | "review" => Ok(ContentType::ProductReview),
            "landing_page" | "landing" => Ok(ContentType::LandingPage),
            _ => Err(RequestError::UnknownOption {
                category: "content_type",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ContentType {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Conversational,
    Authoritative,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Conversational => "conversational",
            Tone::Authoritative => "authoritative",
            Tone::Friendly => "friendly",
        }
    }
}

impl FromStr for Tone {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "professional" | "formal" => Ok(Tone::Professional),
            "casual" => Ok(Tone::Casual),
            "conversational" => Ok(Tone::Conversational),
            "authoritative" | "expert" => Ok(Tone::Authoritative),
            "friendly" => Ok(Tone::Friendly),
            _ => Err(RequestError::UnknownOption {
                category: "tone",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Tone {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ContentLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl ContentLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentLength::Short => "short",
            ContentLength::Medium => "medium",
            ContentLength::Long => "long",
        }
    }

    /// Target word range.
    pub fn word_range(&self) -> (u32, u32) {
        match self {
            ContentLength::Short => (500, 900),
            ContentLength::Medium => (1200, 1800),
            ContentLength::Long => (2500, 3500),
        }
    }
}

impl FromStr for ContentLength {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "short" | "brief" => Ok(ContentLength::Short),
            "medium" | "standard" => Ok(ContentLength::Medium),
            "long" | "long_form" | "comprehensive" => Ok(ContentLength::Long),
            _ => Err(RequestError::UnknownOption {
                category: "length",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ContentLength {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

/// One request to generate a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub length: ContentLength,
    #[serde(default = "default_language")]
    pub language_code: String,
    #[serde(default)]
    pub location_code: Option<u32>,
    #[serde(default = "default_true")]
    pub include_research: bool,
    #[serde(default = "default_true")]
    pub include_citations: bool,
    #[serde(default)]
    pub include_images: bool,
    /// Return a job handle immediately instead of the finished result.
    #[serde(default)]
    pub async_mode: bool,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            keywords: Vec::new(),
            content_type: ContentType::default(),
            tone: Tone::default(),
            length: ContentLength::default(),
            language_code: default_language(),
            location_code: None,
            include_research: true,
            include_citations: true,
            include_images: false,
            async_mode: false,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.async_mode = true;
        self
    }

    /// Validate and return the canonical form: trimmed topic, keywords
    /// trimmed, lowercased and deduplicated, language code normalized.
    pub fn normalized(mut self) -> Result<Self, RequestError> {
        self.topic = self.topic.trim().to_string();
        if self.topic.is_empty() {
            return Err(RequestError::EmptyTopic);
        }
        if self.topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(RequestError::TopicTooLong);
        }

        let mut keywords: Vec<String> = Vec::with_capacity(self.keywords.len());
        for keyword in &self.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        if keywords.len() > MAX_KEYWORDS {
            return Err(RequestError::TooManyKeywords);
        }
        self.keywords = keywords;

        self.language_code = normalize_language(&self.language_code)?;
        if self.location_code == Some(0) {
            return Err(RequestError::InvalidLocation(0));
        }
        Ok(self)
    }

    /// Keywords to research: the explicit list, or the topic itself.
    pub fn seed_keywords(&self) -> Vec<String> {
        if self.keywords.is_empty() {
            vec![self.topic.to_lowercase()]
        } else {
            self.keywords.clone()
        }
    }

    pub fn primary_keyword(&self) -> String {
        self.seed_keywords()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.topic.to_lowercase())
    }
}

fn normalize_language(raw: &str) -> Result<String, RequestError> {
    let raw = raw.trim();
    let mut parts = raw.splitn(2, ['-', '_']);
    let primary = parts.next().unwrap_or_default();
    let region = parts.next();

    let valid = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic());
    if !valid(primary) || !region.map_or(true, valid) {
        return Err(RequestError::InvalidLanguage(raw.to_string()));
    }

    Ok(match region {
        Some(region) => format!("{}-{}", primary.to_lowercase(), region.to_uppercase()),
        None => primary.to_lowercase(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_accept_canonical_and_loose_strings() {
        let request: GenerationRequest = serde_json::from_value(json!({
            "topic": "X",
            "content_type": "Blog Post",
            "tone": "CONVERSATIONAL",
            "length": "long-form"
        }))
        .unwrap();

        assert_eq!(request.content_type, ContentType::BlogPost);
        assert_eq!(request.tone, Tone::Conversational);
        assert_eq!(request.length, ContentLength::Long);

        let canonical: GenerationRequest = serde_json::from_value(json!({
            "topic": "X",
            "content_type": "product_review"
        }))
        .unwrap();
        assert_eq!(canonical.content_type, ContentType::ProductReview);
    }

    #[test]
    fn unknown_option_is_rejected_at_ingestion() {
        let err = serde_json::from_value::<GenerationRequest>(json!({
            "topic": "X",
            "tone": "sarcastic"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown tone"));
    }

    #[test]
    fn serializes_canonical_form() {
        let value = serde_json::to_value(GenerationRequest::new("X")).unwrap();
        assert_eq!(value["content_type"], json!("blog_post"));
        assert_eq!(value["length"], json!("medium"));
        assert_eq!(value["include_research"], json!(true));
        assert_eq!(value["include_images"], json!(false));
    }

    #[test]
    fn normalized_cleans_keywords_and_language() {
        let mut request = GenerationRequest::new("  Rust async  ").with_keywords([" Tokio", "tokio", "", "Axum"]);
        request.language_code = "EN_us".into();

        let request = request.normalized().unwrap();
        assert_eq!(request.topic, "Rust async");
        assert_eq!(request.keywords, vec!["tokio", "axum"]);
        assert_eq!(request.language_code, "en-US");
    }

    #[test]
    fn normalized_rejects_bad_input() {
        assert_eq!(
            GenerationRequest::new("   ").normalized().unwrap_err(),
            RequestError::EmptyTopic
        );

        let mut request = GenerationRequest::new("X");
        request.language_code = "english".into();
        assert!(matches!(
            request.normalized().unwrap_err(),
            RequestError::InvalidLanguage(_)
        ));

        let request = GenerationRequest::new("X").with_keywords((0..25).map(|i| format!("k{i}")));
        assert_eq!(request.normalized().unwrap_err(), RequestError::TooManyKeywords);
    }

    #[test]
    fn seed_keywords_fall_back_to_topic() {
        let request = GenerationRequest::new("Rust Async");
        assert_eq!(request.seed_keywords(), vec!["rust async"]);
        assert_eq!(request.primary_keyword(), "rust async");
    }
}
