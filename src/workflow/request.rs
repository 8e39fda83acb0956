use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const ARTICLE_TITLE_MAX_CHARS: usize = 64;
pub const IMAGE_TEXT_TITLE_MAX_CHARS: usize = 20;
pub const AUTHOR_MAX_CHARS: usize = 8;
pub const SUMMARY_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    /// Long-form article; the body is pasted as HTML.
    #[default]
    Article,
    /// Picture post; images are mandatory and the body is plain text.
    ImageText,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::ImageText => "image_text",
        }
    }

    pub fn title_limit(&self) -> usize {
        match self {
            Self::Article => ARTICLE_TITLE_MAX_CHARS,
            Self::ImageText => IMAGE_TEXT_TITLE_MAX_CHARS,
        }
    }

    /// `type` query value of the editor URL.
    pub fn editor_type(&self) -> u32 {
        match self {
            Self::Article => 10,
            Self::ImageText => 77,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title is empty")]
    EmptyTitle,
    #[error("title has {len} characters, {kind} posts allow at most {max}")]
    TitleTooLong {
        len: usize,
        max: usize,
        kind: &'static str,
    },
    #[error("content is empty")]
    EmptyContent,
    #[error("author has {len} characters, at most {max} allowed")]
    AuthorTooLong { len: usize, max: usize },
    #[error("summary has {len} characters, at most {max} allowed")]
    SummaryTooLong { len: usize, max: usize },
    #[error("image_text posts need at least one content image")]
    MissingImages,
    #[error("collection name is empty")]
    EmptyCollection,
    #[error("file not found or unreadable: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Immutable input of one publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRequest {
    pub title: String,
    /// Rendered HTML, or plain text.
    pub content: String,
    /// Plain-text rendition of `content`; derived when absent.
    pub plain_text: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub cover: Option<PathBuf>,
    pub content_images: Vec<PathBuf>,
    pub collection: Option<String>,
    pub original: bool,
    pub reward: bool,
    /// `false` composes only. `true` saves a draft, then publishes unless
    /// `draft_only` is set.
    pub submit: bool,
    pub draft_only: bool,
    pub post_kind: PostKind,
}

impl PublishRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let max = self.post_kind.title_limit();
        let len = title.chars().count();
        if len > max {
            return Err(ValidationError::TitleTooLong {
                len,
                max,
                kind: self.post_kind.as_str(),
            });
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if let Some(author) = &self.author {
            let len = author.chars().count();
            if len > AUTHOR_MAX_CHARS {
                return Err(ValidationError::AuthorTooLong {
                    len,
                    max: AUTHOR_MAX_CHARS,
                });
            }
        }
        if let Some(summary) = &self.summary {
            let len = summary.chars().count();
            if len > SUMMARY_MAX_CHARS {
                return Err(ValidationError::SummaryTooLong {
                    len,
                    max: SUMMARY_MAX_CHARS,
                });
            }
        }
        if self.collection.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ValidationError::EmptyCollection);
        }
        if self.post_kind == PostKind::ImageText && self.content_images.is_empty() {
            return Err(ValidationError::MissingImages);
        }
        for path in self.cover.iter().chain(self.content_images.iter()) {
            if !path.is_file() || std::fs::File::open(path).is_err() {
                return Err(ValidationError::FileNotFound(path.clone()));
            }
        }
        Ok(())
    }

    /// Whether `content` looks like markup rather than plain text.
    pub fn is_html(&self) -> bool {
        let content = self.content.trim_start();
        content.starts_with('<') && content.contains('>')
    }

    pub fn plain_text(&self) -> String {
        match &self.plain_text {
            Some(text) => text.clone(),
            None if self.is_html() => strip_html(&self.content),
            None => self.content.clone(),
        }
    }

    pub fn wants_publish(&self) -> bool {
        self.submit && !self.draft_only
    }
}

const BLOCK_CLOSERS: [&str; 10] = [
    "</p>", "</div>", "</h1>", "</h2>", "</h3>", "</h4>", "</li>", "</blockquote>", "</section>",
    "</pre>",
];

/// Text rendition of rendered HTML: block ends and `<br>` become line
/// breaks, tags are dropped, common entities decoded.
pub fn strip_html(html: &str) -> String {
    let mut marked = html.replace("\r\n", "\n").replace('\n', " ");
    for closer in BLOCK_CLOSERS {
        marked = marked.replace(closer, "\u{0}");
    }
    for br in ["<br>", "<br/>", "<br />"] {
        marked = marked.replace(br, "\u{0}");
    }

    let mut text = String::with_capacity(marked.len());
    let mut in_tag = false;
    for ch in marked.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            '\u{0}' => text.push('\n'),
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut lines: Vec<&str> = Vec::new();
    for line in decoded.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
