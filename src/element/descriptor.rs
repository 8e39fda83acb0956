use crate::browser::driver::Rect;
use crate::browser::js;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One way of locating an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    /// Elements under `scope` whose normalised text equals (or contains) `text`.
    /// Only the innermost matching elements are returned.
    Text {
        scope: String,
        text: String,
        exact: bool,
    },
    /// Elements under `scope` whose attribute `name` contains `contains`.
    Attribute {
        scope: String,
        name: String,
        contains: String,
    },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            scope: scope.into(),
            text: text.into(),
            exact: true,
        }
    }

    pub fn text_contains(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            scope: scope.into(),
            text: text.into(),
            exact: false,
        }
    }

    pub fn attribute(
        scope: impl Into<String>,
        name: impl Into<String>,
        contains: impl Into<String>,
    ) -> Self {
        Self::Attribute {
            scope: scope.into(),
            name: name.into(),
            contains: contains.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(selector) => write!(f, "css({})", selector),
            Self::Text { scope, text, exact } => {
                let op = if *exact { "=" } else { "~" };
                write!(f, "text({} {} {:?})", scope, op, text)
            }
            Self::Attribute {
                scope,
                name,
                contains,
            } => write!(f, "attr({}[{}*={:?}])", scope, name, contains),
        }
    }
}

/// A logical UI target and its locators in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub name: String,
    pub locators: Vec<Locator>,
}

impl ElementDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locators: Vec::new(),
        }
    }

    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.locators.push(Locator::css(selector));
        self
    }

    pub fn text(mut self, scope: impl Into<String>, text: impl Into<String>) -> Self {
        self.locators.push(Locator::text(scope, text));
        self
    }

    pub fn text_contains(mut self, scope: impl Into<String>, text: impl Into<String>) -> Self {
        self.locators.push(Locator::text_contains(scope, text));
        self
    }

    pub fn attribute(
        mut self,
        scope: impl Into<String>,
        name: impl Into<String>,
        contains: impl Into<String>,
    ) -> Self {
        self.locators.push(Locator::attribute(scope, name, contains));
        self
    }

    pub fn locator(mut self, locator: Locator) -> Self {
        self.locators.push(locator);
        self
    }

    pub fn trace(&self) -> Vec<String> {
        self.locators.iter().map(|l| l.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub require_visible: bool,
    /// Upper bound on matches inspected per locator.
    pub max_matches: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            require_visible: true,
            max_matches: 20,
        }
    }
}

impl ResolveOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// File inputs are routinely hidden behind styled buttons.
    pub fn allow_hidden(mut self) -> Self {
        self.require_visible = false;
        self
    }
}

pub(crate) fn is_visible(rect: &Rect, display: &str, visibility: &str) -> bool {
    rect.has_area() && display != "none" && visibility != "hidden" && visibility != "collapse"
}

/// A raw match reported by the page for one locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ref_id: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
}

impl Candidate {
    pub fn is_visible(&self) -> bool {
        is_visible(&self.rect, &self.display, &self.visibility)
    }
}

/// An element that passed resolution and can be acted on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    pub target: String,
    pub ref_id: u64,
    pub locator: String,
    pub tag: String,
    pub text: String,
    pub rect: Rect,
}

impl ResolvedElement {
    pub fn selector(&self) -> String {
        js::ref_selector(self.ref_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorAttempt {
    pub locator: String,
    pub matched: usize,
    pub visible: usize,
}

impl fmt::Display for LocatorAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} matched={} visible={}",
            self.locator, self.matched, self.visible
        )
    }
}

/// Resolution came up empty. Carries what was tried, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct NotFound {
    pub target: String,
    pub attempts: Vec<LocatorAttempt>,
    pub waited: Duration,
}

impl NotFound {
    pub fn trace(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(ResolvedElement),
    NotFound(NotFound),
}

impl Resolution {
    pub fn found(self) -> Option<ResolvedElement> {
        match self {
            Self::Found(element) => Some(element),
            Self::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}
