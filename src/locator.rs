use std::fmt;

use crate::error::LocatorError;

/// A single element-finding expression.
///
/// Strings starting with `//` or `.//` are path (XPath) locators, anything
/// else is treated as a CSS selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    Path(String),
}

impl Locator {
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocatorError::Empty);
        }
        if raw.starts_with("//") || raw.starts_with(".//") {
            Ok(Locator::Path(raw.to_string()))
        } else {
            Ok(Locator::Css(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::Path(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css",
            Locator::Path(_) => "xpath",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.as_str())
    }
}

/// Ordered fallback candidates parsed from a comma-separated selector string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpec {
    raw: String,
    candidates: Vec<Locator>,
}

impl SelectorSpec {
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let candidates = split_candidates(raw)
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(Locator::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if candidates.is_empty() {
            return Err(LocatorError::NoCandidates(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            candidates,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn candidates(&self) -> &[Locator] {
        &self.candidates
    }
}

impl fmt::Display for SelectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split on top-level commas. Commas inside `[]`, `()` or quotes belong to
/// the enclosing locator.
fn split_candidates(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in raw.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    parts.push(raw[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(raw[start..].trim());
    parts
}
