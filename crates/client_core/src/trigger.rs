use std::fmt;

pub const COMPARISON_DISTRESS: &str = "comparison-distress";

const COMPARISON_DISTRESS_PHRASES: &[&str] = &[
    "not good enough",
    "everyone else",
    "compare myself",
    "inadequate",
    "not worthy",
    "behind everyone",
    "not smart enough",
    "not talented enough",
    "everyone is better",
    "feel inferior",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerCategory(String);

impl TriggerCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    None,
    Fired {
        category: TriggerCategory,
        input: String,
    },
}

impl TriggerEvent {
    pub fn category(&self) -> Option<&TriggerCategory> {
        match self {
            Self::None => None,
            Self::Fired { category, .. } => Some(category),
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, Self::Fired { .. })
    }
}

/// Receives input already lowercased by the detector.
pub trait TriggerMatcher: Send + Sync {
    fn is_match(&self, lowered: &str) -> bool;
}

impl<F> TriggerMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_match(&self, lowered: &str) -> bool {
        self(lowered)
    }
}

/// Matches when any phrase occurs anywhere in the input.
#[derive(Debug, Clone)]
pub struct PhraseSet {
    phrases: Vec<String>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|phrase| phrase.as_ref().trim().to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }
}

impl TriggerMatcher for PhraseSet {
    fn is_match(&self, lowered: &str) -> bool {
        self.phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }
}

struct TriggerRule {
    category: TriggerCategory,
    matcher: Box<dyn TriggerMatcher>,
}

/// Ordered rule list; the first matching rule decides the category.
pub struct TriggerDetector {
    rules: Vec<TriggerRule>,
}

impl Default for TriggerDetector {
    fn default() -> Self {
        Self::empty().with_rule(
            TriggerCategory::new(COMPARISON_DISTRESS),
            PhraseSet::new(COMPARISON_DISTRESS_PHRASES),
        )
    }
}

impl TriggerDetector {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(
        mut self,
        category: TriggerCategory,
        matcher: impl TriggerMatcher + 'static,
    ) -> Self {
        self.rules.push(TriggerRule {
            category,
            matcher: Box::new(matcher),
        });
        self
    }

    pub fn categories(&self) -> impl Iterator<Item = &TriggerCategory> {
        self.rules.iter().map(|rule| &rule.category)
    }

    pub fn classify(&self, text: &str) -> TriggerEvent {
        if text.trim().is_empty() {
            return TriggerEvent::None;
        }
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(&lowered))
            .map(|rule| TriggerEvent::Fired {
                category: rule.category.clone(),
                input: text.to_string(),
            })
            .unwrap_or(TriggerEvent::None)
    }
}
