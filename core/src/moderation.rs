use crate::error::Rejection;

pub const MAX_MESSAGE_CHARS: usize = 500;

/// Content policy applied to chat text before it is stored.
///
/// The denylist is supplied by the caller; matching is a case-insensitive
/// substring test against the trimmed text.
#[derive(Debug, Clone)]
pub struct ModerationFilter {
    terms: Vec<String>,
    max_chars: usize,
}

impl ModerationFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            terms,
            max_chars: MAX_MESSAGE_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Returns the trimmed text when it is acceptable.
    pub fn check(&self, raw: &str) -> Result<String, Rejection> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(Rejection::EmptyMessage);
        }
        if text.chars().count() > self.max_chars {
            return Err(Rejection::MessageTooLong {
                max: self.max_chars,
            });
        }
        let lowered = text.to_lowercase();
        if self.terms.iter().any(|t| lowered.contains(t.as_str())) {
            return Err(Rejection::OffensiveLanguage);
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ModerationFilter {
        ModerationFilter::new(["mierda", " Idiota "])
    }

    #[test]
    fn denylisted_term_any_case() {
        let f = filter();
        assert_eq!(f.check("mierda"), Err(Rejection::OffensiveLanguage));
        assert_eq!(f.check("MiErDa!"), Err(Rejection::OffensiveLanguage));
        assert_eq!(f.check("what an IDIOTA"), Err(Rejection::OffensiveLanguage));
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(filter().check(" \n\t "), Err(Rejection::EmptyMessage));
    }

    #[test]
    fn accepts_and_trims() {
        assert_eq!(filter().check("  hello there ").unwrap(), "hello there");
    }

    #[test]
    fn length_limit_counts_chars() {
        let f = ModerationFilter::new(Vec::<String>::new()).with_max_chars(3);
        assert!(f.check("héé").is_ok());
        assert_eq!(
            f.check("héééé"),
            Err(Rejection::MessageTooLong { max: 3 })
        );
    }

    #[test]
    fn terms_are_injected() {
        let f = ModerationFilter::new(["banana"]);
        assert!(f.check("mierda").is_ok());
        assert_eq!(f.check("Banana split"), Err(Rejection::OffensiveLanguage));
        assert_eq!(f.terms(), ["banana"]);
    }
}
