/// Statement keywords a query is allowed to begin with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementAllowlist {
    keywords: Vec<String>,
}

impl StatementAllowlist {
    /// Read-only default: `SELECT` and `WITH`.
    pub fn read_only() -> Self {
        Self::new(["SELECT", "WITH"])
    }

    /// Keywords are stored uppercased; blank entries are dropped.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// `normalized` must already be trimmed and uppercased.
    pub fn permits(&self, normalized: &str) -> bool {
        self.keywords.iter().any(|k| normalized.starts_with(k.as_str()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Human-readable list for rejection messages, e.g. `SELECT, WITH`.
    pub fn describe(&self) -> String {
        self.keywords.join(", ")
    }
}

impl Default for StatementAllowlist {
    fn default() -> Self {
        Self::read_only()
    }
}
