//! Paths the differ never walks and a change manifest never contains.

use anyhow::{Context, Result};
use glob::Pattern;

use crate::constants::{
    BACKUP_DIR_PREFIX, CHANGES_FILE, CONFIG_DIR, DEBUG_DIR, JOURNAL_FILE, LOG_FILE,
    PREVIOUS_EXE_SUFFIX, STAGING_DIR_NAME,
};

/// Glob rules matched against slash-separated install-relative paths.
///
/// A path is ignored when it or any of its ancestors matches a rule, so a rule
/// naming a directory prunes the whole subtree. A rule of the form `dir/**`
/// also matches `dir` itself.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::changes::IgnoreRules;
///
/// let rules = IgnoreRules::defaults().with_literal("bin/app");
/// assert!(rules.is_ignored("config/settings.ini"));
/// assert!(rules.is_ignored("lib/app.so.old"));
/// assert!(rules.is_ignored("bin/app"));
/// assert!(!rules.is_ignored("lib/app.so"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<String>,
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// No rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rules protecting user data, updater state and artifacts of previous runs.
    #[must_use]
    pub fn defaults() -> Self {
        let rules = [
            format!("{CONFIG_DIR}/**"),
            format!("{DEBUG_DIR}/**"),
            format!("{STAGING_DIR_NAME}/**"),
            LOG_FILE.to_string(),
            CHANGES_FILE.to_string(),
            JOURNAL_FILE.to_string(),
            format!("{BACKUP_DIR_PREFIX}*/**"),
            format!("*{PREVIOUS_EXE_SUFFIX}"),
        ];

        let mut ignore = Self::empty();
        for rule in rules {
            // Built from constants, always valid
            if let Ok(pattern) = Pattern::new(&rule) {
                ignore.push(rule, pattern);
            }
        }
        ignore
    }

    fn push(&mut self, rule: String, pattern: Pattern) {
        if let Some(dir) = rule.strip_suffix("/**")
            && let Ok(dir_pattern) = Pattern::new(dir)
        {
            self.patterns.push(dir_pattern);
        }
        self.patterns.push(pattern);
        self.rules.push(rule);
    }

    /// Adds a user-supplied glob rule.
    ///
    /// # Errors
    ///
    /// Fails when `rule` is not a valid glob pattern.
    pub fn add(&mut self, rule: &str) -> Result<()> {
        let normalized = rule.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./").to_string();
        let pattern = Pattern::new(&normalized)
            .with_context(|| format!("Invalid ignore pattern: {rule}"))?;
        self.push(normalized, pattern);
        Ok(())
    }

    /// Adds every rule in `rules`.
    pub fn extend<I, S>(mut self, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for rule in rules {
            self.add(rule.as_ref())?;
        }
        Ok(self)
    }

    /// Ignores one install-relative path literally, glob metacharacters included.
    #[must_use]
    pub fn with_literal(mut self, relative: &str) -> Self {
        let escaped = Pattern::escape(relative);
        if let Ok(pattern) = Pattern::new(&escaped) {
            self.push(escaped, pattern);
        }
        self
    }

    /// Whether `relative` or one of its ancestors matches a rule.
    #[must_use]
    pub fn is_ignored(&self, relative: &str) -> bool {
        let mut end = 0;
        loop {
            let next = relative[end..].find('/').map(|i| end + i);
            let prefix = match next {
                Some(i) => &relative[..i],
                None => relative,
            };
            if !prefix.is_empty() && self.patterns.iter().any(|p| p.matches(prefix)) {
                return true;
            }
            match next {
                Some(i) => end = i + 1,
                None => return false,
            }
        }
    }

    /// The rule strings, in the order they were added.
    #[must_use]
    pub fn rules(&self) -> &[String] {
        &self.rules
    }
}
