//! `{placeholder}` substitution for subjects and cover letters.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Subject used when the caller does not supply one.
pub const DEFAULT_SUBJECT: &str = "Application for {job_title} Position";

/// Cover letter used when no template file is available.
pub const DEFAULT_COVER_LETTER: &str = "Dear Hiring Manager,

I am writing to express my interest in the {job_title} position at {company_preference}.

Please find my CV attached for your review. I am excited about the opportunity to contribute to your team.

Thank you for considering my application.

Best regards,
{sender_name}";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Named values available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues {
    values: HashMap<String, String>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Replace known `{name}` tokens; unknown tokens are left as written.
pub fn render(template: &str, values: &TemplateValues) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
