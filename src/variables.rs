//! Placeholder substitution for provisioning and bootstrap scripts.
//!
//! Scripts refer to deployment values through fixed tokens such as
//! `___DOMAIN_NAME___`. Substitution is plain text replacement applied in a
//! fixed order, followed by operator-supplied extras in key order.

use crate::config::{Settings, SourceControl};

/// Token replaced with the operator's email address.
pub const EMAIL_TOKEN: &str = "___EMAIL__ADDRESS___";
/// Token replaced with the remote account name.
pub const USERNAME_TOKEN: &str = "___USERNAME___";
/// Token replaced with the short host name.
pub const HOSTNAME_TOKEN: &str = "___HOSTNAME___";
/// Token replaced with the fully qualified domain name.
pub const DOMAIN_NAME_TOKEN: &str = "___DOMAIN_NAME___";
/// Token replaced with the GitLab access token.
pub const GITLAB_TOKEN_TOKEN: &str = "___GITLAB_TOKEN___";
/// Token replaced with the comma separated GitLab repositories.
pub const GITLAB_REPOS_TOKEN: &str = "___GITLAB_REPOS___";
/// Token replaced with the GitHub access token.
pub const GITHUB_TOKEN_TOKEN: &str = "___GITHUB_TOKEN___";
/// Token replaced with the comma separated GitHub repositories.
pub const GITHUB_REPOS_TOKEN: &str = "___GITHUB_REPOS___";

/// Capability that turns script templates into runnable text.
pub trait VariableResolver {
    /// Returns `text` with every known placeholder substituted.
    fn resolve(&self, text: &str) -> String;
}

/// Ordered placeholder substitutions derived from [`Settings`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateVariables {
    substitutions: Vec<(String, String)>,
}

impl TemplateVariables {
    /// Builds the substitution table for a validated settings snapshot.
    ///
    /// Source-control tokens are only bound for providers that are enabled.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut vars = Self::default()
            .with(EMAIL_TOKEN, &settings.email)
            .with(USERNAME_TOKEN, &settings.username)
            .with(HOSTNAME_TOKEN, &settings.hostname)
            .with(DOMAIN_NAME_TOKEN, &settings.domain_name);
        vars = vars.with_source_control(&settings.gitlab, GITLAB_TOKEN_TOKEN, GITLAB_REPOS_TOKEN);
        vars = vars.with_source_control(&settings.github, GITHUB_TOKEN_TOKEN, GITHUB_REPOS_TOKEN);
        for (key, value) in &settings.variables {
            vars = vars.with(key, value);
        }
        vars
    }

    /// Appends a substitution; later entries see the output of earlier ones.
    #[must_use]
    pub fn with(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.substitutions.push((token.into(), value.into()));
        self
    }

    fn with_source_control(self, scm: &SourceControl, token: &str, repos: &str) -> Self {
        if !scm.enabled {
            return self;
        }
        self.with(token, &scm.token)
            .with(repos, scm.repositories.join(","))
    }

    /// Returns the substitutions in application order.
    #[must_use]
    pub fn substitutions(&self) -> &[(String, String)] {
        &self.substitutions
    }

    /// Applies every substitution to `template`.
    ///
    /// # Examples
    ///
    /// ```
    /// use devstead::variables::TemplateVariables;
    ///
    /// let vars = TemplateVariables::default().with("___HOSTNAME___", "dev");
    /// assert_eq!(vars.render("hostnamectl set-hostname ___HOSTNAME___"),
    ///     "hostnamectl set-hostname dev");
    /// ```
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        self.substitutions
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .fold(template.to_owned(), |text, (token, value)| {
                text.replace(token.as_str(), value)
            })
    }
}

impl VariableResolver for TemplateVariables {
    fn resolve(&self, text: &str) -> String {
        self.render(text)
    }
}
