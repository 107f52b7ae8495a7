//! Destination name resolution.
//!
//! A channel template is either a constant name or contains `%{database}`
//! and/or `%{table}` placeholders that are substituted per event.

use crate::event::RowIdentity;
use std::borrow::Cow;

const DATABASE_PLACEHOLDER: &str = "%{database}";
const TABLE_PLACEHOLDER: &str = "%{table}";

/// Resolves the configured channel template into a concrete key name.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    template: String,
    interpolate: bool,
}

impl ChannelResolver {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let interpolate = template.contains("%{");
        Self {
            template,
            interpolate,
        }
    }

    /// The configured template, unmodified.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether resolution depends on the event.
    pub fn is_constant(&self) -> bool {
        !self.interpolate
    }

    /// Resolve the destination for one event.
    ///
    /// Database and table names containing placeholder text are substituted
    /// as-is; there is no escaping.
    pub fn resolve(&self, identity: &RowIdentity) -> Cow<'_, str> {
        if !self.interpolate {
            return Cow::Borrowed(&self.template);
        }

        Cow::Owned(
            self.template
                .replace(DATABASE_PLACEHOLDER, &identity.database)
                .replace(TABLE_PLACEHOLDER, &identity.table),
        )
    }
}
