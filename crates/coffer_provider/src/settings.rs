//! Settings common to every provider variant.
//!
//! Each provider variant defines its own settings struct for its
//! variant-specific fields (connection string, cache size, compression
//! threshold, ...) and embeds [`ProviderSettings`] for the fields every
//! variant shares, following the same builder convention as the rest of
//! Coffer's configuration types.

/// Fields common to every provider's settings, regardless of variant.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// The instance name this provider is registered under (the `<name>`
    /// in `Providers:<name>:...` config keys).
    pub name: String,
    /// Whether the provider is enabled. A disabled provider is not opened
    /// and cannot be enlisted in a transaction.
    pub enabled: bool,
}

impl ProviderSettings {
    /// Creates settings for a provider named `name`, enabled by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the provider is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
