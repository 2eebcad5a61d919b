use std::sync::Arc;

/// Content filter applied to raw message text before it is persisted.
/// Owned externally to the chat service; injected at construction so
/// deployments can swap in their own policy.
pub type MessageFilter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default filter: trims surrounding whitespace and strips control
/// characters (except newline and tab).
pub fn default_filter() -> MessageFilter {
    Arc::new(|raw| {
        raw.trim()
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect()
    })
}
