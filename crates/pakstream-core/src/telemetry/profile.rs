use std::time::Instant;

#[cfg(feature = "profiling")]
use crate::telemetry::tags;
#[cfg(feature = "profiling")]
use std::collections::BTreeSet;
#[cfg(feature = "profiling")]
use std::sync::{OnceLock, RwLock};

/// Converts elapsed time since `started_at` to microseconds, clamped to `u64::MAX`.
#[inline]
pub fn elapsed_us(started_at: Instant) -> u64 {
    crate::types::duration_to_us(started_at.elapsed())
}

#[cfg(feature = "profiling")]
const PROFILE_TAGS_ENV: &str = "PAKSTREAM_PROFILE_TAGS";

#[cfg(feature = "profiling")]
fn parse_tags<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Option<BTreeSet<String>> {
    let mut enabled = BTreeSet::new();
    for token in tokens.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        let normalized = token.to_ascii_lowercase();
        if normalized == "*" || normalized == "all" {
            return None;
        }
        enabled.insert(normalized);
    }
    if enabled.is_empty() { None } else { Some(enabled) }
}

// None => every tag enabled.
#[cfg(feature = "profiling")]
fn filter_state() -> &'static RwLock<Option<BTreeSet<String>>> {
    static STATE: OnceLock<RwLock<Option<BTreeSet<String>>>> = OnceLock::new();
    STATE.get_or_init(|| {
        let filter = std::env::var(PROFILE_TAGS_ENV)
            .ok()
            .and_then(|raw| parse_tags(raw.split(',')));
        RwLock::new(filter)
    })
}

#[cfg(feature = "profiling")]
fn store_filter(filter: Option<BTreeSet<String>>) {
    let mut guard = match filter_state().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = filter;
}

/// Enables all profiling tags.
pub fn enable_all_tags() {
    #[cfg(feature = "profiling")]
    store_filter(None);
}

/// Restricts profiling output to the given tags. An empty slice enables all tags.
pub fn set_enabled_tags(enabled: &[&str]) {
    #[cfg(feature = "profiling")]
    store_filter(parse_tags(enabled.iter().copied()));

    #[cfg(not(feature = "profiling"))]
    let _ = enabled;
}

/// Returns true when at least one tag in the stack is enabled.
pub fn is_tag_stack_enabled(tag_stack: &[&str]) -> bool {
    #[cfg(feature = "profiling")]
    {
        let guard = match filter_state().read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            None => true,
            Some(enabled) => tag_stack
                .iter()
                .any(|tag| enabled.contains(&tag.to_ascii_lowercase())),
        }
    }

    #[cfg(not(feature = "profiling"))]
    {
        let _ = tag_stack;
        false
    }
}

/// Emits a profiling event as a `tracing` debug record under `target`.
#[cfg(feature = "profiling")]
#[inline]
pub fn event(
    target: &'static str,
    tag_stack: &[&str],
    op: &'static str,
    result: &'static str,
    elapsed_us: u64,
    message: &'static str,
) {
    if !is_tag_stack_enabled(tag_stack) {
        return;
    }

    // tracing needs the target as a constant, hence the dispatch.
    match target {
        tags::PROFILE_DECOMPRESSOR => {
            tracing::debug!(target: tags::PROFILE_DECOMPRESSOR, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        tags::PROFILE_BUFFER => {
            tracing::debug!(target: tags::PROFILE_BUFFER, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        tags::PROFILE_WORKER => {
            tracing::debug!(target: tags::PROFILE_WORKER, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        tags::PROFILE_LOOKUP => {
            tracing::debug!(target: tags::PROFILE_LOOKUP, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        tags::PROFILE_STORAGE => {
            tracing::debug!(target: tags::PROFILE_STORAGE, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        tags::PROFILE_SCHEDULER => {
            tracing::debug!(target: tags::PROFILE_SCHEDULER, op, result, elapsed_us, tags = ?tag_stack, "{message}");
        }
        _ => {
            tracing::debug!(target: "pakstream.profile", op, result, elapsed_us, original_target = target, tags = ?tag_stack, "{message}");
        }
    }
}

#[cfg(not(feature = "profiling"))]
#[inline]
pub fn event(
    _target: &'static str,
    _tag_stack: &[&str],
    _op: &'static str,
    _result: &'static str,
    _elapsed_us: u64,
    _message: &'static str,
) {
}
