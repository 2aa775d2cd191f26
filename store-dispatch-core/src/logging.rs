//! Action logging middleware with pattern-based filtering
//!
//! Logs every processed action through `tracing`, optionally keeping the
//! most recent ones in an in-memory ring buffer.
//!
//! # Example
//!
//! ```ignore
//! use store_dispatch_core::logging::{ActionLogConfig, ActionLoggerConfig, LoggingMiddleware};
//!
//! // Log everything except Tick and Render (tracing only)
//! store.add_middleware(LoggingMiddleware::new(ActionLoggerConfig::default()));
//!
//! // Keep the last 100 actions around for inspection
//! let logger = Arc::new(LoggingMiddleware::with_log(ActionLogConfig::default()));
//! store.add_middleware_arc(logger.clone());
//! for entry in logger.recent(10) {
//!     println!("{}: {}", entry.elapsed_display(), entry.summary);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::action::Action;
use crate::middleware::Middleware;

/// Configuration for action logging with glob pattern filtering.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// # Examples
///
/// - `Search*` matches SearchAddChar, SearchDeleteChar, etc.
/// - `Store*` matches the store's own lifecycle markers
/// - `*Error*` matches any action containing "Error"
/// - `Tick` matches only Tick
#[derive(Debug, Clone)]
pub struct ActionLoggerConfig {
    /// If non-empty, only log actions matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude actions matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl Default for ActionLoggerConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: vec!["Tick".to_string(), "Render".to_string()],
        }
    }
}

impl ActionLoggerConfig {
    /// Create a new config from comma-separated pattern strings
    ///
    /// # Arguments
    /// - `include`: comma-separated glob patterns (or None for all)
    /// - `exclude`: comma-separated glob patterns (or None for default excludes)
    ///
    /// # Example
    /// ```
    /// use store_dispatch_core::logging::ActionLoggerConfig;
    ///
    /// let config = ActionLoggerConfig::new(Some("Search*,Connect"), Some("Tick,Render"));
    /// assert!(config.should_log("SearchAddChar"));
    /// assert!(config.should_log("Connect"));
    /// assert!(!config.should_log("Tick"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        let include_patterns = include.map(split).unwrap_or_default();
        let exclude_patterns = exclude
            .map(split)
            .unwrap_or_else(|| Self::default().exclude_patterns);

        Self {
            include_patterns,
            exclude_patterns,
        }
    }

    /// Create a config with specific pattern vectors
    pub fn with_patterns(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include_patterns: include,
            exclude_patterns: exclude,
        }
    }

    /// Check if an action name should be logged based on include/exclude patterns
    pub fn should_log(&self, action_name: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, action_name))
        {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|p| glob_match(p, action_name))
    }
}

/// An entry in the action log
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    /// Action name (from Action::name())
    pub name: &'static str,
    /// Debug representation of the action
    pub summary: String,
    /// Timestamp when the action was logged
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Set once features and subscribers have seen the action
    pub completed: bool,
}

impl ActionLogEntry {
    /// Create a new log entry
    pub fn new(name: &'static str, summary: String, sequence: u64) -> Self {
        Self {
            name,
            summary,
            timestamp: Instant::now(),
            sequence,
            completed: false,
        }
    }

    /// Time since this action was logged
    pub fn elapsed(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }

    /// Format the elapsed time for display (e.g., "2.3s", "150ms")
    pub fn elapsed_display(&self) -> String {
        let elapsed = self.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.1}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

/// Configuration for the action log ring buffer
#[derive(Debug, Clone)]
pub struct ActionLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    /// Filter applied before storing
    pub filter: ActionLoggerConfig,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: ActionLoggerConfig::default(),
        }
    }
}

impl ActionLogConfig {
    /// Create with custom capacity and filter
    pub fn new(capacity: usize, filter: ActionLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer of recent actions
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    config: ActionLogConfig,
    next_sequence: u64,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(ActionLogConfig::default())
    }
}

impl ActionLog {
    /// Create a new action log with configuration
    pub fn new(config: ActionLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Log an action if it passes the filter.
    ///
    /// Returns the sequence number it was stored under.
    pub fn log(&mut self, action: &dyn Action) -> Option<u64> {
        let name = action.name();
        if !self.config.filter.should_log(name) || self.config.capacity == 0 {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }
        self.entries
            .push_back(ActionLogEntry::new(name, format!("{action:?}"), sequence));
        Some(sequence)
    }

    /// Mark an entry as fully dispatched.
    pub fn complete(&mut self, sequence: u64) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.sequence == sequence) {
            entry.completed = true;
        }
    }

    /// Get all entries (oldest first)
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// Get the most recent N entries (newest first)
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Default)]
struct LoggerState {
    log: Option<ActionLog>,
    /// Action address and sequence logged in `before_dispatch`, awaiting
    /// `after_dispatch`. Hooks never nest, so one slot is enough; a panic
    /// between the two leaves a stale slot that the next action overwrites.
    in_flight: Option<(usize, u64)>,
}

/// Middleware that logs processed actions.
///
/// Supports two modes:
/// - **Tracing only** (default): logs via `tracing::debug!()`
/// - **With storage**: also stores entries in an [`ActionLog`]
#[derive(Debug)]
pub struct LoggingMiddleware {
    config: ActionLoggerConfig,
    state: Mutex<LoggerState>,
    active: bool,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(ActionLoggerConfig::default())
    }
}

impl LoggingMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(config: ActionLoggerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LoggerState::default()),
            active: true,
        }
    }

    /// Tracing plus in-memory storage
    pub fn with_log(config: ActionLogConfig) -> Self {
        Self {
            config: config.filter.clone(),
            state: Mutex::new(LoggerState {
                log: Some(ActionLog::new(config)),
                in_flight: None,
            }),
            active: true,
        }
    }

    /// No filtering at all
    pub fn log_all() -> Self {
        Self::new(ActionLoggerConfig::with_patterns(vec![], vec![]))
    }

    /// Set whether the middleware is active.
    ///
    /// When inactive, every hook returns immediately. Useful for wiring the
    /// middleware unconditionally and toggling it from a CLI flag.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether the middleware is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Filter configuration
    pub fn config(&self) -> &ActionLoggerConfig {
        &self.config
    }

    /// Snapshot of the most recent N stored entries (newest first)
    pub fn recent(&self, count: usize) -> Vec<ActionLogEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .log
            .as_ref()
            .map(|log| log.recent(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored entries (0 when storage is disabled)
    pub fn stored(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.as_ref().map_or(0, ActionLog::len)
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "LoggingMiddleware"
    }

    fn after_all_initialized(&self) {
        if self.active {
            tracing::debug!(
                include = ?self.config.include_patterns,
                exclude = ?self.config.exclude_patterns,
                "action logging enabled"
            );
        }
    }

    fn before_dispatch(&self, action: &dyn Action) {
        if !self.active {
            return;
        }

        let name = action.name();
        if self.config.should_log(name) {
            tracing::debug!(action = %name, "action");
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = state.log.as_mut().and_then(|log| log.log(action));
        state.in_flight = sequence.map(|sequence| (action_addr(action), sequence));
    }

    fn after_dispatch(&self, action: &dyn Action) {
        if !self.active {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.in_flight.take() {
            Some((addr, sequence)) if addr == action_addr(action) => {
                if let Some(log) = state.log.as_mut() {
                    log.complete(sequence);
                }
            }
            _ => {}
        }
    }
}

fn action_addr(action: &dyn Action) -> usize {
    action as *const dyn Action as *const () as usize
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }

    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("Tick", "Tick"));
        assert!(!glob_match("Tick", "TickTock"));
        assert!(glob_match("Store*", "StorePersistingAction"));
        assert!(!glob_match("Store*", "RestoreSession"));
        assert!(glob_match("*Error*", "DidFetchError"));
        assert!(glob_match("Tick?", "Ticks"));
        assert!(!glob_match("Tick?", "Tick"));
    }

    #[test]
    fn test_config_include_and_exclude() {
        let config = ActionLoggerConfig::new(Some("Did*"), Some("DidFail*"));
        assert!(config.should_log("DidConnect"));
        assert!(!config.should_log("DidFailConnect"));
        assert!(!config.should_log("SearchAddChar"));
    }

    #[test]
    fn test_config_default_excludes_noise() {
        let config = ActionLoggerConfig::new(None, None);
        assert!(!config.should_log("Tick"));
        assert!(!config.should_log("Render"));
        assert!(config.should_log("Increment"));
    }

    #[derive(Debug)]
    enum TestAction {
        Tick,
        Connect,
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Tick => "Tick",
                TestAction::Connect => "Connect",
            }
        }
    }

    #[test]
    fn test_action_log_capacity() {
        let config = ActionLogConfig::new(3, ActionLoggerConfig::with_patterns(vec![], vec![]));
        let mut log = ActionLog::new(config);
        for _ in 0..4 {
            log.log(&TestAction::Connect);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries().next().unwrap().sequence, 1);

        let recent: Vec<u64> = log.recent(2).map(|e| e.sequence).collect();
        assert_eq!(recent, vec![3, 2]);
    }

    #[test]
    fn test_action_log_filters() {
        let mut log = ActionLog::default();
        assert!(log.log(&TestAction::Tick).is_none());
        assert_eq!(log.log(&TestAction::Connect), Some(0));
        assert_eq!(log.entries().next().unwrap().summary, "Connect");
    }

    #[test]
    fn test_middleware_marks_entries_completed() {
        let middleware = LoggingMiddleware::with_log(ActionLogConfig::default());

        middleware.before_dispatch(&TestAction::Connect);
        assert!(!middleware.recent(1)[0].completed);
        middleware.after_dispatch(&TestAction::Connect);
        assert!(middleware.recent(1)[0].completed);

        // Filtered action leaves the stored entry untouched.
        middleware.before_dispatch(&TestAction::Tick);
        middleware.after_dispatch(&TestAction::Tick);
        assert_eq!(middleware.stored(), 1);
    }

    #[test]
    fn test_unpaired_before_does_not_shift_completion() {
        let middleware = LoggingMiddleware::with_log(ActionLogConfig::default());
        let lost = TestAction::Connect;
        let next = TestAction::Connect;

        // `lost` never reaches after_dispatch, as if a reducer panicked.
        middleware.before_dispatch(&lost);
        middleware.before_dispatch(&next);
        middleware.after_dispatch(&next);

        let recent = middleware.recent(2);
        assert!(recent[0].completed);
        assert!(!recent[1].completed);

        // A stray after_dispatch for another action completes nothing.
        middleware.before_dispatch(&next);
        middleware.after_dispatch(&lost);
        assert!(!middleware.recent(1)[0].completed);
    }

    #[test]
    fn test_inactive_middleware_stores_nothing() {
        let middleware = LoggingMiddleware::with_log(ActionLogConfig::default()).active(false);
        middleware.before_dispatch(&TestAction::Connect);
        middleware.after_dispatch(&TestAction::Connect);
        assert_eq!(middleware.stored(), 0);
        assert!(!middleware.is_active());
    }
}
