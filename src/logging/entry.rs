//! Log entries and template rendering

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Date format used when a processor does not configure one
pub const DEFAULT_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const TOKEN_DATE_TIME: &str = "#DateTime";
const TOKEN_THREAD_ID: &str = "#ThreadId";
const TOKEN_TYPE: &str = "#Type";
const TOKEN_DESCRIPTION: &str = "#Description";
const TOKEN_CUSTOM_LOG_ITEM: &str = "#CustomLogItem";

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Information,
    SuccessAudit,
    FailureAudit,
}

impl Severity {
    /// All severities, in counter order
    pub const ALL: [Severity; 5] = [
        Severity::Error,
        Severity::Warning,
        Severity::Information,
        Severity::SuccessAudit,
        Severity::FailureAudit,
    ];

    /// Name rendered for the `#Type` token
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Information => "Information",
            Severity::SuccessAudit => "SuccessAudit",
            Severity::FailureAudit => "FailureAudit",
        }
    }

    /// Check if this severity should draw attention (warnings, errors, failed audits)
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Severity::Error | Severity::Warning | Severity::FailureAudit
        )
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-defined payload attached to a log entry
///
/// The payload's `Display` output is what the `#CustomLogItem` token renders.
pub trait CustomLogItem: fmt::Display + fmt::Debug + Send + Sync {
    /// Deep copy of the payload
    fn clone_item(&self) -> Box<dyn CustomLogItem>;
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small numeric identifier of the calling thread
///
/// Assigned on first use and stable for the thread's lifetime.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// One immutable log event
///
/// The timestamp and thread are captured when the entry is created, not when it
/// is dispatched.
#[derive(Debug)]
pub struct LogEntry {
    severity: Severity,
    description: String,
    timestamp: DateTime<Local>,
    thread_id: u64,
    custom: Option<Box<dyn CustomLogItem>>,
}

impl LogEntry {
    /// Create an entry stamped with the current time and thread
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self::with_custom(severity, description, None)
    }

    /// Create an entry carrying a custom payload
    pub fn with_custom(
        severity: Severity,
        description: impl Into<String>,
        custom: Option<Box<dyn CustomLogItem>>,
    ) -> Self {
        Self::from_parts(
            severity,
            description,
            custom,
            Local::now(),
            current_thread_id(),
        )
    }

    /// Create an entry with an explicit timestamp and thread
    pub fn from_parts(
        severity: Severity,
        description: impl Into<String>,
        custom: Option<Box<dyn CustomLogItem>>,
        timestamp: DateTime<Local>,
        thread_id: u64,
    ) -> Self {
        Self {
            severity,
            description: description.into(),
            timestamp,
            thread_id,
            custom,
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn custom(&self) -> Option<&dyn CustomLogItem> {
        self.custom.as_deref()
    }

    /// Render the entry into `template`
    ///
    /// Tokens are replaced in a fixed order: `#DateTime`, `#ThreadId`, `#Type`,
    /// `#Description`, `#CustomLogItem`. With `xml_escape` the description is
    /// escaped for embedding in XML. An unusable `date_format` falls back to
    /// [`DEFAULT_DATE_TIME_FORMAT`].
    pub fn render_text(&self, template: &str, date_format: &str, xml_escape: bool) -> String {
        let date_time = self.format_timestamp(date_format);
        let custom = self
            .custom
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_default();

        let mut text = template.replace(TOKEN_DATE_TIME, &date_time);
        text = text.replace(TOKEN_THREAD_ID, &self.thread_id.to_string());
        text = text.replace(TOKEN_TYPE, self.severity.as_str());
        text = if xml_escape {
            text.replace(TOKEN_DESCRIPTION, &escape_xml(&self.description))
        } else {
            text.replace(TOKEN_DESCRIPTION, &self.description)
        };
        text.replace(TOKEN_CUSTOM_LOG_ITEM, &custom)
    }

    fn format_timestamp(&self, date_format: &str) -> String {
        let mut out = String::new();
        if write!(out, "{}", self.timestamp.format(date_format)).is_ok() {
            return out;
        }
        self.timestamp.format(DEFAULT_DATE_TIME_FORMAT).to_string()
    }
}

impl Clone for LogEntry {
    fn clone(&self) -> Self {
        Self {
            severity: self.severity,
            description: self.description.clone(),
            timestamp: self.timestamp,
            thread_id: self.thread_id,
            custom: self.custom.as_ref().map(|c| c.clone_item()),
        }
    }
}

/// Check that a strftime pattern formats without errors
pub fn is_valid_date_format(format: &str) -> bool {
    use chrono::format::{Item, StrftimeItems};
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Escape the five XML special characters
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
