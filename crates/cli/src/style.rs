//! Terminal styling for lookup results and validation reports.

use comfy_table::{Cell, Color};
use console::Style;

/// Outcome marker printed in front of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Ok,
    Fail,
    Warn,
}

impl Mark {
    fn symbol(self) -> &'static str {
        match self {
            Self::Ok => "✓",
            Self::Fail => "✗",
            Self::Warn => "⚠",
        }
    }

    fn style(self) -> Style {
        match self {
            Self::Ok => Style::new().green(),
            Self::Fail => Style::new().red(),
            Self::Warn => Style::new().yellow(),
        }
    }
}

/// `msg` prefixed with a coloured outcome marker.
pub fn marked(mark: Mark, msg: &str) -> String {
    format!("{} {}", mark.style().apply_to(mark.symbol()), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Something a lookup did not produce. A null list and an empty list are
/// different answers and are shown differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absent {
    /// Attribute present with a null value list.
    Null,
    /// Attribute present with no values.
    Empty,
    /// Sources could not say (e.g. attribute names).
    Unknown,
    /// Sources answered with nothing.
    None,
    /// Person without a name.
    Unnamed,
}

impl Absent {
    pub fn label(self) -> &'static str {
        match self {
            Self::Null => "(null)",
            Self::Empty => "(empty)",
            Self::Unknown => "(unknown)",
            Self::None => "(none)",
            Self::Unnamed => "(unnamed)",
        }
    }
}

/// Dimmed placeholder for plain-text output.
pub fn absent(kind: Absent) -> String {
    Style::new().dim().apply_to(kind.label()).to_string()
}

/// Greyed placeholder cell for tables.
pub fn absent_cell(kind: Absent) -> Cell {
    Cell::new(kind.label()).fg(Color::DarkGrey)
}

/// One configured source as listed by `validate`: id, kind and tags.
pub fn source_line(id: &str, kind: &str, tags: &[String]) -> String {
    let mut line = format!("{} ({})", Style::new().cyan().apply_to(id), kind);
    if !tags.is_empty() {
        let tags = format!("[{}]", tags.join(", "));
        line.push(' ');
        line.push_str(&Style::new().dim().apply_to(tags).to_string());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_labels_differ() {
        assert_ne!(Absent::Null.label(), Absent::Empty.label());
        assert!(absent(Absent::Unknown).contains("(unknown)"));
    }

    #[test]
    fn test_marked_and_source_line() {
        assert!(marked(Mark::Ok, "done").ends_with("done"));
        assert!(marked(Mark::Fail, "broken").contains('✗'));

        let line = source_line("ldap", "directory", &["staff".to_string()]);
        assert!(line.contains("ldap"));
        assert!(line.contains("[staff]"));
        assert!(!source_line("echo", "echo", &[]).contains('['));
    }
}
