//! Messages surfaced to the voter about a value they proposed.

use serde::Serialize;

use crate::protocol::StatusAction;
use crate::protocol::TestKind;
use crate::protocol::TestResult;
use crate::protocol::overall_test_kind;
use crate::row::RowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Accepted, but the server's checks produced warnings.
    Warning,
    /// The server's checks produced errors.
    Error,
    /// The server's status action forbade the vote.
    Policy,
    /// The server declined to store the value without a reason.
    NotSubmitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub row_id: RowId,
    /// The proposed value, or `None` for an abstention or removal.
    pub value: Option<String>,
    pub kind: DiagnosticKind,
    pub headline: String,
    pub tests: Vec<TestResult>,
    pub status_action: Option<StatusAction>,
}

impl Diagnostic {
    /// Diagnostic for a vote the server answered with `didVote == false`.
    ///
    /// Returns `None` when the server neither objected through its status
    /// action nor flagged the value.
    pub fn for_rejection(
        row_id: RowId,
        value: Option<String>,
        status_action: Option<StatusAction>,
        tests: Vec<TestResult>,
        flagged: bool,
        did_not_submit: bool,
    ) -> Option<Self> {
        let objected = status_action
            .as_ref()
            .is_some_and(|action| *action != StatusAction::Allow);
        if !objected && !flagged {
            return None;
        }

        let action = status_action.clone().unwrap_or(StatusAction::Allow);
        if !action.capabilities().vote {
            let tests = if action == StatusAction::ForbidPermanentWithoutForum {
                vec![TestResult::error(action.describe())]
            } else {
                tests
            };
            return Some(Self {
                headline: format!("{}: {}", value_label(value.as_deref()), action.describe()),
                row_id,
                value,
                kind: DiagnosticKind::Policy,
                tests,
                status_action,
            });
        }

        if did_not_submit {
            return Some(Self {
                row_id,
                value,
                kind: DiagnosticKind::NotSubmitted,
                headline: "Unknown error - did not submit this value".to_string(),
                tests,
                status_action,
            });
        }

        let kind = match overall_test_kind(&tests) {
            Some(TestKind::Error) => DiagnosticKind::Error,
            Some(_) => DiagnosticKind::Warning,
            None if flagged => DiagnosticKind::Warning,
            None => return None,
        };
        Some(Self {
            headline: value_label(value.as_deref()),
            row_id,
            value,
            kind,
            tests,
            status_action,
        })
    }

    /// Diagnostic for an accepted vote whose value the server flagged.
    pub fn for_accepted(
        row_id: RowId,
        value: Option<String>,
        tests: Vec<TestResult>,
        flagged: bool,
    ) -> Option<Self> {
        if !flagged || tests.is_empty() {
            return None;
        }
        let kind = match overall_test_kind(&tests)? {
            TestKind::Error => DiagnosticKind::Error,
            _ => DiagnosticKind::Warning,
        };
        Some(Self {
            headline: format!("Response to voting: {}", value_label(value.as_deref())),
            row_id,
            value,
            kind,
            tests,
            status_action: None,
        })
    }

    /// Severity mark this diagnostic leaves on the proposed value.
    pub fn test_kind(&self) -> Option<TestKind> {
        match self.kind {
            DiagnosticKind::Warning => Some(TestKind::Warning),
            DiagnosticKind::Error | DiagnosticKind::Policy | DiagnosticKind::NotSubmitted => {
                Some(TestKind::Error)
            }
        }
    }
}

fn value_label(value: Option<&str>) -> String {
    match value {
        None | Some("") => "Abstention".to_string(),
        Some(v) => format!("Value \"{v}\""),
    }
}

/// Strip markup-significant characters from server-provided text.
pub fn sanitize(message: &str) -> String {
    message.chars().filter(|c| !matches!(c, '<' | '>' | '&')).collect()
}
