//! JSON bodies exchanged with the vetting server.
//!
//! Every map is a `BTreeMap` so re-serializing a decoded body yields
//! canonical text for checksumming. Fields the engine does not interpret are
//! kept in `extra` and still take part in the checksum.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::row::RowHash;
use crate::row::RowId;
use crate::row::ValueHash;

/// Treat an explicit JSON `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Votes
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST voting/{locale}/row/{row}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// The value voted for. `None` abstains.
    pub value: Option<String>,
    /// Non-default vote level chosen by the voter, or 0.
    pub vote_level_changed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(default)]
    pub did_vote: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub test_results: Vec<TestResult>,
    #[serde(default)]
    pub test_warnings: bool,
    #[serde(default)]
    pub test_errors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_not_submit: Option<String>,
}

impl VoteResponse {
    /// The server flagged the checked value with warnings or errors.
    pub fn has_flagged_tests(&self) -> bool {
        self.test_warnings || self.test_errors
    }

    pub fn status_action(&self) -> Option<StatusAction> {
        self.status_action.as_deref().map(StatusAction::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestKind {
    Warning,
    Error,
    Other(String),
}

impl From<String> for TestKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "Warning" => TestKind::Warning,
            "Error" => TestKind::Error,
            _ => TestKind::Other(kind),
        }
    }
}

impl From<TestKind> for String {
    fn from(kind: TestKind) -> Self {
        match kind {
            TestKind::Warning => "Warning".to_string(),
            TestKind::Error => "Error".to_string(),
            TestKind::Other(other) => other,
        }
    }
}

/// One check result the server attached to a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(rename = "type")]
    pub kind: TestKind,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type_url: Option<String>,
    /// Applies to the whole locale rather than this value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub entire_locale: bool,
}

impl TestResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: TestKind::Error,
            message: message.into(),
            sub_type_url: None,
            entire_locale: false,
        }
    }
}

/// Overall severity of a set of check results: any error wins, otherwise
/// any warning.
pub fn overall_test_kind(tests: &[TestResult]) -> Option<TestKind> {
    let mut kind = None;
    for test in tests {
        match test.kind {
            TestKind::Error => return Some(TestKind::Error),
            TestKind::Warning => kind = Some(TestKind::Warning),
            TestKind::Other(_) => {}
        }
    }
    kind
}

// ─────────────────────────────────────────────────────────────────────────────
// Status actions
// ─────────────────────────────────────────────────────────────────────────────

/// What the server allows a voter to do with a row or value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusAction {
    Allow,
    AllowVotingAndTicket,
    AllowVotingButNoAdd,
    AllowTicketOnly,
    ForbidErrors,
    ForbidReadonly,
    ForbidUnlessDataSubmission,
    ForbidNull,
    ForbidRoot,
    ForbidCode,
    ForbidPermanentWithoutForum,
    Unknown(String),
}

/// Capabilities granted by a [`StatusAction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCapabilities {
    pub vote: bool,
    pub ticket: bool,
    pub change: bool,
}

impl Serialize for StatusAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl StatusAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "ALLOW" => StatusAction::Allow,
            "ALLOW_VOTING_AND_TICKET" => StatusAction::AllowVotingAndTicket,
            "ALLOW_VOTING_BUT_NO_ADD" => StatusAction::AllowVotingButNoAdd,
            "ALLOW_TICKET_ONLY" => StatusAction::AllowTicketOnly,
            "FORBID_ERRORS" => StatusAction::ForbidErrors,
            "FORBID_READONLY" => StatusAction::ForbidReadonly,
            "FORBID_UNLESS_DATA_SUBMISSION" => StatusAction::ForbidUnlessDataSubmission,
            "FORBID_NULL" => StatusAction::ForbidNull,
            "FORBID_ROOT" => StatusAction::ForbidRoot,
            "FORBID_CODE" => StatusAction::ForbidCode,
            "FORBID_PERMANENT_WITHOUT_FORUM" => StatusAction::ForbidPermanentWithoutForum,
            other => StatusAction::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusAction::Allow => "ALLOW",
            StatusAction::AllowVotingAndTicket => "ALLOW_VOTING_AND_TICKET",
            StatusAction::AllowVotingButNoAdd => "ALLOW_VOTING_BUT_NO_ADD",
            StatusAction::AllowTicketOnly => "ALLOW_TICKET_ONLY",
            StatusAction::ForbidErrors => "FORBID_ERRORS",
            StatusAction::ForbidReadonly => "FORBID_READONLY",
            StatusAction::ForbidUnlessDataSubmission => "FORBID_UNLESS_DATA_SUBMISSION",
            StatusAction::ForbidNull => "FORBID_NULL",
            StatusAction::ForbidRoot => "FORBID_ROOT",
            StatusAction::ForbidCode => "FORBID_CODE",
            StatusAction::ForbidPermanentWithoutForum => "FORBID_PERMANENT_WITHOUT_FORUM",
            StatusAction::Unknown(other) => other,
        }
    }

    /// Anything not listed grants nothing.
    pub fn capabilities(&self) -> ActionCapabilities {
        match self {
            StatusAction::Allow => ActionCapabilities {
                vote: true,
                ticket: false,
                change: true,
            },
            StatusAction::AllowVotingAndTicket => ActionCapabilities {
                vote: true,
                ticket: true,
                change: false,
            },
            StatusAction::AllowVotingButNoAdd => ActionCapabilities {
                vote: true,
                ticket: false,
                change: false,
            },
            StatusAction::AllowTicketOnly => ActionCapabilities {
                vote: false,
                ticket: true,
                change: true,
            },
            _ => ActionCapabilities::default(),
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            StatusAction::ForbidErrors
                | StatusAction::ForbidReadonly
                | StatusAction::ForbidUnlessDataSubmission
                | StatusAction::ForbidNull
                | StatusAction::ForbidRoot
                | StatusAction::ForbidCode
                | StatusAction::ForbidPermanentWithoutForum
        )
    }

    /// Human-readable reason shown when the action blocks a vote.
    pub fn describe(&self) -> &'static str {
        match self {
            StatusAction::Allow
            | StatusAction::AllowVotingAndTicket
            | StatusAction::AllowVotingButNoAdd => "Voting is allowed",
            StatusAction::AllowTicketOnly => "Only a ticket may be filed for this item",
            StatusAction::ForbidErrors => "The value has errors",
            StatusAction::ForbidReadonly => "The locale is read-only",
            StatusAction::ForbidUnlessDataSubmission => {
                "New values are only accepted during data submission"
            }
            StatusAction::ForbidNull => "An empty value cannot be submitted",
            StatusAction::ForbidRoot => "Values inherited from root cannot be voted for",
            StatusAction::ForbidCode => "The value may not be the same as the code",
            StatusAction::ForbidPermanentWithoutForum => {
                "This item has a permanent vote; changing it requires a forum post first"
            }
            StatusAction::Unknown(_) => "Voting is not allowed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Server-provided data for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSnapshot {
    pub xpstrid: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_vhash: Option<ValueHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_value: Option<String>,
    /// The current voter's choice, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_vhash: Option<ValueHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_action: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: BTreeMap<ValueHash, CandidateItem>,
    #[serde(default)]
    pub has_voted: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RowSnapshot {
    pub fn new(xpstrid: impl Into<RowId>) -> Self {
        Self {
            xpstrid: xpstrid.into(),
            xpath_id: None,
            code: None,
            winning_vhash: None,
            winning_value: None,
            vote_vhash: None,
            status_action: None,
            items: BTreeMap::new(),
            has_voted: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_item(mut self, hash: impl Into<ValueHash>, item: CandidateItem) -> Self {
        self.items.insert(hash.into(), item);
        self
    }

    pub fn with_winning(mut self, hash: impl Into<ValueHash>) -> Self {
        let hash = hash.into();
        self.winning_value = self.items.get(&hash).map(|item| item.value.clone());
        self.winning_vhash = Some(hash);
        self
    }

    pub fn status_action(&self) -> Option<StatusAction> {
        self.status_action.as_deref().map(StatusAction::parse)
    }
}

/// One candidate value within a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateItem {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub votes: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tests: Vec<TestResult>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CandidateItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// The value as the voter typed it, if it differs from the display form.
    pub fn input_value(&self) -> &str {
        self.raw_value.as_deref().unwrap_or(&self.value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pages and status
// ─────────────────────────────────────────────────────────────────────────────

/// Response to both page loads and single-row refreshes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub section: Section,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows: BTreeMap<RowHash, RowSnapshot>,
}

impl PageResponse {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (RowHash, RowSnapshot)>,
    {
        Self {
            section: Section {
                rows: rows.into_iter().collect(),
            },
            extra: BTreeMap::new(),
        }
    }
}

/// Response to the periodic `status` poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub disconnected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_code: Option<String>,
    #[serde(rename = "SurveyOK", default, skip_serializing_if = "Option::is_none")]
    pub survey_ok: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServerStatus>,
    #[serde(rename = "localeStamp", default, skip_serializing_if = "Option::is_none")]
    pub locale_stamp: Option<i64>,
    #[serde(
        rename = "localeStampName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub locale_stamp_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_running_stamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_busted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_setup: Option<bool>,
}
