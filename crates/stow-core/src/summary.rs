//! Document metadata stored in the well-known summary-information set.
//!
//! Every field is optional in the file. Getters return the field's default
//! (empty, zero, the UNIX epoch) when it is absent or unreadable.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stow_store::PropSpec;
use stow_types::fmtid::pid;
use stow_types::PropertyValue;
use tracing::debug;

use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::PropertySetHandle;

/// Accessor for the summary-information set of a store.
#[derive(Clone)]
pub struct SummaryInformation {
    handle: Option<Arc<PropertySetHandle>>,
    read_only: bool,
}

macro_rules! string_fields {
    ($($(#[$doc:meta])* $get:ident, $set:ident => $pid:expr;)*) => {
        $(
            $(#[$doc])*
            pub fn $get(&self) -> String {
                self.read($pid)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            }

            pub fn $set(&self, value: &str) -> StorageResult<()> {
                self.write($pid, PropertyValue::from(value))
            }
        )*
    };
}

macro_rules! int_fields {
    ($($get:ident, $set:ident => $pid:expr;)*) => {
        $(
            pub fn $get(&self) -> i32 {
                self.read($pid)
                    .and_then(|v| v.as_i64())
                    .and_then(|v| i32::try_from(v).ok())
                    .unwrap_or_default()
            }

            pub fn $set(&self, value: i32) -> StorageResult<()> {
                self.write($pid, PropertyValue::I32(value))
            }
        )*
    };
}

macro_rules! date_fields {
    ($($get:ident, $set:ident => $pid:expr;)*) => {
        $(
            pub fn $get(&self) -> DateTime<Utc> {
                self.read($pid)
                    .and_then(|v| v.as_date_time())
                    .unwrap_or_default()
            }

            pub fn $set(&self, value: DateTime<Utc>) -> StorageResult<()> {
                self.write($pid, PropertyValue::DateTime(value))
            }
        )*
    };
}

impl SummaryInformation {
    pub(crate) fn new(handle: Option<Arc<PropertySetHandle>>, read_only: bool) -> Self {
        Self { handle, read_only }
    }

    /// Returns `true` if the file carries a summary-information set.
    pub fn is_present(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read(&self, id: u32) -> Option<PropertyValue> {
        let handle = self.handle.as_ref()?;
        handle
            .with_props(|props| {
                props
                    .read(PropSpec::Id(id))
                    .map_err(StorageError::backend("read summary information", id))
            })
            .ok()
            .flatten()
    }

    fn write(&self, id: u32, value: PropertyValue) -> StorageResult<()> {
        let handle = match &self.handle {
            Some(handle) if !self.read_only => handle,
            _ => return Err(StorageError::ReadOnly(EntityKind::PropertySet)),
        };
        handle.with_props(|props| {
            props
                .write_id(id, value)
                .map_err(StorageError::backend("write summary information", id))?;
            props
                .commit()
                .map_err(StorageError::backend("commit summary information", id))
        })?;
        debug!(id, "summary field written");
        Ok(())
    }

    string_fields! {
        title, set_title => pid::TITLE;
        subject, set_subject => pid::SUBJECT;
        author, set_author => pid::AUTHOR;
        keywords, set_keywords => pid::KEYWORDS;
        comments, set_comments => pid::COMMENTS;
        template, set_template => pid::TEMPLATE;
        /// Author of the last save.
        last_saved_by, set_last_saved_by => pid::LAST_AUTHOR;
        revision_number, set_revision_number => pid::REVISION_NUMBER;
        application_name, set_application_name => pid::APP_NAME;
    }

    int_fields! {
        pages, set_pages => pid::PAGE_COUNT;
        words, set_words => pid::WORD_COUNT;
        characters, set_characters => pid::CHAR_COUNT;
        security, set_security => pid::SECURITY;
    }

    date_fields! {
        created, set_created => pid::CREATED;
        last_saved, set_last_saved => pid::LAST_SAVED;
        last_printed, set_last_printed => pid::LAST_PRINTED;
    }

    /// Total editing time.
    pub fn time_spent_editing(&self) -> Duration {
        self.read(pid::EDIT_TIME)
            .and_then(|v| v.as_time_span())
            .unwrap_or_default()
    }

    pub fn set_time_spent_editing(&self, value: Duration) -> StorageResult<()> {
        self.write(pid::EDIT_TIME, PropertyValue::TimeSpan(value))
    }

    /// Every field at once.
    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            title: self.title(),
            subject: self.subject(),
            author: self.author(),
            keywords: self.keywords(),
            comments: self.comments(),
            template: self.template(),
            last_saved_by: self.last_saved_by(),
            revision_number: self.revision_number(),
            application_name: self.application_name(),
            pages: self.pages(),
            words: self.words(),
            characters: self.characters(),
            security: self.security(),
            created: self.created(),
            last_saved: self.last_saved(),
            last_printed: self.last_printed(),
            time_spent_editing_secs: self.time_spent_editing().as_secs(),
        }
    }

    /// Parse `text` for `field` and write it.
    ///
    /// Dates are RFC 3339; the editing time is whole seconds.
    pub fn set_field(&self, field: SummaryField, text: &str) -> StorageResult<()> {
        let invalid = |what: &str| {
            StorageError::InvalidArgument(format!("{field}: expected {what}, got {text:?}"))
        };
        let int = || text.parse::<i32>().map_err(|_| invalid("an integer"));
        let date = || {
            DateTime::parse_from_rfc3339(text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|_| invalid("an RFC 3339 timestamp"))
        };
        match field {
            SummaryField::Title => self.set_title(text),
            SummaryField::Subject => self.set_subject(text),
            SummaryField::Author => self.set_author(text),
            SummaryField::Keywords => self.set_keywords(text),
            SummaryField::Comments => self.set_comments(text),
            SummaryField::Template => self.set_template(text),
            SummaryField::LastSavedBy => self.set_last_saved_by(text),
            SummaryField::RevisionNumber => self.set_revision_number(text),
            SummaryField::ApplicationName => self.set_application_name(text),
            SummaryField::Pages => self.set_pages(int()?),
            SummaryField::Words => self.set_words(int()?),
            SummaryField::Characters => self.set_characters(int()?),
            SummaryField::Security => self.set_security(int()?),
            SummaryField::Created => self.set_created(date()?),
            SummaryField::LastSaved => self.set_last_saved(date()?),
            SummaryField::LastPrinted => self.set_last_printed(date()?),
            SummaryField::TimeSpentEditing => {
                let secs = text.parse::<u64>().map_err(|_| invalid("whole seconds"))?;
                self.set_time_spent_editing(Duration::from_secs(secs))
            }
        }
    }
}

impl fmt::Debug for SummaryInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryInformation")
            .field("present", &self.is_present())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// All summary fields, for display and export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SummarySnapshot {
    pub title: String,
    pub subject: String,
    pub author: String,
    pub keywords: String,
    pub comments: String,
    pub template: String,
    pub last_saved_by: String,
    pub revision_number: String,
    pub application_name: String,
    pub pages: i32,
    pub words: i32,
    pub characters: i32,
    pub security: i32,
    pub created: DateTime<Utc>,
    pub last_saved: DateTime<Utc>,
    pub last_printed: DateTime<Utc>,
    pub time_spent_editing_secs: u64,
}

/// A settable summary field, named as in [`SummarySnapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryField {
    Title,
    Subject,
    Author,
    Keywords,
    Comments,
    Template,
    LastSavedBy,
    RevisionNumber,
    ApplicationName,
    Pages,
    Words,
    Characters,
    Security,
    Created,
    LastSaved,
    LastPrinted,
    TimeSpentEditing,
}

impl SummaryField {
    pub const ALL: [SummaryField; 17] = [
        SummaryField::Title,
        SummaryField::Subject,
        SummaryField::Author,
        SummaryField::Keywords,
        SummaryField::Comments,
        SummaryField::Template,
        SummaryField::LastSavedBy,
        SummaryField::RevisionNumber,
        SummaryField::ApplicationName,
        SummaryField::Pages,
        SummaryField::Words,
        SummaryField::Characters,
        SummaryField::Security,
        SummaryField::Created,
        SummaryField::LastSaved,
        SummaryField::LastPrinted,
        SummaryField::TimeSpentEditing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryField::Title => "title",
            SummaryField::Subject => "subject",
            SummaryField::Author => "author",
            SummaryField::Keywords => "keywords",
            SummaryField::Comments => "comments",
            SummaryField::Template => "template",
            SummaryField::LastSavedBy => "last_saved_by",
            SummaryField::RevisionNumber => "revision_number",
            SummaryField::ApplicationName => "application_name",
            SummaryField::Pages => "pages",
            SummaryField::Words => "words",
            SummaryField::Characters => "characters",
            SummaryField::Security => "security",
            SummaryField::Created => "created",
            SummaryField::LastSaved => "last_saved",
            SummaryField::LastPrinted => "last_printed",
            SummaryField::TimeSpentEditing => "time_spent_editing_secs",
        }
    }
}

impl fmt::Display for SummaryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryField {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SummaryField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| StorageError::InvalidArgument(format!("unknown summary field: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::{OpenMode, StorageAccess, StructuredStorage};
    use chrono::TimeZone;

    #[test]
    fn absent_fields_have_defaults() {
        let store = StructuredStorage::create_temp().unwrap();
        let summary = store.summary_information().unwrap();
        assert!(summary.is_present());
        assert_eq!(summary.title(), "");
        assert_eq!(summary.pages(), 0);
        assert_eq!(summary.created(), DateTime::<Utc>::default());
        assert_eq!(summary.time_spent_editing(), Duration::ZERO);
    }

    #[test]
    fn fields_round_trip() {
        let store = StructuredStorage::create_temp().unwrap();
        let summary = store.summary_information().unwrap();
        let when = Utc.with_ymd_and_hms(2023, 5, 1, 8, 0, 0).unwrap();
        summary.set_title("Quarterly").unwrap();
        summary.set_author("ops").unwrap();
        summary.set_words(1200).unwrap();
        summary.set_created(when).unwrap();
        summary.set_time_spent_editing(Duration::from_secs(600)).unwrap();

        let snap = summary.snapshot();
        assert_eq!(snap.title, "Quarterly");
        assert_eq!(snap.author, "ops");
        assert_eq!(snap.words, 1200);
        assert_eq!(snap.created, when);
        assert_eq!(snap.time_spent_editing_secs, 600);
    }

    #[test]
    fn set_field_parses_by_kind() {
        let store = StructuredStorage::create_temp().unwrap();
        let summary = store.summary_information().unwrap();
        summary
            .set_field("pages".parse().unwrap(), "12")
            .unwrap();
        summary
            .set_field(SummaryField::LastPrinted, "2020-01-02T03:04:05Z")
            .unwrap();
        assert_eq!(summary.pages(), 12);
        assert_eq!(
            summary.last_printed(),
            Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()
        );
        assert_eq!(
            summary
                .set_field(SummaryField::Words, "many")
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );
        assert!("no_such_field".parse::<SummaryField>().is_err());
    }

    #[test]
    fn summary_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.stow");
        {
            let store = StructuredStorage::open(
                Some(&path),
                OpenMode::CreateNew,
                StorageAccess::ReadWriteExclusive,
            )
            .unwrap();
            store.summary_information().unwrap().set_subject("kept").unwrap();
        }
        let store =
            StructuredStorage::open(Some(&path), OpenMode::Open, StorageAccess::ReadOnlyShared)
                .unwrap();
        let summary = store.summary_information().unwrap();
        assert_eq!(summary.subject(), "kept");
        assert!(summary.is_read_only());
        assert_eq!(
            summary.set_subject("changed").unwrap_err().kind(),
            ErrorKind::ReadOnly
        );
    }

    #[test]
    fn closed_store_reads_defaults() {
        let store = StructuredStorage::create_temp().unwrap();
        let summary = store.summary_information().unwrap();
        summary.set_title("t").unwrap();
        store.close().unwrap();
        assert_eq!(summary.title(), "");
        assert_eq!(summary.set_title("x").unwrap_err().kind(), ErrorKind::Disposed);
    }
}
