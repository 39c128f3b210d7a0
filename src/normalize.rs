//! Entity → [`Document`] mapping.
//!
//! One pure function per entity kind. Document ids are concatenations of
//! stable source identifiers (never content hashes) so an unchanged entity
//! normalizes to the same id on every run. Timestamps are parsed defensively
//! and truncated to whole seconds; a value that matches no known format is a
//! [`SyncError::MalformedTimestamp`], which callers treat as a logged skip
//! for that one entity.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::{
    Document, Identity, MetadataValue, Owner, PullRequest, Repository, Section, WorkItem,
};

/// Timestamp formats the platform emits, with and without fractional
/// seconds.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S%.fZ"];

/// Parse a platform timestamp to a UTC instant truncated to seconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SyncError> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            let utc = naive.and_utc();
            return Ok(utc.with_nanosecond(0).unwrap_or(utc));
        }
    }
    Err(SyncError::MalformedTimestamp {
        value: value.to_string(),
    })
}

/// Coarse language label for a file extension (without the dot).
pub fn language_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "cs" => "C#",
        "html" => "HTML",
        "css" => "CSS",
        "json" => "JSON",
        "xml" => "XML",
        "yaml" | "yml" => "YAML",
        "sql" => "SQL",
        "sh" | "bash" => "Shell",
        "ps1" => "PowerShell",
        "bat" | "cmd" => "Batch",
        "tf" | "tfvars" => "Terraform",
        "md" => "Markdown",
        _ => "Unknown",
    }
}

/// Overview document for the repository itself, with the README as its body.
pub fn repository_document(
    repo: &Repository,
    readme: Option<&str>,
    ingested_at: DateTime<Utc>,
) -> Document {
    let mut metadata = BTreeMap::new();
    metadata.insert("type".to_string(), MetadataValue::from("CodeRepo"));
    metadata.insert("repo".to_string(), MetadataValue::from(repo.name.clone()));

    Document {
        id: format!("{}:{}", repo.id, repo.web_url),
        sections: vec![Section {
            link: repo.web_url.clone(),
            text: readme.unwrap_or_default().to_string(),
        }],
        semantic_identifier: repo.name.clone(),
        updated_at: ingested_at,
        owners: Vec::new(),
        metadata,
    }
}

/// Document for one code file from the working copy.
///
/// Code files carry no per-file modification time on this path, so
/// `ingested_at`, stamped once per invocation, stands in for it.
pub fn code_document(
    repo: &Repository,
    relative_path: &str,
    content: &str,
    ingested_at: DateTime<Utc>,
) -> Document {
    let extension = relative_path.rsplit('.').next().unwrap_or("");
    let language = language_for_extension(extension);
    let link = format!("{}?path={}", repo.web_url, relative_path);

    let mut metadata = BTreeMap::new();
    metadata.insert("type".to_string(), MetadataValue::from("CodeFile"));
    metadata.insert("language".to_string(), MetadataValue::from(language));
    metadata.insert("repo".to_string(), MetadataValue::from(repo.name.clone()));

    Document {
        id: format!("{}:{}:{}", repo.id, repo.web_url, relative_path),
        sections: vec![Section {
            link,
            text: content.to_string(),
        }],
        semantic_identifier: format!("{}/{}", repo.name, relative_path),
        updated_at: ingested_at,
        owners: Vec::new(),
        metadata,
    }
}

/// Document for a pull request.
pub fn pull_request_document(
    pr: &PullRequest,
    repo: &Repository,
) -> Result<Document, SyncError> {
    let link = format!("{}/pullrequest/{}", repo.web_url, pr.pull_request_id);
    let updated_at = parse_timestamp(&pr.creation_date)?;

    let semantic_identifier = match pr.title.as_deref() {
        Some(title) if !title.trim().is_empty() => title.to_string(),
        _ => format!("Pull Request {}", pr.pull_request_id),
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("type".to_string(), MetadataValue::from("PullRequest"));
    metadata.insert("repo".to_string(), MetadataValue::from(repo.name.clone()));
    if let Some(status) = pr.status.as_deref() {
        if !status.is_empty() {
            metadata.insert("state".to_string(), MetadataValue::from(status));
        }
    }

    Ok(Document {
        id: link.clone(),
        sections: vec![Section {
            link,
            text: pr.description.clone().unwrap_or_default(),
        }],
        semantic_identifier,
        updated_at,
        owners: pr
            .created_by
            .as_ref()
            .and_then(identity_owner)
            .into_iter()
            .collect(),
        metadata,
    })
}

/// Document for a work item.
///
/// The description is always the first section (empty when the field is
/// absent); repro info and acceptance criteria become extra sections only
/// when present. Metadata keys are omitted when the field is absent: an
/// absent key, not a null value, signals "unknown".
pub fn work_item_document(
    item: &WorkItem,
    organization_url: &str,
) -> Result<Document, SyncError> {
    let link = format!("{}/_workItems/edit/{}", organization_url, item.id);
    let updated_at = parse_timestamp(field_str(item, "System.ChangedDate").unwrap_or(""))?;

    let mut sections = vec![Section {
        link: link.clone(),
        text: field_str(item, "System.Description")
            .unwrap_or_default()
            .to_string(),
    }];
    for field in [
        "Microsoft.VSTS.TCM.SystemInfo",
        "Microsoft.VSTS.Common.AcceptanceCriteria",
    ] {
        if let Some(text) = field_str(item, field) {
            sections.push(Section {
                link: link.clone(),
                text: text.to_string(),
            });
        }
    }

    let semantic_identifier = match field_str(item, "System.Title") {
        Some(title) => title.to_string(),
        None => format!("Work Item {}", item.id),
    };

    let assigned_to = field_identity(item, "System.AssignedTo");

    let mut metadata = BTreeMap::new();
    for (key, field) in [
        ("state", "System.State"),
        ("type", "System.WorkItemType"),
        ("iteration", "System.IterationPath"),
        ("area", "System.AreaPath"),
    ] {
        if let Some(value) = field_str(item, field) {
            metadata.insert(key.to_string(), MetadataValue::from(value));
        }
    }
    match item.fields.get("Microsoft.VSTS.Common.Priority") {
        Some(Value::Number(priority)) => {
            metadata.insert("priority".to_string(), MetadataValue::from(priority.to_string()));
        }
        Some(Value::String(priority)) if !priority.is_empty() => {
            metadata.insert("priority".to_string(), MetadataValue::from(priority.clone()));
        }
        _ => {}
    }
    if let Some(tags) = field_str(item, "System.Tags") {
        let tags: Vec<String> = tags
            .split(';')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !tags.is_empty() {
            metadata.insert("tags".to_string(), MetadataValue::List(tags));
        }
    }
    if let Some(owner) = &assigned_to {
        metadata.insert(
            "assigned_to".to_string(),
            MetadataValue::from(owner.display_name.clone()),
        );
    }

    let mut owners = Vec::new();
    if let Some(creator) = field_identity(item, "System.CreatedBy") {
        owners.push(creator);
    }
    if let Some(assignee) = assigned_to {
        owners.push(assignee);
    }

    Ok(Document {
        id: link,
        sections,
        semantic_identifier,
        updated_at,
        owners,
        metadata,
    })
}

/// Non-empty string value of a work-item field.
fn field_str<'a>(item: &'a WorkItem, key: &str) -> Option<&'a str> {
    item.fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Identity-typed work-item field as an [`Owner`]. A present-but-empty
/// identity counts as no owner.
fn field_identity(item: &WorkItem, key: &str) -> Option<Owner> {
    let name = item.fields.get(key)?.get("displayName")?.as_str()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(Owner {
            display_name: name.to_string(),
        })
    }
}

fn identity_owner(identity: &Identity) -> Option<Owner> {
    let name = identity.display_name.as_deref()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(Owner {
            display_name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> Repository {
        Repository {
            id: "repo-1".to_string(),
            name: "Infrastructure-As-Code".to_string(),
            remote_url: "https://org@dev.azure.com/org/codat/_git/Infrastructure-As-Code"
                .to_string(),
            web_url: "https://dev.azure.com/org/codat/_git/Infrastructure-As-Code".to_string(),
        }
    }

    fn work_item(fields: serde_json::Value) -> WorkItem {
        WorkItem {
            id: 42,
            fields: fields.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_both_timestamp_formats_parse_to_same_instant() {
        let plain = parse_timestamp("2024-01-02T03:04:05Z").unwrap();
        let fractional = parse_timestamp("2024-01-02T03:04:05.123456Z").unwrap();
        assert_eq!(plain, fractional);
        assert_eq!(plain.timestamp_subsec_nanos(), 0);
        assert_eq!(plain.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_unknown_timestamp_format_is_malformed() {
        let err = parse_timestamp("02/01/2024 03:04").unwrap_err();
        assert!(matches!(err, SyncError::MalformedTimestamp { .. }));
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_for_extension("cs"), "C#");
        assert_eq!(language_for_extension("YML"), "YAML");
        assert_eq!(language_for_extension("zig"), "Unknown");
        assert_eq!(language_for_extension(""), "Unknown");
    }

    #[test]
    fn test_code_document_id_and_identifier() {
        let repo = repo();
        let now = Utc::now();
        let doc = code_document(&repo, "src/Program.cs", "class Program {}", now);

        assert_eq!(
            doc.id,
            format!("repo-1:{}:src/Program.cs", repo.web_url)
        );
        assert_eq!(
            doc.semantic_identifier,
            "Infrastructure-As-Code/src/Program.cs"
        );
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].link, format!("{}?path=src/Program.cs", repo.web_url));
        assert_eq!(doc.metadata.get("language"), Some(&MetadataValue::from("C#")));
        assert_eq!(doc.metadata.get("type"), Some(&MetadataValue::from("CodeFile")));
    }

    #[test]
    fn test_code_document_id_is_stable_across_runs() {
        let repo = repo();
        let first = code_document(&repo, "a.cs", "one", Utc::now());
        let second = code_document(&repo, "a.cs", "two", Utc::now());
        assert_eq!(first.id, second.id);
        assert_eq!(
            first.metadata.keys().collect::<Vec<_>>(),
            second.metadata.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_repository_document_carries_readme() {
        let repo = repo();
        let doc = repository_document(&repo, Some("# Readme"), Utc::now());
        assert_eq!(doc.id, format!("repo-1:{}", repo.web_url));
        assert_eq!(doc.semantic_identifier, "Infrastructure-As-Code");
        assert_eq!(doc.sections[0].text, "# Readme");
        assert_eq!(doc.metadata.get("type"), Some(&MetadataValue::from("CodeRepo")));
    }

    #[test]
    fn test_pull_request_document() {
        let pr = PullRequest {
            pull_request_id: 7,
            title: Some("Add retry logic".to_string()),
            description: Some("Retries transient failures.".to_string()),
            status: Some("active".to_string()),
            creation_date: "2024-01-02T03:04:05.123456Z".to_string(),
            created_by: Some(Identity {
                display_name: Some("Dana Developer".to_string()),
            }),
        };
        let doc = pull_request_document(&pr, &repo()).unwrap();

        assert!(doc.id.ends_with("/pullrequest/7"));
        assert_eq!(doc.semantic_identifier, "Add retry logic");
        assert_eq!(doc.updated_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(doc.owners.len(), 1);
        assert_eq!(doc.owners[0].display_name, "Dana Developer");
        assert_eq!(doc.metadata.get("state"), Some(&MetadataValue::from("active")));
    }

    #[test]
    fn test_pull_request_empty_author_is_no_owner() {
        let pr = PullRequest {
            pull_request_id: 8,
            title: None,
            description: None,
            status: None,
            creation_date: "2024-01-02T03:04:05Z".to_string(),
            created_by: Some(Identity {
                display_name: Some("  ".to_string()),
            }),
        };
        let doc = pull_request_document(&pr, &repo()).unwrap();
        assert!(doc.owners.is_empty());
        assert_eq!(doc.semantic_identifier, "Pull Request 8");
        assert!(!doc.metadata.contains_key("state"));
    }

    #[test]
    fn test_work_item_document_full_fields() {
        let item = work_item(json!({
            "System.Title": "Login page crashes",
            "System.ChangedDate": "2024-01-02T03:04:05.123456Z",
            "System.Description": "Crash on submit.",
            "Microsoft.VSTS.TCM.SystemInfo": "Windows 11, Chrome",
            "Microsoft.VSTS.Common.AcceptanceCriteria": "No crash.",
            "System.State": "Active",
            "System.WorkItemType": "Bug",
            "System.IterationPath": "Codat\\Sprint 4",
            "System.AreaPath": "Codat\\Platform",
            "Microsoft.VSTS.Common.Priority": 2,
            "System.Tags": "auth; frontend",
            "System.CreatedBy": {"displayName": "Dana Developer"},
            "System.AssignedTo": {"displayName": "Sam Support"},
        }));

        let doc = work_item_document(&item, "https://dev.azure.com/org").unwrap();

        assert_eq!(doc.id, "https://dev.azure.com/org/_workItems/edit/42");
        assert_eq!(doc.semantic_identifier, "Login page crashes");
        assert_eq!(doc.sections.len(), 3);
        assert_eq!(doc.sections[1].text, "Windows 11, Chrome");
        assert_eq!(doc.updated_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(doc.owners.len(), 2);
        assert_eq!(doc.metadata.get("priority"), Some(&MetadataValue::from("2")));
        assert_eq!(
            doc.metadata.get("tags"),
            Some(&MetadataValue::List(vec![
                "auth".to_string(),
                "frontend".to_string()
            ]))
        );
        assert_eq!(
            doc.metadata.get("assigned_to"),
            Some(&MetadataValue::from("Sam Support"))
        );
    }

    #[test]
    fn test_work_item_without_assignee_omits_key() {
        let item = work_item(json!({
            "System.Title": "Unassigned task",
            "System.ChangedDate": "2024-01-02T03:04:05Z",
            "System.State": "New",
            "System.CreatedBy": {"displayName": "Dana Developer"},
        }));

        let doc = work_item_document(&item, "https://dev.azure.com/org").unwrap();

        assert!(!doc.metadata.contains_key("assigned_to"));
        assert!(!doc.metadata.contains_key("tags"));
        assert!(!doc.metadata.contains_key("iteration"));
        assert_eq!(doc.owners.len(), 1);
        // Description section is always present, even when the field is not.
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].text, "");
    }

    #[test]
    fn test_work_item_missing_changed_date_is_malformed() {
        let item = work_item(json!({
            "System.Title": "No timestamp",
        }));
        let err = work_item_document(&item, "https://dev.azure.com/org").unwrap_err();
        assert!(matches!(err, SyncError::MalformedTimestamp { .. }));
    }
}
