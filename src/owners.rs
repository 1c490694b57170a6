//! Owner Email Extractor: finds project owners among collaborators and collects their emails.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::client::{ApiClient, ApiError};
use crate::email::is_valid_email;
use crate::files;

pub type Record = Map<String, Value>;

const OWNER_TOKEN: &str = "PROJECT_OWNER";
const BARE_OWNER: &str = "OWNER";

const OWNER_FLAGS: [&str; 3] = ["isOwner", "owner", "projectOwner"];
const EMAIL_FIELDS: [&str; 4] = ["email", "mail", "username", "login"];
const LIST_KEYS: [&str; 5] = ["content", "items", "results", "data", "collaborators"];

/// Uppercase, then collapse runs of whitespace and hyphens into `_`.
pub fn normalize_label(value: Option<&Value>) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[\s\-]+").expect("separator pattern is valid"));

    let raw = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    separators.replace_all(&raw.to_uppercase(), "_").into_owned()
}

fn label_means_owner(label: &str) -> bool {
    label.contains(OWNER_TOKEN) || label == BARE_OWNER
}

/// Which probe classified a record as an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerSignal {
    Flag(&'static str),
    PermissionSet,
    Role,
    ProjectRole,
    AccessLevel,
}

type LabelProbe = fn(&Record) -> Option<&Value>;

/// Role-bearing fields, in the order they are consulted.
const LABEL_PROBES: [(OwnerSignal, LabelProbe); 4] = [
    (OwnerSignal::PermissionSet, |r| r.get("permissionSetName")),
    (OwnerSignal::Role, |r| r.get("role")),
    (OwnerSignal::ProjectRole, |r| r.get("projectRole").and_then(|pr| pr.get("name"))),
    (OwnerSignal::AccessLevel, |r| r.get("accessLevel")),
];

pub fn classify(record: &Record) -> Option<OwnerSignal> {
    if let Some(flag) = OWNER_FLAGS
        .iter()
        .find(|key| matches!(record.get(**key), Some(Value::Bool(true))))
    {
        return Some(OwnerSignal::Flag(*flag));
    }

    LABEL_PROBES
        .iter()
        .find(|(_, probe)| label_means_owner(&normalize_label(probe(record))))
        .map(|(signal, _)| *signal)
}

pub fn is_owner(record: &Record) -> bool {
    classify(record).is_some()
}

/// Diagnostic label: first non-empty normalized role field, else `UNKNOWN`.
pub fn role_label(record: &Record) -> String {
    LABEL_PROBES
        .iter()
        .map(|(_, probe)| normalize_label(probe(record)))
        .find(|label| !label.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn email_in(map: &Record) -> Option<String> {
    EMAIL_FIELDS.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) => Some(s.trim()).filter(|s| is_valid_email(s)).map(str::to_string),
        _ => None,
    })
}

/// Top-level fields first, then the nested `user` object.
pub fn extract_email(record: &Record) -> Option<String> {
    email_in(record).or_else(|| match record.get("user") {
        Some(Value::Object(user)) => email_in(user),
        _ => None,
    })
}

/// Normalize a collaborator response into a list of records. Never fails.
pub fn collaborators_from(value: Value) -> Vec<Record> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            match LIST_KEYS.iter().find(|key| matches!(map.get(**key), Some(Value::Array(_)))) {
                Some(key) => match map.remove(*key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                // a single collaborator object
                None => return vec![map],
            }
        }
        _ => Vec::new(),
    };

    list.into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// What happened for one project.
#[derive(Debug, Clone, Default)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub collaborators: usize,
    pub owners: usize,
    pub added: usize,
    /// Role frequency table, filled only when no owners were found.
    pub role_stats: Option<BTreeMap<String, usize>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OwnerReport {
    pub projects: Vec<ProjectOutcome>,
    pub emails: BTreeSet<String>,
}

pub struct OwnerExtractor<'a> {
    client: &'a ApiClient,
    authorization: String,
    delay: Duration,
    debug_samples: usize,
}

impl<'a> OwnerExtractor<'a> {
    pub fn new(client: &'a ApiClient, token_type: &str, token: &str) -> Self {
        Self {
            client,
            authorization: format!("{} {}", token_type, token),
            delay: Duration::from_millis(100),
            debug_samples: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_debug_samples(mut self, samples: usize) -> Self {
        self.debug_samples = samples;
        self
    }

    pub fn fetch_collaborators(&self, project_id: &str) -> Result<Vec<Record>, ApiError> {
        let path = format!("/api/project/access/{}/collaborator", project_id);
        let body = self.client.get_json(&path, &[], &self.authorization)?;
        Ok(collaborators_from(body))
    }

    /// Process projects sequentially. A failing project is logged and skipped.
    pub fn run(&self, project_ids: &[String]) -> OwnerReport {
        let mut report = OwnerReport::default();

        for (index, project_id) in project_ids.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            log::info!("Processing project {}", project_id);
            let outcome = match self.fetch_collaborators(project_id) {
                Ok(collaborators) => self.absorb(project_id, &collaborators, &mut report.emails),
                Err(e) => {
                    log::error!("   {} for project {}: {}", e.label(), project_id, e);
                    ProjectOutcome {
                        project_id: project_id.clone(),
                        error: Some(e.label().to_string()),
                        ..ProjectOutcome::default()
                    }
                }
            };
            report.projects.push(outcome);
        }

        report
    }

    fn absorb(&self, project_id: &str, collaborators: &[Record], emails: &mut BTreeSet<String>) -> ProjectOutcome {
        log::info!("   collaborators: {}", collaborators.len());

        for sample in collaborators.iter().take(self.debug_samples) {
            let rendered = serde_json::to_string(sample).unwrap_or_default();
            log::info!("   sample: {}", rendered.chars().take(800).collect::<String>());
        }

        let owners: Vec<&Record> = collaborators.iter().filter(|c| is_owner(c)).collect();

        let role_stats = if owners.is_empty() {
            let mut stats = BTreeMap::new();
            for collaborator in collaborators {
                *stats.entry(role_label(collaborator)).or_insert(0) += 1;
            }
            log::info!("   no owners found, roles seen: {:?}", stats);
            Some(stats)
        } else {
            log::info!("   owners: {}", owners.len());
            None
        };

        let added = owners
            .iter()
            .filter_map(|owner| extract_email(owner))
            .filter(|email| emails.insert(email.clone()))
            .count();
        log::info!("   emails added: {}", added);

        ProjectOutcome {
            project_id: project_id.to_string(),
            collaborators: collaborators.len(),
            owners: owners.len(),
            added,
            role_stats,
            error: None,
        }
    }
}

/// Run the extractor and write the sorted email set. An empty id list still produces a file.
pub fn run_to_file(extractor: &OwnerExtractor<'_>, project_ids: &[String], output: &Path) -> anyhow::Result<OwnerReport> {
    let report = if project_ids.is_empty() {
        OwnerReport::default()
    } else {
        extractor.run(project_ids)
    };

    write_report(&report, output)?;
    Ok(report)
}

/// Write the report's emails one per line, sorted. Returns the number written.
pub fn write_report(report: &OwnerReport, output: &Path) -> anyhow::Result<usize> {
    // BTreeSet iterates in lexicographic order
    files::write_column(output, &report.emails)
}
