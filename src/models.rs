//! Core data models used throughout the sync engine.
//!
//! These types represent the projects, files, and structural documents that
//! flow from the repository host through extraction into the index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of a declaration document's primary type.
const PRIMARY_TYPE: &str = "class";
/// Key of the sibling top-level types declared in the same file.
const SIBLING_TYPES: &str = "otherclasses";
/// Key of a type's nested types.
const NESTED_TYPES: &str = "innerclasses";

/// Prefix prepended to the extension of files that are indexed without structure.
pub const UNEXTRACTED_PREFIX: &str = "l";

/// Project metadata resolved from the repository host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// `{owner}/{name}`; primary key and routing key of the project's files.
    pub id: String,
    pub default_branch: String,
    /// Canonical API URL of the project.
    pub url: String,
    /// URL the working copy is mirrored from.
    pub git_url: String,
    pub trees_url: String,
    pub user: String,
    pub name: String,
}

/// One entry of a remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    /// Remote content hash (the blob sha).
    pub sha: String,
    pub mode: String,
    /// `blob`, `tree`, or `commit`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

/// A project resolved from the host: its metadata plus the ordered file listing.
#[derive(Debug, Clone)]
pub struct RemoteProject {
    pub project: ProjectRecord,
    pub files: Vec<RemoteFile>,
}

/// Parsed declaration document for a single source file.
///
/// The shape varies by language construct, so the document stays a tagged
/// JSON map and only the keys that normalization touches are inspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralDocument(pub Map<String, Value>);

impl StructuralDocument {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Drop the nested types of nested types.
    ///
    /// Applies to the primary type and to every sibling type; first-level
    /// nesting is kept as is.
    pub fn strip_nested_inner_types(&mut self) {
        if let Some(primary) = self.0.get_mut(PRIMARY_TYPE) {
            strip_second_level(primary);
        }
        if let Some(Value::Array(siblings)) = self.0.get_mut(SIBLING_TYPES) {
            for sibling in siblings {
                strip_second_level(sibling);
            }
        }
    }
}

fn strip_second_level(declared: &mut Value) {
    if let Some(Value::Array(nested)) = declared.get_mut(NESTED_TYPES) {
        for inner in nested {
            if let Value::Object(fields) = inner {
                fields.remove(NESTED_TYPES);
            }
        }
    }
}

/// One file of one project, as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// `{owner}/{project}/{relative_path}`; primary key.
    pub id: String,
    /// `{owner}/{project}`; routing key.
    pub project_id: String,
    pub path: String,
    pub name: String,
    pub extension: String,
    /// Remote content hash; the only field compared to detect change.
    pub sha: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub structure: Option<StructuralDocument>,
    #[serde(default)]
    pub raw_content: Option<String>,
    /// Set by [`FileRecord::demote`]. Not persisted; the extension carries it.
    #[serde(skip)]
    pub demoted: bool,
}

impl FileRecord {
    pub fn from_remote(project_id: &str, remote: &RemoteFile) -> Self {
        let name = remote
            .path
            .rsplit('/')
            .next()
            .unwrap_or(remote.path.as_str())
            .to_string();
        let extension = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_string(),
            None => String::new(),
        };

        Self {
            id: format!("{}/{}", project_id, remote.path),
            project_id: project_id.to_string(),
            path: remote.path.clone(),
            name,
            extension,
            sha: remote.sha.clone(),
            mode: remote.mode.clone(),
            kind: remote.kind.clone(),
            url: remote.url.clone(),
            structure: None,
            raw_content: None,
            demoted: false,
        }
    }

    pub fn has_structure(&self) -> bool {
        self.structure.is_some()
    }

    /// Set the structure together with the text it was derived from.
    pub fn attach(&mut self, structure: StructuralDocument, raw_content: String) {
        self.structure = Some(structure);
        self.raw_content = Some(raw_content);
    }

    /// Relabel as the unextracted variant: metadata only, never any structure.
    pub fn demote(&mut self) {
        self.extension = format!("{}{}", UNEXTRACTED_PREFIX, self.extension);
        self.structure = None;
        self.raw_content = None;
        self.demoted = true;
    }

    /// Whether an update with this record leaves the stored structure and
    /// text in place: nothing was recomputed and the record was not demoted.
    pub fn keeps_stored_structure(&self) -> bool {
        self.structure.is_none() && !self.demoted
    }
}

/// Derive the project id (`owner/name`) from the last two path segments of an address.
pub fn project_id_from_address(address: &str) -> Option<String> {
    let trimmed = address.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut segments = trimmed.rsplit('/').filter(|s| !s.is_empty());
    let name = segments.next()?;
    let owner = segments.next()?;
    if owner.contains(':') {
        return None;
    }
    Some(format!("{}/{}", owner, name))
}
