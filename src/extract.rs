//! Structural extraction on top of the parser channel.
//!
//! Turns a file, or a whole directory in one round trip, into normalized
//! [`StructuralDocument`]s, and decides per file whether extraction applies
//! at all (see [`enrich_file`]).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::models::{FileRecord, StructuralDocument};
use crate::parser::{ParserError, ParserTransport, RequestKind};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("parser returned no result for {0}")]
    Empty(String),

    #[error("parser returned malformed JSON for {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("parser result for {0} is not a JSON object")]
    NotAnObject(String),

    #[error(transparent)]
    Parser(#[from] ParserError),
}

impl ExtractError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractError::Parser(e) if e.is_fatal())
    }
}

/// Documents produced by a directory extraction, keyed by `/`-separated file path.
pub type DirectoryStructure = BTreeMap<String, StructuralDocument>;

/// Structural extractor backed by a parser transport.
pub struct Extractor {
    transport: Box<dyn ParserTransport>,
}

impl Extractor {
    pub fn new(transport: Box<dyn ParserTransport>) -> Self {
        Self { transport }
    }

    /// Parse one file. An empty response is retried once against the
    /// replacement worker before giving up.
    pub fn extract_file(&mut self, path: &Path) -> Result<StructuralDocument, ExtractError> {
        let target = path_key(path);
        let mut response = self.transport.request(RequestKind::File, &target)?;
        if response.is_empty() {
            debug!(path = %target, "empty parse result, retrying once");
            response = self.transport.request(RequestKind::File, &target)?;
        }
        if response.is_empty() {
            return Err(ExtractError::Empty(target));
        }

        let value: Value =
            serde_json::from_str(&response).map_err(|source| ExtractError::Malformed {
                path: target.clone(),
                source,
            })?;
        let mut document = into_document(value, &target)?;
        document.strip_nested_inner_types();
        Ok(document)
    }

    /// Parse every file under `path` in a single request.
    pub fn extract_directory(&mut self, path: &Path) -> Result<DirectoryStructure, ExtractError> {
        let target = path_key(path);
        let response = self.transport.request(RequestKind::Directory, &target)?;
        if response.is_empty() {
            return Err(ExtractError::Empty(target));
        }

        let files: Map<String, Value> =
            serde_json::from_str(&response).map_err(|source| ExtractError::Malformed {
                path: target.clone(),
                source,
            })?;

        let mut out = BTreeMap::new();
        for (file, value) in files {
            let key = file.replace('\\', "/");
            let mut document = into_document(value, &key)?;
            document.strip_nested_inner_types();
            out.insert(key, document);
        }
        Ok(out)
    }
}

fn into_document(value: Value, path: &str) -> Result<StructuralDocument, ExtractError> {
    match value {
        Value::Object(map) => Ok(StructuralDocument::new(map)),
        _ => Err(ExtractError::NotAnObject(path.to_string())),
    }
}

/// Path as the worker and directory results spell it: `/`-separated.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Read a file as plain ASCII text, dropping every other byte.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_ascii(path: &Path) -> std::io::Result<Option<String>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some(
        bytes
            .into_iter()
            .filter(u8::is_ascii)
            .map(char::from)
            .collect(),
    ))
}

/// Populate `structure` and `raw_content` for an eligible source file.
///
/// Files with another extension are left alone. A name longer than the
/// configured bound, a missing source on disk, or a parse failure demote the
/// file to its unextracted variant; it is still indexed, with metadata only.
/// When `batch` is given, a document already extracted for `local_path` is
/// used instead of a fresh request. Only fatal parser errors are returned.
pub fn enrich_file(
    file: &mut FileRecord,
    local_path: &Path,
    policy: &ExtractionConfig,
    extractor: &mut Extractor,
    batch: Option<&DirectoryStructure>,
) -> Result<(), ExtractError> {
    if !policy.is_source_extension(&file.extension) {
        return Ok(());
    }
    if file.name.len() > policy.max_name_len {
        debug!(file = %file.id, "file name too long, indexing without structure");
        file.demote();
        return Ok(());
    }

    let cached = batch.and_then(|documents| documents.get(&path_key(local_path)));
    let document = match cached {
        Some(document) => document.clone(),
        None => match extractor.extract_file(local_path) {
            Ok(document) => document,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(file = %file.id, error = %e, "extraction failed, indexing without structure");
                file.demote();
                return Ok(());
            }
        },
    };

    match read_ascii(local_path) {
        Ok(Some(text)) => file.attach(document, text),
        Ok(None) => {
            debug!(file = %file.id, "source missing on disk, indexing without structure");
            file.demote();
        }
        Err(e) => {
            warn!(file = %file.id, error = %e, "failed to read source, indexing without structure");
            file.demote();
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::RemoteFile;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Scripted transport: canned responses per `(kind, payload)`, with an
    /// optional queue of one-shot responses consumed first.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        pub responses: Arc<Mutex<HashMap<(RequestKind, String), String>>>,
        pub once: Arc<Mutex<VecDeque<String>>>,
        pub calls: Arc<Mutex<Vec<(RequestKind, String)>>>,
        pub fatal: Arc<Mutex<bool>>,
    }

    impl ScriptedTransport {
        pub fn respond(&self, kind: RequestKind, payload: &str, response: &str) {
            self.responses
                .lock()
                .unwrap()
                .insert((kind, payload.to_string()), response.to_string());
        }

        pub fn calls(&self) -> Vec<(RequestKind, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ParserTransport for ScriptedTransport {
        fn request(&mut self, kind: RequestKind, payload: &str) -> Result<String, ParserError> {
            self.calls.lock().unwrap().push((kind, payload.to_string()));
            if *self.fatal.lock().unwrap() {
                return Err(ParserError::Unreachable);
            }
            if let Some(next) = self.once.lock().unwrap().pop_front() {
                return Ok(next);
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(&(kind, payload.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn extractor(transport: &ScriptedTransport) -> Extractor {
        Extractor::new(Box::new(transport.clone()))
    }

    fn java_file(name: &str) -> FileRecord {
        FileRecord::from_remote(
            "octo/demo",
            &RemoteFile {
                path: format!("src/{}", name),
                sha: "h1".to_string(),
                mode: "100644".to_string(),
                kind: "blob".to_string(),
                url: String::new(),
            },
        )
    }

    const NESTED: &str = r#"{"class":{"name":"A","innerclasses":[{"name":"B","innerclasses":[{"name":"C"}]}]}}"#;

    #[test]
    fn extract_file_normalizes_the_document() {
        let transport = ScriptedTransport::default();
        transport.respond(RequestKind::File, "/w/A.java", NESTED);

        let doc = extractor(&transport)
            .extract_file(Path::new("/w/A.java"))
            .unwrap();
        let value = doc.into_value();
        assert_eq!(value["class"]["innerclasses"][0]["name"], "B");
        assert!(value["class"]["innerclasses"][0].get("innerclasses").is_none());
    }

    #[test]
    fn extract_file_retries_an_empty_result_once() {
        let transport = ScriptedTransport::default();
        transport.once.lock().unwrap().push_back(String::new());
        transport.respond(RequestKind::File, "/w/A.java", r#"{"class":{"name":"A"}}"#);

        let doc = extractor(&transport)
            .extract_file(Path::new("/w/A.java"))
            .unwrap();
        assert_eq!(doc.get("class").unwrap()["name"], "A");
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn extract_file_fails_after_two_empty_results() {
        let transport = ScriptedTransport::default();
        let err = extractor(&transport)
            .extract_file(Path::new("/w/A.java"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Empty(_)));
        assert!(!err.is_fatal());
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn extract_file_rejects_non_object_json() {
        let transport = ScriptedTransport::default();
        transport.respond(RequestKind::File, "/w/A.java", "[1,2]");
        let err = extractor(&transport)
            .extract_file(Path::new("/w/A.java"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotAnObject(_)));
    }

    #[test]
    fn extract_directory_normalizes_keys_and_documents() {
        let transport = ScriptedTransport::default();
        let response = format!(r#"{{"C:\\w\\A.java": {}, "/w/B.java": {{}}}}"#, NESTED);
        transport.respond(RequestKind::Directory, "/w", &response);

        let docs = extractor(&transport)
            .extract_directory(Path::new("/w"))
            .unwrap();
        assert_eq!(docs.len(), 2);
        let a = docs.get("C:/w/A.java").unwrap().clone().into_value();
        assert!(a["class"]["innerclasses"][0].get("innerclasses").is_none());
        assert!(docs.contains_key("/w/B.java"));
    }

    #[test]
    fn extract_directory_empty_response_is_an_error() {
        let transport = ScriptedTransport::default();
        let err = extractor(&transport)
            .extract_directory(Path::new("/w"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Empty(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn read_ascii_drops_non_ascii_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("A.java");
        std::fs::write(&path, "class Caf\u{e9} {}\n").unwrap();
        assert_eq!(read_ascii(&path).unwrap().as_deref(), Some("class Caf {}\n"));
        assert_eq!(read_ascii(&tmp.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn enrich_attaches_structure_and_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("A.java");
        std::fs::write(&path, "class A {}").unwrap();
        let transport = ScriptedTransport::default();
        transport.respond(RequestKind::File, &path_key(&path), r#"{"class":{"name":"A"}}"#);

        let mut file = java_file("A.java");
        enrich_file(
            &mut file,
            &path,
            &ExtractionConfig::default(),
            &mut extractor(&transport),
            None,
        )
        .unwrap();
        assert!(file.has_structure());
        assert_eq!(file.raw_content.as_deref(), Some("class A {}"));
        assert_eq!(file.extension, "java");
    }

    #[test]
    fn enrich_prefers_the_batch_result() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("A.java");
        std::fs::write(&path, "class A {}").unwrap();
        let transport = ScriptedTransport::default();
        let mut batch = DirectoryStructure::new();
        batch.insert(path_key(&path), StructuralDocument::default());

        let mut file = java_file("A.java");
        enrich_file(
            &mut file,
            &path,
            &ExtractionConfig::default(),
            &mut extractor(&transport),
            Some(&batch),
        )
        .unwrap();
        assert!(file.has_structure());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn long_names_never_get_structure() {
        let policy = ExtractionConfig::default();
        let name = format!("{}.java", "X".repeat(policy.max_name_len));
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Long.java");
        std::fs::write(&path, "class X {}").unwrap();
        let transport = ScriptedTransport::default();
        let mut batch = DirectoryStructure::new();
        batch.insert(path_key(&path), StructuralDocument::default());

        let mut file = java_file(&name);
        enrich_file(&mut file, &path, &policy, &mut extractor(&transport), Some(&batch)).unwrap();
        assert!(!file.has_structure());
        assert!(file.raw_content.is_none());
        assert_eq!(file.extension, "ljava");
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn missing_source_demotes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Gone.java");
        let transport = ScriptedTransport::default();
        transport.respond(RequestKind::File, &path_key(&path), r#"{"class":{}}"#);

        let mut file = java_file("Gone.java");
        enrich_file(
            &mut file,
            &path,
            &ExtractionConfig::default(),
            &mut extractor(&transport),
            None,
        )
        .unwrap();
        assert!(!file.has_structure());
        assert_eq!(file.extension, "ljava");
    }

    #[test]
    fn other_extensions_are_left_alone() {
        let transport = ScriptedTransport::default();
        let mut file = java_file("README.md");
        enrich_file(
            &mut file,
            Path::new("/w/README.md"),
            &ExtractionConfig::default(),
            &mut extractor(&transport),
            None,
        )
        .unwrap();
        assert_eq!(file.extension, "md");
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn fatal_parser_errors_propagate() {
        let transport = ScriptedTransport::default();
        *transport.fatal.lock().unwrap() = true;
        let mut file = java_file("A.java");
        let err = enrich_file(
            &mut file,
            Path::new("/w/A.java"),
            &ExtractionConfig::default(),
            &mut extractor(&transport),
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }
}
