//! Writing exported archives to disk and reading indexable fields back out.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write archive {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("exported archive is not a readable zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to read {member} from archive: {source}")]
    Member { member: String, source: io::Error },
    #[error("{member} is not valid JSON: {source}")]
    Json {
        member: String,
        source: serde_json::Error,
    },
}

/// Persists the zip bytes returned by a single-artifact export.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveWriter;

impl ArchiveWriter {
    /// Writes `<dir>/<stem>.zip` and returns its path.
    ///
    /// The bytes go to a temp file in `dir` first and are renamed into place
    /// once fully synced, so the final name never holds a partial archive.
    pub fn write(&self, dir: &Path, stem: &str, bytes: &[u8]) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(dir).map_err(|source| ArchiveError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let final_path = dir.join(format!("{stem}.zip"));
        let write_err = |source: io::Error| ArchiveError::Write {
            path: final_path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&final_path).map_err(|e| write_err(e.error))?;

        debug!(path = %final_path.display(), size = bytes.len(), "Archive written");
        Ok(final_path)
    }
}

/// Flattened record sent to the indexing service for one API or API Product.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiPayload {
    pub uuid: String,
    pub api_name: String,
    pub version: String,
    pub tenant_domain: String,
    pub api_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdl_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_spec: Option<String>,
}

fn json_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_json(member: &str, contents: &[u8]) -> Result<Value, ArchiveError> {
    serde_json::from_slice(contents).map_err(|source| ArchiveError::Json {
        member: member.to_string(),
        source,
    })
}

fn info_description(doc: &Value) -> String {
    doc.get("info")
        .map(|info| json_str(info, "description"))
        .unwrap_or_default()
}

/// Builds the indexing payload from an exported archive.
///
/// `artifact_dir` is the `<name>-<version>` directory the service nests the
/// export under. Returns `Ok(None)` when the artifact is not publicly visible.
pub fn extract_index_payload(
    bytes: &[u8],
    artifact_dir: &str,
    tenant: &str,
) -> Result<Option<ApiPayload>, ArchiveError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut payload = ApiPayload {
        tenant_domain: tenant.to_string(),
        ..Default::default()
    };
    let mut saw_definition = false;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let member = file.name().to_string();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|source| ArchiveError::Member {
                member: member.clone(),
                source,
            })?;

        if member.ends_with(&format!("{artifact_dir}/api.json"))
            || member.ends_with(&format!("{artifact_dir}/api_product.json"))
        {
            let doc = parse_json(&member, &contents)?;
            let data = doc.get("data").cloned().unwrap_or(Value::Null);
            if data.get("visibility").and_then(Value::as_str) != Some("PUBLIC") {
                debug!(artifact = artifact_dir, "Skipping artifact that is not public");
                return Ok(None);
            }
            saw_definition = true;
            payload.uuid = json_str(&data, "id");
            payload.api_name = json_str(&data, "name");
            payload.version = json_str(&data, "version");
            payload.api_type = if doc.get("type").and_then(Value::as_str) == Some("api") {
                json_str(&data, "type")
            } else {
                "APIPRODUCT".to_string()
            };
        } else if member.ends_with(&format!("{artifact_dir}/Definitions/swagger.json")) {
            let doc = parse_json(&member, &contents)?;
            payload.description = info_description(&doc);
            payload.api_spec = Some(String::from_utf8_lossy(&contents).into_owned());
        } else if member.ends_with(&format!("{artifact_dir}/Definitions/schema.graphql")) {
            payload.description = String::new();
            payload.sdl_schema = Some(String::from_utf8_lossy(&contents).into_owned());
        } else if member.ends_with(&format!("{artifact_dir}/Definitions/asyncapi.json")) {
            let doc = parse_json(&member, &contents)?;
            payload.description = info_description(&doc);
            payload.async_spec = Some(String::from_utf8_lossy(&contents).into_owned());
        }
    }

    if !saw_definition {
        warn!(
            artifact = artifact_dir,
            "Archive has no api.json or api_product.json, skipping"
        );
        return Ok(None);
    }
    Ok(Some(payload))
}


#[cfg(test)]
mod tests {
    use super::test_support::zip_bytes;
    use super::*;
    use tempfile::tempdir;

    const API_JSON: &str = r#"{"type":"api","data":{"id":"u-1","name":"Pizza","version":"1.0.0","type":"HTTP","visibility":"PUBLIC"}}"#;

    #[test]
    fn writer_places_archive_under_stem() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("dev").join("apis");
        let path = ArchiveWriter.write(&target, "Pizza_1.0.0", b"PK-bytes").unwrap();
        assert_eq!(path, target.join("Pizza_1.0.0.zip"));
        assert_eq!(fs::read(&path).unwrap(), b"PK-bytes");
        // Only the final archive remains; the temp file was renamed.
        assert_eq!(fs::read_dir(&target).unwrap().count(), 1);
    }

    #[test]
    fn extracts_rest_api_payload() {
        let bytes = zip_bytes(&[
            ("Pizza-1.0.0/api.json", API_JSON),
            (
                "Pizza-1.0.0/Definitions/swagger.json",
                r#"{"info":{"description":"Order pizza"}}"#,
            ),
        ]);
        let payload = extract_index_payload(&bytes, "Pizza-1.0.0", "wso2.com")
            .unwrap()
            .unwrap();
        assert_eq!(payload.uuid, "u-1");
        assert_eq!(payload.api_name, "Pizza");
        assert_eq!(payload.api_type, "HTTP");
        assert_eq!(payload.tenant_domain, "wso2.com");
        assert_eq!(payload.description, "Order pizza");
        assert!(payload.api_spec.unwrap().contains("Order pizza"));
        assert!(payload.sdl_schema.is_none());
    }

    #[test]
    fn api_product_type_is_fixed() {
        let bytes = zip_bytes(&[(
            "Bundle-1.0.0/api_product.json",
            r#"{"type":"api_product","data":{"id":"p","name":"Bundle","version":"1.0.0","visibility":"PUBLIC"}}"#,
        )]);
        let payload = extract_index_payload(&bytes, "Bundle-1.0.0", "carbon.super")
            .unwrap()
            .unwrap();
        assert_eq!(payload.api_type, "APIPRODUCT");
    }

    #[test]
    fn graphql_schema_is_carried_verbatim() {
        let bytes = zip_bytes(&[
            ("Gql-2.0/api.json", API_JSON.replace("HTTP", "GRAPHQL").as_str()),
            ("Gql-2.0/Definitions/schema.graphql", "type Query { a: Int }"),
        ]);
        let payload = extract_index_payload(&bytes, "Gql-2.0", "carbon.super")
            .unwrap()
            .unwrap();
        assert_eq!(payload.sdl_schema.as_deref(), Some("type Query { a: Int }"));
        assert_eq!(payload.description, "");
    }

    #[test]
    fn non_public_artifact_is_filtered() {
        let bytes = zip_bytes(&[(
            "Secret-1.0.0/api.json",
            API_JSON.replace("PUBLIC", "RESTRICTED").as_str(),
        )]);
        assert!(extract_index_payload(&bytes, "Secret-1.0.0", "t")
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_definition_is_an_error() {
        let bytes = zip_bytes(&[("Bad-1.0.0/api.json", "{not json")]);
        assert!(matches!(
            extract_index_payload(&bytes, "Bad-1.0.0", "t"),
            Err(ArchiveError::Json { .. })
        ));
    }

    #[test]
    fn garbage_bytes_are_not_a_zip() {
        assert!(matches!(
            extract_index_payload(b"definitely not a zip", "X-1", "t"),
            Err(ArchiveError::Zip(_))
        ));
    }
}
