//! Artifact descriptors and the composite identity keys used to checkpoint them.
//!
//! Every artifact kind the tool migrates (APIs, Applications, MCP Servers, and
//! API Products for the indexing upload) is described by a small serde struct
//! mirroring the management service's list response. Descriptors implement
//! [`ArtifactDescriptor`], which gives the export driver everything it needs
//! without knowing which kind it is walking:
//!   - an [`IdentityKey`] to match the last-succeeded marker against a page,
//!   - an archive stem for the exported zip,
//!   - a human-readable name for progress output.
//!
//! Identity keys never include numeric/uuid ids: the marker file only stores
//! the composite key, and ids are not stable across environments anyway.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle states that make an artifact a candidate for the indexing upload.
pub const PUBLISHABLE_LIFECYCLE_STATES: [&str; 2] = ["PUBLISHED", "PROTOTYPED"];

/// Page size used when walking API and API Product collections.
pub const MAX_APIS_TO_EXPORT_ONCE: usize = 20;
/// Page size used when walking Application collections.
pub const MAX_APPS_TO_EXPORT_ONCE: usize = 20;
/// Page size used when walking MCP Server collections.
pub const MAX_MCP_SERVERS_TO_EXPORT_ONCE: usize = 20;

/// The kinds of artifact a run can walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Api,
    Application,
    McpServer,
    ApiProduct,
}

impl ArtifactKind {
    /// Short slug used in checkpoint file names.
    pub fn slug(&self) -> &'static str {
        match self {
            ArtifactKind::Api => "apis",
            ArtifactKind::Application => "apps",
            ArtifactKind::McpServer => "mcp-servers",
            ArtifactKind::ApiProduct => "api-products",
        }
    }

    /// Subdirectory (under `<env>/<tenant-dir>/`) that holds exported archives.
    pub fn archive_subdir(&self) -> &'static str {
        self.slug()
    }

    pub fn metadata_file_name(&self) -> String {
        format!("migration-{}-export-metadata.yaml", self.slug())
    }

    pub fn marker_file_name(&self) -> String {
        let singular = match self {
            ArtifactKind::Api => "api",
            ArtifactKind::Application => "app",
            ArtifactKind::McpServer => "mcp-server",
            ArtifactKind::ApiProduct => "api-product",
        };
        format!("last-succeeded-{singular}.log")
    }

    pub fn default_page_size(&self) -> usize {
        match self {
            ArtifactKind::Api | ArtifactKind::ApiProduct => MAX_APIS_TO_EXPORT_ONCE,
            ArtifactKind::Application => MAX_APPS_TO_EXPORT_ONCE,
            ArtifactKind::McpServer => MAX_MCP_SERVERS_TO_EXPORT_ONCE,
        }
    }

    /// Number of fields in this kind's identity key.
    pub fn identity_arity(&self) -> usize {
        match self {
            ArtifactKind::Application => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Api => "APIs",
            ArtifactKind::Application => "Applications",
            ArtifactKind::McpServer => "MCP Servers",
            ArtifactKind::ApiProduct => "API Products",
        };
        f.write_str(name)
    }
}

const MARKER_FIELD_SEPARATOR: &str = "\t";

/// Composite key identifying an artifact across checkpoint files.
///
/// The first field is always the artifact name; the remaining fields are
/// kind-specific (version + provider, or owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    fields: Vec<String>,
}

impl IdentityKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Tab-delimited rendering stored in the last-succeeded marker.
    pub fn to_marker_line(&self) -> String {
        self.fields.join(MARKER_FIELD_SEPARATOR)
    }

    /// Parses a marker line written by [`IdentityKey::to_marker_line`].
    ///
    /// Fields are split from the right, so the trailing `arity - 1` fields are
    /// the fixed ones and the name is kept byte for byte. A line without any
    /// tab comes from an older space-delimited marker and is read that way.
    pub fn parse_marker_line(line: &str, arity: usize) -> Option<Self> {
        if arity == 0 {
            return None;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if arity > 1 && !line.contains(MARKER_FIELD_SEPARATOR) {
            return Self::parse_space_delimited(line, arity);
        }
        let mut fields: Vec<String> = line
            .rsplitn(arity, MARKER_FIELD_SEPARATOR)
            .map(str::to_string)
            .collect();
        if fields.len() != arity || fields.iter().any(String::is_empty) {
            return None;
        }
        fields.reverse();
        Some(Self { fields })
    }

    fn parse_space_delimited(line: &str, arity: usize) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < arity {
            return None;
        }
        let name_len = tokens.len() - (arity - 1);
        let mut fields = Vec::with_capacity(arity);
        fields.push(tokens[..name_len].join(" "));
        fields.extend(tokens[name_len..].iter().map(|t| t.to_string()));
        Some(Self { fields })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.fields)
    }
}

/// Capability set shared by every descriptor the export driver walks.
pub trait ArtifactDescriptor:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn identity_key(&self) -> IdentityKey;

    /// File stem (without `.zip`) of the exported archive.
    fn archive_stem(&self) -> String;

    fn display_name(&self) -> String;
}

/// An API as returned by the publisher list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub context: String,
    pub version: String,
    pub provider: String,
    #[serde(default)]
    pub life_cycle_status: String,
}

impl ApiDescriptor {
    pub fn is_publishable(&self) -> bool {
        PUBLISHABLE_LIFECYCLE_STATES.contains(&self.life_cycle_status.as_str())
    }

    /// Top-level directory name inside an exported archive.
    pub fn archive_dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl ArtifactDescriptor for ApiDescriptor {
    fn identity_key(&self) -> IdentityKey {
        IdentityKey::new([&self.name, &self.version, &self.provider])
    }

    fn archive_stem(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }

    fn display_name(&self) -> String {
        format!("{} {} (provider: {})", self.name, self.version, self.provider)
    }
}

/// An application as returned by the admin application list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
    #[serde(default)]
    pub application_id: String,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub status: String,
}

/// Owners from secondary user stores look like `DOMAIN/user`; the `/` would be
/// taken as a path separator in the archive file name.
fn replace_user_store_domain_delimiter(owner: &str) -> String {
    owner.replace('/', "#")
}

impl ArtifactDescriptor for ApplicationDescriptor {
    fn identity_key(&self) -> IdentityKey {
        IdentityKey::new([&self.name, &self.owner])
    }

    fn archive_stem(&self) -> String {
        format!(
            "{}_{}",
            replace_user_store_domain_delimiter(&self.owner),
            self.name
        )
    }

    fn display_name(&self) -> String {
        format!("{} (owner: {})", self.name, self.owner)
    }
}

/// An MCP server as returned by the publisher MCP server list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDescriptor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub version: String,
    pub provider: String,
    #[serde(default)]
    pub life_cycle_status: String,
}

impl ArtifactDescriptor for McpServerDescriptor {
    fn identity_key(&self) -> IdentityKey {
        IdentityKey::new([&self.name, &self.version, &self.provider])
    }

    fn archive_stem(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }

    fn display_name(&self) -> String {
        format!("{} {} (provider: {})", self.name, self.version, self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(name: &str, version: &str, provider: &str) -> ApiDescriptor {
        ApiDescriptor {
            name: name.into(),
            version: version.into(),
            provider: provider.into(),
            ..Default::default()
        }
    }

    #[test]
    fn api_identity_ignores_id() {
        let mut a = api("Pizza", "1.0.0", "admin");
        let mut b = a.clone();
        a.id = "1111".into();
        b.id = "2222".into();
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn marker_line_keeps_names_exactly() {
        for name in ["Pizza Shack", "Pizza  Shack", " Pizza", "Pizza ", "Pizza\tShack"] {
            let key = api(name, "1.0.0", "admin").identity_key();
            let line = key.to_marker_line();
            assert_eq!(IdentityKey::parse_marker_line(&line, 3), Some(key), "{name:?}");
        }
        assert_eq!(
            api("Pizza Shack", "1.0.0", "admin").identity_key().to_marker_line(),
            "Pizza Shack\t1.0.0\tadmin"
        );
    }

    #[test]
    fn space_delimited_marker_is_still_read() {
        let parsed = IdentityKey::parse_marker_line("Pizza Shack 1.0.0 admin\n", 3).unwrap();
        assert_eq!(parsed, api("Pizza Shack", "1.0.0", "admin").identity_key());
    }

    #[test]
    fn marker_line_with_too_few_fields_is_rejected() {
        assert!(IdentityKey::parse_marker_line("PizzaShack 1.0.0", 3).is_none());
        assert!(IdentityKey::parse_marker_line("PizzaShack\t1.0.0", 3).is_none());
        assert!(IdentityKey::parse_marker_line("\t1.0.0\tadmin", 3).is_none());
        assert!(IdentityKey::parse_marker_line("", 2).is_none());
    }

    #[test]
    fn application_archive_stem_escapes_user_store_domain() {
        let app = ApplicationDescriptor {
            name: "DefaultApplication".into(),
            owner: "SECONDARY/alice".into(),
            ..Default::default()
        };
        assert_eq!(app.archive_stem(), "SECONDARY#alice_DefaultApplication");
        assert_eq!(
            app.identity_key(),
            IdentityKey::new(["DefaultApplication", "SECONDARY/alice"])
        );
    }

    #[test]
    fn only_published_or_prototyped_apis_are_publishable() {
        let mut a = api("A", "v1", "admin");
        for (state, expected) in [
            ("PUBLISHED", true),
            ("PROTOTYPED", true),
            ("CREATED", false),
            ("DEPRECATED", false),
            ("", false),
        ] {
            a.life_cycle_status = state.into();
            assert_eq!(a.is_publishable(), expected, "state {state}");
        }
    }

    #[test]
    fn checkpoint_file_names_follow_kind() {
        assert_eq!(
            ArtifactKind::Api.metadata_file_name(),
            "migration-apis-export-metadata.yaml"
        );
        assert_eq!(ArtifactKind::Api.marker_file_name(), "last-succeeded-api.log");
        assert_eq!(
            ArtifactKind::McpServer.marker_file_name(),
            "last-succeeded-mcp-server.log"
        );
        assert_eq!(ArtifactKind::Application.archive_subdir(), "apps");
    }

    #[test]
    fn descriptor_deserialises_from_camel_case_list_entry() {
        let json = r#"{"id":"abc","name":"Pizza","context":"/pizza","version":"1.0.0","provider":"admin","lifeCycleStatus":"PUBLISHED","extra":"ignored"}"#;
        let parsed: ApiDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.life_cycle_status, "PUBLISHED");
        assert_eq!(parsed.context, "/pizza");
    }
}
