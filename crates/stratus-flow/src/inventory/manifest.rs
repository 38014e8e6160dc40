//! Inventory manifest parsing.

use serde::{Deserialize, Deserializer};

use stratus_core::{Error, Result};

/// A bulk snapshot manifest: the list of data files making up one
/// inventory, with integrity checksums.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Bucket the inventory describes.
    pub source_bucket: String,
    /// Bucket (possibly ARN-qualified) holding the data files.
    pub destination_bucket: String,
    /// Container format of the data files, when stated.
    #[serde(default)]
    pub file_format: Option<String>,
    /// Ordered column names for the data files.
    #[serde(deserialize_with = "deserialize_schema")]
    pub file_schema: Vec<String>,
    /// The data files.
    pub files: Vec<ManifestFile>,
}

/// One data file entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    /// Key of the data file in the destination bucket.
    pub key: String,
    /// Size in bytes, when stated.
    #[serde(default)]
    pub size: Option<i64>,
    /// Hex MD5 of the file contents.
    #[serde(rename = "MD5checksum")]
    pub md5_checksum: String,
}

impl Manifest {
    /// Parses a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or required fields are
    /// missing.
    pub fn from_json(body: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(body)
            .map_err(|e| Error::inventory("manifest", e.to_string()))?;
        if manifest.file_schema.is_empty() {
            return Err(Error::inventory("manifest", "empty fileSchema"));
        }
        Ok(manifest)
    }

    /// The bucket name holding the data files, with any ARN prefix
    /// stripped.
    #[must_use]
    pub fn data_bucket(&self) -> &str {
        self.destination_bucket
            .strip_prefix("arn:aws:s3:::")
            .unwrap_or(&self.destination_bucket)
    }
}

/// The column list arrives either as a JSON array or as one
/// comma-separated string; both normalize to a vector of names.
fn deserialize_schema<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(columns) => columns,
        Raw::Joined(joined) => joined
            .split(',')
            .map(|column| column.trim().to_string())
            .filter(|column| !column.is_empty())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_schema() {
        let manifest = Manifest::from_json(
            r#"{
                "sourceBucket": "data",
                "destinationBucket": "arn:aws:s3:::inventory",
                "fileFormat": "CSV",
                "fileSchema": ["Bucket", "Key", "VersionId", "Size"],
                "files": [{"key": "data/a.csv.gz", "size": 100, "MD5checksum": "abc"}]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.data_bucket(), "inventory");
        assert_eq!(manifest.file_schema.len(), 4);
        assert_eq!(manifest.files[0].md5_checksum, "abc");
    }

    #[test]
    fn parses_joined_schema() {
        let manifest = Manifest::from_json(
            r#"{
                "sourceBucket": "data",
                "destinationBucket": "inventory",
                "fileSchema": "Bucket, Key, Size",
                "files": []
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.file_schema, vec!["Bucket", "Key", "Size"]);
    }

    #[test]
    fn empty_schema_is_rejected() {
        let result = Manifest::from_json(
            r#"{
                "sourceBucket": "data",
                "destinationBucket": "inventory",
                "fileSchema": [],
                "files": []
            }"#,
        );
        assert!(result.is_err());
    }
}
