use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Metadata for one file-like unit inside a dataset version.
///
/// Every field except `path` is optional, and `None` means the producer never
/// recorded it. A recorded size of zero is kept as `Some(0)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    path: String,
    #[serde(
        default,
        deserialize_with = "deserialize_u64",
        skip_serializing_if = "Option::is_none"
    )]
    size: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_epoch_millis",
        serialize_with = "serialize_epoch_millis",
        skip_serializing_if = "Option::is_none"
    )]
    last_modified_at_source: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "deserialize_checksum",
        skip_serializing_if = "Option::is_none"
    )]
    md5: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_checksum",
        skip_serializing_if = "Option::is_none"
    )]
    sha256: Option<String>,
}

impl ComponentDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            last_modified_at_source: None,
            md5: None,
            sha256: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified_at_source = Some(at);
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn last_modified_at_source(&self) -> Option<DateTime<Utc>> {
        self.last_modified_at_source
    }

    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }
}

// Protobuf JSON encodes 64-bit integers as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProtoU64 {
    Number(u64),
    Text(String),
}

impl ProtoU64 {
    fn value<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            ProtoU64::Number(value) => Ok(value),
            ProtoU64::Text(text) => text
                .parse()
                .map_err(|_| E::custom(format!("expected an unsigned integer, got {text:?}"))),
        }
    }
}

fn deserialize_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<ProtoU64>::deserialize(deserializer)?
        .map(ProtoU64::value)
        .transpose()
}

fn deserialize_epoch_millis<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(millis) = deserialize_u64(deserializer)? else {
        return Ok(None);
    };

    let millis = i64::try_from(millis).map_err(D::Error::custom)?;
    DateTime::from_timestamp_millis(millis)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("timestamp {millis} is out of range")))
}

fn serialize_epoch_millis<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(at) => serializer.serialize_i64(at.timestamp_millis()),
        None => serializer.serialize_none(),
    }
}

// An empty checksum is proto3's way of saying "not recorded".
fn deserialize_checksum<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|checksum| !checksum.is_empty()))
}
