use figment::{
    Error, Metadata, Profile, Provider,
    value::{Dict, Map, Tag, Value},
};
use std::path::{Path, PathBuf};

/// Wraps a provider so that any `<key>_file` entry also yields `<key>` with
/// the referenced file's contents. Relative paths resolve against the
/// directory of the config file that named them.
pub struct FileReferenceProvider<P> {
    inner: P,
}

impl<P> FileReferenceProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Provider> Provider for FileReferenceProvider<P> {
    fn metadata(&self) -> Metadata {
        self.inner.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let data = self.inner.data()?;

        let base_path = self
            .inner
            .metadata()
            .source
            .as_ref()
            .and_then(|s| match s {
                figment::Source::File(path) => path.parent().map(Path::to_path_buf),
                _ => None,
            })
            .unwrap_or_else(|| PathBuf::from("."));

        data.into_iter()
            .map(|(profile, dict)| Ok((profile, resolve_dict(&base_path, dict)?)))
            .collect()
    }

    fn profile(&self) -> Option<Profile> {
        self.inner.profile()
    }
}

fn resolve_dict(base_path: &Path, dict: Dict) -> Result<Dict, Error> {
    let mut resolved = Dict::new();

    for (key, value) in dict {
        let value = resolve_value(base_path, value)?;

        if let (Some(target), Value::String(_, path)) = (key.strip_suffix("_file"), &value) {
            let path = base_path.join(path);
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::from(format!("Failed to read {path:?}: {e}")))?;
            // Secrets are usually written with a trailing newline
            resolved.insert(
                target.to_string(),
                Value::String(Tag::Default, contents.trim_end().to_string()),
            );
        }

        resolved.insert(key, value);
    }

    Ok(resolved)
}

fn resolve_value(base_path: &Path, value: Value) -> Result<Value, Error> {
    match value {
        Value::Dict(tag, dict) => Ok(Value::Dict(tag, resolve_dict(base_path, dict)?)),
        Value::Array(tag, values) => Ok(Value::Array(
            tag,
            values
                .into_iter()
                .map(|v| resolve_value(base_path, v))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{Figment, providers::Serialized};
    use std::fs::write;
    use tempfile::tempdir;

    #[derive(Debug, serde::Deserialize)]
    struct Credentials {
        email: String,
        dev_key: String,
    }

    #[derive(Debug, serde::Deserialize)]
    struct Config {
        credentials: Credentials,
    }

    #[test]
    fn nested_file_reference_is_read_and_trimmed() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("dev.key");
        write(&key, "s3cr3t\n").unwrap();

        let config = serde_json::json!({
            "credentials": {
                "email": "someone@example.com",
                "dev_key_file": key.to_str().unwrap(),
            }
        });

        let figment = Figment::from(FileReferenceProvider::new(Serialized::from(
            config, "default",
        )));

        let cfg: Config = figment.extract().unwrap();

        assert_eq!(cfg.credentials.email, "someone@example.com");
        assert_eq!(cfg.credentials.dev_key, "s3cr3t");
    }

    #[test]
    fn missing_file_is_an_error() {
        let config = serde_json::json!({
            "credentials": {
                "email": "someone@example.com",
                "dev_key_file": "/nonexistent/datablob/dev.key",
            }
        });

        let figment = Figment::from(FileReferenceProvider::new(Serialized::from(
            config, "default",
        )));

        assert!(figment.extract::<Config>().is_err());
    }
}
