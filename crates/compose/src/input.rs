//! Function input: which source the template text is read from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use stencil_core::{Object, ENVIRONMENT_CONTEXT_KEY};

use crate::merge::shape;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("cannot parse input: {0}")]
    Parse(String),
    #[error("source is required")]
    MissingSource,
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("inline.template should be provided")]
    MissingInline,
    #[error("fileSystem.dirPath should be provided")]
    MissingDirPath,
    #[error("environment.key should be provided")]
    MissingEnvironmentKey,
    #[error("cannot read tmpl from the folder {dir}: {reason}")]
    ReadFolder { dir: String, reason: String },
    #[error("cannot read tmpl from the environment: {0}")]
    ReadEnvironment(String),
}

/// Input document as it arrives on the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<FileSystemSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineSource {
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSource {
    #[serde(default)]
    pub dir_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentSource {
    #[serde(default)]
    pub key: String,
}

/// A validated template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    FileSystem(PathBuf),
    /// Key inside the environment entry of the request context.
    Environment(String),
}

impl Input {
    pub fn from_value(v: &Json) -> Result<Self, InputError> {
        if v.is_null() { return Ok(Self::default()); }
        serde_json::from_value(v.clone()).map_err(|e| InputError::Parse(e.to_string()))
    }

    /// Only the block selected by `source` is checked.
    pub fn source(self) -> Result<TemplateSource, InputError> {
        match self.source.as_str() {
            "" => Err(InputError::MissingSource),
            "Inline" => self
                .inline
                .map(|i| i.template)
                .filter(|t| !t.is_empty())
                .map(TemplateSource::Inline)
                .ok_or(InputError::MissingInline),
            "FileSystem" => self
                .file_system
                .map(|f| f.dir_path)
                .filter(|d| !d.is_empty())
                .map(|d| TemplateSource::FileSystem(PathBuf::from(d)))
                .ok_or(InputError::MissingDirPath),
            "Environment" => self
                .environment
                .map(|e| e.key)
                .filter(|k| !k.is_empty())
                .map(TemplateSource::Environment)
                .ok_or(InputError::MissingEnvironmentKey),
            other => Err(InputError::InvalidSource(other.to_string())),
        }
    }
}

impl TemplateSource {
    pub fn from_input(v: &Json) -> Result<Self, InputError> {
        Input::from_value(v)?.source()
    }

    pub fn label(&self) -> &'static str {
        match self {
            TemplateSource::Inline(_) => "Inline",
            TemplateSource::FileSystem(_) => "FileSystem",
            TemplateSource::Environment(_) => "Environment",
        }
    }

    /// Fetch the template text. `context` is the request context.
    pub fn template(&self, context: &Object) -> Result<String, InputError> {
        match self {
            TemplateSource::Inline(t) => Ok(t.clone()),
            TemplateSource::FileSystem(dir) => read_templates(dir),
            TemplateSource::Environment(key) => {
                let env = context.get(ENVIRONMENT_CONTEXT_KEY).ok_or_else(|| {
                    InputError::ReadEnvironment(format!("{ENVIRONMENT_CONTEXT_KEY} key does not exist in context"))
                })?;
                match env.get(key) {
                    Some(Json::String(s)) => Ok(s.clone()),
                    Some(other) => Err(InputError::ReadEnvironment(format!("key: {key} is not a string, found {}", shape(other)))),
                    None => Err(InputError::ReadEnvironment(format!("key: {key} does not exist"))),
                }
            }
        }
    }
}

/// Every non-hidden regular file under `dir`, in path order, each followed
/// by a document separator.
fn read_templates(dir: &Path) -> Result<String, InputError> {
    let folder_err = |e: std::io::Error| InputError::ReadFolder { dir: dir.display().to_string(), reason: e.to_string() };
    let mut files = Vec::new();
    collect_files(dir, &mut files).map_err(folder_err)?;
    files.sort();
    let mut out = String::new();
    for f in files {
        out.push_str(&std::fs::read_to_string(&f).map_err(folder_err)?);
        out.push_str("\n---\n");
    }
    Ok(out)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // Hidden entries, including mounted-volume `..data` links.
        if entry.file_name().to_string_lossy().starts_with('.') { continue; }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("stencil-input-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn source_is_required() {
        assert_eq!(TemplateSource::from_input(&json!({})), Err(InputError::MissingSource));
        assert_eq!(TemplateSource::from_input(&Json::Null), Err(InputError::MissingSource));
        assert_eq!(
            TemplateSource::from_input(&json!({"source": "wrong"})),
            Err(InputError::InvalidSource("wrong".into()))
        );
    }

    #[test]
    fn selected_block_must_be_filled() {
        assert_eq!(TemplateSource::from_input(&json!({"source": "Inline"})), Err(InputError::MissingInline));
        assert_eq!(
            TemplateSource::from_input(&json!({"source": "Inline", "inline": {"template": ""}})),
            Err(InputError::MissingInline)
        );
        assert_eq!(TemplateSource::from_input(&json!({"source": "FileSystem"})), Err(InputError::MissingDirPath));
        assert_eq!(
            TemplateSource::from_input(&json!({"source": "Environment", "environment": {}})),
            Err(InputError::MissingEnvironmentKey)
        );
        // Unselected blocks are not validated.
        let src = TemplateSource::from_input(&json!({"source": "Inline", "inline": {"template": "x"}, "fileSystem": {}})).unwrap();
        assert_eq!(src, TemplateSource::Inline("x".into()));
    }

    #[test]
    fn error_messages_match_field_paths() {
        assert_eq!(InputError::MissingInline.to_string(), "inline.template should be provided");
        assert_eq!(InputError::MissingDirPath.to_string(), "fileSystem.dirPath should be provided");
        assert_eq!(InputError::MissingEnvironmentKey.to_string(), "environment.key should be provided");
    }

    #[test]
    fn environment_source_reads_from_context() {
        let src = TemplateSource::from_input(&json!({"source": "Environment", "environment": {"key": "userkey/go-template"}})).unwrap();
        let mut ctx = Object::new();
        let err = src.template(&ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot read tmpl from the environment: apiextensions.crossplane.io/environment key does not exist in context"
        );

        ctx.insert(ENVIRONMENT_CONTEXT_KEY.into(), json!({"other": "x"}));
        let err = src.template(&ctx).unwrap_err();
        assert!(err.to_string().ends_with("key: userkey/go-template does not exist"), "{}", err);

        ctx.insert(ENVIRONMENT_CONTEXT_KEY.into(), json!({"userkey/go-template": "kind: A\n"}));
        assert_eq!(src.template(&ctx).unwrap(), "kind: A\n");
    }

    #[test]
    fn filesystem_source_concatenates_visible_files_in_order() {
        let dir = temp_dir("fs");
        std::fs::write(dir.join("b.yaml"), "kind: B").unwrap();
        std::fs::write(dir.join("a.yaml"), "kind: A").unwrap();
        std::fs::write(dir.join(".hidden"), "kind: Hidden").unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub").join("c.yaml"), "kind: C").unwrap();

        let src = TemplateSource::FileSystem(dir.clone());
        let text = src.template(&Object::new()).unwrap();
        assert_eq!(text, "kind: A\n---\nkind: B\n---\nkind: C\n---\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_folder_is_reported() {
        let dir = std::env::temp_dir().join("stencil-input-does-not-exist-7f3a");
        let err = TemplateSource::FileSystem(dir.clone()).template(&Object::new()).unwrap_err();
        assert!(err.to_string().starts_with(&format!("cannot read tmpl from the folder {}", dir.display())), "{}", err);
    }
}
