use super::types::{DocumentLoader, EngineError, LoadedDocument};
use async_trait::async_trait;
use std::path::Path;

/// Loader that treats every file as UTF-8 text, replacing invalid sequences.
///
/// It does not unpack `.pptx` archives. Slide decks must be reduced to text by an injected
/// extractor; this loader only suits plain-text inputs. Control characters are blanked so
/// binary input cannot leak into previews or passages as raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextLoader;

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, EngineError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| EngineError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(LoadedDocument {
            text: printable_text(&bytes),
            title: None,
        })
    }
}

fn printable_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .map(|ch| {
            if ch.is_control() && !ch.is_whitespace() {
                ' '
            } else {
                ch
            }
        })
        .collect()
}
