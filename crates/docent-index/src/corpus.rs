//! Markdown corpus loading with front matter metadata.

use std::path::Path;

use crate::error::{IndexError, Result};

/// An immutable unit of source material. Created at corpus build time,
/// retired only by a full rebuild.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub category: String,
    pub source: String,
    pub body: String,
}

/// Load all markdown documents from a directory, sorted by file name.
///
/// Front matter supplies `title`, `category`, and `source`; absent fields
/// fall back to the file stem in title case, `"General"`, and the file
/// name respectively.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or contains no
/// markdown files.
pub async fn load_corpus(dir: &Path) -> Result<Vec<Document>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IndexError::Corpus(format!("cannot read corpus dir {}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(IndexError::Corpus(format!(
            "no markdown documents in {}",
            dir.display()
        )));
    }

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        let content = tokio::fs::read_to_string(path).await?;
        documents.push(parse_document(path, &content));
    }

    tracing::info!(count = documents.len(), dir = %dir.display(), "corpus loaded");
    Ok(documents)
}

fn parse_document(path: &Path, content: &str) -> Document {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (front_matter, body) = split_front_matter(content);

    let field = |key: &str| {
        front_matter
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };

    Document {
        id: stem.clone(),
        title: field("title").unwrap_or_else(|| title_case(&stem)),
        category: field("category").unwrap_or_else(|| "General".to_owned()),
        source: field("source").unwrap_or(file_name),
        body: body.to_owned(),
    }
}

/// Split a `---`-delimited front matter block from the document body.
/// Returns an empty field list when no block is present.
fn split_front_matter(content: &str) -> (Vec<(String, String)>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (Vec::new(), content);
    };
    let Some(end) = rest.find("\n---") else {
        return (Vec::new(), content);
    };

    let fields = rest[..end]
        .lines()
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect();

    let body = rest[end + 4..].trim_start_matches('\n');
    (fields, body)
}

fn title_case(stem: &str) -> String {
    stem.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
