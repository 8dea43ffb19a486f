//! Reference classifier table (`kpved_classifier`)

use nomen_common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::models::KpvedEntry;
use crate::services::reference_tree::{code_level, derive_parent_code};
use crate::utils::begin_monitored;

static CODE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]|\d{2}(?:\.\d{1,2}){0,3})\s*\t(.*)$").expect("valid reference code regex")
});

pub async fn load_entries(pool: &SqlitePool) -> Result<Vec<KpvedEntry>> {
    let rows = sqlx::query("SELECT code, name, parent_code FROM kpved_classifier ORDER BY code ASC")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| KpvedEntry {
            code: row.get("code"),
            name: row.get("name"),
            parent_code: row.get("parent_code"),
        })
        .collect())
}

/// Insert or replace entries in one transaction; returns the row count written
pub async fn insert_entries(pool: &SqlitePool, entries: &[KpvedEntry]) -> Result<usize> {
    let mut tx = begin_monitored(pool, "reference::insert_entries").await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO kpved_classifier (code, name, parent_code, level)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&entry.code)
        .bind(&entry.name)
        .bind(&entry.parent_code)
        .bind(code_level(&entry.code).map(|l| l as i64))
        .execute(tx.conn()?)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(entries = entries.len(), "Reference classifier entries stored");

    Ok(entries.len())
}

/// Parse a tab-separated `code<TAB>name` listing
///
/// Lines that do not start with a code continue the previous entry's name.
/// Classes take the most recent section line as parent.
pub fn parse_reference_text(text: &str) -> Vec<KpvedEntry> {
    let mut entries: Vec<KpvedEntry> = Vec::new();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        if let Some(caps) = CODE_LINE.captures(line) {
            let code = caps[1].trim().to_string();
            let name = caps[2].trim().to_string();

            let parent_code = if code.len() == 1 {
                current_section = Some(code.clone());
                None
            } else if code.len() == 2 {
                current_section.clone()
            } else {
                derive_parent_code(&code)
            };

            entries.push(KpvedEntry { code, name, parent_code });
        } else if let Some(last) = entries.last_mut() {
            let continuation = line.trim();
            if !continuation.is_empty() {
                if !last.name.is_empty() {
                    last.name.push(' ');
                }
                last.name.push_str(continuation);
            }
        }
    }

    entries
}

pub fn parse_reference_file(path: &Path) -> Result<Vec<KpvedEntry>> {
    let text = std::fs::read_to_string(path)?;
    let entries = parse_reference_text(&text);
    if entries.is_empty() {
        return Err(Error::Validation(format!(
            "no reference codes found in {}",
            path.display()
        )));
    }
    tracing::info!(path = %path.display(), entries = entries.len(), "Parsed reference classifier file");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "C\tПродукция обрабатывающих производств\n\
25\tИзделия металлические готовые,\n\
\tкроме машин и оборудования\n\
25.7\tИзделия ножевые, инструменты\n\
25.73\tИнструменты\n\
25.73.3\tИнструменты ручные прочие\n";

    #[test]
    fn test_parse_links_classes_to_sections() {
        let entries = parse_reference_text(LISTING);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].parent_code, None);
        assert_eq!(entries[1].parent_code.as_deref(), Some("C"));
        assert_eq!(entries[2].parent_code.as_deref(), Some("25"));
        assert_eq!(entries[4].parent_code.as_deref(), Some("25.73"));
    }

    #[test]
    fn test_parse_joins_continuation_lines() {
        let entries = parse_reference_text(LISTING);
        assert_eq!(
            entries[1].name,
            "Изделия металлические готовые, кроме машин и оборудования"
        );
    }

    #[tokio::test]
    async fn test_insert_and_load_entries() {
        let pool = nomen_common::pool::open_memory_pool().await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();

        let written = insert_entries(&pool, &parse_reference_text(LISTING)).await.unwrap();
        assert_eq!(written, 5);

        // Replacing keeps codes unique
        insert_entries(&pool, &parse_reference_text(LISTING)).await.unwrap();
        let loaded = load_entries(&pool).await.unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[0].code, "25");
    }

    #[test]
    fn test_parse_reference_file_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "header only\n").unwrap();
        assert!(matches!(parse_reference_file(&path), Err(Error::Validation(_))));
    }
}
