use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 2;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS duplicate_groups (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS publications (
            id                 TEXT PRIMARY KEY,
            title              TEXT NOT NULL,
            secondary_title    TEXT,
            publication_type   TEXT NOT NULL DEFAULT 'other',
            journal            TEXT,
            volume             TEXT,
            issue              TEXT,
            page_range         TEXT,
            issn               TEXT,
            isbn               TEXT,
            doi                TEXT,
            publication_date   TEXT,
            citation_count     INTEGER NOT NULL DEFAULT 0,
            visible            INTEGER NOT NULL DEFAULT 1,
            updated_by_user_at TEXT,
            duplicate_group_id TEXT REFERENCES duplicate_groups(id) ON DELETE SET NULL,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS imports (
            id                TEXT PRIMARY KEY,
            publication_id    TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
            source            TEXT NOT NULL CHECK(source IN ('activity_reporting', 'research_info', 'citation_index', 'manual')),
            source_identifier TEXT NOT NULL,
            source_updated_at TEXT,
            auto_merged       INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            UNIQUE (source, source_identifier)
        );

        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_identifiers (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            scheme      TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (scheme, value)
        );

        CREATE TABLE IF NOT EXISTS contributor_names (
            id             TEXT PRIMARY KEY,
            publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
            position       INTEGER NOT NULL CHECK(position >= 1),
            first_name     TEXT,
            middle_name    TEXT,
            last_name      TEXT,
            user_id        TEXT REFERENCES users(id) ON DELETE SET NULL,
            CHECK (TRIM(COALESCE(first_name, '') || COALESCE(middle_name, '') || COALESCE(last_name, '')) <> '')
        );

        CREATE TABLE IF NOT EXISTS authorships (
            id             TEXT PRIMARY KEY,
            user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
            author_number  INTEGER NOT NULL,
            confirmed      INTEGER NOT NULL DEFAULT 1,
            UNIQUE (user_id, publication_id)
        );

        CREATE TABLE IF NOT EXISTS non_duplicate_groups (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS non_duplicate_members (
            group_id       TEXT NOT NULL REFERENCES non_duplicate_groups(id) ON DELETE CASCADE,
            publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
            PRIMARY KEY (group_id, publication_id)
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_publications_group ON publications(duplicate_group_id);
        CREATE INDEX IF NOT EXISTS idx_publications_doi   ON publications(doi);
        CREATE INDEX IF NOT EXISTS idx_imports_publication ON imports(publication_id);
        CREATE INDEX IF NOT EXISTS idx_contributors_publication ON contributor_names(publication_id);
        CREATE INDEX IF NOT EXISTS idx_authorships_publication ON authorships(publication_id);
        CREATE INDEX IF NOT EXISTS idx_non_duplicate_members_publication ON non_duplicate_members(publication_id);
        ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    create_indexes(conn)?;
    Ok(())
}
