use rusqlite::Connection;

use super::Migration;
use crate::error::Result;

pub struct V2PublicationYear;

impl Migration for V2PublicationYear {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Add generated publication_year column used by the duplicate matcher"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        let has_year: bool = conn
            .prepare("SELECT 1 FROM pragma_table_xinfo('publications') WHERE name='publication_year'")?
            .exists([])?;

        if !has_year {
            conn.execute_batch(
                "
                ALTER TABLE publications ADD COLUMN publication_year INTEGER
                    GENERATED ALWAYS AS (CAST(substr(publication_date, 1, 4) AS INTEGER)) VIRTUAL;
                CREATE INDEX IF NOT EXISTS idx_publications_year ON publications(publication_year);
                ",
            )?;
        }
        Ok(())
    }
}
