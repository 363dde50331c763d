use sqlx::SqlitePool;

/// Create the tables of a fresh index file.
pub async fn create_index_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per chunk, keyed by its position in the document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_index INTEGER PRIMARY KEY,
            page INTEGER NOT NULL,
            char_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding vectors, little-endian f32 BLOBs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_index INTEGER PRIMARY KEY,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            FOREIGN KEY (chunk_index) REFERENCES chunks(chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_page ON chunks(page)")
        .execute(pool)
        .await?;

    Ok(())
}
