/// Tables owned by the record store. Applied by `Database::execute_init`.
pub const SCHEMA: &str = "
    -- One row per source message. Embeddings are vector literals: [0.1,0.2,...]
    CREATE TABLE IF NOT EXISTS messages (
        message_id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        user_name TEXT NOT NULL,
        attachment_urls TEXT NOT NULL DEFAULT '[]',
        embedding TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_messages_user_date ON messages (user_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_channel_date ON messages (channel_id, timestamp);

    CREATE TABLE IF NOT EXISTS managed_threads (
        thread_id INTEGER PRIMARY KEY,
        author_id INTEGER NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS user_preferences (
        user_id INTEGER PRIMARY KEY,
        occupation TEXT,
        traits TEXT,
        additional_informations TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
";
