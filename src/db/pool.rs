//! Database connection pool

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

const MIGRATIONS: [(&str, &str); 1] = [(
    "001_initial_schema",
    include_str!("../../migrations/001_initial_schema.sql"),
)];

fn is_memory(database_path: &str) -> bool {
    database_path.contains(":memory:") || database_path.contains("mode=memory")
}

/// Create a new SQLite connection pool
pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let memory = is_memory(database_path);

    if !memory {
        if let Some(parent) = Path::new(database_path.trim_start_matches("sqlite://")).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    // Every connection to `:memory:` is its own database, so keep exactly one alive
    let pool_options = if memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(10)
    };

    pool_options.connect_with(options).await
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, migration_sql) in MIGRATIONS {
        tracing::debug!("Applying migration {}", name);

        for stmt in split_sql_statements(migration_sql) {
            if let Err(e) = sqlx::query(&stmt).execute(pool).await {
                if e.to_string().contains("already exists") {
                    continue;
                }
                tracing::error!(
                    "Migration {} failed at: {} - {}",
                    name,
                    stmt.chars().take(50).collect::<String>(),
                    e
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Split a migration file into statements, dropping `--` comments
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for line in sql.lines() {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_string = !in_string;
                    current.push(c);
                }
                // A comment runs to the end of the line
                '-' if !in_string && chars.peek() == Some(&'-') => break,
                ';' if !in_string => {
                    let stmt = current.trim();
                    if !stmt.is_empty() {
                        statements.push(stmt.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        current.push('\n');
    }

    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }

    statements
}

/// Initialize database - create pool and run migrations
pub async fn init_database(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
