//! Trigger-based change capture.
//!
//! Every rule-visible table gets AFTER INSERT/UPDATE/DELETE triggers that
//! log a compensating SQL statement into `engine_changelog`.  Draining
//! the log newest-first yields a script that exactly reverses the rules'
//! writes; that script is the undo blob for the block.
//!
//! Requires `PRAGMA recursive_triggers = ON` so the delete half of
//! `INSERT OR REPLACE` is captured as well.

use ludex_db::{DbError, DbResult};
use rusqlite::Connection;

use crate::storage::sql_err;

/// Quotes an identifier for embedding in generated SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rule-visible tables: everything not owned by the engine or sqlite.
pub(crate) fn game_tables(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'engine\\_%' ESCAPE '\\'
               AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )
        .map_err(sql_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    Ok(names)
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(sql_err)?;
    let cols = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    if cols.is_empty() {
        return Err(DbError::Other(format!("no such table: {table}")));
    }
    Ok(cols)
}

/// Installs capture triggers on every rule-visible table.  Idempotent.
pub(crate) fn install_capture_triggers(conn: &Connection) -> DbResult<()> {
    for table in game_tables(conn)? {
        install_for_table(conn, &table)?;
    }
    Ok(())
}

fn install_for_table(conn: &Connection, table: &str) -> DbResult<()> {
    let cols = table_columns(conn, table)?;
    let tbl = quote_ident(table);

    // Reversal of an INSERT is deleting the new row.
    let insert_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {trig} AFTER INSERT ON {tbl} BEGIN
           INSERT INTO engine_changelog (sql)
           VALUES ('DELETE FROM {tbl_lit} WHERE rowid=' || NEW.rowid);
         END;",
        trig = quote_ident(&format!("engine_capture_{table}_insert")),
        tbl = tbl,
        tbl_lit = tbl.replace('\'', "''"),
    );

    // Reversal of an UPDATE is restoring every old column value.
    let set_list = cols
        .iter()
        .map(|c| {
            format!(
                "{col_lit}=' || quote(OLD.{col}) || '",
                col_lit = quote_ident(c).replace('\'', "''"),
                col = quote_ident(c),
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    let update_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {trig} AFTER UPDATE ON {tbl} BEGIN
           INSERT INTO engine_changelog (sql)
           VALUES ('UPDATE {tbl_lit} SET {set_list} WHERE rowid=' || OLD.rowid);
         END;",
        trig = quote_ident(&format!("engine_capture_{table}_update")),
        tbl = tbl,
        tbl_lit = tbl.replace('\'', "''"),
        set_list = set_list,
    );

    // Reversal of a DELETE is reinserting the old row, rowid included.
    let col_names = cols
        .iter()
        .map(|c| quote_ident(c).replace('\'', "''"))
        .collect::<Vec<_>>()
        .join(",");
    let col_values = cols
        .iter()
        .map(|c| format!("' || quote(OLD.{}) || '", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(",");
    let delete_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {trig} AFTER DELETE ON {tbl} BEGIN
           INSERT INTO engine_changelog (sql)
           VALUES ('INSERT INTO {tbl_lit} (rowid,{col_names}) VALUES (' || OLD.rowid || ',{col_values})');
         END;",
        trig = quote_ident(&format!("engine_capture_{table}_delete")),
        tbl = tbl,
        tbl_lit = tbl.replace('\'', "''"),
        col_names = col_names,
        col_values = col_values,
    );

    conn.execute_batch(&insert_trigger).map_err(sql_err)?;
    conn.execute_batch(&update_trigger).map_err(sql_err)?;
    conn.execute_batch(&delete_trigger).map_err(sql_err)?;
    Ok(())
}

pub(crate) fn clear_changelog(conn: &Connection) -> DbResult<()> {
    conn.execute("DELETE FROM engine_changelog", [])
        .map_err(sql_err)?;
    Ok(())
}

/// Returns the captured compensating statements newest-first and empties
/// the log.
pub(crate) fn drain_changelog(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT sql FROM engine_changelog ORDER BY seq DESC")
        .map_err(sql_err)?;
    let statements = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    drop(stmt);
    clear_changelog(conn)?;
    Ok(statements)
}

/// Executes an undo script produced by [`drain_changelog`].  The
/// statements themselves fire capture triggers; that echo is discarded.
pub(crate) fn apply_undo_script(conn: &Connection, statements: &[String]) -> DbResult<()> {
    for sql in statements {
        conn.execute_batch(sql).map_err(sql_err)?;
    }
    clear_changelog(conn)?;
    Ok(())
}
