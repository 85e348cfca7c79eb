//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `objedit_core` linkage with deterministic output.
//! - Optionally open an object database and report its object count.

use objedit_core::{ObjectBackend, ObjectListQuery, SqliteObjectRepository};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("objedit_core ping={}", objedit_core::ping());
    println!("objedit_core version={}", objedit_core::core_version());

    let Some(db_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };
    match count_objects(&db_path) {
        Ok(total) => {
            println!("objedit_core objects={total}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("objedit_core error={err}");
            ExitCode::FAILURE
        }
    }
}

fn count_objects(db_path: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let conn = objedit_core::open_db(db_path)?;
    let repo = SqliteObjectRepository::try_new(&conn)?;
    let page = repo.list_object_ids(&ObjectListQuery::default())?;
    Ok(page.total)
}
