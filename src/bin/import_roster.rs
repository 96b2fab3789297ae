use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, Trim};
use grading_system::{CreateStudentRequest, Database};
use std::collections::HashSet;
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RosterEntry {
    line: usize,
    register_no: String,
    name: String,
    class_name: String,
}

#[derive(Debug, Default)]
struct ImportStats {
    rows_read: usize,
    created: usize,
    duplicates: Vec<String>,
    errors: Vec<String>,
}

impl ImportStats {
    fn print_summary(&self, dry_run: bool) {
        println!("\n=== Import Summary ===");
        println!("Roster rows read: {}", self.rows_read);

        if dry_run {
            println!("Students that WOULD BE created: {}", self.created);
        } else {
            println!("Students created: {}", self.created);
        }

        if !self.duplicates.is_empty() {
            println!("Already on record (skipped): {}", self.duplicates.len());
            for register_no in &self.duplicates {
                println!("  - {}", register_no);
            }
        }
        if !self.errors.is_empty() {
            println!("Errors encountered: {}", self.errors.len());
            for error in &self.errors {
                println!("  - {}", error);
            }
        }

        if dry_run {
            println!("\n** DRY RUN MODE - No changes were made **");
        }
    }
}

/// `registerNo,name,class` per row; a header row, blank lines and `#` comments are skipped.
/// Quoted fields may contain commas.
fn parse_roster(content: &str) -> (Vec<RosterEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    for (index, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|pos| pos.line()).unwrap_or_default();
                errors.push(format!("line {}: unreadable row: {}", line, e));
                continue;
            }
        };
        let line = record.position().map(|pos| pos.line() as usize).unwrap_or(index + 1);

        if index == 0 && record.get(0).is_some_and(|field| field.eq_ignore_ascii_case("registerNo")) {
            continue;
        }

        let fields: Vec<&str> = record.iter().collect();
        match fields.as_slice() {
            [register_no, name, class_name] if !register_no.is_empty() && !name.is_empty() && !class_name.is_empty() => {
                entries.push(RosterEntry {
                    line,
                    register_no: register_no.to_string(),
                    name: name.to_string(),
                    class_name: class_name.to_string(),
                });
            }
            _ => errors.push(format!(
                "line {}: expected registerNo,name,class but got '{}'",
                line,
                fields.join(",")
            )),
        }
    }

    (entries, errors)
}

async fn import_entries(db: &Database, entries: &[RosterEntry], stats: &mut ImportStats, dry_run: bool) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.register_no.clone())
            || db.get_student_by_register_no(&entry.register_no).await?.is_some()
        {
            stats.duplicates.push(entry.register_no.clone());
            continue;
        }

        if dry_run {
            println!("  would create {} ({}, class {})", entry.register_no, entry.name, entry.class_name);
            stats.created += 1;
            continue;
        }

        let request = CreateStudentRequest {
            register_no: entry.register_no.clone(),
            name: entry.name.clone(),
            class_name: entry.class_name.clone(),
        };
        match db.create_student(request).await {
            Ok(student) => {
                stats.created += 1;
                println!("✓ Created {} ({})", student.register_no, student.id);
            }
            Err(e) => stats
                .errors
                .push(format!("line {}: failed to create {}: {}", entry.line, entry.register_no, e)),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let dry_run = args.iter().any(|arg| arg == "--dry-run");
    let path = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .ok_or_else(|| anyhow!("usage: import_roster <roster.csv> [--dry-run]"))?;

    println!("=== Class Roster Import ===");
    if dry_run {
        println!("** RUNNING IN DRY-RUN MODE **");
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read roster file '{}'", path))?;
    let (entries, parse_errors) = parse_roster(&content);

    let mut stats = ImportStats {
        rows_read: entries.len() + parse_errors.len(),
        errors: parse_errors,
        ..ImportStats::default()
    };

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:grading_system.db".to_string());
    println!("\nConnecting to database: {}", database_url);
    let db = Database::new(&database_url).await?;

    import_entries(&db, &entries, &mut stats, dry_run).await?;
    stats.print_summary(dry_run);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roster() {
        let content = "registerNo,name,class\n# transferred in\nREG001, Asha ,10A\n\nREG002,Ravi,10B\n";
        let (entries, errors) = parse_roster(content);

        assert!(errors.is_empty());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Asha");
        assert_eq!(entries[0].register_no, "REG001");
        assert_eq!(entries[1].class_name, "10B");
    }

    #[test]
    fn test_parse_roster_reports_bad_rows() {
        let (entries, errors) = parse_roster("REG001,Asha\nREG002,Ravi,10B,extra\nREG003,Mei,10A");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].register_no, "REG003");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("line 1:"));
    }

    #[test]
    fn test_parse_roster_quoted_name_with_comma() {
        let (entries, errors) = parse_roster("registerNo,name,class\nREG9,\"Rao, Mei\",10A\n");

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            entries,
            vec![RosterEntry {
                line: 2,
                register_no: "REG9".to_string(),
                name: "Rao, Mei".to_string(),
                class_name: "10A".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_dry_run_counts_repeated_rows_once() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let (entries, _) = parse_roster("REG001,Asha,10A\nREG001,Asha again,10A\nREG002,Ravi,10A");

        let mut stats = ImportStats::default();
        import_entries(&db, &entries, &mut stats, true).await.unwrap();

        assert_eq!(stats.created, 2);
        assert_eq!(stats.duplicates, vec!["REG001".to_string()]);
        assert!(db.get_students_by_class("10A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_skips_existing_students() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let (entries, _) = parse_roster("REG001,Asha,10A\nREG001,Asha again,10A\nREG002,Ravi,10A");

        let mut stats = ImportStats::default();
        import_entries(&db, &entries, &mut stats, false).await.unwrap();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.duplicates, vec!["REG001".to_string()]);

        let mut dry = ImportStats::default();
        import_entries(&db, &entries, &mut dry, true).await.unwrap();
        assert_eq!(dry.created, 0);
        assert_eq!(db.get_students_by_class("10A").await.unwrap().len(), 2);
    }
}
