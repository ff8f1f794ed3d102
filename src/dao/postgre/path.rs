use std::{fs, io, path::PathBuf};

const MIGRATION_DIR: [&str; 2] = ["migration", "postgresql"];

fn migration_path(root: &str, file: &str) -> PathBuf {
    let mut path = PathBuf::from(root);
    path.extend(MIGRATION_DIR);
    path.push(file);
    path
}

/// Reads one DDL file from `<root>/migration/postgresql`.
pub fn read_migration(root: &str, file: &str) -> Result<String, io::Error> {
    fs::read_to_string(migration_path(root, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_path() {
        let path = migration_path("/srv/wallet", "balance.sql");
        assert_eq!(
            path,
            PathBuf::from("/srv/wallet/migration/postgresql/balance.sql")
        );
    }

    #[test]
    fn test_every_migration_is_shipped() {
        let root = env!("CARGO_MANIFEST_DIR");
        let ddl = read_migration(root, "utility.sql").unwrap();
        assert!(ddl.contains("IF NOT EXISTS"));
        assert!(read_migration(root, "missing.sql").is_err());
    }
}
