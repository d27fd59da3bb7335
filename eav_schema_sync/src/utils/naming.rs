//! Naming utilities
//!
//! Index names, identifier truncation and file names for generated
//! migrations.

use inflector::Inflector;

/// Maximum identifier length honoured by every supported database
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Format a name according to a pattern with placeholders
pub fn format_name(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();

    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{}}}", placeholder), value);
    }

    result
}

/// Get index name from table and columns according to pattern
pub fn get_index_name(pattern: &str, table_name: &str, columns: &[String]) -> String {
    let columns_str = columns.join("_");

    format_name(
        pattern,
        &[("table", table_name), ("columns", &columns_str)],
    )
}

/// Truncate an identifier to fit database limits
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    if name.len() <= max_length || max_length <= 9 {
        return name.to_string();
    }

    // 8 hash characters plus the separating underscore
    let keep_length = max_length - 9;
    let hash = format!("{:x}", md5::compute(name.as_bytes()));

    let mut end = keep_length.min(name.len());
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}_{}", &name[..end], &hash[0..8])
}

/// Format name as a valid file name
pub fn format_file_name(name: &str) -> String {
    name.to_snake_case()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Create a timestamp-prefixed migration name
pub fn create_migration_name(description: &str, timestamp: bool) -> String {
    let clean_description = format_file_name(description);

    if timestamp {
        let now = chrono::Utc::now();
        format!("{}_{}", now.format("%Y%m%d%H%M%S"), clean_description)
    } else {
        clean_description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_name() {
        assert_eq!(
            format_name("idx_{table}_{columns}", &[("table", "product_int"), ("columns", "value")]),
            "idx_product_int_value"
        );
    }

    #[test]
    fn test_index_name() {
        assert_eq!(
            get_index_name(
                "idx_{table}_{columns}",
                "product_varchar",
                &["attribute_id".to_string(), "value".to_string()]
            ),
            "idx_product_varchar_attribute_id_value"
        );
    }

    #[test]
    fn test_truncate_identifier() {
        let long_name = "this_is_a_very_long_identifier_that_exceeds_database_limits";
        let truncated = truncate_identifier(long_name, 30);

        assert_eq!(truncated.len(), 30);
        assert!(truncated.starts_with("this_is_a_very_long"));
        assert_eq!(truncate_identifier("short", 30), "short");
    }

    #[test]
    fn test_migration_name() {
        assert_eq!(create_migration_name("Sync Product schema", false), "sync_product_schema");

        let stamped = create_migration_name("sync product", true);
        assert_eq!(stamped.len(), "20240101120000_sync_product".len());
        assert!(stamped.ends_with("_sync_product"));
    }
}
