//! Migration generator
//!
//! Turns a [`DifferenceSet`] into a reversible SQL migration script.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::MigrationsConfig;
use crate::db::dialect::Dialect;
use crate::db::script::split_statements;
use crate::error::{Error, Result};
use crate::schema::ddl::{DdlPlan, DdlRenderer};
use crate::schema::difference::DifferenceSet;
use crate::utils::naming;

pub const UP_MARKER: &str = "-- +up";
pub const DOWN_MARKER: &str = "-- +down";
pub const MANUAL_MARKER: &str = "-- MANUAL:";
const HEADER_MARKER: &str = "-- migration:";

/// Which half of a migration to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// One step of a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStep {
    Sql(String),
    /// Work that has to be done by hand, kept as a marker comment
    Manual(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Preview,
    Created,
    Loaded,
}

/// A generated or loaded migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub name: String,
    /// `%Y%m%d%H%M%S` creation timestamp, also the file name prefix
    pub version: String,
    pub up: Vec<MigrationStep>,
    pub down: Vec<MigrationStep>,
    pub status: MigrationStatus,
    pub path: Option<PathBuf>,
}

impl Migration {
    pub fn steps(&self, direction: Direction) -> &[MigrationStep] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Executable statements of one direction
    pub fn statements(&self, direction: Direction) -> Vec<&str> {
        self.steps(direction)
            .iter()
            .filter_map(|step| match step {
                MigrationStep::Sql(sql) => Some(sql.as_str()),
                MigrationStep::Manual(_) => None,
            })
            .collect()
    }

    pub fn manual_steps(&self, direction: Direction) -> Vec<&str> {
        self.steps(direction)
            .iter()
            .filter_map(|step| match step {
                MigrationStep::Manual(note) => Some(note.as_str()),
                MigrationStep::Sql(_) => None,
            })
            .collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.version, self.name)
    }

    /// Render the migration as an SQL script
    pub fn source(&self) -> String {
        let mut source = String::new();
        let _ = writeln!(source, "{} {} {}", HEADER_MARKER, self.version, self.name);

        for (marker, steps) in [(UP_MARKER, &self.up), (DOWN_MARKER, &self.down)] {
            let _ = writeln!(source, "\n{}", marker);
            for step in steps {
                match step {
                    MigrationStep::Sql(sql) => {
                        let _ = writeln!(source, "{};", sql);
                    }
                    MigrationStep::Manual(note) => {
                        let _ = writeln!(source, "{} {}", MANUAL_MARKER, note);
                    }
                }
            }
        }

        source
    }

    /// Parse a script produced by [`source`](Self::source)
    pub fn parse(source: &str, dialect: Dialect) -> Result<Self> {
        let (version, name) = source
            .lines()
            .find_map(|line| line.trim().strip_prefix(HEADER_MARKER))
            .and_then(|rest| rest.trim().split_once(' '))
            .map(|(version, name)| (version.to_string(), name.trim().to_string()))
            .ok_or_else(|| Error::Configuration("Migration header is missing".to_string()))?;

        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut current: Option<Direction> = None;
        let mut buffer = String::new();

        for line in source.lines() {
            let trimmed = line.trim();
            let section = match trimmed {
                UP_MARKER => Some(Direction::Up),
                DOWN_MARKER => Some(Direction::Down),
                _ => None,
            };

            let target = match current {
                Some(Direction::Up) => &mut up,
                Some(Direction::Down) => &mut down,
                None => {
                    current = section;
                    continue;
                }
            };

            if section.is_some() || trimmed.starts_with(MANUAL_MARKER) {
                flush(&mut buffer, target, dialect);
            }

            if let Some(direction) = section {
                current = Some(direction);
            } else if let Some(note) = trimmed.strip_prefix(MANUAL_MARKER) {
                target.push(MigrationStep::Manual(note.trim().to_string()));
            } else {
                buffer.push_str(line);
                buffer.push('\n');
            }
        }

        if let Some(direction) = current {
            let target = match direction {
                Direction::Up => &mut up,
                Direction::Down => &mut down,
            };
            flush(&mut buffer, target, dialect);
        }

        Ok(Migration {
            name,
            version,
            up,
            down,
            status: MigrationStatus::Loaded,
            path: None,
        })
    }
}

fn flush(buffer: &mut String, target: &mut Vec<MigrationStep>, dialect: Dialect) {
    target.extend(
        split_statements(buffer, dialect)
            .into_iter()
            .map(MigrationStep::Sql),
    );
    buffer.clear();
}

/// Options for [`MigrationGenerator::generate`]
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Return the migration without writing a file
    pub preview_only: bool,
    /// Migration name; defaults to `sync_{entity_type}_schema`
    pub name: Option<String>,
}

/// Migration generator for creating SQL migration files
pub struct MigrationGenerator {
    renderer: DdlRenderer,
    directory: PathBuf,
}

impl MigrationGenerator {
    pub fn new(config: &MigrationsConfig, dialect: Dialect) -> Self {
        Self {
            renderer: DdlRenderer::new(dialect),
            directory: PathBuf::from(&config.directory),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Build the migration for a difference set and, unless previewing,
    /// write it to the migrations directory
    pub fn generate(&self, differences: &DifferenceSet, options: &GenerateOptions) -> Result<Migration> {
        let description = options
            .name
            .clone()
            .unwrap_or_else(|| format!("sync_{}_schema", differences.entity_type_code()));
        let stamped = naming::create_migration_name(&description, true);
        let (version, name) = stamped
            .split_once('_')
            .map(|(v, n)| (v.to_string(), n.to_string()))
            .ok_or_else(|| Error::Configuration(format!("Invalid migration name: {}", description)))?;

        let up = differences
            .iter()
            .flat_map(|d| steps(self.renderer.forward(d)))
            .collect();
        let down = differences
            .iter()
            .rev()
            .flat_map(|d| steps(self.renderer.reverse(d)))
            .collect();

        let mut migration = Migration {
            name,
            version,
            up,
            down,
            status: MigrationStatus::Preview,
            path: None,
        };

        if options.preview_only {
            return Ok(migration);
        }

        fs::create_dir_all(&self.directory).map_err(|e| {
            Error::Storage(format!(
                "Failed to create migrations directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;
        let path = self.directory.join(migration.file_name());
        fs::write(&path, migration.source())
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))?;

        tracing::info!(
            entity_type = differences.entity_type_code(),
            path = %path.display(),
            manual_steps = migration.manual_steps(Direction::Up).len(),
            "Created migration"
        );

        migration.status = MigrationStatus::Created;
        migration.path = Some(path);
        Ok(migration)
    }

    /// Migration source without touching the filesystem
    pub fn preview(&self, differences: &DifferenceSet) -> Result<String> {
        let options = GenerateOptions {
            preview_only: true,
            name: None,
        };
        Ok(self.generate(differences, &options)?.source())
    }
}

fn steps(plan: DdlPlan) -> Vec<MigrationStep> {
    match plan {
        DdlPlan::Statements(statements) => statements.into_iter().map(MigrationStep::Sql).collect(),
        DdlPlan::Manual(note) => vec![MigrationStep::Manual(note)],
    }
}
