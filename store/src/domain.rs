//! FILENAME: store/src/domain.rs
//!
//! Typed column ("domain") and table definitions. A `Domain` describes a
//! column independently of any particular table; a `TableDefinition` binds an
//! ordered set of domains to a table name and alias and can render its own
//! DDL. Qualified-name helpers (`dot`, `ref_`) keep hand-written SQL free of
//! stringly-typed table prefixes.

use crate::error::StoreError;

// ============================================================================
// DOMAIN
// ============================================================================

/// Storage class of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Text,
    Integer,
    Real,
    Blob,
    /// ISO-8601 date stored as TEXT.
    Date,
    /// 0/1 stored as INTEGER.
    Boolean,
}

impl DomainKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            DomainKind::Text | DomainKind::Date => "text",
            DomainKind::Integer | DomainKind::Boolean => "integer",
            DomainKind::Real => "real",
            DomainKind::Blob => "blob",
        }
    }

    /// Whether ORDER BY on this domain is collation-sensitive.
    pub fn is_text(self) -> bool {
        matches!(self, DomainKind::Text | DomainKind::Date)
    }
}

/// A column definition, reusable across tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    name: String,
    kind: DomainKind,
    not_null: bool,
    default: Option<String>,
}

impl Domain {
    pub fn new(name: impl Into<String>, kind: DomainKind) -> Self {
        Domain {
            name: name.into(),
            kind,
            not_null: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Default value, rendered verbatim into the DDL.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Drop NOT NULL and any default, for tables that fill their rows in
    /// partially.
    pub fn nullable(mut self) -> Self {
        self.not_null = false;
        self.default = None;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    fn ddl(&self) -> String {
        let mut out = format!("{} {}", self.name, self.kind.sql_type());
        if self.not_null {
            out.push_str(" not null");
        }
        if let Some(default) = &self.default {
            out.push_str(" default ");
            out.push_str(default);
        }
        out
    }
}

// ============================================================================
// TABLE DEFINITION
// ============================================================================

/// A table: name, alias and ordered domains. The primary key column, when
/// present, is always `_id INTEGER PRIMARY KEY AUTOINCREMENT`.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    name: String,
    alias: String,
    with_primary_key: bool,
    domains: Vec<Domain>,
}

pub const PK_ID: &str = "_id";

impl TableDefinition {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        TableDefinition {
            name: name.into(),
            alias: alias.into(),
            with_primary_key: false,
            domains: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self) -> Self {
        self.with_primary_key = true;
        self
    }

    pub fn add_domain(mut self, domain: Domain) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn add_domains(mut self, domains: impl IntoIterator<Item = Domain>) -> Self {
        self.domains.extend(domains);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name() == name)
    }

    /// `alias.column`, for use inside a query that joined this table via
    /// [`ref_`](Self::ref_).
    pub fn dot(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }

    /// `name alias`, for use in FROM/JOIN clauses.
    pub fn ref_(&self) -> String {
        format!("{} {}", self.name, self.alias)
    }

    /// CREATE TABLE statement for this definition.
    pub fn create_sql(&self, if_not_exists: bool) -> Result<String, StoreError> {
        if self.domains.is_empty() && !self.with_primary_key {
            return Err(StoreError::InvalidDefinition(format!(
                "table {} has no columns",
                self.name
            )));
        }
        let mut columns = Vec::with_capacity(self.domains.len() + 1);
        if self.with_primary_key {
            columns.push(format!("{PK_ID} integer primary key autoincrement"));
        }
        columns.extend(self.domains.iter().map(Domain::ddl));
        Ok(format!(
            "CREATE TABLE {}{} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.name,
            columns.join(",")
        ))
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name)
    }

    /// CREATE INDEX IF NOT EXISTS statement over the given columns of this
    /// table.
    pub fn create_index_sql(&self, suffix: &str, unique: bool, columns: &[&str]) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {}_idx_{} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.name,
            suffix,
            self.name,
            columns.join(",")
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
