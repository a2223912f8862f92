/// Which relational engine this store instance is talking to. Drives both
/// the DDL dialect (`INTEGER PRIMARY KEY AUTOINCREMENT` vs `BIGSERIAL
/// PRIMARY KEY`) and placeholder syntax (`?` vs `$n`).
///
/// The source keeps one process-wide mutable prepared-statement table
/// populated at connect time; per a design note in the store contract,
/// this rewrite scopes that table to the store instance instead and
/// computes placeholders fresh at construction, so two `SqlStore`s in the
/// same process (e.g. one per test) never share or race on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Renders the `n`-th (1-based) placeholder in this dialect's syntax.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Joins `n` placeholders with `, ` starting at position 1, e.g.
    /// `?, ?, ?` or `$1, $2, $3`.
    pub fn placeholder_list(&self, n: usize) -> String {
        (1..=n).map(|i| self.placeholder(i)).collect::<Vec<_>>().join(", ")
    }

    pub fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
        }
    }
}
