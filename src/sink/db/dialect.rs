use crate::config::DbBackend;

use super::schema::{Column, LogicalType};

/// SQL generation for one target dialect: identifier quoting, the
/// logical-to-physical type map, table creation/evolution, the column
/// probe, and the parameterized upsert. The upsert must stay idempotent
/// per `$id` on every backend, since failed rows are simply re-presented
/// by the next overlapping window.
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote(&self, ident: &str) -> String;

    fn map_type(&self, ty: LogicalType) -> &'static str;

    fn placeholder(&self, n: usize) -> String;

    fn create_table(&self, table: &str, columns: &[Column]) -> String;

    fn add_columns(&self, table: &str, columns: &[Column]) -> String;

    /// Parameterized upsert. MySQL and PostgreSQL take every value twice
    /// (insert list, then update list); SQL Server's MERGE additionally
    /// leads with the `$id` match value.
    fn upsert(&self, table: &str, columns: &[String]) -> String;

    fn table_columns_query(&self, table: &str) -> String;
}

pub struct MySqlDialect;
pub struct PostgresDialect;
pub struct SqlServerDialect;

pub fn for_backend(backend: DbBackend) -> &'static dyn SqlDialect {
    match backend {
        DbBackend::MySql => &MySqlDialect,
        DbBackend::Postgres => &PostgresDialect,
        DbBackend::SqlServer => &SqlServerDialect,
    }
}

fn column_defs(dialect: &dyn SqlDialect, columns: &[Column]) -> String {
    columns
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", dialect.quote(&col.name), dialect.map_type(col.ty));
            if col.name == "$id" {
                def.push_str(" NOT NULL PRIMARY KEY");
            }
            def
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn map_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::String => "varchar(255)",
            LogicalType::Text => "text",
            LogicalType::Int | LogicalType::Float => "numeric",
            LogicalType::Bool => "boolean",
            LogicalType::Json => "json",
        }
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_owned()
    }

    fn create_table(&self, table: &str, columns: &[Column]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            column_defs(self, columns)
        )
    }

    fn add_columns(&self, table: &str, columns: &[Column]) -> String {
        let adds = columns
            .iter()
            .map(|col| format!("ADD {} {}", self.quote(&col.name), self.map_type(col.ty)))
            .collect::<Vec<_>>()
            .join(",");
        format!("ALTER TABLE {table} {adds}")
    }

    fn upsert(&self, table: &str, columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(",");
        let inserts = vec!["?"; columns.len()].join(",");
        let updates = columns
            .iter()
            .map(|c| format!("{}=?", self.quote(c)))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "INSERT INTO {table} ({cols}) VALUES ({inserts}) ON DUPLICATE KEY UPDATE {updates}"
        )
    }

    fn table_columns_query(&self, table: &str) -> String {
        format!("SELECT column_name FROM information_schema.columns WHERE table_name = '{table}'")
    }
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn map_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::String => "varchar(255)",
            LogicalType::Text => "text",
            LogicalType::Int | LogicalType::Float => "numeric",
            LogicalType::Bool => "boolean",
            LogicalType::Json => "json",
        }
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn create_table(&self, table: &str, columns: &[Column]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            column_defs(self, columns)
        )
    }

    fn add_columns(&self, table: &str, columns: &[Column]) -> String {
        let adds = columns
            .iter()
            .map(|col| {
                format!(
                    "ADD IF NOT EXISTS {} {}",
                    self.quote(&col.name),
                    self.map_type(col.ty)
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("ALTER TABLE {table} {adds}")
    }

    fn upsert(&self, table: &str, columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(",");
        let inserts = (1..=columns.len())
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(",");
        let updates = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}={}", self.quote(c), self.placeholder(columns.len() + i + 1)))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "INSERT INTO {table} ({cols}) VALUES ({inserts}) ON CONFLICT (\"$id\") DO UPDATE SET {updates}"
        )
    }

    fn table_columns_query(&self, table: &str) -> String {
        format!("SELECT column_name FROM information_schema.columns WHERE table_name = '{table}'")
    }
}

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{ident}]")
    }

    fn map_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::String => "nvarchar(255)",
            LogicalType::Text => "text",
            LogicalType::Int | LogicalType::Float => "numeric",
            LogicalType::Bool => "bit",
            // nvarchar caps at 4000
            LogicalType::Json => "nvarchar(4000)",
        }
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_owned()
    }

    fn create_table(&self, table: &str, columns: &[Column]) -> String {
        format!(
            "IF NOT EXISTS (SELECT [name] FROM SYS.TABLES WHERE [name] = '{table}') CREATE TABLE {table} ({})",
            column_defs(self, columns)
        )
    }

    fn add_columns(&self, table: &str, columns: &[Column]) -> String {
        let adds = columns
            .iter()
            .map(|col| format!("{} {}", self.quote(&col.name), self.map_type(col.ty)))
            .collect::<Vec<_>>()
            .join(",");
        format!("ALTER TABLE {table} ADD {adds}")
    }

    fn upsert(&self, table: &str, columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(",");
        let inserts = vec!["?"; columns.len()].join(",");
        let updates = columns
            .iter()
            .map(|c| format!("{}=?", self.quote(c)))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "MERGE {table} USING (SELECT ? AS ID) AS T ON {table}.[$id]=T.ID \
             WHEN MATCHED THEN UPDATE SET {updates} \
             WHEN NOT MATCHED THEN INSERT ({cols}) VALUES ({inserts})"
        )
    }

    fn table_columns_query(&self, table: &str) -> String {
        format!("SELECT name FROM sys.columns WHERE object_id = OBJECT_ID('{table}')")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn mysql_upsert_shape() {
        let sql = MySqlDialect.upsert("df_transactions", &cols(&["$id", "x", "y"]));
        assert_eq!(
            sql,
            "INSERT INTO df_transactions (`$id`,`x`,`y`) VALUES (?,?,?) \
             ON DUPLICATE KEY UPDATE `$id`=?,`x`=?,`y`=?"
        );
        assert_eq!(sql.matches('?').count(), 6);
    }

    #[test]
    fn postgres_upsert_shape() {
        let sql = PostgresDialect.upsert("df_transactions", &cols(&["$id", "x", "y"]));
        assert_eq!(
            sql,
            "INSERT INTO df_transactions (\"$id\",\"x\",\"y\") VALUES ($1,$2,$3) \
             ON CONFLICT (\"$id\") DO UPDATE SET \"$id\"=$4,\"x\"=$5,\"y\"=$6"
        );
    }

    #[test]
    fn sqlserver_upsert_shape() {
        let sql = SqlServerDialect.upsert("df_transactions", &cols(&["$id", "x", "y"]));
        assert_eq!(
            sql,
            "MERGE df_transactions USING (SELECT ? AS ID) AS T ON df_transactions.[$id]=T.ID \
             WHEN MATCHED THEN UPDATE SET [$id]=?,[x]=?,[y]=? \
             WHEN NOT MATCHED THEN INSERT ([$id],[x],[y]) VALUES (?,?,?)"
        );
        // id match value, three update values, three insert values
        assert_eq!(sql.matches('?').count(), 7);
    }

    #[test]
    fn upsert_generation_is_deterministic() {
        let columns = cols(&["$id", "fired", "type"]);
        for dialect in [
            &MySqlDialect as &dyn SqlDialect,
            &PostgresDialect,
            &SqlServerDialect,
        ] {
            assert_eq!(
                dialect.upsert("df_contacts", &columns),
                dialect.upsert("df_contacts", &columns)
            );
        }
    }

    #[test]
    fn create_table_marks_the_primary_key() {
        let columns = vec![
            Column {
                name: "$id".to_owned(),
                ty: LogicalType::String,
            },
            Column {
                name: "fired".to_owned(),
                ty: LogicalType::String,
            },
        ];
        let sql = MySqlDialect.create_table("df_transactions", &columns);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS df_transactions \
             (`$id` varchar(255) NOT NULL PRIMARY KEY,`fired` varchar(255))"
        );

        let sql = SqlServerDialect.create_table("df_transactions", &columns);
        assert!(sql.starts_with(
            "IF NOT EXISTS (SELECT [name] FROM SYS.TABLES WHERE [name] = 'df_transactions')"
        ));
        assert!(sql.contains("[$id] nvarchar(255) NOT NULL PRIMARY KEY"));

        let sql = PostgresDialect.create_table("df_transactions", &columns);
        assert!(sql.contains("\"$id\" varchar(255) NOT NULL PRIMARY KEY"));
    }

    #[test]
    fn add_columns_is_additive_only() {
        let columns = vec![
            Column {
                name: "score".to_owned(),
                ty: LogicalType::Int,
            },
            Column {
                name: "vip".to_owned(),
                ty: LogicalType::Bool,
            },
        ];
        assert_eq!(
            MySqlDialect.add_columns("df_contacts", &columns),
            "ALTER TABLE df_contacts ADD `score` numeric,ADD `vip` boolean"
        );
        assert_eq!(
            PostgresDialect.add_columns("df_contacts", &columns),
            "ALTER TABLE df_contacts ADD IF NOT EXISTS \"score\" numeric,\
             ADD IF NOT EXISTS \"vip\" boolean"
        );
        assert_eq!(
            SqlServerDialect.add_columns("df_contacts", &columns),
            "ALTER TABLE df_contacts ADD [score] numeric,[vip] bit"
        );
    }

    #[test]
    fn type_map_per_dialect() {
        assert_eq!(MySqlDialect.map_type(LogicalType::Json), "json");
        assert_eq!(MySqlDialect.map_type(LogicalType::Bool), "boolean");
        assert_eq!(PostgresDialect.map_type(LogicalType::Int), "numeric");
        assert_eq!(SqlServerDialect.map_type(LogicalType::Bool), "bit");
        assert_eq!(
            SqlServerDialect.map_type(LogicalType::Json),
            "nvarchar(4000)"
        );
        assert_eq!(SqlServerDialect.map_type(LogicalType::String), "nvarchar(255)");
    }
}
