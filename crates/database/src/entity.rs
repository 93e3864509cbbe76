use crate::error::DbError;
use core_types::{Campaign, Order, Product, Service, User};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgRow, FromRow};

/// A table the generic accessor can query.
///
/// `COLUMNS` lists every column selected into the row type, in the order the
/// row type expects them. Filters, orderings and aggregates may only name
/// columns from this list, which is what keeps user-supplied identifiers out
/// of the generated SQL.
pub trait Entity:
    for<'r> FromRow<'r, PgRow> + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static
{
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Columns with a unique constraint, usable with `find_unique`.
    const UNIQUE_COLUMNS: &'static [&'static str];

    /// Resolves a caller-supplied column name to the known static identifier.
    fn column(name: &str) -> Result<&'static str, DbError> {
        Self::COLUMNS
            .iter()
            .copied()
            .find(|c| *c == name)
            .ok_or_else(|| DbError::UnknownColumn { table: Self::TABLE, column: name.to_string() })
    }

    fn unique_column(name: &str) -> Result<&'static str, DbError> {
        let column = Self::column(name)?;
        if Self::UNIQUE_COLUMNS.contains(&column) {
            Ok(column)
        } else {
            Err(DbError::NotUnique { table: Self::TABLE, column: name.to_string() })
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "email", "name", "created_at"];
    const UNIQUE_COLUMNS: &'static [&'static str] = &["id", "email"];
}

impl Entity for Product {
    const TABLE: &'static str = "products";
    const COLUMNS: &'static [&'static str] = &["id", "sku", "name", "price", "stock", "created_at"];
    const UNIQUE_COLUMNS: &'static [&'static str] = &["id", "sku"];
}

impl Entity for Order {
    const TABLE: &'static str = "orders";
    const COLUMNS: &'static [&'static str] =
        &["id", "user_id", "product_id", "quantity", "total", "status", "created_at"];
    const UNIQUE_COLUMNS: &'static [&'static str] = &["id"];
}

impl Entity for Campaign {
    const TABLE: &'static str = "campaigns";
    const COLUMNS: &'static [&'static str] = &["id", "name", "status", "budget", "starts_at", "ends_at"];
    const UNIQUE_COLUMNS: &'static [&'static str] = &["id", "name"];
}

impl Entity for Service {
    const TABLE: &'static str = "services";
    const COLUMNS: &'static [&'static str] = &["id", "slug", "title", "hourly_rate", "active"];
    const UNIQUE_COLUMNS: &'static [&'static str] = &["id", "slug"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_columns_resolve() {
        assert_eq!(User::column("email").unwrap(), "email");
        assert_eq!(Product::unique_column("sku").unwrap(), "sku");
    }

    #[test]
    fn unknown_or_non_unique_columns_are_rejected() {
        let err = User::column("password").unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn { table: "users", .. }));

        let err = Order::unique_column("status").unwrap_err();
        assert!(matches!(err, DbError::NotUnique { table: "orders", .. }));
    }
}
