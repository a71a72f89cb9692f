//! Column declarations for the retail star schema
//!
//! Source extracts are inconsistent about column casing (`Sales` vs
//! `sales`), so reports never sniff names from a batch. The expected names
//! are declared up front in [`SalesColumns`] and resolved once against the
//! metastore when [`crate::RetailAnalytics`] is created.

use retailiq_warehouse::{TableMetadata, Warehouse};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalyticsError, Result};

pub const FACT_SALES: &str = "fact_sales";
pub const DIM_PRODUCT: &str = "dim_product";
pub const DIM_CUSTOMER: &str = "dim_customer";

pub const ORDER_YEAR: &str = "order_year";
pub const ORDER_MONTH: &str = "order_month";

/// Expected column names, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesColumns {
    pub sales: String,
    pub profit: String,
    pub discount: String,
    pub order_id: String,
    pub customer_sk: String,
    pub product_sk: String,
    pub customer_name: String,
    pub category: String,
    pub region: String,
}

impl Default for SalesColumns {
    fn default() -> Self {
        Self {
            sales: "sales".to_string(),
            profit: "profit".to_string(),
            discount: "discount".to_string(),
            order_id: "order_id".to_string(),
            customer_sk: "customer_sk".to_string(),
            product_sk: "product_sk".to_string(),
            customer_name: "customer_name".to_string(),
            category: "category".to_string(),
            region: "region".to_string(),
        }
    }
}

impl SalesColumns {
    pub fn names(&self) -> [(&'static str, &str); 9] {
        [
            ("sales", &self.sales),
            ("profit", &self.profit),
            ("discount", &self.discount),
            ("order_id", &self.order_id),
            ("customer_sk", &self.customer_sk),
            ("product_sk", &self.product_sk),
            ("customer_name", &self.customer_name),
            ("category", &self.category),
            ("region", &self.region),
        ]
    }

    /// Map every declared name onto the stored column name of its table
    pub(crate) fn resolve(&self, warehouse: &Warehouse) -> Result<ResolvedColumns> {
        let sales = warehouse.metadata(FACT_SALES)?;
        let products = warehouse.metadata(DIM_PRODUCT)?;
        let customers = warehouse.metadata(DIM_CUSTOMER)?;

        Ok(ResolvedColumns {
            sales: resolve_in(sales, &self.sales)?,
            profit: resolve_in(sales, &self.profit)?,
            discount: resolve_in(sales, &self.discount)?,
            order_id: resolve_in(sales, &self.order_id)?,
            sales_customer_sk: resolve_in(sales, &self.customer_sk)?,
            sales_product_sk: resolve_in(sales, &self.product_sk)?,
            order_year: resolve_in(sales, ORDER_YEAR)?,
            order_month: resolve_in(sales, ORDER_MONTH)?,
            product_sk: resolve_in(products, &self.product_sk)?,
            category: resolve_in(products, &self.category)?,
            customer_sk: resolve_in(customers, &self.customer_sk)?,
            customer_name: resolve_in(customers, &self.customer_name)?,
            region: resolve_in(customers, &self.region)?,
        })
    }
}

/// Stored column names, per table
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedColumns {
    // fact_sales
    pub sales: String,
    pub profit: String,
    pub discount: String,
    pub order_id: String,
    pub sales_customer_sk: String,
    pub sales_product_sk: String,
    pub order_year: String,
    pub order_month: String,
    // dim_product
    pub product_sk: String,
    pub category: String,
    // dim_customer
    pub customer_sk: String,
    pub customer_name: String,
    pub region: String,
}

fn resolve_in(metadata: &TableMetadata, wanted: &str) -> Result<String> {
    // Sidecars written before schema stamping carry no column list
    if metadata.columns.is_empty() && !metadata.partition_columns.iter().any(|c| c == wanted) {
        debug!(
            "No stamped schema for '{}', using '{}' as declared",
            metadata.table_name, wanted
        );
        return Ok(wanted.to_string());
    }

    let available: Vec<&str> = metadata
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .chain(metadata.partition_columns.iter().map(String::as_str))
        .collect();

    if let Some(exact) = available.iter().find(|name| **name == wanted) {
        return Ok(exact.to_string());
    }

    let wanted_trimmed = wanted.trim();
    available
        .iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted_trimmed))
        .map(|name| name.to_string())
        .ok_or_else(|| AnalyticsError::missing_column(&metadata.table_name, wanted, &available))
}
