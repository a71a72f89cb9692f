//! Retail KPI reports over a retailiq warehouse
//!
//! [`RetailAnalytics`] resolves the declared [`SalesColumns`] once against
//! the metastore and then answers each report with partition-pruned reads of
//! `fact_sales`, `dim_product` and `dim_customer`.

// Warehouse errors are carried through unboxed
#![allow(clippy::result_large_err)]

mod columns;
mod error;
mod export;
mod reports;
mod values;

pub use columns::{SalesColumns, DIM_CUSTOMER, DIM_PRODUCT, FACT_SALES, ORDER_MONTH, ORDER_YEAR};
pub use error::{AnalyticsError, Result};
pub use export::save_report;
pub use reports::{
    Report, ReportOptions, RetailAnalytics, DEFAULT_REGIONS, DEFAULT_TOP_N, DEFAULT_YEAR,
    DEFAULT_YEARS,
};
