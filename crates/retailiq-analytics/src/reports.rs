//! Retail KPI reports
//!
//! Every report reads through [`Warehouse::read_table`], pruning on the
//! `order_year` and `region` partitions where it can, and aggregates in
//! memory. Results are Arrow batches with two-decimal numeric columns.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use retailiq_warehouse::{filter, PartitionFilter, Warehouse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::columns::{ResolvedColumns, SalesColumns, DIM_CUSTOMER, DIM_PRODUCT, FACT_SALES};
use crate::error::Result;
use crate::values::{f64_values, i64_values, mean, pct_change, round2, string_values};

pub const DEFAULT_YEARS: [i64; 4] = [2014, 2015, 2016, 2017];
pub const DEFAULT_YEAR: i64 = 2017;
pub const DEFAULT_REGIONS: [&str; 4] = ["East", "West", "South", "Central"];
pub const DEFAULT_TOP_N: usize = 10;

/// Parameters of [`RetailAnalytics::full_report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Years compared by the growth report
    pub years: Vec<i64>,
    /// Year of the regional and monthly reports
    pub year: i64,
    pub regions: Vec<String>,
    pub top_n: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            years: DEFAULT_YEARS.to_vec(),
            year: DEFAULT_YEAR,
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// A named report
#[derive(Debug, Clone)]
pub struct Report {
    pub name: String,
    pub batch: RecordBatch,
}

impl Report {
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }
}

/// One `fact_sales` row, reduced to what the reports use
#[derive(Debug, Clone)]
struct SaleRow {
    order_id: Option<String>,
    sales: Option<f64>,
    profit: Option<f64>,
    discount: Option<f64>,
    customer_sk: Option<i64>,
    product_sk: Option<i64>,
    month: Option<i64>,
}

#[derive(Debug, Clone)]
struct CustomerRow {
    name: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Default)]
struct CategoryStats {
    sales: f64,
    sales_count: usize,
    profit: f64,
    profit_count: usize,
    discount: f64,
    discount_count: usize,
    products: HashSet<i64>,
}

#[derive(Debug, Default)]
struct Totals {
    sales: f64,
    profit: f64,
    orders: i64,
}

impl Totals {
    fn add(&mut self, row: &SaleRow) {
        self.sales += row.sales.unwrap_or(0.0);
        self.profit += row.profit.unwrap_or(0.0);
        if row.order_id.is_some() {
            self.orders += 1;
        }
    }
}

/// Retail KPIs over an opened warehouse
#[derive(Debug)]
pub struct RetailAnalytics<'a> {
    warehouse: &'a Warehouse,
    columns: ResolvedColumns,
}

impl<'a> RetailAnalytics<'a> {
    /// Resolve `columns` against the metastore. Fails if `fact_sales`,
    /// `dim_product` or `dim_customer` is missing or lacks a declared column.
    pub fn new(warehouse: &'a Warehouse, columns: &SalesColumns) -> Result<Self> {
        let columns = columns.resolve(warehouse)?;
        debug!("Resolved report columns: {:?}", columns);
        Ok(Self { warehouse, columns })
    }

    pub fn warehouse(&self) -> &Warehouse {
        self.warehouse
    }

    /// Sales, profit and distinct orders per year, with percent growth over
    /// the previous listed year. Years without data are left out.
    pub fn year_over_year_growth(&self, years: &[i64]) -> Result<RecordBatch> {
        info!("Analyzing year-over-year growth");

        let mut rows: Vec<(i64, f64, f64, i64)> = Vec::new();
        for &year in years {
            let sales = self.sales(Some(year))?;
            if sales.is_empty() {
                debug!("No sales for {}", year);
                continue;
            }
            let orders: HashSet<&str> = sales.iter().filter_map(|r| r.order_id.as_deref()).collect();
            rows.push((
                year,
                sales.iter().filter_map(|r| r.sales).sum::<f64>(),
                sales.iter().filter_map(|r| r.profit).sum::<f64>(),
                orders.len() as i64,
            ));
        }

        let mut sales_growth = Vec::with_capacity(rows.len());
        let mut profit_growth = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if i == 0 {
                sales_growth.push(None);
                profit_growth.push(None);
            } else {
                let previous = &rows[i - 1];
                sales_growth.push(pct_change(previous.1, row.1).map(round2));
                profit_growth.push(pct_change(previous.2, row.2).map(round2));
            }
        }

        build_batch(
            vec![
                Field::new("Year", DataType::Int64, false),
                Field::new("Sales", DataType::Float64, false),
                Field::new("Profit", DataType::Float64, false),
                Field::new("Orders", DataType::Int64, false),
                Field::new("Sales_Growth", DataType::Float64, true),
                Field::new("Profit_Growth", DataType::Float64, true),
            ],
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1)))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.2)))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.3))),
                Arc::new(Float64Array::from(sales_growth)),
                Arc::new(Float64Array::from(profit_growth)),
            ],
        )
    }

    /// Sales, profit and discount statistics per product category, largest
    /// total sales first
    pub fn category_performance(&self) -> Result<RecordBatch> {
        info!("Analyzing product category performance");

        let sales = self.sales(None)?;
        let products = self.product_categories()?;

        let mut stats: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for row in &sales {
            let Some(category) = row
                .product_sk
                .and_then(|sk| products.get(&sk))
                .and_then(|c| c.as_ref())
            else {
                continue;
            };

            let entry = stats.entry(category.clone()).or_default();
            if let Some(sales) = row.sales {
                entry.sales += sales;
                entry.sales_count += 1;
            }
            if let Some(profit) = row.profit {
                entry.profit += profit;
                entry.profit_count += 1;
            }
            if let Some(discount) = row.discount {
                entry.discount += discount;
                entry.discount_count += 1;
            }
            if let Some(sk) = row.product_sk {
                entry.products.insert(sk);
            }
        }

        let mut rows: Vec<(String, CategoryStats)> = stats.into_iter().collect();
        rows.sort_by(|a, b| descending(a.1.sales, b.1.sales));

        build_batch(
            vec![
                Field::new("Category", DataType::Utf8, false),
                Field::new("Total_Sales", DataType::Float64, false),
                Field::new("Avg_Sale", DataType::Float64, false),
                Field::new("Transactions", DataType::Int64, false),
                Field::new("Total_Profit", DataType::Float64, false),
                Field::new("Avg_Profit", DataType::Float64, false),
                Field::new("Avg_Discount", DataType::Float64, false),
                Field::new("Products", DataType::Int64, false),
            ],
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0.as_str()))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.sales)))),
                Arc::new(Float64Array::from_iter_values(
                    rows.iter().map(|r| round2(mean(r.1.sales, r.1.sales_count))),
                )),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1.sales_count as i64))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.profit)))),
                Arc::new(Float64Array::from_iter_values(
                    rows.iter().map(|r| round2(mean(r.1.profit, r.1.profit_count))),
                )),
                Arc::new(Float64Array::from_iter_values(
                    rows.iter().map(|r| round2(mean(r.1.discount, r.1.discount_count))),
                )),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1.products.len() as i64))),
            ],
        )
    }

    /// Sales per month and category for one year, by month then largest
    /// sales first
    pub fn monthly_sales_by_category(&self, year: i64) -> Result<RecordBatch> {
        info!("Analyzing monthly sales by category for {}", year);

        let sales = self.sales(Some(year))?;
        let products = self.product_categories()?;

        let mut groups: BTreeMap<(i64, String), Totals> = BTreeMap::new();
        for row in &sales {
            let Some(month) = row.month else {
                continue;
            };
            let Some(category) = row
                .product_sk
                .and_then(|sk| products.get(&sk))
                .and_then(|c| c.as_ref())
            else {
                continue;
            };
            groups.entry((month, category.clone())).or_default().add(row);
        }

        let mut rows: Vec<((i64, String), Totals)> = groups.into_iter().collect();
        rows.sort_by(|a, b| a.0 .0.cmp(&b.0 .0).then(descending(a.1.sales, b.1.sales)));

        build_batch(
            vec![
                Field::new("Month", DataType::Int64, false),
                Field::new("Category", DataType::Utf8, false),
                Field::new("Sales", DataType::Float64, false),
                Field::new("Profit", DataType::Float64, false),
                Field::new("Orders", DataType::Int64, false),
            ],
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0 .0))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0 .1.as_str()))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.sales)))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.profit)))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1.orders))),
            ],
        )
    }

    /// Sales of one year per customer region. Each region is read through its
    /// own `dim_customer` partition; regions without customers are skipped.
    pub fn regional_performance<S: AsRef<str>>(&self, year: i64, regions: &[S]) -> Result<RecordBatch> {
        info!("Analyzing regional performance for {}", year);

        let sales = self.sales(Some(year))?;

        let mut rows: Vec<(String, Totals, i64)> = Vec::new();
        for region in regions {
            let region = region.as_ref();
            let customers = self.warehouse.read_table(
                DIM_CUSTOMER,
                &filter([(self.columns.region.as_str(), region)]),
            )?;
            if customers.num_rows() == 0 {
                debug!("No customers in region {}", region);
                continue;
            }

            let keys: HashSet<i64> =
                i64_values(&customers, DIM_CUSTOMER, &self.columns.customer_sk)?
                    .into_iter()
                    .flatten()
                    .collect();

            let mut totals = Totals::default();
            for row in sales
                .iter()
                .filter(|r| r.customer_sk.is_some_and(|sk| keys.contains(&sk)))
            {
                totals.sales += row.sales.unwrap_or(0.0);
                totals.profit += row.profit.unwrap_or(0.0);
                totals.orders += 1;
            }
            rows.push((region.to_string(), totals, keys.len() as i64));
        }

        rows.sort_by(|a, b| descending(a.1.sales, b.1.sales));

        build_batch(
            vec![
                Field::new("Region", DataType::Utf8, false),
                Field::new("Sales", DataType::Float64, false),
                Field::new("Profit", DataType::Float64, false),
                Field::new("Transactions", DataType::Int64, false),
                Field::new("Customers", DataType::Int64, false),
            ],
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0.as_str()))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.sales)))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.profit)))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1.orders))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
            ],
        )
    }

    /// The `top_n` customers by total sales across all years
    pub fn customer_lifetime_value(&self, top_n: usize) -> Result<RecordBatch> {
        info!("Analyzing top {} customers", top_n);

        let sales = self.sales(None)?;
        let customers = self.customers()?;

        let mut groups: HashMap<i64, Totals> = HashMap::new();
        for row in &sales {
            if let Some(sk) = row.customer_sk {
                groups.entry(sk).or_default().add(row);
            }
        }

        let mut rows: Vec<(i64, Totals, &CustomerRow)> = groups
            .into_iter()
            .filter_map(|(sk, totals)| customers.get(&sk).map(|c| (sk, totals, c)))
            .collect();
        rows.sort_by(|a, b| descending(a.1.sales, b.1.sales).then(a.0.cmp(&b.0)));
        rows.truncate(top_n);

        build_batch(
            vec![
                Field::new("Customer_SK", DataType::Int64, false),
                Field::new("Total_Sales", DataType::Float64, false),
                Field::new("Total_Profit", DataType::Float64, false),
                Field::new("Order_Count", DataType::Int64, false),
                Field::new("Customer_Name", DataType::Utf8, true),
                Field::new("Region", DataType::Utf8, true),
            ],
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.sales)))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| round2(r.1.profit)))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1.orders))),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.2.name.clone()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.2.region.clone()).collect::<Vec<_>>(),
                )),
            ],
        )
    }

    /// Every report, named the way [`crate::save_report`] names its files
    pub fn full_report(&self, options: &ReportOptions) -> Result<Vec<Report>> {
        info!("Generating full analytics report");

        Ok(vec![
            Report::new("yoy_growth", self.year_over_year_growth(&options.years)?),
            Report::new("category_performance", self.category_performance()?),
            Report::new(
                format!("regional_{}", options.year),
                self.regional_performance(options.year, options.regions.as_slice())?,
            ),
            Report::new("top_customers", self.customer_lifetime_value(options.top_n)?),
            Report::new(
                format!("monthly_trends_{}", options.year),
                self.monthly_sales_by_category(options.year)?,
            ),
        ])
    }

    fn sales(&self, year: Option<i64>) -> Result<Vec<SaleRow>> {
        let filters = match year {
            Some(year) => filter([(self.columns.order_year.as_str(), year)]),
            None => PartitionFilter::new(),
        };
        let batch = self.warehouse.read_table(FACT_SALES, &filters)?;
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }

        let c = &self.columns;
        let order_ids = string_values(&batch, FACT_SALES, &c.order_id)?;
        let sales = f64_values(&batch, FACT_SALES, &c.sales)?;
        let profits = f64_values(&batch, FACT_SALES, &c.profit)?;
        let discounts = f64_values(&batch, FACT_SALES, &c.discount)?;
        let customers = i64_values(&batch, FACT_SALES, &c.sales_customer_sk)?;
        let products = i64_values(&batch, FACT_SALES, &c.sales_product_sk)?;
        let months = i64_values(&batch, FACT_SALES, &c.order_month)?;

        Ok((0..batch.num_rows())
            .map(|i| SaleRow {
                order_id: order_ids[i].clone(),
                sales: sales[i],
                profit: profits[i],
                discount: discounts[i],
                customer_sk: customers[i],
                product_sk: products[i],
                month: months[i],
            })
            .collect())
    }

    fn product_categories(&self) -> Result<HashMap<i64, Option<String>>> {
        let batch = self
            .warehouse
            .read_table(DIM_PRODUCT, &PartitionFilter::new())?;
        if batch.num_rows() == 0 {
            return Ok(HashMap::new());
        }

        let keys = i64_values(&batch, DIM_PRODUCT, &self.columns.product_sk)?;
        let categories = string_values(&batch, DIM_PRODUCT, &self.columns.category)?;

        let mut products = HashMap::new();
        for (key, category) in keys.into_iter().zip(categories) {
            if let Some(key) = key {
                products.entry(key).or_insert(category);
            }
        }
        Ok(products)
    }

    fn customers(&self) -> Result<HashMap<i64, CustomerRow>> {
        let batch = self
            .warehouse
            .read_table(DIM_CUSTOMER, &PartitionFilter::new())?;
        if batch.num_rows() == 0 {
            return Ok(HashMap::new());
        }

        let keys = i64_values(&batch, DIM_CUSTOMER, &self.columns.customer_sk)?;
        let names = string_values(&batch, DIM_CUSTOMER, &self.columns.customer_name)?;
        let regions = string_values(&batch, DIM_CUSTOMER, &self.columns.region)?;

        let mut customers = HashMap::new();
        for ((key, name), region) in keys.into_iter().zip(names).zip(regions) {
            if let Some(key) = key {
                customers.entry(key).or_insert(CustomerRow { name, region });
            }
        }
        Ok(customers)
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

fn build_batch(fields: Vec<Field>, columns: Vec<ArrayRef>) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
